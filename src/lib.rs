pub mod cache;
pub mod config;
pub mod device;
pub mod domain;
pub mod http;
pub mod identity;
pub mod state;
pub mod store;
pub mod version;
pub mod workflow;
