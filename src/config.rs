use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::identity::TokenHash;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "machinehub",
    about = "Smart machine reservation service",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server (default).
    Run,

    /// Seed a machine record as AVAILABLE under --data-dir.
    Provision(ProvisionArgs),

    /// Print an argon2id hash for use with --api-token-hash.
    HashToken(HashTokenArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProvisionArgs {
    #[arg(long, value_name = "ID")]
    pub machine_id: String,

    #[arg(long, value_name = "ID")]
    pub location_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct HashTokenArgs {
    #[arg(long, value_name = "TOKEN", conflicts_with = "token_stdin")]
    pub token: Option<String>,

    /// Read the token from the first line of stdin.
    #[arg(long)]
    pub token_stdin: bool,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "MACHINEHUB_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:62480"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        global = true,
        env = "MACHINEHUB_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "MACHINEHUB_API_TOKEN_HASH",
        value_name = "HASH",
        default_value = ""
    )]
    pub api_token_hash: String,

    #[arg(
        long,
        global = true,
        env = "MACHINEHUB_DEVICE_API_BASE_URL",
        value_name = "URL",
        default_value = "http://127.0.0.1:62481"
    )]
    pub device_api_base_url: String,

    #[arg(
        long,
        global = true,
        env = "MACHINEHUB_DEVICE_API_TOKEN",
        value_name = "TOKEN",
        default_value = "",
        hide_env_values = true
    )]
    pub device_api_token: String,

    #[arg(
        long = "device-timeout-secs",
        global = true,
        env = "MACHINEHUB_DEVICE_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=120)
    )]
    pub device_timeout_secs: u64,
}

impl Config {
    pub fn api_token_hash(&self) -> Option<TokenHash> {
        TokenHash::parse(&self.api_token_hash)
    }
}
