use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::Context as _;
use tokio::sync::Mutex;

use crate::{
    domain::{MachineRecord, MachineStatus},
    state::JsonSnapshotStore,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable source of truth for machine records.
///
/// Each call is an independent step: nothing here groups several field
/// updates into one transaction.
pub trait MachineStore: Send + Sync + 'static {
    fn list_machines_at_location<'a>(
        &'a self,
        location_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<MachineRecord>>>;

    fn get_machine<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<MachineRecord>>>;

    fn update_machine_status<'a>(
        &'a self,
        machine_id: &'a str,
        status: MachineStatus,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    fn update_machine_job_id<'a>(
        &'a self,
        machine_id: &'a str,
        job_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// `MachineStore` over the shared `machines.json`.
///
/// Reads go straight to disk. Writes from this process are serialized so two
/// handlers never interleave their reload and rewrite.
#[derive(Clone)]
pub struct LocalMachineStore {
    snapshot: JsonSnapshotStore,
    write_lock: Arc<Mutex<()>>,
}

impl LocalMachineStore {
    pub fn new(snapshot: JsonSnapshotStore) -> Self {
        Self {
            snapshot,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl MachineStore for LocalMachineStore {
    fn list_machines_at_location<'a>(
        &'a self,
        location_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<MachineRecord>>> {
        Box::pin(async move {
            self.snapshot
                .list_machines_at_location(location_id)
                .with_context(|| format!("list machines at {location_id}"))
        })
    }

    fn get_machine<'a>(
        &'a self,
        machine_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<MachineRecord>>> {
        Box::pin(async move {
            self.snapshot
                .get_machine(machine_id)
                .with_context(|| format!("read machine {machine_id}"))
        })
    }

    fn update_machine_status<'a>(
        &'a self,
        machine_id: &'a str,
        status: MachineStatus,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.snapshot
                .update_machine_status(machine_id, status)
                .with_context(|| format!("update status of {machine_id}"))
        })
    }

    fn update_machine_job_id<'a>(
        &'a self,
        machine_id: &'a str,
        job_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.snapshot
                .update_machine_job_id(machine_id, job_id.to_string())
                .with_context(|| format!("update job_id of {machine_id}"))
        })
    }
}
