//! Machine reservation and start workflow.
//!
//! Three operations drive a machine through
//! `AVAILABLE -> AWAITING_DROPOFF -> RUNNING` (or `ERROR` when a start fails
//! and the store confirms a hardware fault). Every operation catches its own
//! faults and ends in a [`MachineResult`]; nothing propagates past it.
//!
//! Known gaps, kept as-is:
//! - reservation picks the first AVAILABLE machine in store order and takes no
//!   lock, so two concurrent requests for the same location can both claim
//!   the same machine (last writer wins);
//! - the status and job id of a reservation are two separate store writes and
//!   are not rolled back if a later step fails;
//! - nothing returns an unclaimed AWAITING_DROPOFF machine to AVAILABLE.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::MachineCache,
    device::{DeviceError, DeviceGateway},
    domain::{MachineRecord, MachineStatus},
    store::MachineStore,
};

/// Non-standard status signalling a device failure confirmed by the store.
pub const HARDWARE_ERROR_STATUS: u16 = 520;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    NotFound,
    BadRequest,
    Unauthorized,
    InternalServerError,
    HardwareError,
}

impl ResultCode {
    pub fn http_status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
            Self::HardwareError => HARDWARE_ERROR_STATUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    AuthFailure,
    NotFound,
    InvalidState,
    HardwareFault,
    Transient,
}

impl FaultKind {
    pub fn code(self) -> ResultCode {
        match self {
            Self::AuthFailure => ResultCode::Unauthorized,
            Self::NotFound => ResultCode::NotFound,
            Self::InvalidState => ResultCode::BadRequest,
            Self::HardwareFault => ResultCode::HardwareError,
            Self::Transient => ResultCode::InternalServerError,
        }
    }
}

#[derive(Debug)]
pub enum WorkflowError {
    NotFound,
    /// The machine exists but is not in the status the transition needs.
    InvalidState(MachineRecord),
    HardwareFault(MachineRecord),
    Transient(anyhow::Error),
}

impl WorkflowError {
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::NotFound => FaultKind::NotFound,
            Self::InvalidState(_) => FaultKind::InvalidState,
            Self::HardwareFault(_) => FaultKind::HardwareFault,
            Self::Transient(_) => FaultKind::Transient,
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "machine not found"),
            Self::InvalidState(m) => write!(
                f,
                "machine {} is {}, expected {}",
                m.machine_id,
                m.status,
                MachineStatus::AwaitingDropoff
            ),
            Self::HardwareFault(m) => write!(f, "hardware fault on machine {}", m.machine_id),
            Self::Transient(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<anyhow::Error> for WorkflowError {
    fn from(value: anyhow::Error) -> Self {
        Self::Transient(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineResult {
    pub code: ResultCode,
    pub machine: Option<MachineRecord>,
}

impl MachineResult {
    pub fn ok(machine: MachineRecord) -> Self {
        Self {
            code: ResultCode::Ok,
            machine: Some(machine),
        }
    }

    pub fn fault(kind: FaultKind) -> Self {
        Self {
            code: kind.code(),
            machine: None,
        }
    }
}

impl From<WorkflowError> for MachineResult {
    fn from(value: WorkflowError) -> Self {
        let code = value.kind().code();
        let machine = match value {
            WorkflowError::InvalidState(m) | WorkflowError::HardwareFault(m) => Some(m),
            WorkflowError::NotFound | WorkflowError::Transient(_) => None,
        };
        Self { code, machine }
    }
}

impl From<Result<MachineRecord, WorkflowError>> for MachineResult {
    fn from(value: Result<MachineRecord, WorkflowError>) -> Self {
        match value {
            Ok(machine) => Self::ok(machine),
            Err(e) => e.into(),
        }
    }
}

#[derive(Clone)]
pub struct ReservationWorkflow {
    store: Arc<dyn MachineStore>,
    cache: Arc<dyn MachineCache>,
    device: Arc<dyn DeviceGateway>,
}

impl ReservationWorkflow {
    pub fn new(
        store: Arc<dyn MachineStore>,
        cache: Arc<dyn MachineCache>,
        device: Arc<dyn DeviceGateway>,
    ) -> Self {
        Self {
            store,
            cache,
            device,
        }
    }

    /// Reserves the first AVAILABLE machine at `location_id` for `job_id`.
    pub async fn request_machine(&self, location_id: &str, job_id: &str) -> MachineResult {
        let res = self.try_request_machine(location_id, job_id).await;
        conclude("request_machine", res)
    }

    /// Cache-aside read of a single machine.
    pub async fn get_machine(&self, machine_id: &str) -> MachineResult {
        let res = self.try_get_machine(machine_id).await;
        conclude("get_machine", res)
    }

    /// Starts the cycle of a machine that is awaiting drop-off.
    pub async fn start_machine(&self, machine_id: &str) -> MachineResult {
        let res = self.try_start_machine(machine_id).await;
        conclude("start_machine", res)
    }

    async fn try_request_machine(
        &self,
        location_id: &str,
        job_id: &str,
    ) -> Result<MachineRecord, WorkflowError> {
        let machines = self.store.list_machines_at_location(location_id).await?;

        // First match in store order; no balancing or randomisation.
        let Some(candidate) = machines.into_iter().find(MachineRecord::is_available) else {
            debug!(location_id, "no available machine");
            return Err(WorkflowError::NotFound);
        };
        let machine_id = candidate.machine_id;

        // Two separate writes: readers may briefly see AWAITING_DROPOFF with the old job id.
        self.store
            .update_machine_status(&machine_id, MachineStatus::AwaitingDropoff)
            .await?;
        self.store.update_machine_job_id(&machine_id, job_id).await?;

        let machine = self.refresh(&machine_id).await?;
        info!(
            machine_id = %machine.machine_id,
            location_id,
            job_id,
            "machine reserved"
        );
        Ok(machine)
    }

    async fn try_get_machine(&self, machine_id: &str) -> Result<MachineRecord, WorkflowError> {
        if let Some(machine) = self.cache.get(machine_id).await? {
            debug!(machine_id, "machine cache hit");
            return Ok(machine);
        }

        let Some(machine) = self.store.get_machine(machine_id).await? else {
            return Err(WorkflowError::NotFound);
        };
        self.cache
            .put(machine_id.to_string(), machine.clone())
            .await?;
        Ok(machine)
    }

    async fn try_start_machine(&self, machine_id: &str) -> Result<MachineRecord, WorkflowError> {
        // Always the store, never the cache: the device is only commanded on a fresh status.
        let Some(machine) = self.store.get_machine(machine_id).await? else {
            return Err(WorkflowError::NotFound);
        };
        if machine.status != MachineStatus::AwaitingDropoff {
            info!(machine_id, status = %machine.status, "start rejected");
            return Err(WorkflowError::InvalidState(machine));
        }

        if let Err(primary) = self.start_cycle_and_mark_running(machine_id).await {
            return Err(self.classify_start_failure(machine_id, primary).await);
        }

        let machine = self.refresh(machine_id).await?;
        info!(machine_id, "machine running");
        Ok(machine)
    }

    async fn start_cycle_and_mark_running(&self, machine_id: &str) -> anyhow::Result<()> {
        self.device.start_cycle(machine_id).await?;
        self.store
            .update_machine_status(machine_id, MachineStatus::Running)
            .await
    }

    /// A failed start is only reported as a hardware fault when a fresh store
    /// read independently shows ERROR. Anything else, including a fault while
    /// checking, is transient.
    async fn classify_start_failure(
        &self,
        machine_id: &str,
        primary: anyhow::Error,
    ) -> WorkflowError {
        let hardware_fault_reported = primary
            .downcast_ref::<DeviceError>()
            .is_some_and(DeviceError::is_hardware_fault);
        warn!(
            machine_id,
            hardware_fault_reported,
            error = %format!("{primary:#}"),
            "start cycle failed"
        );

        match self.confirm_hardware_fault(machine_id).await {
            Ok(Some(machine)) => {
                warn!(machine_id, "hardware fault confirmed by store");
                WorkflowError::HardwareFault(machine)
            }
            Ok(None) => WorkflowError::Transient(primary),
            Err(secondary) => {
                warn!(
                    machine_id,
                    error = %format!("{secondary:#}"),
                    "fault classification failed"
                );
                WorkflowError::Transient(primary)
            }
        }
    }

    async fn confirm_hardware_fault(
        &self,
        machine_id: &str,
    ) -> anyhow::Result<Option<MachineRecord>> {
        let Some(machine) = self.store.get_machine(machine_id).await? else {
            return Ok(None);
        };
        if machine.status != MachineStatus::Error {
            return Ok(None);
        }
        self.store
            .update_machine_status(machine_id, MachineStatus::Error)
            .await?;
        self.cache
            .put(machine_id.to_string(), machine.clone())
            .await?;
        Ok(Some(machine))
    }

    /// Re-reads a machine after a write and overwrites its cache entry.
    async fn refresh(&self, machine_id: &str) -> Result<MachineRecord, WorkflowError> {
        let Some(machine) = self.store.get_machine(machine_id).await? else {
            return Err(WorkflowError::Transient(anyhow::anyhow!(
                "machine missing after update: {machine_id}"
            )));
        };
        self.cache
            .put(machine_id.to_string(), machine.clone())
            .await?;
        Ok(machine)
    }
}

fn conclude(op: &'static str, res: Result<MachineRecord, WorkflowError>) -> MachineResult {
    if let Err(WorkflowError::Transient(e)) = &res {
        warn!(op, error = %format!("{e:#}"), "machine operation failed");
    }
    res.into()
}
