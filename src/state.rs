use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::domain::{
    DomainError, MachineRecord, MachineStatus, validate_location_id, validate_machine_id,
};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct StoreInit {
    pub data_dir: PathBuf,
}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    Domain(DomainError),
    MissingMachine { machine_id: String },
    SchemaVersionMismatch { expected: u32, got: u32 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::Domain(e) => write!(f, "{e}"),
            Self::MissingMachine { machine_id } => write!(f, "machine not found: {machine_id}"),
            Self::SchemaVersionMismatch { expected, got } => {
                write!(f, "schema_version mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::Domain(e) => Some(e),
            Self::MissingMachine { .. } | Self::SchemaVersionMismatch { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    pub schema_version: u32,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineRecord>,
}

impl PersistedState {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            machines: BTreeMap::new(),
        }
    }
}

/// Handle on the durable machine records in `<data_dir>/machines.json`.
///
/// The file is the shared source of truth: provisioning and the device fleet
/// write it from other processes, so every read goes back to disk and every
/// mutation is reload, modify, atomic rewrite. Records are keyed (and
/// therefore listed) in ascending `machine_id` order.
///
/// Nothing locks the file across processes. Two writers racing on the same
/// document can still lose one update.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    state_path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn load_or_init(init: StoreInit) -> Result<Self, StoreError> {
        fs::create_dir_all(&init.data_dir)?;

        let store = Self {
            state_path: init.data_dir.join("machines.json"),
        };
        if store.state_path.exists() {
            store.load()?;
        } else {
            store.save(&PersistedState::empty())?;
        }
        Ok(store)
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Reads the current document from disk.
    pub fn load(&self) -> Result<PersistedState, StoreError> {
        let bytes = fs::read(&self.state_path)?;
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                got: state.schema_version,
            });
        }
        Ok(state)
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec_pretty(state)?;
        bytes.push(b'\n');
        write_atomic(&self.state_path, &bytes)?;
        Ok(())
    }

    /// Seeds (or re-seeds) a machine in `Available` with no job.
    pub fn provision_machine(
        &self,
        machine_id: String,
        location_id: String,
    ) -> Result<MachineRecord, StoreError> {
        validate_machine_id(&machine_id)?;
        validate_location_id(&location_id)?;

        let machine = MachineRecord::available(machine_id.clone(), location_id);
        self.modify(|state| {
            state.machines.insert(machine_id, machine.clone());
            Ok(())
        })?;
        Ok(machine)
    }

    pub fn list_machines_at_location(
        &self,
        location_id: &str,
    ) -> Result<Vec<MachineRecord>, StoreError> {
        let state = self.load()?;
        Ok(state
            .machines
            .into_values()
            .filter(|m| m.location_id == location_id)
            .collect())
    }

    pub fn get_machine(&self, machine_id: &str) -> Result<Option<MachineRecord>, StoreError> {
        let mut state = self.load()?;
        Ok(state.machines.remove(machine_id))
    }

    pub fn update_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
    ) -> Result<(), StoreError> {
        self.modify(|state| {
            machine_mut(state, machine_id)?.status = status;
            Ok(())
        })
    }

    pub fn update_machine_job_id(
        &self,
        machine_id: &str,
        job_id: String,
    ) -> Result<(), StoreError> {
        self.modify(|state| {
            machine_mut(state, machine_id)?.job_id = Some(job_id);
            Ok(())
        })
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut PersistedState) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut state = self.load()?;
        f(&mut state)?;
        self.save(&state)
    }
}

fn machine_mut<'a>(
    state: &'a mut PersistedState,
    machine_id: &str,
) -> Result<&'a mut MachineRecord, StoreError> {
    state
        .machines
        .get_mut(machine_id)
        .ok_or_else(|| StoreError::MissingMachine {
            machine_id: machine_id.to_string(),
        })
}

/// Writes next to `path` and renames over it, so readers in other processes
/// see either the old document or the new one.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
