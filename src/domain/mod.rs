use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    InvalidMachineId { machine_id: String },
    InvalidLocationId { location_id: String },
    InvalidJobId { job_id: String },
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMachineId { machine_id } => write!(f, "invalid machine_id: {machine_id}"),
            Self::InvalidLocationId { location_id } => {
                write!(f, "invalid location_id: {location_id}")
            }
            Self::InvalidJobId { job_id } => write!(f, "invalid job_id: {job_id}"),
        }
    }
}

impl std::error::Error for DomainError {}

pub fn is_machine_id(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub fn validate_machine_id(machine_id: &str) -> Result<(), DomainError> {
    if !is_machine_id(machine_id) {
        return Err(DomainError::InvalidMachineId {
            machine_id: machine_id.to_string(),
        });
    }
    Ok(())
}

pub fn validate_location_id(location_id: &str) -> Result<(), DomainError> {
    if location_id.trim().is_empty() {
        return Err(DomainError::InvalidLocationId {
            location_id: location_id.to_string(),
        });
    }
    Ok(())
}

pub fn validate_job_id(job_id: &str) -> Result<(), DomainError> {
    if job_id.trim().is_empty() {
        return Err(DomainError::InvalidJobId {
            job_id: job_id.to_string(),
        });
    }
    Ok(())
}

/// Lifecycle status of a physical machine.
///
/// The reservation workflow only ever moves a machine along
/// `Available -> AwaitingDropoff -> Running`, or `AwaitingDropoff -> Error`
/// when the device reports a fault that the store confirms. Other statuses
/// may be written by provisioning or the device fleet and are carried through
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum MachineStatus {
    Available,
    AwaitingDropoff,
    Running,
    Error,
    Other(String),
}

impl MachineStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Available => "AVAILABLE",
            Self::AwaitingDropoff => "AWAITING_DROPOFF",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for MachineStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AVAILABLE" => Self::Available,
            "AWAITING_DROPOFF" => Self::AwaitingDropoff,
            "RUNNING" => Self::Running,
            "ERROR" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl From<MachineStatus> for String {
    fn from(value: MachineStatus) -> Self {
        match value {
            MachineStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineRecord {
    pub machine_id: String,
    pub location_id: String,
    pub status: MachineStatus,
    /// Only meaningful once the machine has left `Available`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl MachineRecord {
    pub fn available(machine_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            location_id: location_id.into(),
            status: MachineStatus::Available,
            job_id: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == MachineStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn machine_ids_allow_alphanumerics_and_hyphens_only() {
        assert!(is_machine_id("m1"));
        assert!(is_machine_id("washer-07-B"));
        assert!(!is_machine_id(""));
        assert!(!is_machine_id("m_1"));
        assert!(!is_machine_id("m1/start"));
        assert!(!is_machine_id("m 1"));
        assert!(validate_machine_id("a.b").is_err());
    }

    #[test]
    fn status_serializes_in_screaming_snake_case() {
        let v = serde_json::to_value(MachineStatus::AwaitingDropoff).unwrap();
        assert_eq!(v, serde_json::json!("AWAITING_DROPOFF"));
        let parsed: MachineStatus = serde_json::from_value(serde_json::json!("ERROR")).unwrap();
        assert_eq!(parsed, MachineStatus::Error);
    }

    #[test]
    fn unknown_store_statuses_survive_a_roundtrip() {
        let parsed: MachineStatus =
            serde_json::from_value(serde_json::json!("DECOMMISSIONED")).unwrap();
        assert_eq!(parsed, MachineStatus::Other("DECOMMISSIONED".to_string()));
        assert_eq!(
            serde_json::to_value(&parsed).unwrap(),
            serde_json::json!("DECOMMISSIONED")
        );
    }

    #[test]
    fn record_omits_absent_job_id() {
        let v = serde_json::to_value(MachineRecord::available("m1", "L1")).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "machine_id": "m1",
                "location_id": "L1",
                "status": "AVAILABLE",
            })
        );
    }

    #[test]
    fn blank_location_and_job_ids_are_rejected() {
        assert!(validate_location_id(" ").is_err());
        assert!(validate_job_id("").is_err());
        assert!(validate_location_id("L1").is_ok());
        assert!(validate_job_id("J1").is_ok());
    }
}
