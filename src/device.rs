use std::time::Duration;

use serde::Deserialize;

use crate::{config::Config, store::BoxFuture};

pub const HARDWARE_FAULT_ERROR: &str = "hardware_fault";

#[derive(Debug)]
pub enum DeviceError {
    /// The device API reported a fault on the machine itself.
    HardwareFault { machine_id: String },
    Rejected { machine_id: String, status: u16 },
    Transport(reqwest::Error),
}

impl DeviceError {
    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, Self::HardwareFault { .. })
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardwareFault { machine_id } => {
                write!(f, "device reported hardware fault: {machine_id}")
            }
            Self::Rejected { machine_id, status } => {
                write!(f, "device api rejected start: machine_id={machine_id} status={status}")
            }
            Self::Transport(e) => write!(f, "device api transport error: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::HardwareFault { .. } | Self::Rejected { .. } => None,
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

/// Control channel to physical machines.
pub trait DeviceGateway: Send + Sync + 'static {
    fn start_cycle<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<(), DeviceError>>;
}

#[derive(Debug, Deserialize)]
struct DeviceErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct HttpDeviceGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpDeviceGateway {
    pub fn try_new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("machinehub/{}", crate::version::VERSION))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::try_new(
            config.device_api_base_url.clone(),
            Some(config.device_api_token.clone()),
            Duration::from_secs(config.device_timeout_secs),
        )
    }

    async fn post_start_cycle(&self, machine_id: &str) -> Result<(), DeviceError> {
        let url = format!("{}/devices/{machine_id}/start-cycle", self.base_url);
        let mut req = self.client.post(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        // Body is best-effort; an unreadable body is just an ordinary rejection.
        let body = resp.json::<DeviceErrorBody>().await.ok();
        if body.and_then(|b| b.error).as_deref() == Some(HARDWARE_FAULT_ERROR) {
            return Err(DeviceError::HardwareFault {
                machine_id: machine_id.to_string(),
            });
        }
        Err(DeviceError::Rejected {
            machine_id: machine_id.to_string(),
            status: status.as_u16(),
        })
    }
}

impl DeviceGateway for HttpDeviceGateway {
    fn start_cycle<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<(), DeviceError>> {
        Box::pin(self.post_start_cycle(machine_id))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gateway(server: &MockServer, token: Option<&str>) -> HttpDeviceGateway {
        HttpDeviceGateway::try_new(
            format!("{}/", server.uri()),
            token.map(|t| t.to_string()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_cycle_posts_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devices/m1/start-cycle"))
            .and(header("authorization", "Bearer devtoken"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server, Some("devtoken"))
            .start_cycle("m1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hardware_fault_body_is_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devices/m1/start-cycle"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({ "error": "hardware_fault" })),
            )
            .mount(&server)
            .await;

        let err = gateway(&server, None).start_cycle("m1").await.unwrap_err();
        assert!(err.is_hardware_fault());
    }

    #[tokio::test]
    async fn other_failures_are_plain_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devices/m1/start-cycle"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = gateway(&server, None).start_cycle("m1").await.unwrap_err();
        match err {
            DeviceError::Rejected { machine_id, status } => {
                assert_eq!(machine_id, "m1");
                assert_eq!(status, 503);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blank_token_is_not_sent() {
        let server = MockServer::start().await;
        let gw = HttpDeviceGateway::try_new(
            server.uri(),
            Some("  ".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(gw.token.is_none());
    }
}
