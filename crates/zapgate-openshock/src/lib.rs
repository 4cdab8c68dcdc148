//! Zapgate OpenShock Client
//!
//! HTTP client for the OpenShock shocker control endpoint

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE_URL: &str = "https://api.shocklink.net";

/// The two operations a shocker supports. Variant names match the wire
/// `type` field of the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Shock,
    Vibrate,
}

impl ActionKind {
    /// Capitalized name used in success replies.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Shock => "Shock",
            ActionKind::Vibrate => "Vibrate",
        }
    }

    /// Lower-case name used in cooldown replies.
    pub fn name_lower(self) -> &'static str {
        match self {
            ActionKind::Shock => "shock",
            ActionKind::Vibrate => "vibrate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A clamped, ready-to-send action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAction {
    pub kind: ActionKind,
    /// Strength percent, already inside the configured bounds.
    pub intensity: u8,
    pub duration_ms: u32,
}

/// Request body for `POST /2/shockers/control`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub shocks: Vec<ShockCommand>,
    pub custom_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub intensity: u8,
    pub duration: u32,
    pub exclusive: bool,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("control request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("control endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Seam between the dispatcher and the OpenShock API. Tests implement this
/// to record dispatched actions without touching the network.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn send(&self, action: ControlAction) -> Result<(), DeviceError>;
}

pub struct OpenShockClient {
    client: Client,
    control_url: String,
    api_token: String,
    device_id: String,
    custom_name: String,
}

impl OpenShockClient {
    pub fn new(base_url: &str, api_token: &str, device_id: &str, custom_name: &str) -> Self {
        Self {
            client: Self::build_client(),
            control_url: format!("{}/2/shockers/control", base_url.trim_end_matches('/')),
            api_token: api_token.to_string(),
            device_id: device_id.to_string(),
            custom_name: custom_name.to_string(),
        }
    }

    fn build_client() -> Client {
        ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client")
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Wire body for one action. Always a single-shocker request with
    /// `exclusive` set, so a new action replaces any one still running.
    pub fn control_request(&self, action: ControlAction) -> ControlRequest {
        ControlRequest {
            shocks: vec![ShockCommand {
                id: self.device_id.clone(),
                kind: action.kind,
                intensity: action.intensity,
                duration: action.duration_ms,
                exclusive: true,
            }],
            custom_name: self.custom_name.clone(),
        }
    }
}

#[async_trait]
impl DeviceControl for OpenShockClient {
    async fn send(&self, action: ControlAction) -> Result<(), DeviceError> {
        let body = self.control_request(action);
        debug!(
            kind = %action.kind,
            intensity = action.intensity,
            duration_ms = action.duration_ms,
            "sending control request"
        );

        let response = self
            .client
            .post(&self.control_url)
            .header("OpenShockToken", &self.api_token)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeviceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
