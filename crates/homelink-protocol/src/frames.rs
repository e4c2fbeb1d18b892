//! Inbound frames sent by hubs.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Frame types a hub may send. Anything else is ignored by the server.
pub const KNOWN_FRAME_TYPES: &[&str] = &[
    "auth",
    "heartbeat",
    "hub_status",
    "device_added",
    "device_status",
    "alert",
    "camera_added",
    "camera_status",
];

/// A decoded frame from a hub.
///
/// Field names follow the firmware's camelCase JSON. Optional fields carry
/// the fallbacks the server applies when a hub omits them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    /// Credentials for the owning user. Missing fields decode as empty
    /// strings so the hub still receives a negative `auth_response`.
    Auth {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },

    /// Liveness signal.
    Heartbeat,

    /// Environmental readings plus the hub's current device inventory.
    #[serde(rename_all = "camelCase")]
    HubStatus {
        #[serde(default)]
        temperature: Option<f64>,
        #[serde(default)]
        humidity: Option<f64>,
        #[serde(default)]
        alarm_state: bool,
        #[serde(default)]
        devices: Vec<DeviceReport>,
    },

    /// A sub-device paired with the hub.
    #[serde(rename_all = "camelCase")]
    DeviceAdded {
        device_id: String,
        #[serde(default)]
        device_type: Option<String>,
        #[serde(default)]
        device_name: Option<String>,
    },

    /// Status change of a known sub-device.
    #[serde(rename_all = "camelCase")]
    DeviceStatus { device_id: String, status: String },

    /// Device-raised alert (smoke, intrusion, ...).
    #[serde(rename_all = "camelCase")]
    Alert { device_id: String, alert_type: String },

    /// A camera paired with the hub.
    #[serde(rename_all = "camelCase")]
    CameraAdded {
        camera_id: String,
        #[serde(default)]
        camera_name: Option<String>,
    },

    /// Camera connectivity report.
    #[serde(rename_all = "camelCase")]
    CameraStatus {
        camera_id: String,
        #[serde(default = "default_online")]
        online: bool,
    },
}

fn default_online() -> bool {
    true
}

/// One entry of the `devices` array in a `hub_status` frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceReport {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Why an inbound frame could not be turned into a [`HubFrame`].
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not a JSON document at all.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Valid JSON without a string `type` field.
    #[error("frame has no type field")]
    MissingType,

    /// A `type` the server does not understand.
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    /// Known type whose payload lacks a required field.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HubFrame {
    /// Decode a text frame.
    ///
    /// Decoding is split into JSON parsing and type dispatch so callers can
    /// tell a malformed frame from an unknown type or an incomplete payload.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();

        if !KNOWN_FRAME_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|source| FrameError::InvalidPayload { kind, source })
    }

    /// The wire name of this frame's type.
    pub fn kind(&self) -> &'static str {
        match self {
            HubFrame::Auth { .. } => "auth",
            HubFrame::Heartbeat => "heartbeat",
            HubFrame::HubStatus { .. } => "hub_status",
            HubFrame::DeviceAdded { .. } => "device_added",
            HubFrame::DeviceStatus { .. } => "device_status",
            HubFrame::Alert { .. } => "alert",
            HubFrame::CameraAdded { .. } => "camera_added",
            HubFrame::CameraStatus { .. } => "camera_status",
        }
    }
}
