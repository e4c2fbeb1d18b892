//! Outbound messages pushed to hubs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages the server sends over a hub channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of an `auth` frame.
    AuthResponse { success: bool, message: String },

    /// Result of a `camera_added` frame.
    #[serde(rename_all = "camelCase")]
    CameraRegistered {
        camera_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Command for one of the hub's sub-devices.
    #[serde(rename_all = "camelCase")]
    Control { device_id: String, command: String },

    /// Arm or disarm the hub's siren.
    Alarm { state: bool },

    /// Notification raised by one of the hub's cameras.
    #[serde(rename_all = "camelCase")]
    CameraAlert {
        camera_id: String,
        camera_name: String,
        message: String,
        image_url: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn auth_accepted() -> Self {
        Self::AuthResponse {
            success: true,
            message: "Authentication successful".to_string(),
        }
    }

    pub fn auth_rejected() -> Self {
        Self::AuthResponse {
            success: false,
            message: "Authentication failed".to_string(),
        }
    }

    pub fn camera_registered(camera_id: impl Into<String>) -> Self {
        Self::CameraRegistered {
            camera_id: camera_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn camera_already_registered(camera_id: impl Into<String>) -> Self {
        Self::CameraRegistered {
            camera_id: camera_id.into(),
            success: false,
            error: Some("already registered".to_string()),
        }
    }

    /// The wire name of this message's type.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::AuthResponse { .. } => "auth_response",
            ServerMessage::CameraRegistered { .. } => "camera_registered",
            ServerMessage::Control { .. } => "control",
            ServerMessage::Alarm { .. } => "alarm",
            ServerMessage::CameraAlert { .. } => "camera_alert",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
