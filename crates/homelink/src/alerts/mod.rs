//! Camera alerts and motion-frame ingestion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use homelink_protocol::ServerMessage;

use crate::face::{FaceComparator, FaceVerdict, decide};
use crate::registry::SessionRegistry;
use crate::state::{StateCache, StoreError};

/// Message pushed when a frame contains a face nobody recognizes.
pub const UNKNOWN_PERSON_MESSAGE: &str = "Unknown person detected";

/// What raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Face matching found someone not associated with the camera.
    UnknownPerson,
    /// Raised through the control plane.
    Manual,
}

/// An alert on its way to a hub. Lives only for the duration of dispatch.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub camera_id: String,
    pub hub_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    Delivered,
    CameraUnknown,
    /// Dropped because the owning hub is offline. Alerts are not queued.
    HubOffline,
    SendFailed,
}

/// Pushes `camera_alert` messages to the hub that owns a camera.
pub struct AlertDispatcher {
    registry: Arc<SessionRegistry>,
    state: Arc<StateCache>,
}

impl AlertDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, state: Arc<StateCache>) -> Self {
        Self { registry, state }
    }

    /// Alert the hub owning `camera_id`.
    pub async fn dispatch_alert(
        &self,
        camera_id: &str,
        message: &str,
        image_url: &str,
    ) -> AlertOutcome {
        self.dispatch(camera_id, AlertKind::Manual, message, image_url)
            .await
    }

    pub async fn dispatch(
        &self,
        camera_id: &str,
        kind: AlertKind,
        message: &str,
        image_url: &str,
    ) -> AlertOutcome {
        let Some(camera) = self.state.camera(camera_id) else {
            warn!("Cannot send alert: camera {} not found", camera_id);
            return AlertOutcome::CameraUnknown;
        };

        let event = AlertEvent {
            camera_id: camera.id,
            hub_id: camera.hub_id,
            kind,
            message: message.to_string(),
            image_url: image_url.to_string(),
            timestamp: Utc::now(),
        };

        if !self.state.is_hub_online(&event.hub_id) {
            warn!("Cannot send alert: hub {} is offline or not found", event.hub_id);
            return AlertOutcome::HubOffline;
        }

        let hub_id = event.hub_id.clone();
        let payload = ServerMessage::CameraAlert {
            camera_id: event.camera_id,
            camera_name: camera.name,
            message: event.message,
            image_url: event.image_url,
            timestamp: event.timestamp,
        };

        if self.registry.send(&hub_id, payload).await {
            info!("Sent {:?} alert for camera {} to hub {}", event.kind, camera_id, hub_id);
            AlertOutcome::Delivered
        } else {
            AlertOutcome::SendFailed
        }
    }
}

/// Why a motion frame was rejected.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("camera not found: {0}")]
    CameraNotFound(String),

    #[error("camera {camera_id} does not belong to hub {hub_id}")]
    HubMismatch { camera_id: String, hub_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of processing one motion frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReport {
    pub image_url: String,
    #[serde(flatten)]
    pub verdict: FaceVerdict,
    /// Set when an unknown face triggered an alert.
    pub alert: Option<AlertOutcome>,
}

/// Turns motion frames into face verdicts and alerts.
pub struct MotionPipeline {
    state: Arc<StateCache>,
    dispatcher: Arc<AlertDispatcher>,
    comparator: Arc<dyn FaceComparator>,
}

impl MotionPipeline {
    pub fn new(
        state: Arc<StateCache>,
        dispatcher: Arc<AlertDispatcher>,
        comparator: Arc<dyn FaceComparator>,
    ) -> Self {
        Self {
            state,
            dispatcher,
            comparator,
        }
    }

    /// Record motion on `camera_id`, match the extracted faces against the
    /// camera's family members and alert the hub if anyone is unknown.
    pub async fn process_frame(
        &self,
        camera_id: &str,
        hub_id: &str,
        image_url: &str,
        faces: &[Vec<f64>],
    ) -> Result<MotionReport, IngestError> {
        let camera = self
            .state
            .camera(camera_id)
            .ok_or_else(|| IngestError::CameraNotFound(camera_id.to_string()))?;
        if camera.hub_id != hub_id {
            return Err(IngestError::HubMismatch {
                camera_id: camera_id.to_string(),
                hub_id: hub_id.to_string(),
            });
        }

        let known = self.state.profiles_for_camera(camera_id);
        let verdict = decide(self.comparator.as_ref(), faces, &known);

        self.state.record_motion(camera_id, image_url, Utc::now()).await?;

        let alert = if verdict.unknown_detected {
            warn!("Unknown person detected by camera {}", camera_id);
            Some(
                self.dispatcher
                    .dispatch(camera_id, AlertKind::UnknownPerson, UNKNOWN_PERSON_MESSAGE, image_url)
                    .await,
            )
        } else {
            if verdict.recognized() {
                info!(
                    "Known persons detected by camera {}: {}",
                    camera_id,
                    verdict.recognized_names.join(", ")
                );
            }
            None
        };

        Ok(MotionReport {
            image_url: image_url.to_string(),
            verdict,
            alert,
        })
    }
}
