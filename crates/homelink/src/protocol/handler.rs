//! Dispatch of inbound hub frames.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};

use homelink_protocol::{FrameError, HubFrame, ServerMessage};

use crate::auth::CredentialVerifier;
use crate::registry::{SessionHandle, SessionRegistry, SessionState};
use crate::state::{HubStatusUpdate, StateCache};

/// Applies hub frames to the state cache and answers over the hub's session.
///
/// Frames are attributed to the hub id of the session they arrived on; ids a
/// hub claims inside a payload are never trusted for ownership.
pub struct ProtocolHandler {
    registry: Arc<SessionRegistry>,
    state: Arc<StateCache>,
    credentials: Arc<dyn CredentialVerifier>,
}

impl ProtocolHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        state: Arc<StateCache>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            registry,
            state,
            credentials,
        }
    }

    /// Decode and apply one text frame. Bad frames are logged and dropped.
    pub async fn handle_text(&self, handle: &SessionHandle, text: &str) {
        match HubFrame::parse(text) {
            Ok(frame) => self.handle_frame(handle, frame).await,
            Err(FrameError::Malformed(e)) => {
                warn!("Invalid JSON from hub {}: {}", handle.hub_id, e);
            }
            Err(FrameError::UnknownType(kind)) => {
                debug!("Ignoring unknown frame type {:?} from hub {}", kind, handle.hub_id);
            }
            Err(e @ (FrameError::MissingType | FrameError::InvalidPayload { .. })) => {
                debug!("Dropping frame from hub {}: {}", handle.hub_id, e);
            }
        }
    }

    /// Apply a decoded frame.
    pub async fn handle_frame(&self, handle: &SessionHandle, frame: HubFrame) {
        let hub_id = handle.hub_id.as_str();

        match (self.registry.state(handle), &frame) {
            (SessionState::Closed, _) => {
                debug!("Dropping {} from superseded session of hub {}", frame.kind(), hub_id);
                return;
            }
            (SessionState::Unauthenticated, HubFrame::Auth { .. }) => {}
            (SessionState::Unauthenticated, _) => {
                debug!("Dropping {} from unauthenticated hub {}", frame.kind(), hub_id);
                return;
            }
            (SessionState::Authenticated, _) => {}
        }

        let now = Utc::now();
        match frame {
            HubFrame::Auth { username, password } => {
                self.authenticate(handle, &username, &password).await;
            }

            HubFrame::Heartbeat => {
                self.registry.touch(handle, now);
                match self.state.record_heartbeat(hub_id, now).await {
                    Ok(true) => debug!("Received heartbeat from hub {}", hub_id),
                    Ok(false) => debug!("Heartbeat for unknown hub {}", hub_id),
                    Err(e) => error!("Failed to record heartbeat for hub {}: {}", hub_id, e),
                }
            }

            HubFrame::HubStatus {
                temperature,
                humidity,
                alarm_state,
                devices,
            } => {
                let update = HubStatusUpdate {
                    temperature,
                    humidity,
                    alarm_state,
                    devices,
                };
                match self.state.apply_hub_status(hub_id, &update, now).await {
                    Ok(true) => info!("Updated status for hub {}", hub_id),
                    Ok(false) => debug!("Status for unknown hub {}", hub_id),
                    Err(e) => error!("Failed to apply status for hub {}: {}", hub_id, e),
                }
            }

            HubFrame::DeviceAdded {
                device_id,
                device_type,
                device_name,
            } => {
                match self
                    .state
                    .upsert_device(
                        hub_id,
                        &device_id,
                        device_type.as_deref(),
                        device_name.as_deref(),
                        now,
                    )
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(
                        "Hub {} announced device {} owned by another hub",
                        hub_id, device_id
                    ),
                    Err(e) => error!("Failed to add device {} for hub {}: {}", device_id, hub_id, e),
                }
            }

            HubFrame::DeviceStatus { device_id, status } => {
                match self
                    .state
                    .update_device_status(hub_id, &device_id, &status, now)
                    .await
                {
                    Ok(true) => debug!("Device {} on hub {} is now {}", device_id, hub_id, status),
                    Ok(false) => debug!("Status for unknown device {} on hub {}", device_id, hub_id),
                    Err(e) => error!("Failed to update device {}: {}", device_id, e),
                }
            }

            HubFrame::Alert {
                device_id,
                alert_type,
            } => {
                warn!(
                    "Alert from hub {}: device {} reported {}",
                    hub_id, device_id, alert_type
                );
            }

            HubFrame::CameraAdded {
                camera_id,
                camera_name,
            } => {
                let registered = self
                    .state
                    .register_camera(hub_id, &camera_id, camera_name.as_deref(), now)
                    .await;
                let reply = match registered {
                    Ok(Some(_)) => ServerMessage::camera_registered(camera_id),
                    Ok(None) => ServerMessage::camera_already_registered(camera_id),
                    Err(e) => {
                        error!("Failed to register camera {}: {}", camera_id, e);
                        ServerMessage::CameraRegistered {
                            camera_id,
                            success: false,
                            error: Some("registration failed".to_string()),
                        }
                    }
                };
                self.registry.reply(handle, reply).await;
            }

            HubFrame::CameraStatus { camera_id, online } => {
                match self.state.set_camera_online(hub_id, &camera_id, online).await {
                    Ok(true) => info!(
                        "Updated status for camera {} on hub {}: {}",
                        camera_id,
                        hub_id,
                        if online { "online" } else { "offline" }
                    ),
                    Ok(false) => debug!("Status for unknown camera {} on hub {}", camera_id, hub_id),
                    Err(e) => error!("Failed to update camera {}: {}", camera_id, e),
                }
            }
        }
    }

    async fn authenticate(&self, handle: &SessionHandle, username: &str, password: &str) {
        let hub_id = handle.hub_id.as_str();

        let Some(user_id) = self.credentials.verify(username, password).await else {
            warn!("Auth failed for hub {}", hub_id);
            self.registry
                .reply(handle, ServerMessage::auth_rejected())
                .await;
            return;
        };

        if let Err(e) = self
            .state
            .ensure_hub(hub_id, Some(user_id.clone()), Utc::now())
            .await
        {
            error!("Failed to record hub {} after auth: {}", hub_id, e);
            self.registry
                .reply(handle, ServerMessage::auth_rejected())
                .await;
            return;
        }

        if !self.registry.mark_authenticated(handle, Some(user_id)) {
            debug!("Hub {} session superseded during auth", hub_id);
            return;
        }

        info!("Hub {} authenticated successfully", hub_id);
        self.registry
            .reply(handle, ServerMessage::auth_accepted())
            .await;
    }
}
