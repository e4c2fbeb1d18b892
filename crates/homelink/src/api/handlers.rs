//! HTTP control plane handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use homelink_protocol::ServerMessage;

use crate::alerts::{AlertOutcome, MotionReport};
use crate::state::{CameraRecord, DeviceRecord, FamilyMemberProfile, FeatureVector, HubRecord};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connected_hubs: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_hubs: state.registry.len(),
    })
}

/// A hub with its live connection flag.
#[derive(Debug, Serialize, Deserialize)]
pub struct HubSummary {
    #[serde(flatten)]
    pub hub: HubRecord,
    pub connected: bool,
}

/// A hub and the devices it owns.
#[derive(Debug, Serialize, Deserialize)]
pub struct HubDetail {
    #[serde(flatten)]
    pub hub: HubRecord,
    pub connected: bool,
    pub devices: Vec<DeviceRecord>,
}

pub async fn list_hubs(State(state): State<AppState>) -> Json<Vec<HubSummary>> {
    let hubs = state
        .state
        .hubs()
        .into_iter()
        .map(|hub| HubSummary {
            connected: state.registry.is_connected(&hub.id),
            hub,
        })
        .collect();
    Json(hubs)
}

pub async fn get_hub(
    State(state): State<AppState>,
    Path(hub_id): Path<String>,
) -> ApiResult<Json<HubDetail>> {
    let hub = find_hub(&state, &hub_id)?;
    Ok(Json(HubDetail {
        connected: state.registry.is_connected(&hub_id),
        devices: state.state.devices_for_hub(&hub_id),
        hub,
    }))
}

/// Outcome of a command pushed to a hub.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub command: String,
}

/// Forward a command to one of a hub's devices.
pub async fn control_device(
    State(state): State<AppState>,
    Path((hub_id, device_id)): Path<(String, String)>,
    Json(req): Json<ControlRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let hub = find_hub(&state, &hub_id)?;
    state
        .state
        .device(&device_id)
        .filter(|d| d.hub_id == hub_id)
        .ok_or_else(|| ApiError::not_found(format!("device {device_id} on hub {hub_id}")))?;
    ensure_online(&hub)?;

    let message = ServerMessage::Control {
        device_id: device_id.clone(),
        command: req.command.clone(),
    };
    if !state.registry.send(&hub_id, message).await {
        return Err(ApiError::internal(format!(
            "failed to send command to hub {hub_id}"
        )));
    }

    info!("Sent {} to device {} on hub {}", req.command, device_id, hub_id);
    Ok(Json(CommandResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct AlarmRequest {
    pub state: bool,
}

/// Arm or disarm a hub's alarm. The stored state changes only once the hub
/// has been sent the command.
pub async fn set_alarm(
    State(state): State<AppState>,
    Path(hub_id): Path<String>,
    Json(req): Json<AlarmRequest>,
) -> ApiResult<Json<CommandResponse>> {
    let hub = find_hub(&state, &hub_id)?;
    ensure_online(&hub)?;

    if !state
        .registry
        .send(&hub_id, ServerMessage::Alarm { state: req.state })
        .await
    {
        return Err(ApiError::internal(format!(
            "failed to send alarm command to hub {hub_id}"
        )));
    }

    state.state.set_alarm_state(&hub_id, req.state).await?;
    info!(
        "Alarm {} for hub {}",
        if req.state { "armed" } else { "disarmed" },
        hub_id
    );
    Ok(Json(CommandResponse { success: true }))
}

fn find_hub(state: &AppState, hub_id: &str) -> ApiResult<HubRecord> {
    state
        .state
        .hub(hub_id)
        .ok_or_else(|| ApiError::not_found(format!("hub {hub_id}")))
}

fn ensure_online(hub: &HubRecord) -> ApiResult<()> {
    if !hub.online {
        return Err(ApiError::service_unavailable(format!(
            "hub {} is offline",
            hub.id
        )));
    }
    Ok(())
}

pub async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraRecord>> {
    Json(state.state.cameras())
}

#[derive(Debug, Deserialize)]
pub struct RegisterCameraRequest {
    pub camera_id: String,
    pub camera_name: Option<String>,
    pub hub_id: String,
}

/// Register a camera under a known hub. The hub need not be connected.
pub async fn register_camera(
    State(state): State<AppState>,
    Json(req): Json<RegisterCameraRequest>,
) -> ApiResult<impl IntoResponse> {
    let camera_id = req.camera_id.trim();
    if camera_id.is_empty() {
        return Err(ApiError::bad_request("camera_id must not be empty"));
    }
    find_hub(&state, &req.hub_id)?;

    let camera_name = req
        .camera_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let camera = state
        .state
        .register_camera(&req.hub_id, camera_id, camera_name, Utc::now())
        .await?
        .ok_or_else(|| ApiError::conflict(format!("camera {camera_id} already registered")))?;

    Ok((StatusCode::CREATED, Json(camera)))
}

/// A camera and the names of its associated family members.
#[derive(Debug, Serialize, Deserialize)]
pub struct CameraDetail {
    #[serde(flatten)]
    pub camera: CameraRecord,
    pub family_members: Vec<String>,
}

pub async fn get_camera(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> ApiResult<Json<CameraDetail>> {
    let camera = state
        .state
        .camera(&camera_id)
        .ok_or_else(|| ApiError::not_found(format!("camera {camera_id}")))?;
    let family_members = state
        .state
        .profiles_for_camera(&camera_id)
        .into_iter()
        .map(|p| p.name)
        .collect();
    Ok(Json(CameraDetail {
        camera,
        family_members,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    pub hub_id: String,
    pub image_url: String,
    /// Feature vectors extracted from the frame, one per detected face.
    #[serde(default)]
    pub faces: Vec<FeatureVector>,
}

/// Ingest a motion frame from a camera.
pub async fn ingest_frame(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
    Json(req): Json<FrameRequest>,
) -> ApiResult<Json<MotionReport>> {
    let report = state
        .motion
        .process_frame(&camera_id, &req.hub_id, &req.image_url, &req.faces)
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub message: String,
    pub image_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertResponse {
    pub outcome: AlertOutcome,
}

/// Push an alert to the hub owning a camera.
pub async fn send_camera_alert(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
    Json(req): Json<AlertRequest>,
) -> ApiResult<Json<AlertResponse>> {
    let outcome = state
        .alerts
        .dispatch_alert(&camera_id, &req.message, &req.image_url)
        .await;
    if outcome == AlertOutcome::CameraUnknown {
        return Err(ApiError::not_found(format!("camera {camera_id}")));
    }
    Ok(Json(AlertResponse { outcome }))
}

#[derive(Debug, Deserialize)]
pub struct CreateFamilyMemberRequest {
    pub name: String,
    pub feature_vector: FeatureVector,
    #[serde(default)]
    pub camera_ids: Vec<String>,
}

/// A family member without the stored feature vector.
#[derive(Debug, Serialize, Deserialize)]
pub struct FamilyMemberSummary {
    pub id: String,
    pub name: String,
    pub camera_ids: Vec<String>,
}

pub async fn list_family(State(state): State<AppState>) -> Json<Vec<FamilyMemberSummary>> {
    let members = state
        .state
        .profiles()
        .into_iter()
        .map(|p| FamilyMemberSummary {
            id: p.id,
            name: p.name,
            camera_ids: p.camera_ids,
        })
        .collect();
    Json(members)
}

/// Register a family member for the given cameras.
pub async fn create_family_member(
    State(state): State<AppState>,
    Json(req): Json<CreateFamilyMemberRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if req.feature_vector.is_empty() {
        return Err(ApiError::bad_request("feature_vector must not be empty"));
    }

    let mut camera_ids: Vec<String> = Vec::with_capacity(req.camera_ids.len());
    for id in req.camera_ids {
        let id = id.trim().to_string();
        if !id.is_empty() && !camera_ids.contains(&id) {
            camera_ids.push(id);
        }
    }

    let profile = FamilyMemberProfile {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        feature_vector: req.feature_vector,
        camera_ids,
    };
    state.state.add_profile(profile.clone()).await?;
    info!("Added family member {} ({})", profile.name, profile.id);

    Ok((StatusCode::CREATED, Json(profile)))
}
