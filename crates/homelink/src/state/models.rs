//! Hub, device, camera and family member records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use homelink_protocol::fallback_name;

/// Facial feature vector produced by the external extraction pipeline.
pub type FeatureVector = Vec<f64>;

/// A site gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HubRecord {
    pub id: String,
    pub name: String,
    /// User whose credentials authenticated the hub.
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub alarm_state: bool,
    pub online: bool,
}

impl HubRecord {
    /// A freshly authenticated hub with a generated name.
    pub fn new(id: impl Into<String>, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            name: fallback_name("Hub", &id),
            id,
            user_id,
            connected_at: now,
            last_heartbeat: now,
            temperature: None,
            humidity: None,
            alarm_state: false,
            online: true,
        }
    }
}

/// A sub-device reporting through its hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DeviceRecord {
    pub id: String,
    pub hub_id: String,
    pub name: String,
    pub device_type: String,
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

/// A motion camera attached to a hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CameraRecord {
    pub id: String,
    pub hub_id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub online: bool,
    pub last_motion: Option<DateTime<Utc>>,
    pub last_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A known person. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMemberProfile {
    pub id: String,
    pub name: String,
    pub feature_vector: FeatureVector,
    /// Cameras this person is expected at, in association order.
    pub camera_ids: Vec<String>,
}

/// Everything a store holds, used to prime the cache at startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub hubs: Vec<HubRecord>,
    pub devices: Vec<DeviceRecord>,
    pub cameras: Vec<CameraRecord>,
    pub profiles: Vec<FamilyMemberProfile>,
}
