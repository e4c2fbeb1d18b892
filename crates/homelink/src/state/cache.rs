//! In-memory view of hub, device and camera state, written through to a store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use homelink_protocol::{DeviceReport, fallback_name};

use super::error::{StoreError, StoreResult};
use super::models::{CameraRecord, DeviceRecord, FamilyMemberProfile, HubRecord};
use super::store::StateStore;

const DEFAULT_DEVICE_TYPE: &str = "unknown";
const DEFAULT_DEVICE_STATUS: &str = "Unknown";

/// Environmental and device report carried by a `hub_status` frame.
#[derive(Debug, Clone, Default)]
pub struct HubStatusUpdate {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub alarm_state: bool,
    pub devices: Vec<DeviceReport>,
}

/// Authoritative state for every hub, device, camera and family member.
///
/// Reads are served from `DashMap` mirrors. Mutations are serialized by a
/// single write lock, persisted first and only then applied to the mirror, so
/// a failed write leaves the cache matching the store.
pub struct StateCache {
    store: Arc<dyn StateStore>,
    hubs: DashMap<String, HubRecord>,
    devices: DashMap<String, DeviceRecord>,
    cameras: DashMap<String, CameraRecord>,
    profiles: DashMap<String, FamilyMemberProfile>,
    /// Profile ids per camera in association order.
    camera_members: DashMap<String, Vec<String>>,
    write_lock: Mutex<()>,
}

impl StateCache {
    /// Build a cache primed with everything in `store`.
    pub async fn load(store: Arc<dyn StateStore>) -> StoreResult<Self> {
        let snapshot = store.load().await?;
        let cache = Self {
            store,
            hubs: DashMap::new(),
            devices: DashMap::new(),
            cameras: DashMap::new(),
            profiles: DashMap::new(),
            camera_members: DashMap::new(),
            write_lock: Mutex::new(()),
        };

        for hub in snapshot.hubs {
            cache.hubs.insert(hub.id.clone(), hub);
        }
        for device in snapshot.devices {
            cache.devices.insert(device.id.clone(), device);
        }
        for camera in snapshot.cameras {
            cache.cameras.insert(camera.id.clone(), camera);
        }
        for profile in snapshot.profiles {
            cache.index_profile(profile);
        }

        info!(
            "Loaded state: {} hubs, {} devices, {} cameras, {} family members",
            cache.hubs.len(),
            cache.devices.len(),
            cache.cameras.len(),
            cache.profiles.len()
        );
        Ok(cache)
    }

    fn index_profile(&self, profile: FamilyMemberProfile) {
        for camera_id in &profile.camera_ids {
            self.camera_members
                .entry(camera_id.clone())
                .or_default()
                .push(profile.id.clone());
        }
        self.profiles.insert(profile.id.clone(), profile);
    }

    // ========================================================================
    // Hubs
    // ========================================================================

    pub fn hub(&self, hub_id: &str) -> Option<HubRecord> {
        self.hubs.get(hub_id).map(|h| h.clone())
    }

    /// All hubs, ordered by id.
    pub fn hubs(&self) -> Vec<HubRecord> {
        let mut hubs: Vec<HubRecord> = self.hubs.iter().map(|h| h.value().clone()).collect();
        hubs.sort_by(|a, b| a.id.cmp(&b.id));
        hubs
    }

    /// Whether the hub record exists and is flagged online.
    pub fn is_hub_online(&self, hub_id: &str) -> bool {
        self.hubs.get(hub_id).is_some_and(|h| h.online)
    }

    /// Create the hub on first authentication, or bring an existing one back
    /// online. Either way the heartbeat is refreshed.
    ///
    /// The owner is recorded once: an existing hub keeps its `user_id` and only
    /// an unowned hub adopts the authenticating user.
    pub async fn ensure_hub(
        &self,
        hub_id: &str,
        user_id: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<HubRecord> {
        let _guard = self.write_lock.lock().await;

        let hub = match self.hub(hub_id) {
            Some(mut hub) => {
                if hub.user_id.is_none() {
                    hub.user_id = user_id;
                } else if user_id.is_some() && user_id != hub.user_id {
                    warn!(
                        "Hub {} owned by {} authenticated as {}; keeping owner",
                        hub_id,
                        hub.user_id.as_deref().unwrap_or_default(),
                        user_id.as_deref().unwrap_or_default()
                    );
                }
                hub.connected_at = now;
                hub.last_heartbeat = now;
                hub.online = true;
                hub
            }
            None => {
                info!("Registering new hub {}", hub_id);
                HubRecord::new(hub_id, user_id, now)
            }
        };

        self.store.save_hub(&hub).await?;
        self.hubs.insert(hub.id.clone(), hub.clone());
        Ok(hub)
    }

    /// Returns false if the hub is unknown.
    pub async fn record_heartbeat(&self, hub_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        self.update_hub(hub_id, |hub| hub.last_heartbeat = now).await
    }

    pub async fn set_hub_online(&self, hub_id: &str, online: bool) -> StoreResult<bool> {
        self.update_hub(hub_id, |hub| hub.online = online).await
    }

    pub async fn set_alarm_state(&self, hub_id: &str, state: bool) -> StoreResult<bool> {
        self.update_hub(hub_id, |hub| hub.alarm_state = state).await
    }

    async fn update_hub<F>(&self, hub_id: &str, apply: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut HubRecord),
    {
        let _guard = self.write_lock.lock().await;
        let Some(mut hub) = self.hub(hub_id) else {
            return Ok(false);
        };
        apply(&mut hub);
        self.store.save_hub(&hub).await?;
        self.hubs.insert(hub.id.clone(), hub);
        Ok(true)
    }

    /// Apply a `hub_status` report: environment fields first, then every
    /// device entry that carries an id.
    ///
    /// Returns false if the hub is unknown. Devices owned by another hub are
    /// left alone. A device that fails to save is logged and skipped; the
    /// error only surfaces when the hub fields themselves cannot be saved.
    pub async fn apply_hub_status(
        &self,
        hub_id: &str,
        update: &HubStatusUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut hub) = self.hub(hub_id) else {
            return Ok(false);
        };

        hub.temperature = update.temperature;
        hub.humidity = update.humidity;
        hub.alarm_state = update.alarm_state;
        self.store.save_hub(&hub).await?;
        self.hubs.insert(hub.id.clone(), hub);

        for report in &update.devices {
            let Some(device_id) = report.id.as_deref() else {
                debug!("Skipping device entry without id from hub {}", hub_id);
                continue;
            };

            let device = match self.device(device_id) {
                Some(existing) if existing.hub_id != hub_id => {
                    warn!(
                        "Hub {} reported device {} owned by hub {}, ignoring",
                        hub_id, device_id, existing.hub_id
                    );
                    continue;
                }
                Some(mut existing) => {
                    existing.status = report
                        .status
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEVICE_STATUS.to_string());
                    existing.last_updated = now;
                    existing
                }
                None => DeviceRecord {
                    id: device_id.to_string(),
                    hub_id: hub_id.to_string(),
                    name: report
                        .name
                        .clone()
                        .unwrap_or_else(|| fallback_name("Device", device_id)),
                    device_type: report
                        .device_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEVICE_TYPE.to_string()),
                    status: report
                        .status
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEVICE_STATUS.to_string()),
                    last_updated: now,
                },
            };

            if let Err(e) = self.store.save_device(&device).await {
                error!("Failed to save device {} for hub {}: {}", device_id, hub_id, e);
                continue;
            }
            self.devices.insert(device.id.clone(), device);
        }

        Ok(true)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    pub fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    /// Devices owned by `hub_id`, ordered by id.
    pub fn devices_for_hub(&self, hub_id: &str) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self
            .devices
            .iter()
            .filter(|d| d.hub_id == hub_id)
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Insert a device for `hub_id`, or refresh the type and name of one it
    /// already owns.
    ///
    /// Returns `None` when the device belongs to another hub.
    pub async fn upsert_device(
        &self,
        hub_id: &str,
        device_id: &str,
        device_type: Option<&str>,
        device_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DeviceRecord>> {
        let _guard = self.write_lock.lock().await;

        let device = match self.device(device_id) {
            Some(existing) if existing.hub_id != hub_id => return Ok(None),
            Some(mut existing) => {
                if let Some(device_type) = device_type {
                    existing.device_type = device_type.to_string();
                }
                if let Some(name) = device_name {
                    existing.name = name.to_string();
                }
                existing.last_updated = now;
                existing
            }
            None => {
                info!("New device {} added to hub {}", device_id, hub_id);
                DeviceRecord {
                    id: device_id.to_string(),
                    hub_id: hub_id.to_string(),
                    name: device_name
                        .map(str::to_string)
                        .unwrap_or_else(|| fallback_name("Device", device_id)),
                    device_type: device_type.unwrap_or(DEFAULT_DEVICE_TYPE).to_string(),
                    status: DEFAULT_DEVICE_STATUS.to_string(),
                    last_updated: now,
                }
            }
        };

        self.store.save_device(&device).await?;
        self.devices.insert(device.id.clone(), device.clone());
        Ok(Some(device))
    }

    /// Update the status of a device owned by `hub_id`.
    ///
    /// Unknown devices are a no-op and return false.
    pub async fn update_device_status(
        &self,
        hub_id: &str,
        device_id: &str,
        status: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut device) = self.device(device_id).filter(|d| d.hub_id == hub_id) else {
            return Ok(false);
        };
        device.status = status.to_string();
        device.last_updated = now;
        self.store.save_device(&device).await?;
        self.devices.insert(device.id.clone(), device);
        Ok(true)
    }

    // ========================================================================
    // Cameras
    // ========================================================================

    pub fn camera(&self, camera_id: &str) -> Option<CameraRecord> {
        self.cameras.get(camera_id).map(|c| c.clone())
    }

    /// All cameras, ordered by id.
    pub fn cameras(&self) -> Vec<CameraRecord> {
        let mut cameras: Vec<CameraRecord> =
            self.cameras.iter().map(|c| c.value().clone()).collect();
        cameras.sort_by(|a, b| a.id.cmp(&b.id));
        cameras
    }

    /// Register a camera under `hub_id`.
    ///
    /// Returns `None` if a camera with this id already exists anywhere.
    pub async fn register_camera(
        &self,
        hub_id: &str,
        camera_id: &str,
        camera_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CameraRecord>> {
        let _guard = self.write_lock.lock().await;
        if self.cameras.contains_key(camera_id) {
            return Ok(None);
        }

        let camera = CameraRecord {
            id: camera_id.to_string(),
            hub_id: hub_id.to_string(),
            user_id: self.hub(hub_id).and_then(|h| h.user_id),
            name: camera_name
                .map(str::to_string)
                .unwrap_or_else(|| fallback_name("Camera", camera_id)),
            online: true,
            last_motion: None,
            last_image_url: None,
            created_at: now,
        };

        self.store.save_camera(&camera).await?;
        self.cameras.insert(camera.id.clone(), camera.clone());
        info!("New camera {} added to hub {}", camera_id, hub_id);
        Ok(Some(camera))
    }

    /// Set the online flag of a camera owned by `hub_id`.
    pub async fn set_camera_online(
        &self,
        hub_id: &str,
        camera_id: &str,
        online: bool,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut camera) = self.camera(camera_id).filter(|c| c.hub_id == hub_id) else {
            return Ok(false);
        };
        camera.online = online;
        self.store.save_camera(&camera).await?;
        self.cameras.insert(camera.id.clone(), camera);
        Ok(true)
    }

    /// Stamp motion on a camera and remember the frame it produced.
    pub async fn record_motion(
        &self,
        camera_id: &str,
        image_url: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<CameraRecord> {
        let _guard = self.write_lock.lock().await;
        let mut camera = self
            .camera(camera_id)
            .ok_or_else(|| StoreError::NotFound(format!("camera {camera_id}")))?;
        camera.last_motion = Some(now);
        camera.last_image_url = Some(image_url.to_string());
        self.store.save_camera(&camera).await?;
        self.cameras.insert(camera.id.clone(), camera.clone());
        Ok(camera)
    }

    // ========================================================================
    // Family members
    // ========================================================================

    pub fn profile(&self, profile_id: &str) -> Option<FamilyMemberProfile> {
        self.profiles.get(profile_id).map(|p| p.clone())
    }

    /// All profiles, ordered by name then id.
    pub fn profiles(&self) -> Vec<FamilyMemberProfile> {
        let mut profiles: Vec<FamilyMemberProfile> =
            self.profiles.iter().map(|p| p.value().clone()).collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    /// Add a profile. Every associated camera must already exist.
    pub async fn add_profile(&self, profile: FamilyMemberProfile) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.profiles.contains_key(&profile.id) {
            return Err(StoreError::Conflict(format!("family member {}", profile.id)));
        }
        if let Some(missing) = profile
            .camera_ids
            .iter()
            .find(|id| !self.cameras.contains_key(id.as_str()))
        {
            return Err(StoreError::NotFound(format!("camera {missing}")));
        }

        self.store.insert_profile(&profile).await?;
        self.index_profile(profile);
        Ok(())
    }

    /// Profiles associated with a camera, in association order.
    pub fn profiles_for_camera(&self, camera_id: &str) -> Vec<FamilyMemberProfile> {
        let Some(ids) = self.camera_members.get(camera_id).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.profile(id)).collect()
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Mark online hubs offline when their last heartbeat is more than
    /// `timeout` before `now`. Returns the ids that were demoted.
    ///
    /// Candidates are collected without the write lock; each one is then
    /// rechecked and saved under its own short lock hold, so hub frames keep
    /// flowing while a large sweep runs. A failed save leaves that hub online
    /// for the next sweep.
    pub async fn demote_stale_hubs(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let is_stale = |hub: &HubRecord| hub.online && now - hub.last_heartbeat > timeout;
        let candidates: Vec<String> = self
            .hubs
            .iter()
            .filter(|h| is_stale(h.value()))
            .map(|h| h.key().clone())
            .collect();

        let mut demoted = Vec::with_capacity(candidates.len());
        for hub_id in candidates {
            let _guard = self.write_lock.lock().await;
            // A heartbeat or reconnect may have landed since the scan.
            let Some(mut hub) = self.hub(&hub_id).filter(|h| is_stale(h)) else {
                continue;
            };
            hub.online = false;
            if let Err(e) = self.store.save_hub(&hub).await {
                error!("Failed to mark hub {} offline: {}", hub_id, e);
                continue;
            }
            info!("Hub {} marked offline (no heartbeat since {})", hub_id, hub.last_heartbeat);
            self.hubs.insert(hub_id.clone(), hub);
            demoted.push(hub_id);
        }
        demoted
    }

    /// Mark online cameras offline when their last motion is more than
    /// `timeout` before `now`. Cameras that never saw motion are skipped.
    /// Locking follows [`Self::demote_stale_hubs`].
    pub async fn demote_stale_cameras(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<String> {
        let is_stale = |camera: &CameraRecord| {
            camera.online && camera.last_motion.is_some_and(|m| now - m > timeout)
        };
        let candidates: Vec<String> = self
            .cameras
            .iter()
            .filter(|c| is_stale(c.value()))
            .map(|c| c.key().clone())
            .collect();

        let mut demoted = Vec::with_capacity(candidates.len());
        for camera_id in candidates {
            let _guard = self.write_lock.lock().await;
            let Some(mut camera) = self.camera(&camera_id).filter(|c| is_stale(c)) else {
                continue;
            };
            camera.online = false;
            if let Err(e) = self.store.save_camera(&camera).await {
                error!("Failed to mark camera {} offline: {}", camera_id, e);
                continue;
            }
            warn!("Camera {} appears to be offline", camera_id);
            self.cameras.insert(camera_id.clone(), camera);
            demoted.push(camera_id);
        }
        demoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Snapshot;
    use crate::state::store::MemoryStore;

    async fn cache_with(store: Arc<MemoryStore>) -> StateCache {
        StateCache::load(store).await.unwrap()
    }

    async fn cache() -> StateCache {
        cache_with(Arc::new(MemoryStore::new())).await
    }

    fn report(id: Option<&str>, status: Option<&str>) -> DeviceReport {
        DeviceReport {
            id: id.map(str::to_string),
            name: None,
            device_type: None,
            status: status.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_ensure_hub_creates_with_fallback_name() {
        let cache = cache().await;
        let now = Utc::now();
        let hub = cache
            .ensure_hub("esp32-hub-a1b2c3", Some("user-1".to_string()), now)
            .await
            .unwrap();
        assert_eq!(hub.name, "Hub a1b2c3");
        assert!(hub.online);
        assert_eq!(hub.last_heartbeat, now);
        assert!(cache.is_hub_online("esp32-hub-a1b2c3"));
    }

    #[tokio::test]
    async fn test_ensure_hub_revives_existing_hub() {
        let cache = cache().await;
        let t0 = Utc::now();
        cache.ensure_hub("h1", None, t0).await.unwrap();
        cache.set_hub_online("h1", false).await.unwrap();

        let t1 = t0 + Duration::seconds(10);
        let hub = cache.ensure_hub("h1", None, t1).await.unwrap();
        assert!(hub.online);
        assert_eq!(hub.last_heartbeat, t1);
        assert_eq!(cache.hubs().len(), 1);
    }

    #[tokio::test]
    async fn test_reauth_by_other_user_keeps_owner() {
        let cache = cache().await;
        let t0 = Utc::now();
        cache
            .ensure_hub("h1", Some("user-1".to_string()), t0)
            .await
            .unwrap();
        cache.set_hub_online("h1", false).await.unwrap();

        let hub = cache
            .ensure_hub("h1", Some("user-2".to_string()), t0 + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(hub.user_id.as_deref(), Some("user-1"));
        assert!(hub.online);
        assert_eq!(cache.hub("h1").unwrap().user_id.as_deref(), Some("user-1"));

        // An unowned hub adopts the first user that authenticates it.
        cache.ensure_hub("h2", None, t0).await.unwrap();
        let hub = cache
            .ensure_hub("h2", Some("user-2".to_string()), t0)
            .await
            .unwrap();
        assert_eq!(hub.user_id.as_deref(), Some("user-2"));
    }

    #[tokio::test]
    async fn test_device_status_for_unseen_device_is_noop() {
        let cache = cache().await;
        let t0 = Utc::now();
        cache.ensure_hub("h1", None, t0).await.unwrap();

        assert!(!cache.update_device_status("h1", "d1", "on", t0).await.unwrap());
        assert!(cache.device("d1").is_none());

        let update = HubStatusUpdate {
            temperature: Some(22.0),
            humidity: None,
            alarm_state: true,
            devices: vec![report(Some("d1"), None), report(None, Some("on"))],
        };
        assert!(cache.apply_hub_status("h1", &update, t0).await.unwrap());

        let device = cache.device("d1").unwrap();
        assert_eq!(device.status, "Unknown");
        assert_eq!(device.device_type, "unknown");
        assert_eq!(device.name, "Device d1");
        assert_eq!(cache.devices_for_hub("h1").len(), 1);

        let hub = cache.hub("h1").unwrap();
        assert_eq!(hub.temperature, Some(22.0));
        assert!(hub.alarm_state);

        let t1 = t0 + Duration::seconds(5);
        assert!(cache.update_device_status("h1", "d1", "on", t1).await.unwrap());
        let device = cache.device("d1").unwrap();
        assert_eq!(device.status, "on");
        assert_eq!(device.last_updated, t1);
    }

    #[tokio::test]
    async fn test_hub_status_for_unknown_hub_is_ignored() {
        let cache = cache().await;
        let update = HubStatusUpdate {
            devices: vec![report(Some("d1"), Some("on"))],
            ..Default::default()
        };
        assert!(!cache.apply_hub_status("ghost", &update, Utc::now()).await.unwrap());
        assert!(cache.device("d1").is_none());
    }

    #[tokio::test]
    async fn test_devices_are_scoped_to_their_hub() {
        let cache = cache().await;
        let now = Utc::now();
        cache.ensure_hub("h1", None, now).await.unwrap();
        cache.ensure_hub("h2", None, now).await.unwrap();
        cache
            .upsert_device("h1", "d1", Some("switch"), Some("Lamp"), now)
            .await
            .unwrap();

        assert!(!cache.update_device_status("h2", "d1", "off", now).await.unwrap());
        assert!(
            cache
                .upsert_device("h2", "d1", Some("sensor"), None, now)
                .await
                .unwrap()
                .is_none()
        );
        let device = cache.device("d1").unwrap();
        assert_eq!(device.hub_id, "h1");
        assert_eq!(device.device_type, "switch");
        assert_eq!(device.status, "Unknown");
    }

    #[tokio::test]
    async fn test_register_camera_once() {
        let cache = cache().await;
        let now = Utc::now();
        cache
            .ensure_hub("h1", Some("user-1".to_string()), now)
            .await
            .unwrap();

        let camera = cache
            .register_camera("h1", "cam-000123", None, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(camera.name, "Camera 000123");
        assert_eq!(camera.user_id.as_deref(), Some("user-1"));

        assert!(
            cache
                .register_camera("h1", "cam-000123", Some("Porch"), now)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(cache.cameras().len(), 1);
        assert_eq!(cache.camera("cam-000123").unwrap().name, "Camera 000123");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone()).await;
        let now = Utc::now();
        cache.ensure_hub("h1", None, now).await.unwrap();

        store.set_fail_writes(true);
        assert!(cache.set_alarm_state("h1", true).await.is_err());
        assert!(!cache.hub("h1").unwrap().alarm_state);
    }

    #[tokio::test]
    async fn test_hub_status_continues_past_failed_device() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone()).await;
        let now = Utc::now();
        cache.ensure_hub("h1", None, now).await.unwrap();

        store.set_fail_writes_for("d2", true);
        let update = HubStatusUpdate {
            temperature: Some(19.5),
            devices: vec![
                report(Some("d1"), Some("on")),
                report(Some("d2"), Some("on")),
                report(Some("d3"), Some("off")),
            ],
            ..Default::default()
        };
        assert!(cache.apply_hub_status("h1", &update, now).await.unwrap());

        assert_eq!(cache.device("d1").unwrap().status, "on");
        assert!(cache.device("d2").is_none());
        assert_eq!(cache.device("d3").unwrap().status, "off");
        assert_eq!(cache.hub("h1").unwrap().temperature, Some(19.5));

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.devices.len(), 2);
    }

    #[tokio::test]
    async fn test_hub_status_fails_when_hub_cannot_be_saved() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone()).await;
        let now = Utc::now();
        cache.ensure_hub("h1", None, now).await.unwrap();

        store.set_fail_writes_for("h1", true);
        let update = HubStatusUpdate {
            temperature: Some(30.0),
            devices: vec![report(Some("d1"), Some("on"))],
            ..Default::default()
        };
        assert!(cache.apply_hub_status("h1", &update, now).await.is_err());
        assert_eq!(cache.hub("h1").unwrap().temperature, None);
        assert!(cache.device("d1").is_none());
    }

    #[tokio::test]
    async fn test_failed_demotion_is_retried_next_sweep() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone()).await;
        let t0 = Utc::now();
        let timeout = Duration::seconds(120);
        cache.ensure_hub("h1", None, t0).await.unwrap();
        cache.ensure_hub("h2", None, t0).await.unwrap();

        store.set_fail_writes_for("h1", true);
        let demoted = cache
            .demote_stale_hubs(t0 + Duration::seconds(121), timeout)
            .await;
        assert_eq!(demoted, vec!["h2".to_string()]);
        assert!(cache.is_hub_online("h1"));
        assert!(store.load().await.unwrap().hubs.iter().any(|h| h.id == "h1" && h.online));

        store.set_fail_writes_for("h1", false);
        let demoted = cache
            .demote_stale_hubs(t0 + Duration::seconds(181), timeout)
            .await;
        assert_eq!(demoted, vec!["h1".to_string()]);
        assert!(!cache.is_hub_online("h1"));
    }

    #[tokio::test]
    async fn test_failed_camera_demotion_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store.clone()).await;
        let t0 = Utc::now();
        let timeout = Duration::seconds(300);
        cache.ensure_hub("h1", None, t0).await.unwrap();
        cache.register_camera("h1", "cam-1", None, t0).await.unwrap();
        cache.record_motion("cam-1", "u", t0).await.unwrap();

        store.set_fail_writes_for("cam-1", true);
        assert!(
            cache
                .demote_stale_cameras(t0 + Duration::seconds(301), timeout)
                .await
                .is_empty()
        );
        assert!(cache.camera("cam-1").unwrap().online);

        store.set_fail_writes_for("cam-1", false);
        assert_eq!(
            cache
                .demote_stale_cameras(t0 + Duration::seconds(361), timeout)
                .await,
            vec!["cam-1".to_string()]
        );
    }

    /// Memory store whose hub writes take `delay`.
    struct SlowHubStore {
        inner: MemoryStore,
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl StateStore for SlowHubStore {
        async fn load(&self) -> StoreResult<Snapshot> {
            self.inner.load().await
        }

        async fn save_hub(&self, hub: &HubRecord) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.save_hub(hub).await
        }

        async fn save_device(&self, device: &DeviceRecord) -> StoreResult<()> {
            self.inner.save_device(device).await
        }

        async fn save_camera(&self, camera: &CameraRecord) -> StoreResult<()> {
            self.inner.save_camera(camera).await
        }

        async fn insert_profile(&self, profile: &FamilyMemberProfile) -> StoreResult<()> {
            self.inner.insert_profile(profile).await
        }
    }

    #[tokio::test]
    async fn test_sweep_does_not_stall_other_writers() {
        let t0 = Utc::now();
        let inner = MemoryStore::new();
        for i in 0..20 {
            inner
                .save_hub(&HubRecord::new(format!("stale-{i}"), None, t0))
                .await
                .unwrap();
        }
        inner
            .save_hub(&HubRecord::new("live", None, t0 + Duration::seconds(100)))
            .await
            .unwrap();

        let store = Arc::new(SlowHubStore {
            inner,
            delay: std::time::Duration::from_millis(25),
        });
        let cache = Arc::new(StateCache::load(store).await.unwrap());

        let sweeper = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .demote_stale_hubs(t0 + Duration::seconds(121), Duration::seconds(120))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let started = std::time::Instant::now();
        cache
            .upsert_device("live", "d1", Some("light"), None, t0)
            .await
            .unwrap()
            .unwrap();
        let waited = started.elapsed();
        assert!(
            waited < std::time::Duration::from_millis(200),
            "device write waited {waited:?} behind the sweep"
        );

        assert_eq!(sweeper.await.unwrap().len(), 20);
        assert!(cache.is_hub_online("live"));
    }

    #[tokio::test]
    async fn test_hub_sweep_threshold() {
        let cache = cache().await;
        let t0 = Utc::now();
        cache.ensure_hub("h1", None, t0).await.unwrap();
        let timeout = Duration::seconds(120);

        assert!(
            cache
                .demote_stale_hubs(t0 + Duration::seconds(119), timeout)
                .await
                .is_empty()
        );
        assert!(cache.is_hub_online("h1"));

        let demoted = cache
            .demote_stale_hubs(t0 + Duration::seconds(121), timeout)
            .await;
        assert_eq!(demoted, vec!["h1".to_string()]);
        assert!(!cache.is_hub_online("h1"));

        // Already offline hubs are not demoted twice.
        assert!(
            cache
                .demote_stale_hubs(t0 + Duration::seconds(500), timeout)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_camera_sweep_threshold() {
        let cache = cache().await;
        let t0 = Utc::now();
        cache.ensure_hub("h1", None, t0).await.unwrap();
        cache.register_camera("h1", "cam-1", None, t0).await.unwrap();
        cache.register_camera("h1", "cam-2", None, t0).await.unwrap();
        cache
            .record_motion("cam-1", "https://img.example/a.jpg", t0)
            .await
            .unwrap();
        let timeout = Duration::seconds(300);

        assert!(
            cache
                .demote_stale_cameras(t0 + Duration::seconds(299), timeout)
                .await
                .is_empty()
        );
        let demoted = cache
            .demote_stale_cameras(t0 + Duration::seconds(301), timeout)
            .await;
        assert_eq!(demoted, vec!["cam-1".to_string()]);
        assert!(!cache.camera("cam-1").unwrap().online);
        // No motion ever recorded.
        assert!(cache.camera("cam-2").unwrap().online);
    }

    #[tokio::test]
    async fn test_profiles_follow_association_order() {
        let cache = cache().await;
        let now = Utc::now();
        cache.ensure_hub("h1", None, now).await.unwrap();
        cache.register_camera("h1", "cam-1", None, now).await.unwrap();

        for (id, name) in [("fm-2", "Bea"), ("fm-1", "Ada")] {
            cache
                .add_profile(FamilyMemberProfile {
                    id: id.to_string(),
                    name: name.to_string(),
                    feature_vector: vec![0.0; 4],
                    camera_ids: vec!["cam-1".to_string()],
                })
                .await
                .unwrap();
        }

        let names: Vec<String> = cache
            .profiles_for_camera("cam-1")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Bea", "Ada"]);
        assert!(cache.profiles_for_camera("cam-unknown").is_empty());
    }

    #[tokio::test]
    async fn test_profile_requires_known_cameras() {
        let cache = cache().await;
        let err = cache
            .add_profile(FamilyMemberProfile {
                id: "fm-1".to_string(),
                name: "Ada".to_string(),
                feature_vector: vec![0.0],
                camera_ids: vec!["cam-missing".to_string()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_restores_profiles() {
        let store = Arc::new(MemoryStore::new());
        {
            let cache = cache_with(store.clone()).await;
            let now = Utc::now();
            cache.ensure_hub("h1", None, now).await.unwrap();
            cache.register_camera("h1", "cam-1", None, now).await.unwrap();
            cache
                .add_profile(FamilyMemberProfile {
                    id: "fm-1".to_string(),
                    name: "Ada".to_string(),
                    feature_vector: vec![1.0, 2.0],
                    camera_ids: vec!["cam-1".to_string()],
                })
                .await
                .unwrap();
        }

        let reloaded = cache_with(store).await;
        assert_eq!(reloaded.profiles_for_camera("cam-1").len(), 1);
        assert!(reloaded.camera("cam-1").is_some());
    }
}
