//! Persistence boundary for hub state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::Mutex;

use super::error::{StoreError, StoreResult};
use super::models::{CameraRecord, DeviceRecord, FamilyMemberProfile, HubRecord, Snapshot};

/// Durable storage behind the state cache.
///
/// Writes are upserts keyed by record id. Implementations must be safe to
/// call from many tasks at once.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read every record, used once at startup.
    async fn load(&self) -> StoreResult<Snapshot>;

    async fn save_hub(&self, hub: &HubRecord) -> StoreResult<()>;

    async fn save_device(&self, device: &DeviceRecord) -> StoreResult<()>;

    async fn save_camera(&self, camera: &CameraRecord) -> StoreResult<()>;

    /// Insert a new profile and its camera associations.
    ///
    /// Returns [`StoreError::Conflict`] if the id is taken.
    async fn insert_profile(&self, profile: &FamilyMemberProfile) -> StoreResult<()>;
}

#[derive(Default)]
struct MemoryInner {
    hubs: HashMap<String, HubRecord>,
    devices: HashMap<String, DeviceRecord>,
    cameras: HashMap<String, CameraRecord>,
    profiles: Vec<FamilyMemberProfile>,
}

/// Non-durable store for tests and `serve --ephemeral`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_writes: AtomicBool,
    failing_ids: DashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise persistence error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes of the record with this id fail while `fail` is set.
    pub fn set_fail_writes_for(&self, id: &str, fail: bool) {
        if fail {
            self.failing_ids.insert(id.to_string());
        } else {
            self.failing_ids.remove(id);
        }
    }

    fn check_writable(&self, id: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        if self.failing_ids.contains(id) {
            return Err(StoreError::Backend(format!("writes to {id} disabled")));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> StoreResult<Snapshot> {
        let inner = self.inner.lock().await;
        Ok(Snapshot {
            hubs: inner.hubs.values().cloned().collect(),
            devices: inner.devices.values().cloned().collect(),
            cameras: inner.cameras.values().cloned().collect(),
            profiles: inner.profiles.clone(),
        })
    }

    async fn save_hub(&self, hub: &HubRecord) -> StoreResult<()> {
        self.check_writable(&hub.id)?;
        let mut inner = self.inner.lock().await;
        inner.hubs.insert(hub.id.clone(), hub.clone());
        Ok(())
    }

    async fn save_device(&self, device: &DeviceRecord) -> StoreResult<()> {
        self.check_writable(&device.id)?;
        let mut inner = self.inner.lock().await;
        inner.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn save_camera(&self, camera: &CameraRecord) -> StoreResult<()> {
        self.check_writable(&camera.id)?;
        let mut inner = self.inner.lock().await;
        inner.cameras.insert(camera.id.clone(), camera.clone());
        Ok(())
    }

    async fn insert_profile(&self, profile: &FamilyMemberProfile) -> StoreResult<()> {
        self.check_writable(&profile.id)?;
        let mut inner = self.inner.lock().await;
        if inner.profiles.iter().any(|p| p.id == profile.id) {
            return Err(StoreError::Conflict(format!("family member {}", profile.id)));
        }
        inner.profiles.push(profile.clone());
        Ok(())
    }
}
