//! Liveness sweeps for hubs and cameras.
//!
//! Hubs are stale when their last heartbeat is older than
//! `hub_timeout_secs`; cameras when their last motion is older than
//! `camera_timeout_secs`. Sweeps only ever move records from online to
//! offline. Cameras that never reported motion are left alone.

mod periodic;

pub use periodic::PeriodicTask;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::state::StateCache;

/// Liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Seconds without a heartbeat before a hub is offline.
    pub hub_timeout_secs: i64,
    /// Seconds without motion before a camera is offline.
    pub camera_timeout_secs: i64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            hub_timeout_secs: 120,
            camera_timeout_secs: 300,
        }
    }
}

/// Demotes stale hubs and cameras.
#[derive(Clone)]
pub struct LivenessMonitor {
    state: Arc<StateCache>,
    config: LivenessConfig,
}

/// Handles of the running sweep tasks.
pub struct LivenessTasks {
    hubs: PeriodicTask,
    cameras: PeriodicTask,
}

impl LivenessTasks {
    pub async fn stop(self) {
        self.hubs.stop().await;
        self.cameras.stop().await;
    }
}

impl LivenessMonitor {
    pub fn new(state: Arc<StateCache>, config: LivenessConfig) -> Self {
        Self { state, config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Mark hubs offline whose heartbeat is older than the hub timeout.
    pub async fn sweep_hubs(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(self.config.hub_timeout_secs);
        let demoted = self.state.demote_stale_hubs(now, timeout).await;
        debug!("Hub sweep demoted {} hubs", demoted.len());
        demoted
    }

    /// Mark cameras offline whose last motion is older than the camera timeout.
    pub async fn sweep_cameras(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(self.config.camera_timeout_secs);
        let demoted = self.state.demote_stale_cameras(now, timeout).await;
        debug!("Camera sweep demoted {} cameras", demoted.len());
        demoted
    }

    /// Start both sweeps on independent timers.
    pub fn start(&self) -> LivenessTasks {
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        let monitor = self.clone();
        let hubs = PeriodicTask::spawn("hub liveness sweep", period, move || {
            let monitor = monitor.clone();
            async move {
                monitor.sweep_hubs(Utc::now()).await;
                Ok(())
            }
        });

        let monitor = self.clone();
        let cameras = PeriodicTask::spawn("camera liveness sweep", period, move || {
            let monitor = monitor.clone();
            async move {
                monitor.sweep_cameras(Utc::now()).await;
                Ok(())
            }
        });

        LivenessTasks { hubs, cameras }
    }
}
