//! Application state shared across handlers.

use std::sync::Arc;

use crate::alerts::{AlertDispatcher, MotionPipeline};
use crate::auth::CredentialVerifier;
use crate::face::FaceComparator;
use crate::protocol::ProtocolHandler;
use crate::registry::{RegistryConfig, SessionRegistry};
use crate::state::StateCache;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live hub sessions.
    pub registry: Arc<SessionRegistry>,
    /// Hub, device and camera state.
    pub state: Arc<StateCache>,
    /// Hub frame handler.
    pub protocol: Arc<ProtocolHandler>,
    pub alerts: Arc<AlertDispatcher>,
    pub motion: Arc<MotionPipeline>,
    /// Outbound queue size for new hub connections.
    pub channel_capacity: usize,
}

impl AppState {
    /// Wire up every service around one registry and state cache.
    pub fn new(
        registry_config: &RegistryConfig,
        state: Arc<StateCache>,
        credentials: Arc<dyn CredentialVerifier>,
        comparator: Arc<dyn FaceComparator>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(registry_config));
        let protocol = Arc::new(ProtocolHandler::new(
            registry.clone(),
            state.clone(),
            credentials,
        ));
        let alerts = Arc::new(AlertDispatcher::new(registry.clone(), state.clone()));
        let motion = Arc::new(MotionPipeline::new(state.clone(), alerts.clone(), comparator));

        Self {
            registry,
            state,
            protocol,
            alerts,
            motion,
            channel_capacity: registry_config.channel_capacity,
        }
    }
}
