//! Test utilities and common setup.

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use homelink::api::{self, AppState};
use homelink::auth::{AuthConfig, ConfiguredCredentials, HubUser};
use homelink::db::Database;
use homelink::face::EuclideanComparator;
use homelink::registry::{HubTransport, RegistryConfig, SessionHandle, TransportReceiver};
use homelink::state::{MemoryStore, SqliteStore, StateCache, StateStore};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct-horse";
pub const USER_ID: &str = "user-1";

/// Router plus the state behind it, so tests can seed hubs and sessions.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Register an online hub that has not connected yet.
    pub async fn seed_hub(&self, hub_id: &str) {
        self.state
            .state
            .ensure_hub(hub_id, Some(USER_ID.to_string()), Utc::now())
            .await
            .expect("seed hub");
    }

    pub async fn seed_device(&self, hub_id: &str, device_id: &str) {
        self.state
            .state
            .upsert_device(hub_id, device_id, Some("light"), Some("Porch"), Utc::now())
            .await
            .expect("seed device")
            .expect("device owned by another hub");
    }

    pub async fn seed_camera(&self, hub_id: &str, camera_id: &str) {
        self.state
            .state
            .register_camera(hub_id, camera_id, Some("Front Door"), Utc::now())
            .await
            .expect("seed camera")
            .expect("camera already registered");
    }

    /// Attach an authenticated session for `hub_id` backed by an in-process
    /// channel instead of a socket.
    pub fn attach_session(&self, hub_id: &str) -> (SessionHandle, TransportReceiver) {
        let (transport, rx) = HubTransport::channel(16);
        let handle = self.state.registry.connect(hub_id, transport);
        assert!(
            self.state
                .registry
                .mark_authenticated(&handle, Some(USER_ID.to_string()))
        );
        (handle, rx)
    }
}

pub fn test_auth_config() -> AuthConfig {
    // Low cost keeps the suite fast.
    let password_hash = bcrypt::hash(PASSWORD, 4).expect("Failed to hash password");
    AuthConfig {
        users: vec![HubUser {
            username: USERNAME.to_string(),
            user_id: USER_ID.to_string(),
            password_hash,
        }],
    }
}

async fn build_app(store: Arc<dyn StateStore>) -> TestApp {
    let cache = Arc::new(StateCache::load(store).await.expect("load state"));
    let credentials = Arc::new(ConfiguredCredentials::new(&test_auth_config()));
    let comparator = Arc::new(EuclideanComparator::default());
    let state = AppState::new(
        &RegistryConfig {
            send_timeout_ms: 500,
            channel_capacity: 16,
        },
        cache,
        credentials,
        comparator,
    );
    TestApp {
        router: api::create_router(state.clone()),
        state,
    }
}

/// App backed by the in-memory store.
pub async fn test_app() -> TestApp {
    build_app(Arc::new(MemoryStore::new())).await
}

/// App backed by an in-memory SQLite database.
pub async fn test_app_sqlite() -> TestApp {
    let db = Database::in_memory().await.expect("open database");
    build_app(Arc::new(SqliteStore::new(&db))).await
}
