//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/health", get(handlers::health))
        // Hub channel
        .route("/hub-channel/{hub_id}", get(ws::hub_channel_handler))
        .route("/ws/hub/{hub_id}", get(ws::hub_channel_handler))
        // Hubs
        .route("/api/hubs", get(handlers::list_hubs))
        .route("/api/hubs/{hub_id}", get(handlers::get_hub))
        .route(
            "/api/hubs/{hub_id}/control/{device_id}",
            post(handlers::control_device),
        )
        .route("/api/hubs/{hub_id}/alarm", post(handlers::set_alarm))
        // Cameras
        .route(
            "/api/cameras",
            get(handlers::list_cameras).post(handlers::register_camera),
        )
        .route("/api/cameras/{camera_id}", get(handlers::get_camera))
        .route(
            "/api/cameras/{camera_id}/frames",
            post(handlers::ingest_frame),
        )
        .route(
            "/api/cameras/{camera_id}/alerts",
            post(handlers::send_camera_alert),
        )
        // Family members
        .route(
            "/api/family",
            get(handlers::list_family).post(handlers::create_family_member),
        )
        .layer(trace_layer)
        .with_state(state)
}
