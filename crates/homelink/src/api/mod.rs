//! HTTP API module.
//!
//! Thin control plane over the hub registry and state cache, plus the hub
//! channel upgrade routes.

mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
