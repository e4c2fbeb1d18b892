//! Hub channel WebSocket endpoint.
//!
//! One connection per hub. Inbound text frames go to the protocol handler
//! in arrival order; outbound messages flow through the session registry.

mod handler;

pub use handler::hub_channel_handler;
