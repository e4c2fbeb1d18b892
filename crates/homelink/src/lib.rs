//! homelink: server side of the smart-home hub channel.
//!
//! Hubs hold one WebSocket each to the server. Frames they send update the
//! hub, device and camera state; the HTTP control plane pushes commands and
//! alerts back through the live session.

pub mod alerts;
pub mod api;
pub mod auth;
pub mod db;
pub mod face;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod state;
pub mod ws;
