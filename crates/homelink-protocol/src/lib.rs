//! Wire types for the hub channel.
//!
//! Every frame exchanged with a hub is a UTF-8 JSON object carrying a
//! mandatory `type` field. Inbound frames (hub -> server) decode into
//! [`HubFrame`]; outbound messages (server -> hub) are [`ServerMessage`].

pub mod frames;
pub mod messages;
pub mod naming;

pub use frames::{DeviceReport, FrameError, HubFrame};
pub use messages::ServerMessage;
pub use naming::fallback_name;
