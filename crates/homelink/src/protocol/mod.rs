//! Hub channel protocol state machine.
//!
//! A session starts unauthenticated; only `auth` is accepted until the hub
//! presents valid credentials. Wire types live in `homelink-protocol`.

mod handler;

pub use handler::ProtocolHandler;
