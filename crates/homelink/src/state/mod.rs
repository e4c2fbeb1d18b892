//! Hub, device and camera state.
//!
//! [`StateCache`] is the read/write surface used by the rest of the server;
//! [`StateStore`] implementations persist what it holds.

mod cache;
mod error;
mod models;
mod sqlite;
mod store;

pub use cache::{HubStatusUpdate, StateCache};
pub use error::{StoreError, StoreResult};
pub use models::{
    CameraRecord, DeviceRecord, FamilyMemberProfile, FeatureVector, HubRecord, Snapshot,
};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, StateStore};
