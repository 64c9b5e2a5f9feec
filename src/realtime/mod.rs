//! The published real-time snapshot and its refresh.

mod store;

pub use store::{RealtimeSnapshot, RealtimeSnapshotStore};
