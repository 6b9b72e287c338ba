//! SQLite persistence for device snapshots, presence history and the
//! fingerprint cache

mod connection;
pub mod queries;
mod schema;
mod store;

pub use connection::Database;
pub use store::{DeviceStore, FingerprintStore, PresenceStore};
