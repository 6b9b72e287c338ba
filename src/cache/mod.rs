//! In-memory caches with TTL expiry
//!
//! Every read and write has an `*_at(now)` variant so expiry can be driven
//! from tests with an explicit clock.

mod arp;
mod fingerprint;
mod stats;

pub use arp::ArpCache;
pub use fingerprint::{
    CacheOrigin, CachedLookup, FingerprintCache, StoredFingerprintEntry, signal_hash,
};
pub use stats::CacheStats;
