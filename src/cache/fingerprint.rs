//! Fingerprint lookup cache keyed by `(MAC, origin)`
//!
//! Entries carry a validator (description URL or signal hash). Lookups with a
//! different validator miss, so stale results are never served after the
//! device's observable signals change.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::CacheStats;
use crate::models::{Fingerprint, MacAddress, SecondarySignals};

/// Which lookup produced a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Description,
    Remote,
}

impl CacheOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOrigin::Description => "description",
            CacheOrigin::Remote => "remote",
        }
    }
}

impl fmt::Display for CacheOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "description" => Ok(CacheOrigin::Description),
            "remote" => Ok(CacheOrigin::Remote),
            other => Err(format!("Unknown cache origin: {}", other)),
        }
    }
}

/// Cached outcome of a lookup; negative answers are cached too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "fingerprint", rename_all = "snake_case")]
pub enum CachedLookup {
    Found(Fingerprint),
    NotFound,
}

/// Serialized form of one cache entry, as kept by the persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFingerprintEntry {
    pub mac: MacAddress,
    pub origin: CacheOrigin,
    pub validator: String,
    /// JSON-encoded [`CachedLookup`]
    pub payload: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Hex SHA-256 over the MAC and its secondary signals.
///
/// User agents are a `BTreeSet`, so they hash sorted and de-duplicated.
pub fn signal_hash(mac: &MacAddress, secondary: &SecondarySignals) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mac.as_str().as_bytes());
    hasher.update(b"|dhcp=");
    if let Some(dhcp) = secondary.dhcp_fingerprint.as_deref() {
        hasher.update(dhcp.trim().as_bytes());
    }
    hasher.update(b"|ua=");
    for agent in &secondary.user_agents {
        hasher.update(agent.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct Slot {
    validator: String,
    value: CachedLookup,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(MacAddress, CacheOrigin), Slot>,
    stats: CacheStats,
}

#[derive(Default)]
pub struct FingerprintCache {
    inner: Mutex<Inner>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mac: &MacAddress, origin: CacheOrigin, validator: &str) -> Option<CachedLookup> {
        self.get_at(mac, origin, validator, Utc::now())
    }

    pub fn get_at(
        &self,
        mac: &MacAddress,
        origin: CacheOrigin,
        validator: &str,
        now: DateTime<Utc>,
    ) -> Option<CachedLookup> {
        let mut inner = self.inner.lock();
        let key = (mac.clone(), origin);

        let Some((expired, valid)) = inner
            .entries
            .get(&key)
            .map(|slot| (now >= slot.expires_at, slot.validator == validator))
        else {
            inner.stats.misses += 1;
            return None;
        };

        if expired || !valid {
            inner.entries.remove(&key);
            if expired {
                inner.stats.expirations += 1;
            }
            inner.stats.misses += 1;
            return None;
        }

        inner.stats.hits += 1;
        inner.entries.get(&key).map(|slot| slot.value.clone())
    }

    pub fn put(
        &self,
        mac: &MacAddress,
        origin: CacheOrigin,
        validator: &str,
        value: CachedLookup,
        ttl: Duration,
    ) {
        self.put_at(mac, origin, validator, value, ttl, Utc::now())
    }

    pub fn put_at(
        &self,
        mac: &MacAddress,
        origin: CacheOrigin,
        validator: &str,
        value: CachedLookup,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            (mac.clone(), origin),
            Slot {
                validator: validator.to_string(),
                value,
                stored_at: now,
                expires_at: now + ttl,
            },
        );
        inner.stats.inserts += 1;
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, slot| now < slot.expires_at);
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        removed
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Serialized copy of one entry, for write-through persistence.
    pub fn stored_entry(&self, mac: &MacAddress, origin: CacheOrigin) -> Option<StoredFingerprintEntry> {
        let inner = self.inner.lock();
        let slot = inner.entries.get(&(mac.clone(), origin))?;
        to_stored(mac, origin, slot)
    }

    /// Serialized copies of every entry.
    pub fn export_entries(&self) -> Vec<StoredFingerprintEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter_map(|((mac, origin), slot)| to_stored(mac, *origin, slot))
            .collect()
    }

    /// Load persisted entries, returning how many were accepted.
    ///
    /// Expired entries are skipped. Entries whose payload does not decode are
    /// discarded and counted as misses.
    pub fn load_entries(&self, entries: Vec<StoredFingerprintEntry>) -> usize {
        self.load_entries_at(entries, Utc::now())
    }

    pub fn load_entries_at(&self, entries: Vec<StoredFingerprintEntry>, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let mut loaded = 0;
        for stored in entries {
            if now >= stored.expires_at {
                continue;
            }
            let value = match serde_json::from_str::<CachedLookup>(&stored.payload) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        "Discarding corrupt {} cache entry for {}: {}",
                        stored.origin,
                        stored.mac,
                        e
                    );
                    inner.stats.misses += 1;
                    continue;
                }
            };
            inner.entries.insert(
                (stored.mac, stored.origin),
                Slot {
                    validator: stored.validator,
                    value,
                    stored_at: stored.stored_at,
                    expires_at: stored.expires_at,
                },
            );
            loaded += 1;
        }
        loaded
    }
}

fn to_stored(mac: &MacAddress, origin: CacheOrigin, slot: &Slot) -> Option<StoredFingerprintEntry> {
    match serde_json::to_string(&slot.value) {
        Ok(payload) => Some(StoredFingerprintEntry {
            mac: mac.clone(),
            origin,
            validator: slot.validator.clone(),
            payload,
            stored_at: slot.stored_at,
            expires_at: slot.expires_at,
        }),
        Err(e) => {
            tracing::warn!("Failed to serialize cache entry for {}: {}", mac, e);
            None
        }
    }
}
