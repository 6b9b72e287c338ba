//! Bounded ARP cache keyed by MAC with a reverse IP index

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::CacheStats;
use crate::models::{ArpEntry, MacAddress};

#[derive(Debug, Clone)]
struct Slot {
    entry: ArpEntry,
    inserted_at: DateTime<Utc>,
    /// Breaks ties between entries inserted in the same instant
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    by_mac: HashMap<MacAddress, Slot>,
    ip_index: HashMap<String, MacAddress>,
    stats: CacheStats,
    next_seq: u64,
}

impl Inner {
    fn is_expired(slot: &Slot, ttl: Duration, now: DateTime<Utc>) -> bool {
        now >= slot.inserted_at + ttl
    }

    /// Drop a slot and its IP index entry, if the index still points at it.
    fn remove(&mut self, mac: &MacAddress) -> Option<Slot> {
        let slot = self.by_mac.remove(mac)?;
        if self.ip_index.get(&slot.entry.ip) == Some(mac) {
            self.ip_index.remove(&slot.entry.ip);
        }
        Some(slot)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .by_mac
            .iter()
            .min_by_key(|(_, slot)| (slot.inserted_at, slot.seq))
            .map(|(mac, _)| mac.clone());
        if let Some(mac) = oldest {
            self.remove(&mac);
            self.stats.evictions += 1;
        }
    }
}

/// ARP entries by MAC, evicting the oldest insertion beyond `max_entries`
pub struct ArpCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    ttl: Duration,
}

impl ArpCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn get(&self, mac: &MacAddress) -> Option<ArpEntry> {
        self.get_at(mac, Utc::now())
    }

    pub fn get_at(&self, mac: &MacAddress, now: DateTime<Utc>) -> Option<ArpEntry> {
        let mut inner = self.inner.lock();
        let Some(expired) = inner
            .by_mac
            .get(mac)
            .map(|slot| Inner::is_expired(slot, self.ttl, now))
        else {
            inner.stats.misses += 1;
            return None;
        };

        if expired {
            inner.remove(mac);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }

        inner.stats.hits += 1;
        inner.by_mac.get(mac).map(|slot| slot.entry.clone())
    }

    pub fn get_by_ip(&self, ip: &str) -> Option<ArpEntry> {
        self.get_by_ip_at(ip, Utc::now())
    }

    pub fn get_by_ip_at(&self, ip: &str, now: DateTime<Utc>) -> Option<ArpEntry> {
        let mac = self.inner.lock().ip_index.get(ip).cloned();
        match mac {
            Some(mac) => self.get_at(&mac, now),
            None => {
                self.inner.lock().stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, entry: ArpEntry) {
        self.put_at(entry, Utc::now())
    }

    /// Insert or refresh an entry. A re-insert counts as a fresh insertion.
    pub fn put_at(&self, entry: ArpEntry, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.remove(&entry.mac);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.ip_index.insert(entry.ip.clone(), entry.mac.clone());
        inner.by_mac.insert(
            entry.mac.clone(),
            Slot {
                entry,
                inserted_at: now,
                seq,
            },
        );
        inner.stats.inserts += 1;

        while inner.by_mac.len() > self.max_entries {
            inner.evict_oldest();
        }
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn prune(&self) -> usize {
        self.prune_at(Utc::now())
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<MacAddress> = inner
            .by_mac
            .iter()
            .filter(|(_, slot)| Inner::is_expired(slot, self.ttl, now))
            .map(|(mac, _)| mac.clone())
            .collect();
        for mac in &expired {
            inner.remove(mac);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Unexpired entries, oldest insertion first.
    pub fn entries_at(&self, now: DateTime<Utc>) -> Vec<ArpEntry> {
        let inner = self.inner.lock();
        let mut slots: Vec<&Slot> = inner
            .by_mac
            .values()
            .filter(|slot| !Inner::is_expired(slot, self.ttl, now))
            .collect();
        slots.sort_by_key(|slot| (slot.inserted_at, slot.seq));
        slots.into_iter().map(|slot| slot.entry.clone()).collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.by_mac.clear();
        inner.ip_index.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.by_mac.len(),
            ..inner.stats
        }
    }
}
