//! Bounded in-memory accelerator over durable presence history

use chrono::{FixedOffset, Offset, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BehaviorClass, BehaviorProfile};
use crate::config::EngineSettings;
use crate::database::PresenceStore;
use crate::inference::signals_from_behavior;
use crate::models::{MacAddress, PresenceRecord, Signal};

struct CachedProfile {
    profile: BehaviorProfile,
    last_access: u64,
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<MacAddress, CachedProfile>,
    tick: u64,
}

/// Presence tracker with LRU-bounded profile cache.
///
/// With a store attached, every observation is persisted and profiles evicted
/// from memory are rebuilt from the store on next access.
pub struct BehaviorTracker {
    inner: Mutex<Inner>,
    store: Option<Arc<dyn PresenceStore>>,
    history_limit: usize,
    cache_limit: usize,
    min_observations: u64,
    offset: FixedOffset,
}

impl BehaviorTracker {
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_limits(
            settings.behavior_history_limit,
            settings.behavior_profile_cache_limit,
            settings.behavior_min_observations,
            settings.behavior_utc_offset_minutes,
        )
    }

    pub fn with_limits(
        history_limit: usize,
        cache_limit: usize,
        min_observations: u64,
        utc_offset_minutes: i32,
    ) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self {
            inner: Mutex::new(Inner::default()),
            store: None,
            history_limit: history_limit.max(1),
            cache_limit: cache_limit.max(1),
            min_observations,
            offset,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PresenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Record one sample and return the device's updated classification.
    pub fn record_observation(&self, record: PresenceRecord) -> BehaviorClass {
        let mac = record.mac.clone();
        let rebuilt = self.rebuild_if_missing(&mac);
        let class = {
            let mut inner = self.inner.lock();
            Self::insert_rebuilt(&mut inner, &mac, rebuilt);
            let tick = Self::touch(&mut inner);
            let entry = inner
                .profiles
                .entry(mac.clone())
                .or_insert_with(|| CachedProfile {
                    profile: BehaviorProfile::new(mac.clone()),
                    last_access: tick,
                });
            entry.last_access = tick;
            entry.profile.push(record.clone(), self.history_limit);
            entry
                .profile
                .recompute(self.min_observations, self.offset);
            let class = entry.profile.classification;
            self.evict_over_limit(&mut inner);
            class
        };

        if let Some(store) = &self.store
            && let Err(e) = store.append_presence(&record)
        {
            tracing::warn!("Failed to persist presence record for {}: {}", record.mac, e);
        }
        class
    }

    /// Current classification; `Unknown` for devices never observed.
    pub fn classify(&self, mac: &MacAddress) -> BehaviorClass {
        self.profile(mac)
            .map(|p| p.classification)
            .unwrap_or(BehaviorClass::Unknown)
    }

    /// Behavior-derived inference signals for a device.
    pub fn signals_for(&self, mac: &MacAddress) -> Vec<Signal> {
        match self.profile(mac) {
            Some(profile) => signals_from_behavior(profile.classification, &profile.peak_hours),
            None => Vec::new(),
        }
    }

    /// Snapshot of a profile, rebuilding it from the store if it was evicted.
    pub fn profile(&self, mac: &MacAddress) -> Option<BehaviorProfile> {
        let rebuilt = self.rebuild_if_missing(mac);
        let mut inner = self.inner.lock();
        Self::insert_rebuilt(&mut inner, mac, rebuilt);
        let tick = Self::touch(&mut inner);
        let profile = inner.profiles.get_mut(mac).map(|entry| {
            entry.last_access = tick;
            entry.profile.clone()
        });
        self.evict_over_limit(&mut inner);
        profile
    }

    pub fn is_cached(&self, mac: &MacAddress) -> bool {
        self.inner.lock().profiles.contains_key(mac)
    }

    /// Number of profiles currently held in memory.
    pub fn len(&self) -> usize {
        self.inner.lock().profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every in-memory profile; durable history is untouched.
    pub fn clear(&self) {
        self.inner.lock().profiles.clear();
    }

    fn touch(inner: &mut Inner) -> u64 {
        inner.tick += 1;
        inner.tick
    }

    /// Store queries run without the tracker lock held.
    fn rebuild_if_missing(&self, mac: &MacAddress) -> Option<BehaviorProfile> {
        if self.store.is_none() || self.inner.lock().profiles.contains_key(mac) {
            return None;
        }
        self.rebuild(mac)
    }

    /// Keeps a profile another caller cached in the meantime.
    fn insert_rebuilt(inner: &mut Inner, mac: &MacAddress, rebuilt: Option<BehaviorProfile>) {
        let Some(profile) = rebuilt else {
            return;
        };
        if inner.profiles.contains_key(mac) {
            return;
        }
        let tick = Self::touch(inner);
        inner.profiles.insert(
            mac.clone(),
            CachedProfile {
                profile,
                last_access: tick,
            },
        );
    }

    fn rebuild(&self, mac: &MacAddress) -> Option<BehaviorProfile> {
        let store = self.store.as_ref()?;
        let count = match store.presence_count(mac) {
            Ok(0) => return None,
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Failed to count presence history for {}: {}", mac, e);
                return None;
            }
        };
        let history = match store.recent_presence(mac, self.history_limit) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Failed to load presence history for {}: {}", mac, e);
                return None;
            }
        };
        tracing::debug!("[BEHAVIOR] Rebuilt profile for {} from {} records", mac, history.len());
        let mut profile =
            BehaviorProfile::from_history(mac.clone(), history, count, self.history_limit);
        profile.recompute(self.min_observations, self.offset);
        Some(profile)
    }

    fn evict_over_limit(&self, inner: &mut Inner) {
        while inner.profiles.len() > self.cache_limit {
            let lru = inner
                .profiles
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(mac, _)| mac.clone());
            match lru {
                Some(mac) => {
                    inner.profiles.remove(&mac);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use chrono::{DateTime, Duration, TimeZone};

    fn mac_n(n: u32) -> MacAddress {
        MacAddress::parse(&format!("02:00:00:{:02x}:{:02x}:{:02x}", (n >> 16) & 0xff, (n >> 8) & 0xff, n & 0xff))
            .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap()
    }

    #[test]
    fn twelve_observations_classify_as_server_and_suggest_nas() {
        let tracker = BehaviorTracker::with_limits(100, 1000, 10, 0);
        let mac = mac_n(1);
        let hours = [9, 10, 11, 12, 13, 14, 15, 16, 17, 9, 10, 11];
        for (i, hour) in hours.iter().enumerate() {
            let day = if i < 9 { 0 } else { 1 };
            let ts = t0() + Duration::days(day) + Duration::hours(*hour);
            tracker.record_observation(PresenceRecord::new(mac.clone(), ts, i != 11));
        }

        assert_eq!(tracker.classify(&mac), BehaviorClass::Server);
        let signals = tracker.signals_for(&mac);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].suggested_type, crate::models::DeviceType::Nas);
        assert!((signals[0].confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn unobserved_device_is_unknown() {
        let tracker = BehaviorTracker::with_limits(100, 1000, 10, 0);
        assert_eq!(tracker.classify(&mac_n(9)), BehaviorClass::Unknown);
        assert!(tracker.signals_for(&mac_n(9)).is_empty());
    }

    #[test]
    fn lru_keeps_cache_bounded() {
        let tracker = BehaviorTracker::with_limits(100, 1000, 10, 0);
        for n in 0..1001 {
            tracker.record_observation(PresenceRecord::new(mac_n(n), t0(), true));
        }
        assert_eq!(tracker.len(), 1000);
        assert!(!tracker.is_cached(&mac_n(0)));
        assert!(tracker.is_cached(&mac_n(1000)));
    }

    #[test]
    fn recently_used_profiles_survive_eviction() {
        let tracker = BehaviorTracker::with_limits(100, 2, 10, 0);
        tracker.record_observation(PresenceRecord::new(mac_n(1), t0(), true));
        tracker.record_observation(PresenceRecord::new(mac_n(2), t0(), true));
        assert!(tracker.profile(&mac_n(1)).is_some());
        tracker.record_observation(PresenceRecord::new(mac_n(3), t0(), true));
        assert!(tracker.is_cached(&mac_n(1)));
        assert!(!tracker.is_cached(&mac_n(2)));
    }

    #[test]
    fn evicted_profiles_rebuild_from_store() {
        let db = Arc::new(Database::in_memory().unwrap());
        let tracker = BehaviorTracker::with_limits(100, 1, 10, 0).with_store(db);
        for i in 0..3 {
            tracker.record_observation(PresenceRecord::new(mac_n(1), t0() + Duration::hours(i), true));
        }
        tracker.record_observation(PresenceRecord::new(mac_n(2), t0(), true));
        assert!(!tracker.is_cached(&mac_n(1)));

        let rebuilt = tracker.profile(&mac_n(1)).unwrap();
        assert_eq!(rebuilt.observation_count, 3);
        assert_eq!(rebuilt.history.len(), 3);
        assert_eq!(tracker.len(), 1);
    }

    /// Presence store that checks the tracker is unlocked while it is queried.
    struct LockCheckingStore {
        db: Database,
        tracker: std::sync::OnceLock<std::sync::Weak<BehaviorTracker>>,
        queried_while_locked: std::sync::atomic::AtomicBool,
        queries: std::sync::atomic::AtomicUsize,
    }

    impl LockCheckingStore {
        fn check(&self) {
            self.queries.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Some(tracker) = self.tracker.get().and_then(std::sync::Weak::upgrade)
                && tracker.inner.try_lock().is_none()
            {
                self.queried_while_locked
                    .store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    impl PresenceStore for LockCheckingStore {
        fn append_presence(&self, record: &PresenceRecord) -> anyhow::Result<()> {
            self.db.append_presence(record)
        }

        fn presence_range(
            &self,
            mac: &MacAddress,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> anyhow::Result<Vec<PresenceRecord>> {
            self.check();
            self.db.presence_range(mac, from, to)
        }

        fn recent_presence(&self, mac: &MacAddress, limit: usize) -> anyhow::Result<Vec<PresenceRecord>> {
            self.check();
            self.db.recent_presence(mac, limit)
        }

        fn presence_count(&self, mac: &MacAddress) -> anyhow::Result<u64> {
            self.check();
            self.db.presence_count(mac)
        }
    }

    #[test]
    fn rebuild_queries_run_outside_the_tracker_lock() {
        let store = Arc::new(LockCheckingStore {
            db: Database::in_memory().unwrap(),
            tracker: std::sync::OnceLock::new(),
            queried_while_locked: std::sync::atomic::AtomicBool::new(false),
            queries: std::sync::atomic::AtomicUsize::new(0),
        });
        let tracker = Arc::new(
            BehaviorTracker::with_limits(100, 1, 10, 0)
                .with_store(Arc::clone(&store) as Arc<dyn PresenceStore>),
        );
        store.tracker.set(Arc::downgrade(&tracker)).unwrap();

        tracker.record_observation(PresenceRecord::new(mac_n(1), t0(), true));
        tracker.record_observation(PresenceRecord::new(mac_n(2), t0(), true));
        let rebuilt = tracker.profile(&mac_n(1)).unwrap();
        assert_eq!(rebuilt.observation_count, 1);
        tracker.record_observation(PresenceRecord::new(mac_n(2), t0() + Duration::hours(1), true));

        assert!(store.queries.load(std::sync::atomic::Ordering::SeqCst) > 0);
        assert!(!store.queried_while_locked.load(std::sync::atomic::Ordering::SeqCst));
    }
}
