//! Persistence seams used by the registry, behavior tracker and caches
//!
//! Core components only see these traits, so they run unchanged against
//! SQLite or without any store at all.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{Database, queries};
use crate::cache::StoredFingerprintEntry;
use crate::models::{Device, MacAddress, PresenceRecord};

/// Latest device snapshots keyed by MAC
pub trait DeviceStore: Send + Sync {
    fn save_device(&self, device: &Device) -> Result<()>;
    fn load_devices(&self) -> Result<Vec<Device>>;
    fn clear_devices(&self) -> Result<()>;
}

/// Append-only presence history keyed by MAC and timestamp
pub trait PresenceStore: Send + Sync {
    fn append_presence(&self, record: &PresenceRecord) -> Result<()>;
    /// Records in `[from, to)`, oldest first
    fn presence_range(
        &self,
        mac: &MacAddress,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PresenceRecord>>;
    /// Latest `limit` records, oldest first
    fn recent_presence(&self, mac: &MacAddress, limit: usize) -> Result<Vec<PresenceRecord>>;
    fn presence_count(&self, mac: &MacAddress) -> Result<u64>;
}

/// Persisted fingerprint cache entries keyed by MAC and origin
pub trait FingerprintStore: Send + Sync {
    fn save_fingerprint_entry(&self, entry: &StoredFingerprintEntry) -> Result<()>;
    fn save_fingerprint_entries(&self, entries: &[StoredFingerprintEntry]) -> Result<()>;
    fn load_fingerprint_entries(&self) -> Result<Vec<StoredFingerprintEntry>>;
    fn clear_fingerprint_entries(&self) -> Result<()>;
}

impl DeviceStore for Database {
    fn save_device(&self, device: &Device) -> Result<()> {
        queries::upsert_device(&*self.lock()?, device)
    }

    fn load_devices(&self) -> Result<Vec<Device>> {
        queries::get_all_devices(&*self.lock()?)
    }

    fn clear_devices(&self) -> Result<()> {
        queries::delete_all_devices(&*self.lock()?).map(|_| ())
    }
}

impl PresenceStore for Database {
    fn append_presence(&self, record: &PresenceRecord) -> Result<()> {
        queries::insert_presence(&*self.lock()?, record).map(|_| ())
    }

    fn presence_range(
        &self,
        mac: &MacAddress,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PresenceRecord>> {
        queries::get_presence_range(&*self.lock()?, mac, &from, &to)
    }

    fn recent_presence(&self, mac: &MacAddress, limit: usize) -> Result<Vec<PresenceRecord>> {
        queries::get_recent_presence(&*self.lock()?, mac, limit)
    }

    fn presence_count(&self, mac: &MacAddress) -> Result<u64> {
        queries::count_presence(&*self.lock()?, mac)
    }
}

impl FingerprintStore for Database {
    fn save_fingerprint_entry(&self, entry: &StoredFingerprintEntry) -> Result<()> {
        queries::upsert_fingerprint_entry(&*self.lock()?, entry)
    }

    fn save_fingerprint_entries(&self, entries: &[StoredFingerprintEntry]) -> Result<()> {
        queries::save_fingerprint_entries(&*self.lock()?, entries).map(|_| ())
    }

    fn load_fingerprint_entries(&self) -> Result<Vec<StoredFingerprintEntry>> {
        let conn = self.lock()?;
        queries::delete_expired_fingerprint_entries(&conn, &Utc::now())?;
        queries::get_fingerprint_entries(&conn)
    }

    fn clear_fingerprint_entries(&self) -> Result<()> {
        queries::delete_fingerprint_entries(&*self.lock()?).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_database_behind_trait_objects() {
        let db = Database::in_memory().unwrap();
        let devices: Arc<dyn DeviceStore> = Arc::new(db.clone());
        let presence: Arc<dyn PresenceStore> = Arc::new(db);

        let mac = MacAddress::parse("aa:bb:cc:00:00:10").unwrap();
        let now = Utc::now();
        devices
            .save_device(&Device::new(mac.clone(), "10.0.0.10".into(), now))
            .unwrap();
        presence
            .append_presence(&PresenceRecord::new(mac.clone(), now, true))
            .unwrap();

        assert_eq!(devices.load_devices().unwrap().len(), 1);
        assert_eq!(presence.presence_count(&mac).unwrap(), 1);
        let window = presence
            .presence_range(&mac, now - Duration::seconds(1), now + Duration::seconds(1))
            .unwrap();
        assert_eq!(window.len(), 1);

        devices.clear_devices().unwrap();
        assert!(devices.load_devices().unwrap().is_empty());
    }
}
