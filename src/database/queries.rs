//! Database query functions
//!
//! Device snapshots, presence history and persisted fingerprint cache
//! entries. Timestamps are stored as RFC 3339 UTC strings with millisecond
//! precision, which sort lexicographically.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::{CacheOrigin, StoredFingerprintEntry};
use crate::models::{Device, MacAddress, PresenceRecord};

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_mac_column(s: String, column: usize) -> rusqlite::Result<MacAddress> {
    MacAddress::parse(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ====== Devices ======

/// Insert or replace the snapshot of one device
pub fn upsert_device(conn: &Connection, device: &Device) -> Result<()> {
    let snapshot = serde_json::to_string(device).context("Failed to serialize device snapshot")?;
    conn.execute(
        r#"
        INSERT INTO devices (
            mac, ip, hostname, vendor, device_type, confidence, smart_score,
            user_label, first_seen, last_seen, is_online, snapshot
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(mac) DO UPDATE SET
            ip = excluded.ip,
            hostname = excluded.hostname,
            vendor = excluded.vendor,
            device_type = excluded.device_type,
            confidence = excluded.confidence,
            smart_score = excluded.smart_score,
            user_label = COALESCE(excluded.user_label, devices.user_label),
            first_seen = MIN(devices.first_seen, excluded.first_seen),
            last_seen = MAX(devices.last_seen, excluded.last_seen),
            is_online = excluded.is_online,
            snapshot = excluded.snapshot
        "#,
        params![
            device.mac.as_str(),
            &device.ip,
            &device.hostname,
            &device.vendor,
            device.device_type.as_str(),
            device.confidence,
            device.smart_score as i64,
            &device.user_label,
            format_timestamp(&device.first_seen),
            format_timestamp(&device.last_seen),
            device.is_online,
            snapshot,
        ],
    )
    .with_context(|| format!("Failed to upsert device {}", device.mac))?;
    Ok(())
}

fn decode_snapshot(mac: &str, snapshot: &str, user_label: Option<String>) -> Option<Device> {
    match serde_json::from_str::<Device>(snapshot) {
        Ok(mut device) => {
            // The column is authoritative for labels set outside a snapshot write.
            if user_label.is_some() {
                device.user_label = user_label;
            }
            Some(device)
        }
        Err(e) => {
            tracing::warn!("Discarding unreadable snapshot for device {}: {}", mac, e);
            None
        }
    }
}

/// Get all devices; unreadable snapshots are skipped
pub fn get_all_devices(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare("SELECT mac, snapshot, user_label FROM devices ORDER BY mac")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(mac, snapshot, label)| decode_snapshot(&mac, &snapshot, label))
        .collect())
}

/// Get device by MAC address
pub fn get_device_by_mac(conn: &Connection, mac: &MacAddress) -> Result<Option<Device>> {
    let row = conn
        .query_row(
            "SELECT snapshot, user_label FROM devices WHERE mac = ?1",
            params![mac.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()
        .context("Failed to query device by MAC")?;

    Ok(row.and_then(|(snapshot, label)| decode_snapshot(mac.as_str(), &snapshot, label)))
}

pub fn delete_all_devices(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM devices", [])
        .context("Failed to delete devices")
}

pub fn count_devices(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))
        .context("Failed to count devices")
}

// ====== Presence ======

pub fn insert_presence(conn: &Connection, record: &PresenceRecord) -> Result<i64> {
    let services = serde_json::to_string(&record.services).context("Failed to encode services")?;
    conn.execute(
        r#"
        INSERT INTO presence_records (mac, timestamp, is_online, ip, services)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            record.mac.as_str(),
            format_timestamp(&record.timestamp),
            record.is_online,
            &record.ip,
            services,
        ],
    )
    .context("Failed to insert presence record")?;
    Ok(conn.last_insert_rowid())
}

fn presence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRecord> {
    let services: String = row.get(4)?;
    Ok(PresenceRecord {
        mac: parse_mac_column(row.get(0)?, 0)?,
        timestamp: parse_datetime_column(row.get(1)?, 1)?,
        is_online: row.get(2)?,
        ip: row.get(3)?,
        services: serde_json::from_str(&services).unwrap_or_default(),
    })
}

/// Presence records of one device in `[from, to)`, oldest first
pub fn get_presence_range(
    conn: &Connection,
    mac: &MacAddress,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> Result<Vec<PresenceRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT mac, timestamp, is_online, ip, services
        FROM presence_records
        WHERE mac = ?1 AND timestamp >= ?2 AND timestamp < ?3
        ORDER BY timestamp ASC, id ASC
        "#,
    )?;

    let records = stmt
        .query_map(
            params![mac.as_str(), format_timestamp(from), format_timestamp(to)],
            presence_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// The most recent `limit` records of one device, oldest first
pub fn get_recent_presence(
    conn: &Connection,
    mac: &MacAddress,
    limit: usize,
) -> Result<Vec<PresenceRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT mac, timestamp, is_online, ip, services
        FROM presence_records
        WHERE mac = ?1
        ORDER BY timestamp DESC, id DESC
        LIMIT ?2
        "#,
    )?;

    let mut records = stmt
        .query_map(params![mac.as_str(), limit as i64], presence_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    records.reverse();
    Ok(records)
}

pub fn count_presence(conn: &Connection, mac: &MacAddress) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM presence_records WHERE mac = ?1",
            params![mac.as_str()],
            |row| row.get(0),
        )
        .context("Failed to count presence records")?;
    Ok(count.max(0) as u64)
}

// ====== Fingerprint cache ======

pub fn upsert_fingerprint_entry(conn: &Connection, entry: &StoredFingerprintEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO fingerprint_cache (mac, origin, validator, payload, stored_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(mac, origin) DO UPDATE SET
            validator = excluded.validator,
            payload = excluded.payload,
            stored_at = excluded.stored_at,
            expires_at = excluded.expires_at
        "#,
        params![
            entry.mac.as_str(),
            entry.origin.as_str(),
            &entry.validator,
            &entry.payload,
            format_timestamp(&entry.stored_at),
            format_timestamp(&entry.expires_at),
        ],
    )
    .context("Failed to upsert fingerprint cache entry")?;
    Ok(())
}

/// Write many cache entries atomically
pub fn save_fingerprint_entries(conn: &Connection, entries: &[StoredFingerprintEntry]) -> Result<usize> {
    conn.execute_batch("SAVEPOINT save_fingerprints")
        .context("Failed to start save_fingerprints transaction")?;

    let result = (|| -> Result<usize> {
        for entry in entries {
            upsert_fingerprint_entry(conn, entry)?;
        }
        Ok(entries.len())
    })();

    match result {
        Ok(count) => {
            conn.execute_batch("RELEASE SAVEPOINT save_fingerprints")
                .context("Failed to commit save_fingerprints transaction")?;
            Ok(count)
        }
        Err(e) => {
            let _ = conn.execute_batch(
                "ROLLBACK TO SAVEPOINT save_fingerprints; RELEASE SAVEPOINT save_fingerprints",
            );
            Err(e)
        }
    }
}

/// All persisted cache entries; rows with unreadable keys are skipped
pub fn get_fingerprint_entries(conn: &Connection) -> Result<Vec<StoredFingerprintEntry>> {
    let mut stmt = conn.prepare(
        "SELECT mac, origin, validator, payload, stored_at, expires_at FROM fingerprint_cache",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (mac, origin, validator, payload, stored_at, expires_at) in rows {
        let decoded = (|| -> Option<StoredFingerprintEntry> {
            Some(StoredFingerprintEntry {
                mac: MacAddress::parse(&mac).ok()?,
                origin: origin.parse::<CacheOrigin>().ok()?,
                validator,
                payload,
                stored_at: parse_datetime_column(stored_at, 4).ok()?,
                expires_at: parse_datetime_column(expires_at, 5).ok()?,
            })
        })();
        match decoded {
            Some(entry) => entries.push(entry),
            None => tracing::warn!("Skipping unreadable fingerprint cache row for {}", mac),
        }
    }
    Ok(entries)
}

pub fn delete_fingerprint_entries(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM fingerprint_cache", [])
        .context("Failed to clear fingerprint cache")
}

pub fn delete_expired_fingerprint_entries(conn: &Connection, now: &DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM fingerprint_cache WHERE expires_at <= ?1",
        params![format_timestamp(now)],
    )
    .context("Failed to prune fingerprint cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::create_tables;
    use crate::models::DeviceType;
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_device_roundtrip_and_label_preservation() {
        let conn = setup();
        let mut device = Device::new(mac("aa:bb:cc:00:00:01"), "192.168.1.10".into(), t0());
        device.device_type = DeviceType::Printer;
        device.user_label = Some("Office printer".into());
        upsert_device(&conn, &device).unwrap();

        // A later automated snapshot without a label keeps the stored label.
        device.user_label = None;
        device.last_seen = t0() + Duration::minutes(5);
        upsert_device(&conn, &device).unwrap();

        let loaded = get_device_by_mac(&conn, &device.mac).unwrap().unwrap();
        assert_eq!(loaded.device_type, DeviceType::Printer);
        assert_eq!(loaded.user_label.as_deref(), Some("Office printer"));
        assert_eq!(loaded.last_seen, t0() + Duration::minutes(5));
        assert_eq!(count_devices(&conn).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_is_skipped() {
        let conn = setup();
        let device = Device::new(mac("aa:bb:cc:00:00:02"), "10.0.0.2".into(), t0());
        upsert_device(&conn, &device).unwrap();
        conn.execute(
            "INSERT INTO devices (mac, ip, first_seen, last_seen, snapshot) VALUES ('AA:BB:CC:00:00:03', '10.0.0.3', 'x', 'x', '{broken')",
            [],
        )
        .unwrap();

        let devices = get_all_devices(&conn).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac, device.mac);
    }

    #[test]
    fn test_presence_range_and_recent() {
        let conn = setup();
        let m = mac("aa:bb:cc:00:00:04");
        for i in 0..5 {
            let mut record = PresenceRecord::new(m.clone(), t0() + Duration::hours(i), i % 2 == 0);
            record.services = vec!["_ssh._tcp".to_string()];
            insert_presence(&conn, &record).unwrap();
        }

        let range = get_presence_range(&conn, &m, &(t0() + Duration::hours(1)), &(t0() + Duration::hours(3))).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].timestamp, t0() + Duration::hours(1));
        assert_eq!(range[0].services, vec!["_ssh._tcp".to_string()]);

        let recent = get_recent_presence(&conn, &m, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, t0() + Duration::hours(2));
        assert_eq!(recent[2].timestamp, t0() + Duration::hours(4));
        assert_eq!(count_presence(&conn, &m).unwrap(), 5);
    }

    #[test]
    fn test_fingerprint_entries_roundtrip_and_prune() {
        let conn = setup();
        let entry = StoredFingerprintEntry {
            mac: mac("aa:bb:cc:00:00:05"),
            origin: CacheOrigin::Remote,
            validator: "abc".into(),
            payload: r#"{"status":"not_found"}"#.into(),
            stored_at: t0(),
            expires_at: t0() + Duration::days(30),
        };
        assert_eq!(save_fingerprint_entries(&conn, std::slice::from_ref(&entry)).unwrap(), 1);
        assert_eq!(get_fingerprint_entries(&conn).unwrap(), vec![entry]);

        assert_eq!(delete_expired_fingerprint_entries(&conn, &(t0() + Duration::days(31))).unwrap(), 1);
        assert!(get_fingerprint_entries(&conn).unwrap().is_empty());
    }
}
