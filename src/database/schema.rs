//! Database schema definitions
//!
//! Creates the SQLite tables and applies additive column migrations.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Devices table: latest snapshot per MAC address
        CREATE TABLE IF NOT EXISTS devices (
            mac TEXT PRIMARY KEY NOT NULL,
            ip TEXT NOT NULL,
            hostname TEXT,
            vendor TEXT,
            device_type TEXT NOT NULL DEFAULT 'UNKNOWN',
            confidence REAL NOT NULL DEFAULT 0,
            smart_score INTEGER NOT NULL DEFAULT 0,
            user_label TEXT,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            is_online INTEGER NOT NULL DEFAULT 1,
            snapshot TEXT NOT NULL
        );

        -- Presence records: append-only online/offline samples
        CREATE TABLE IF NOT EXISTS presence_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mac TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            is_online INTEGER NOT NULL,
            ip TEXT,
            services TEXT NOT NULL DEFAULT '[]'
        );

        -- Fingerprint cache: one entry per MAC and lookup origin
        CREATE TABLE IF NOT EXISTS fingerprint_cache (
            mac TEXT NOT NULL,
            origin TEXT NOT NULL,
            validator TEXT NOT NULL,
            payload TEXT NOT NULL,
            stored_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (mac, origin)
        );

        -- Indexes for performance
        CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);
        CREATE INDEX IF NOT EXISTS idx_presence_mac_time ON presence_records(mac, timestamp);
        CREATE INDEX IF NOT EXISTS idx_fingerprint_expiry ON fingerprint_cache(expires_at);
        "#,
    )
    .context("Failed to create database tables")?;

    // Backward-compatible migration for databases created before user labels existed.
    if !has_column(conn, "devices", "user_label")? {
        conn.execute("ALTER TABLE devices ADD COLUMN user_label TEXT", [])
            .context("Failed to migrate devices table with user_label column")?;
    }

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.prepare(&format!("PRAGMA table_info({})", table))
        .and_then(|mut stmt| {
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let col_name: String = row.get(1)?;
                if col_name == column {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .with_context(|| format!("Failed to inspect {} table schema", table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        for table in ["devices", "presence_records", "fingerprint_cache"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_has_column() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        assert!(has_column(&conn, "devices", "snapshot").unwrap());
        assert!(!has_column(&conn, "devices", "risk_score").unwrap());
    }
}
