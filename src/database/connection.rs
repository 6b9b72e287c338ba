//! Database connection and initialization

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::schema;

/// Database wrapper with thread-safe connection
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Opens (or creates) the database file and initializes the schema
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        schema::create_tables(&conn)
    }

    /// Lock the connection for a sequence of statements
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Get a reference to the connection
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Platform data directory, e.g. `~/.local/share/lanlens/lanlens.db`
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));

        #[cfg(not(target_os = "windows"))]
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        base.join("lanlens").join("lanlens.db")
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            path: self.path.clone(),
        }
    }
}
