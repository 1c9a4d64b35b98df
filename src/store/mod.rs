//! Database-backed tariff store
//!
//! One SQLite connection guarded by a parking_lot mutex serves the rate
//! tables, the evidence store, the ingest/review queues and the run records.
//! Method groups live in the sibling files; all of them are `impl TariffStore`
//! blocks over the same connection.

pub mod evidence;
pub mod queue;
pub mod rates;
pub mod review;
pub mod runs;
pub mod schema;

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

pub struct TariffStore {
    conn: Arc<Mutex<Connection>>,
}

impl TariffStore {
    /// Open (or create) the store at `db_path` and apply the schema.
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open tariff store at {}", db_path))?;

        conn.execute_batch(schema::SCHEMA_SQL)
            .context("Failed to initialize tariff store schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM rate_rows", [], |row| row.get(0))
            .unwrap_or(0);
        info!("📊 Tariff store initialized at: {} ({} rate rows)", db_path, rows);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and one-shot tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .context("Failed to initialize in-memory schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1 LIMIT 1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_applies_schema() {
        let store = TariffStore::open_in_memory().unwrap();
        assert!(store.get_metadata("anything").unwrap().is_none());
        store.set_metadata("dataset", "seed_baseline_2025").unwrap();
        assert_eq!(
            store.get_metadata("dataset").unwrap().as_deref(),
            Some("seed_baseline_2025")
        );
    }
}
