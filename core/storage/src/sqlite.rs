//! SQLite-backed local store.
//!
//! Persists queued records and scalar sync metadata in a single database file
//! so the queue survives process restarts.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use fieldsync_common::{Error, RecordId, RecordType, Result};

use crate::record::{QueuedRecord, RecordStatus};
use crate::store::{RecordStore, ScalarStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS queued_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        record_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        approx_size INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        last_attempt_at TEXT
    );

    CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_records_created ON queued_records(created_at, seq);
"#;

const SELECT_COLUMNS: &str = "id, record_type, payload, status, created_at, \
     retry_count, approx_size, last_error, last_attempt_at";

/// Local store backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(storage_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(storage_err)?;
        Self::init(conn, &db_path.display().to_string())
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self> {
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;

        info!("Local store opened at {}", label);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("store connection lock poisoned".to_string()))
    }
}

fn storage_err(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<QueuedRecord> {
    let id: String = row.get(0)?;
    let record_type: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let last_attempt_at: Option<String> = row.get(8)?;

    let conversion = |e: Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(QueuedRecord {
        id: RecordId::new(id).map_err(conversion)?,
        record_type: RecordType::from(record_type),
        payload: serde_json::from_str(&payload).map_err(|e| conversion(e.into()))?,
        status: status.parse::<RecordStatus>().map_err(conversion)?,
        created_at: parse_time(&created_at)?,
        retry_count: row.get(5)?,
        approx_size: row.get::<_, i64>(6)? as u64,
        last_error: row.get(7)?,
        last_attempt_at: last_attempt_at.as_deref().map(parse_time).transpose()?,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn add(&self, record: &QueuedRecord) -> Result<RecordId> {
        debug!("Adding record {} ({})", record.id, record.record_type);
        let payload = serde_json::to_string(&record.payload)?;
        self.conn()?
            .execute(
                r#"
                INSERT INTO queued_records
                (id, record_type, payload, status, created_at,
                 retry_count, approx_size, last_error, last_attempt_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    record.id.as_str(),
                    record.record_type.as_str(),
                    payload,
                    record.status.as_str(),
                    format_time(&record.created_at),
                    record.retry_count,
                    record.approx_size as i64,
                    record.last_error,
                    record.last_attempt_at.as_ref().map(format_time),
                ],
            )
            .map_err(storage_err)?;
        Ok(record.id.clone())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<QueuedRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM queued_records WHERE id = ?1",
                SELECT_COLUMNS
            ))
            .map_err(storage_err)?;

        stmt.query_row([id.as_str()], row_to_record)
            .optional()
            .map_err(storage_err)
    }

    async fn get_all(&self) -> Result<Vec<QueuedRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM queued_records ORDER BY created_at ASC, seq ASC",
                SELECT_COLUMNS
            ))
            .map_err(storage_err)?;

        let rows = stmt.query_map([], row_to_record).map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)
    }

    async fn update(&self, record: &QueuedRecord) -> Result<()> {
        debug!("Updating record {} -> {}", record.id, record.status);
        let payload = serde_json::to_string(&record.payload)?;
        let changed = self
            .conn()?
            .execute(
                r#"
                UPDATE queued_records
                SET record_type = ?2, payload = ?3, status = ?4, created_at = ?5,
                    retry_count = ?6, approx_size = ?7, last_error = ?8,
                    last_attempt_at = ?9
                WHERE id = ?1
                "#,
                params![
                    record.id.as_str(),
                    record.record_type.as_str(),
                    payload,
                    record.status.as_str(),
                    format_time(&record.created_at),
                    record.retry_count,
                    record.approx_size as i64,
                    record.last_error,
                    record.last_attempt_at.as_ref().map(format_time),
                ],
            )
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("Record not found: {}", record.id)));
        }
        Ok(())
    }

    async fn remove(&self, id: &RecordId) -> Result<()> {
        debug!("Removing record {}", id);
        self.conn()?
            .execute("DELETE FROM queued_records WHERE id = ?1", [id.as_str()])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        info!("Clearing local store");
        self.conn()?
            .execute("DELETE FROM queued_records", [])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM queued_records", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ScalarStore for SqliteStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(storage_err)?;
        Ok(())
    }
}
