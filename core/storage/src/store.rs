//! Local store trait definitions.

use async_trait::async_trait;

use fieldsync_common::{RecordId, Result};

use crate::record::QueuedRecord;

/// Durable table of queued records.
///
/// Every mutating call must be committed before it returns, so a crash right
/// after a successful call neither loses nor duplicates the record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Persist a new record.
    ///
    /// # Errors
    /// - A record with the same id already exists
    /// - Storage I/O failure
    async fn add(&self, record: &QueuedRecord) -> Result<RecordId>;

    /// Look up a record by id.
    async fn get(&self, id: &RecordId) -> Result<Option<QueuedRecord>>;

    /// All records, oldest capture first.
    ///
    /// Records captured in the same instant keep insertion order.
    async fn get_all(&self) -> Result<Vec<QueuedRecord>>;

    /// Overwrite a record by id.
    ///
    /// # Errors
    /// - No record with this id
    async fn update(&self, record: &QueuedRecord) -> Result<()>;

    /// Remove a record. Removing an absent id is a no-op.
    async fn remove(&self, id: &RecordId) -> Result<()>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize> {
        Ok(self.get_all().await?.len())
    }
}

/// Durable key/value store for small scalar state (history, timestamps).
#[async_trait]
pub trait ScalarStore: Send + Sync {
    /// Read a value.
    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set_value(&self, key: &str, value: &str) -> Result<()>;
}
