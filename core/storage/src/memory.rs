//! In-memory store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use fieldsync_common::{Error, RecordId, Result};

use crate::record::QueuedRecord;
use crate::store::{RecordStore, ScalarStore};

#[derive(Debug, Default)]
struct Tables {
    /// Records with their insertion sequence number.
    records: HashMap<RecordId, (u64, QueuedRecord)>,
    next_seq: u64,
    values: HashMap<String, String>,
}

/// In-memory record and scalar store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same tables, which lets tests
/// "restart" an engine over the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    broken: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Storage("memory store is unavailable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.check()?;
        self.tables
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.check()?;
        self.tables
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn add(&self, record: &QueuedRecord) -> Result<RecordId> {
        let mut tables = self.write()?;
        if tables.records.contains_key(&record.id) {
            return Err(Error::Storage(format!(
                "Record already exists: {}",
                record.id
            )));
        }
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables
            .records
            .insert(record.id.clone(), (seq, record.clone()));
        Ok(record.id.clone())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<QueuedRecord>> {
        let tables = self.read()?;
        Ok(tables.records.get(id).map(|(_, record)| record.clone()))
    }

    async fn get_all(&self) -> Result<Vec<QueuedRecord>> {
        let tables = self.read()?;
        let mut rows: Vec<&(u64, QueuedRecord)> = tables.records.values().collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            a.created_at.cmp(&b.created_at).then(a_seq.cmp(b_seq))
        });
        Ok(rows.into_iter().map(|(_, record)| record.clone()).collect())
    }

    async fn update(&self, record: &QueuedRecord) -> Result<()> {
        let mut tables = self.write()?;
        match tables.records.get_mut(&record.id) {
            Some((_, existing)) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("Record not found: {}", record.id))),
        }
    }

    async fn remove(&self, id: &RecordId) -> Result<()> {
        self.write()?.records.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.records.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }
}

#[async_trait]
impl ScalarStore for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
