//! Capped log of past sync runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use fieldsync_common::{Error, Result};

use crate::store::ScalarStore;

const HISTORY_KEY: &str = "sync_history";
const LAST_SYNC_KEY: &str = "last_sync_time";

/// Default number of retained history entries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Summary of one completed batch-sync run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// True only if no item failed during the run.
    pub success: bool,
    /// Number of records delivered.
    pub item_count: usize,
    /// Number of records that failed.
    #[serde(default)]
    pub failed_count: usize,
    /// Short description of what went wrong, if anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only history kept in a scalar store, oldest entries evicted first.
pub struct SyncHistory<S: ScalarStore + ?Sized> {
    store: Arc<S>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl<S: ScalarStore + ?Sized> SyncHistory<S> {
    /// Create a history log over `store` keeping at most `capacity` entries.
    pub fn new(store: Arc<S>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a run summary, evicting the oldest entries beyond capacity.
    pub async fn append(&self, entry: SyncHistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Stored oldest first.
        let mut entries: VecDeque<SyncHistoryEntry> = self.load().await?.into();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }

        let json = serde_json::to_string(&entries)?;
        self.store.set_value(HISTORY_KEY, &json).await
    }

    /// All retained entries, most recent first.
    pub async fn entries(&self) -> Result<Vec<SyncHistoryEntry>> {
        let mut entries = self.load().await?;
        entries.reverse();
        Ok(entries)
    }

    /// Completion time of the last run, if any.
    pub async fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get_value(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };

        DateTime::parse_from_rfc3339(&value)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| Error::Serialization(format!("Invalid last sync time: {}", e)))
    }

    /// Record the completion time of a run.
    pub async fn set_last_sync_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.store
            .set_value(LAST_SYNC_KEY, &time.to_rfc3339())
            .await
    }

    async fn load(&self) -> Result<Vec<SyncHistoryEntry>> {
        let Some(json) = self.store.get_value(HISTORY_KEY).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // History is telemetry only; a corrupt log starts over.
                warn!("Discarding unreadable sync history: {}", e);
                Ok(Vec::new())
            }
        }
    }
}
