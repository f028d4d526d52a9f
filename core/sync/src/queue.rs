//! Sync queue manager: lifecycle of every queued record.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use fieldsync_common::{Error, RecordId, RecordType, Result};
use fieldsync_storage::{QueuedRecord, RecordStatus, RecordStore};

use crate::connectivity::ConnectivityMonitor;

/// Why a sync run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// A record was enqueued while online.
    Enqueued,
    /// The user asked for a sync or a retry.
    Manual,
    /// Connectivity came back.
    Reconnected,
    /// Scheduled retry while failures remain.
    Scheduled,
}

/// Posts "sync requested" signals to the scheduler.
///
/// The channel holds at most one pending request; further requests while one
/// is waiting are coalesced into it.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<SyncRequest>,
}

impl SyncTrigger {
    /// Create a trigger and the receiving end for the scheduler.
    pub fn channel() -> (Self, mpsc::Receiver<SyncRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request a run without waiting for it.
    pub fn request(&self, request: SyncRequest) {
        match self.tx.try_send(request) {
            Ok(()) => debug!("Sync requested: {:?}", request),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Sync already requested, coalescing {:?}", request)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Scheduler not running, dropping {:?}", request)
            }
        }
    }
}

/// Record counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl QueueCounts {
    /// Every record still waiting for delivery, whatever its status.
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.failed + self.abandoned
    }
}

/// Owns the state machine of queued records.
///
/// `pending -> syncing -> removed` on success, `syncing -> failed` on error,
/// `failed -> pending` on retry. With an attempt ceiling, `failed` becomes
/// `abandoned` once the ceiling is reached.
pub struct SyncQueue {
    store: Arc<dyn RecordStore>,
    connectivity: ConnectivityMonitor,
    trigger: SyncTrigger,
    max_attempts: Option<u32>,
    /// Serializes read-modify-write transitions.
    transition_lock: Mutex<()>,
}

impl SyncQueue {
    pub fn new(
        store: Arc<dyn RecordStore>,
        connectivity: ConnectivityMonitor,
        trigger: SyncTrigger,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            store,
            connectivity,
            trigger,
            max_attempts,
            transition_lock: Mutex::new(()),
        }
    }

    /// Persist a new pending record.
    ///
    /// Returns once the record is durably stored. If online, a sync run is
    /// requested but not awaited.
    ///
    /// # Errors
    /// - Storage failure: the record was not queued
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<RecordId> {
        let record = QueuedRecord::new(record_type, payload);
        let id = self.store.add(&record).await?;
        info!(
            "Queued {} record {} ({} bytes)",
            record.record_type, id, record.approx_size
        );

        if self.connectivity.is_online() {
            self.trigger.request(SyncRequest::Enqueued);
        }
        Ok(id)
    }

    /// Look up a record.
    pub async fn get(&self, id: &RecordId) -> Result<Option<QueuedRecord>> {
        self.store.get(id).await
    }

    /// All queued records, oldest first.
    pub async fn list(&self) -> Result<Vec<QueuedRecord>> {
        self.store.get_all().await
    }

    /// Records a run should deliver: pending and failed, oldest first.
    pub async fn snapshot(&self) -> Result<Vec<QueuedRecord>> {
        let records = self.store.get_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.status.is_deliverable())
            .collect())
    }

    /// Mark a record as in flight.
    ///
    /// # Errors
    /// - `NotFound` if the record is gone
    pub async fn mark_syncing(&self, id: &RecordId) -> Result<QueuedRecord> {
        self.transition(id, QueuedRecord::mark_syncing).await
    }

    /// Record a failed delivery. The record is kept.
    ///
    /// # Errors
    /// - `NotFound` if the record is gone
    pub async fn mark_failed(&self, id: &RecordId, error: &str) -> Result<QueuedRecord> {
        let max_attempts = self.max_attempts;
        let record = self
            .transition(id, |record| record.mark_failed(error, max_attempts))
            .await?;

        if record.status == RecordStatus::Abandoned {
            warn!(
                "Record {} abandoned after {} failed attempts",
                id, record.retry_count
            );
        }
        Ok(record)
    }

    /// Record a confirmed delivery: the record leaves the queue.
    pub async fn mark_succeeded(&self, id: &RecordId) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        self.store.remove(id).await?;
        debug!("Record {} delivered", id);
        Ok(())
    }

    /// Manually retry one failed or abandoned record.
    ///
    /// Resets its retry count. Returns `false` if the record was not retriable.
    pub async fn retry_item(&self, id: &RecordId) -> Result<bool> {
        let retried = {
            let _guard = self.transition_lock.lock().await;
            let Some(mut record) = self.store.get(id).await? else {
                return Err(Error::NotFound(format!("Record not found: {}", id)));
            };
            if !matches!(record.status, RecordStatus::Failed | RecordStatus::Abandoned) {
                false
            } else {
                record.reset_for_retry();
                self.store.update(&record).await?;
                true
            }
        };

        if retried {
            info!("Record {} queued for retry", id);
            self.request_if_online();
        }
        Ok(retried)
    }

    /// Manually retry every failed or abandoned record.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let count = self
            .update_matching(
                |r| matches!(r.status, RecordStatus::Failed | RecordStatus::Abandoned),
                QueuedRecord::reset_for_retry,
            )
            .await?;

        if count > 0 {
            info!("{} failed records queued for retry", count);
            self.request_if_online();
        }
        Ok(count)
    }

    /// Automatic retry: failed records go back to pending, retry counts kept.
    pub async fn requeue_failed(&self) -> Result<usize> {
        let count = self
            .update_matching(|r| r.status == RecordStatus::Failed, QueuedRecord::requeue)
            .await?;
        if count > 0 {
            debug!("{} failed records requeued", count);
        }
        Ok(count)
    }

    /// Reset records left `syncing` by an interrupted run back to pending.
    ///
    /// Only call this while no run is active.
    pub async fn recover_stuck(&self) -> Result<usize> {
        let count = self
            .update_matching(
                |r| r.status == RecordStatus::Syncing,
                |r| r.status = RecordStatus::Pending,
            )
            .await?;
        if count > 0 {
            warn!("Recovered {} records stuck in syncing", count);
        }
        Ok(count)
    }

    /// Number of records still in the queue, whatever their status.
    pub async fn pending_count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Record counts by status.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for record in self.store.get_all().await? {
            match record.status {
                RecordStatus::Pending => counts.pending += 1,
                RecordStatus::Syncing => counts.syncing += 1,
                RecordStatus::Failed => counts.failed += 1,
                RecordStatus::Abandoned => counts.abandoned += 1,
            }
        }
        Ok(counts)
    }

    /// Delete one record on explicit user request.
    pub async fn discard(&self, id: &RecordId) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        warn!("Discarding record {} on user request", id);
        self.store.remove(id).await
    }

    /// Delete every queued record. Destructive; only on explicit user request.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        warn!("Clearing the sync queue on user request");
        self.store.clear().await
    }

    fn request_if_online(&self) {
        if self.connectivity.is_online() {
            self.trigger.request(SyncRequest::Manual);
        }
    }

    async fn transition<F>(&self, id: &RecordId, apply: F) -> Result<QueuedRecord>
    where
        F: FnOnce(&mut QueuedRecord),
    {
        let _guard = self.transition_lock.lock().await;
        let Some(mut record) = self.store.get(id).await? else {
            return Err(Error::NotFound(format!("Record not found: {}", id)));
        };
        apply(&mut record);
        self.store.update(&record).await?;
        Ok(record)
    }

    async fn update_matching<P, F>(&self, predicate: P, apply: F) -> Result<usize>
    where
        P: Fn(&QueuedRecord) -> bool,
        F: Fn(&mut QueuedRecord),
    {
        let _guard = self.transition_lock.lock().await;
        let mut count = 0;
        for mut record in self.store.get_all().await? {
            if predicate(&record) {
                apply(&mut record);
                self.store.update(&record).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}
