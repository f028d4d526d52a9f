//! Batch synchronizer: drains a snapshot of the queue against the remote.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fieldsync_common::{Error, Result};
use fieldsync_remote::RemoteBackend;
use fieldsync_storage::{QueuedRecord, ScalarStore, SyncHistory, SyncHistoryEntry};

use crate::connectivity::ConnectivityMonitor;
use crate::queue::SyncQueue;

/// Live progress of the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    /// Whether a run is active.
    pub running: bool,
    /// Items processed so far in this run.
    pub current: usize,
    /// Items in this run's snapshot.
    pub total: usize,
}

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Records in the snapshot.
    pub total: usize,
    /// Records accepted by the remote and removed from the queue.
    pub delivered: usize,
    /// Records that failed and stay queued.
    pub failed: usize,
    /// Failed records whose type has no endpoint.
    pub unsupported: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub duration: Duration,
    /// Message of the last failure in this run.
    pub last_error: Option<String>,
}

impl SyncReport {
    /// True only if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn history_entry(&self) -> SyncHistoryEntry {
        let error = self.last_error.as_ref().map(|last| {
            format!(
                "{} of {} records failed; last error: {}",
                self.failed, self.total, last
            )
        });

        SyncHistoryEntry {
            timestamp: self.finished_at,
            success: self.is_success(),
            item_count: self.delivered,
            failed_count: self.failed,
            error,
        }
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Runs batch-sync passes, at most one at a time.
pub struct BatchSynchronizer {
    queue: Arc<SyncQueue>,
    backend: Arc<dyn RemoteBackend>,
    history: Arc<SyncHistory<dyn ScalarStore>>,
    connectivity: ConnectivityMonitor,
    request_timeout: Duration,
    running: AtomicBool,
    progress: watch::Sender<SyncProgress>,
}

impl BatchSynchronizer {
    pub fn new(
        queue: Arc<SyncQueue>,
        backend: Arc<dyn RemoteBackend>,
        history: Arc<SyncHistory<dyn ScalarStore>>,
        connectivity: ConnectivityMonitor,
        request_timeout: Duration,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            queue,
            backend,
            history,
            connectivity,
            request_timeout,
            running: AtomicBool::new(false),
            progress,
        }
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribe to progress updates.
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Run one pass over the current snapshot.
    ///
    /// Returns `Ok(None)` without doing anything when offline or when another
    /// run is active. Individual delivery failures never abort the pass.
    ///
    /// # Errors
    /// - Local store failure; the pass stops at that point
    pub async fn run(&self) -> Result<Option<SyncReport>> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync run");
            return Ok(None);
        }

        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!("Sync run already active, ignoring trigger");
            return Ok(None);
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let result = self.drain(started_at, start).await;
        self.progress.send_modify(|p| p.running = false);

        match result {
            Ok(report) => {
                self.history.append(report.history_entry()).await?;
                self.history.set_last_sync_time(report.finished_at).await?;

                info!(
                    "Sync run completed in {:?}: {} delivered, {} failed of {}",
                    report.duration, report.delivered, report.failed, report.total
                );
                Ok(Some(report))
            }
            Err(e) => {
                error!("Sync run aborted by storage failure: {}", e);
                let entry = SyncHistoryEntry {
                    timestamp: Utc::now(),
                    success: false,
                    item_count: 0,
                    failed_count: 0,
                    error: Some(format!("run aborted: {}", e)),
                };
                if let Err(history_err) = self.history.append(entry).await {
                    warn!("Could not record aborted run: {}", history_err);
                }
                Err(e)
            }
        }
    }

    async fn drain(&self, started_at: DateTime<Utc>, start: Instant) -> Result<SyncReport> {
        // With the run guard held, anything still `syncing` was left behind
        // by an earlier pass that stopped on a storage failure.
        self.queue.recover_stuck().await?;

        let snapshot = self.queue.snapshot().await?;
        let total = snapshot.len();
        info!("Starting sync run over {} records", total);
        self.progress.send_replace(SyncProgress {
            running: true,
            current: 0,
            total,
        });

        let mut delivered = 0;
        let mut failed = 0;
        let mut unsupported = 0;
        let mut last_error = None;

        for (index, record) in snapshot.iter().enumerate() {
            match self.queue.mark_syncing(&record.id).await {
                Ok(_) => match self.deliver(record).await {
                    Ok(()) => {
                        self.queue.mark_succeeded(&record.id).await?;
                        delivered += 1;
                    }
                    Err(e) => {
                        if matches!(e, Error::UnsupportedType(_)) {
                            error!(
                                "No endpoint for record {} of type '{}': client and server schemas disagree",
                                record.id, record.record_type
                            );
                            unsupported += 1;
                        } else {
                            warn!("Delivery of record {} failed: {}", record.id, e);
                        }

                        let message = e.to_string();
                        match self.queue.mark_failed(&record.id, &message).await {
                            Ok(_) | Err(Error::NotFound(_)) => {}
                            Err(storage_err) => return Err(storage_err),
                        }
                        failed += 1;
                        last_error = Some(message);
                    }
                },
                // Discarded by the user after the snapshot was taken.
                Err(Error::NotFound(_)) => debug!("Record {} left the queue, skipping", record.id),
                Err(e) => return Err(e),
            }

            self.progress.send_modify(|p| p.current = index + 1);
        }

        Ok(SyncReport {
            total,
            delivered,
            failed,
            unsupported,
            started_at,
            finished_at: Utc::now(),
            duration: start.elapsed(),
            last_error,
        })
    }

    async fn deliver(&self, record: &QueuedRecord) -> Result<()> {
        debug!("Delivering {} record {}", record.record_type, record.id);
        let submission = self.backend.submit(&record.record_type, &record.payload);
        match tokio::time::timeout(self.request_timeout, submission).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::queue::SyncTrigger;
    use fieldsync_common::{RecordId, RecordType};
    use fieldsync_remote::MemoryBackend;
    use fieldsync_storage::{MemoryStore, RecordStatus, RecordStore};
    use serde_json::json;

    struct Fixture {
        store: MemoryStore,
        backend: MemoryBackend,
        monitor: ConnectivityMonitor,
        queue: Arc<SyncQueue>,
        history: Arc<SyncHistory<dyn ScalarStore>>,
        sync: Arc<BatchSynchronizer>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let store = MemoryStore::new();
        let backend = MemoryBackend::new();
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let (trigger, _rx) = SyncTrigger::channel();
        let queue = Arc::new(SyncQueue::new(
            Arc::new(store.clone()),
            monitor.clone(),
            trigger,
            None,
        ));
        let scalars: Arc<dyn ScalarStore> = Arc::new(store.clone());
        let history: Arc<SyncHistory<dyn ScalarStore>> = Arc::new(SyncHistory::new(scalars, 10));
        let sync = Arc::new(BatchSynchronizer::new(
            queue.clone(),
            Arc::new(backend.clone()),
            history.clone(),
            monitor.clone(),
            timeout,
        ));
        Fixture {
            store,
            backend,
            monitor,
            queue,
            history,
            sync,
        }
    }

    #[tokio::test]
    async fn test_offline_run_is_noop() {
        let f = fixture(Duration::from_secs(5));
        f.queue.enqueue(RecordType::Activity, json!({})).await.unwrap();

        assert!(f.sync.run().await.unwrap().is_none());
        assert!(f.backend.attempts().is_empty());
        assert!(f.history.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivers_in_creation_order() {
        let f = fixture(Duration::from_secs(5));
        for n in 1..=3 {
            f.queue
                .enqueue(RecordType::Activity, json!({ "n": n }))
                .await
                .unwrap();
        }
        f.monitor.set_online(true);

        let report = f.sync.run().await.unwrap().unwrap();
        assert_eq!(report.delivered, 3);
        assert!(report.is_success());

        let order: Vec<serde_json::Value> =
            f.backend.delivered().into_iter().map(|(_, p)| p["n"].clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(f.queue.pending_count().await.unwrap(), 0);
        assert!(f.history.last_sync_time().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_without_request() {
        let f = fixture(Duration::from_secs(5));
        let id = f
            .queue
            .enqueue(RecordType::from("drone_survey"), json!({}))
            .await
            .unwrap();
        f.queue.enqueue(RecordType::Farmer, json!({})).await.unwrap();
        f.monitor.set_online(true);

        let report = f.sync.run().await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.unsupported, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(f.backend.attempts().len(), 1);

        let record = f.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.last_error.unwrap().contains("drone_survey"));
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let f = fixture(Duration::from_millis(20));
        f.backend.set_delay(Duration::from_millis(500));
        let id = f.queue.enqueue(RecordType::Photo, json!({})).await.unwrap();
        f.monitor.set_online(true);

        let report = f.sync.run().await.unwrap().unwrap();
        assert_eq!(report.failed, 1);

        let record = f.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(record.last_error.unwrap().starts_with("Timed out"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_coalesce() {
        let f = fixture(Duration::from_secs(5));
        f.backend.set_delay(Duration::from_millis(50));
        f.queue.enqueue(RecordType::Visit, json!({})).await.unwrap();
        f.queue.enqueue(RecordType::Visit, json!({})).await.unwrap();
        f.monitor.set_online(true);

        let (a, b) = tokio::join!(f.sync.run(), f.sync.run());
        let completed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();

        assert_eq!(completed, 1);
        assert_eq!(f.backend.attempts().len(), 2);
        assert_eq!(f.history.entries().await.unwrap().len(), 1);
        assert!(!f.sync.is_running());
    }

    #[tokio::test]
    async fn test_progress_reported() {
        let f = fixture(Duration::from_secs(5));
        for _ in 0..4 {
            f.queue.enqueue(RecordType::Batch, json!({})).await.unwrap();
        }
        f.monitor.set_online(true);
        let progress = f.sync.progress();

        f.sync.run().await.unwrap();
        assert_eq!(
            *progress.borrow(),
            SyncProgress {
                running: false,
                current: 4,
                total: 4
            }
        );
    }

    #[tokio::test]
    async fn test_empty_run_is_recorded() {
        let f = fixture(Duration::from_secs(5));
        f.monitor.set_online(true);

        let report = f.sync.run().await.unwrap().unwrap();
        assert_eq!(report.total, 0);

        let entries = f.history.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].item_count, 0);
        assert!(f.history.last_sync_time().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_run() {
        let f = fixture(Duration::from_secs(5));
        f.queue.enqueue(RecordType::Farmer, json!({})).await.unwrap();
        f.monitor.set_online(true);
        f.store.set_broken(true);

        let err = f.sync.run().await.unwrap_err();
        assert!(err.is_storage_failure());
        assert!(!f.sync.is_running());
        assert!(f.backend.attempts().is_empty());

        // The guard was released, so a later run goes ahead.
        f.store.set_broken(false);
        let report = f.sync.run().await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
    }

    /// Record store whose next `remove` fails once.
    struct FlakyRemove {
        inner: MemoryStore,
        fail_next_remove: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RecordStore for FlakyRemove {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn add(&self, record: &QueuedRecord) -> Result<RecordId> {
            self.inner.add(record).await
        }

        async fn get(&self, id: &RecordId) -> Result<Option<QueuedRecord>> {
            self.inner.get(id).await
        }

        async fn get_all(&self) -> Result<Vec<QueuedRecord>> {
            self.inner.get_all().await
        }

        async fn update(&self, record: &QueuedRecord) -> Result<()> {
            self.inner.update(record).await
        }

        async fn remove(&self, id: &RecordId) -> Result<()> {
            if self.fail_next_remove.swap(false, Ordering::SeqCst) {
                return Err(Error::Storage("transient disk error".to_string()));
            }
            self.inner.remove(id).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_record_left_syncing_is_retried_next_run() {
        let store = Arc::new(FlakyRemove {
            inner: MemoryStore::new(),
            fail_next_remove: AtomicBool::new(true),
        });
        let backend = MemoryBackend::new();
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        let (trigger, _rx) = SyncTrigger::channel();
        let queue = Arc::new(SyncQueue::new(store.clone(), monitor.clone(), trigger, None));
        let scalars: Arc<dyn ScalarStore> = Arc::new(MemoryStore::new());
        let sync = BatchSynchronizer::new(
            queue.clone(),
            Arc::new(backend.clone()),
            Arc::new(SyncHistory::new(scalars, 10)),
            monitor,
            Duration::from_secs(5),
        );

        let id = queue.enqueue(RecordType::Visit, json!({})).await.unwrap();
        assert!(sync.run().await.unwrap_err().is_storage_failure());
        let stuck = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stuck.status, RecordStatus::Syncing);

        // Same process, no restart: the next pass picks the record up again.
        let report = sync.run().await.unwrap().unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.delivered, 1);
        assert!(queue.get(&id).await.unwrap().is_none());
        assert_eq!(backend.attempts().len(), 2);
    }
}
