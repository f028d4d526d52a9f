//! Sync engine facade that wires the queue, synchronizer, scheduler and
//! connectivity monitor together.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fieldsync_common::{Error, RecordId, RecordType, Result};
use fieldsync_remote::{HttpBackend, ReachabilityProbe, RemoteBackend};
use fieldsync_storage::{
    QueuedRecord, RecordStore, ScalarStore, SqliteStore, SyncHistory, SyncHistoryEntry,
};

use crate::config::EngineConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor, ReachabilityPoller};
use crate::queue::{QueueCounts, SyncQueue, SyncRequest, SyncTrigger};
use crate::retry::RetryConfig;
use crate::scheduler::SyncScheduler;
use crate::status::StatusView;
use crate::synchronizer::{BatchSynchronizer, SyncProgress, SyncReport};

/// Collaborators injected into an engine.
pub struct EngineParts {
    pub records: Arc<dyn RecordStore>,
    pub scalars: Arc<dyn ScalarStore>,
    pub backend: Arc<dyn RemoteBackend>,
    pub connectivity: ConnectivityMonitor,
    /// Reachability source polled while the engine runs.
    pub probe: Option<Arc<dyn ReachabilityProbe>>,
}

struct Background {
    scheduler: SyncScheduler,
    task: JoinHandle<()>,
    poller: Option<JoinHandle<()>>,
}

/// Offline-first sync engine.
///
/// Every component is owned by the engine instance; there is no global
/// state, so tests can build as many isolated engines as they need.
pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    synchronizer: Arc<BatchSynchronizer>,
    history: Arc<SyncHistory<dyn ScalarStore>>,
    connectivity: ConnectivityMonitor,
    trigger: SyncTrigger,
    retry: RetryConfig,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    probe_interval: Duration,
    requests: Mutex<Option<mpsc::Receiver<SyncRequest>>>,
    background: Mutex<Option<Background>>,
}

impl SyncEngine {
    /// Open the engine on the configured SQLite database and HTTP backend.
    ///
    /// Connectivity starts offline until the first reachability probe.
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.database_path)?);
        let backend = Arc::new(HttpBackend::new(&config.remote)?);

        let parts = EngineParts {
            records: store.clone(),
            scalars: store,
            backend: backend.clone(),
            connectivity: ConnectivityMonitor::new(Connectivity::Offline),
            probe: Some(backend),
        };
        Self::with_parts(parts, config).await
    }

    /// Build an engine from explicit parts.
    ///
    /// Records left `syncing` by an interrupted run are reset to pending.
    pub async fn with_parts(parts: EngineParts, config: &EngineConfig) -> Result<Self> {
        let (trigger, requests) = SyncTrigger::channel();
        let queue = Arc::new(SyncQueue::new(
            parts.records,
            parts.connectivity.clone(),
            trigger.clone(),
            config.retry.max_attempts,
        ));
        let history: Arc<SyncHistory<dyn ScalarStore>> =
            Arc::new(SyncHistory::new(parts.scalars, config.history_capacity));
        let synchronizer = Arc::new(BatchSynchronizer::new(
            queue.clone(),
            parts.backend,
            history.clone(),
            parts.connectivity.clone(),
            config.request_timeout(),
        ));

        queue.recover_stuck().await?;

        Ok(Self {
            queue,
            synchronizer,
            history,
            connectivity: parts.connectivity,
            trigger,
            retry: config.retry.clone(),
            probe: parts.probe,
            probe_interval: config.probe_interval(),
            requests: Mutex::new(Some(requests)),
            background: Mutex::new(None),
        })
    }

    /// Spawn the scheduler and, if a probe is configured, the reachability poller.
    ///
    /// # Errors
    /// - The engine was already started
    pub fn start(&self) -> Result<()> {
        let requests = self
            .requests
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| Error::InvalidInput("Sync engine already started".to_string()))?;

        let (scheduler, handle) = SyncScheduler::new(
            self.trigger.clone(),
            requests,
            self.connectivity.watch(),
            self.retry.clone(),
        );

        let queue = self.queue.clone();
        let synchronizer = self.synchronizer.clone();
        let task = tokio::spawn(handle.run(move |request| {
            let queue = queue.clone();
            let synchronizer = synchronizer.clone();
            async move {
                if request == SyncRequest::Reconnected {
                    queue.requeue_failed().await?;
                }
                synchronizer.run().await
            }
        }));

        let poller = self.probe.clone().map(|probe| {
            ReachabilityPoller::new(self.connectivity.clone(), probe, self.probe_interval).spawn()
        });

        // Records queued while nobody was listening.
        if self.connectivity.is_online() {
            self.trigger.request(SyncRequest::Manual);
        }

        if let Ok(mut background) = self.background.lock() {
            *background = Some(Background {
                scheduler,
                task,
                poller,
            });
        }
        info!("Sync engine started");
        Ok(())
    }

    /// Stop background tasks, letting an active run finish first.
    pub async fn shutdown(&self) {
        let background = self.background.lock().ok().and_then(|mut b| b.take());
        let Some(background) = background else {
            return;
        };

        if let Some(poller) = background.poller {
            poller.abort();
        }
        background.scheduler.shutdown();
        if let Err(e) = background.task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }
        info!("Sync engine stopped");
    }

    /// Queue a captured record. Returns once it is durably stored.
    pub async fn enqueue(
        &self,
        record_type: RecordType,
        payload: serde_json::Value,
    ) -> Result<RecordId> {
        self.queue.enqueue(record_type, payload).await
    }

    /// Look up a queued record.
    pub async fn record(&self, id: &RecordId) -> Result<Option<QueuedRecord>> {
        self.queue.get(id).await
    }

    /// All queued records, oldest first.
    pub async fn records(&self) -> Result<Vec<QueuedRecord>> {
        self.queue.list().await
    }

    /// Records not yet delivered, whatever their status.
    pub async fn pending_count(&self) -> Result<usize> {
        self.queue.pending_count().await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        self.queue.counts().await
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Shared connectivity monitor, for platform adapters to report into.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Probe reachability once, if a probe is configured.
    pub async fn refresh_connectivity(&self) -> Connectivity {
        if let Some(probe) = &self.probe {
            let reachable = probe.is_reachable().await;
            self.connectivity.set_online(reachable);
        }
        self.connectivity.current_state()
    }

    pub async fn last_sync_time(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        self.history.last_sync_time().await
    }

    /// Past runs, most recent first.
    pub async fn sync_history(&self) -> Result<Vec<SyncHistoryEntry>> {
        self.history.entries().await
    }

    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.synchronizer.progress()
    }

    pub fn is_syncing(&self) -> bool {
        self.synchronizer.is_running()
    }

    /// Snapshot for the status bar.
    pub async fn status(&self) -> Result<StatusView> {
        let counts = self.queue.counts().await?;
        let last_sync = self.history.last_sync_time().await?;
        let progress = *self.synchronizer.progress().borrow();

        Ok(StatusView {
            connectivity: self.connectivity.current_state(),
            counts,
            last_sync,
            progress,
        })
    }

    /// Ask the scheduler for a run. No-op when offline.
    ///
    /// A request raised while a run is in progress is dropped once that run
    /// ends. Returns whether a request was posted.
    pub fn trigger_sync(&self) -> bool {
        if !self.connectivity.is_online() {
            return false;
        }
        self.trigger.request(SyncRequest::Manual);
        true
    }

    /// Run a pass right now and wait for it.
    ///
    /// Returns `Ok(None)` when offline or when a run is already active.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        self.synchronizer.run().await
    }

    /// Manually retry one failed record.
    pub async fn retry_item(&self, id: &RecordId) -> Result<bool> {
        self.queue.retry_item(id).await
    }

    /// Manually retry every failed record.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        self.queue.retry_all_failed().await
    }

    /// Delete one record on explicit user request.
    pub async fn discard(&self, id: &RecordId) -> Result<()> {
        self.queue.discard(id).await
    }

    /// Delete every queued record. Destructive; only on explicit user request.
    pub async fn clear_queue(&self) -> Result<()> {
        self.queue.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_remote::MemoryBackend;
    use fieldsync_storage::{MemoryStore, RecordStatus};
    use serde_json::json;
    use tempfile::TempDir;

    async fn build_engine(store: &MemoryStore, backend: &MemoryBackend) -> SyncEngine {
        let parts = EngineParts {
            records: Arc::new(store.clone()),
            scalars: Arc::new(store.clone()),
            backend: Arc::new(backend.clone()),
            connectivity: ConnectivityMonitor::new(Connectivity::Offline),
            probe: None,
        };
        SyncEngine::with_parts(parts, &EngineConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_trigger_offline_is_noop() {
        let engine = build_engine(&MemoryStore::new(), &MemoryBackend::new()).await;
        assert!(!engine.trigger_sync());
        assert!(engine.sync_now().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = build_engine(&MemoryStore::new(), &MemoryBackend::new()).await;
        engine.start().unwrap();
        assert!(engine.start().is_err());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_status() {
        let engine = build_engine(&MemoryStore::new(), &MemoryBackend::new()).await;
        engine.enqueue(RecordType::Visit, json!({})).await.unwrap();

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_count(), 1);
        assert_eq!(status.connectivity, Connectivity::Offline);
        assert!(status.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_recovers_stuck_records_on_open() {
        let store = MemoryStore::new();
        let backend = MemoryBackend::new();
        let id = {
            let engine = build_engine(&store, &backend).await;
            let id = engine.enqueue(RecordType::Farmer, json!({})).await.unwrap();
            engine.queue.mark_syncing(&id).await.unwrap();
            id
        };

        let engine = build_engine(&store, &backend).await;
        let record = engine.record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_open_with_sqlite() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.database_path = dir.path().join("queue.db");

        let id = {
            let engine = SyncEngine::open(&config).await.unwrap();
            assert!(!engine.is_online());
            engine.enqueue(RecordType::Batch, json!({"kg": 420})).await.unwrap()
        };

        let engine = SyncEngine::open(&config).await.unwrap();
        let record = engine.record(&id).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"kg": 420}));
        assert_eq!(engine.pending_count().await.unwrap(), 1);
    }
}
