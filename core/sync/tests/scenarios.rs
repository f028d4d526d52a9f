//! End-to-end scenarios for the sync engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use fieldsync_common::RecordType;
use fieldsync_remote::MemoryBackend;
use fieldsync_storage::{MemoryStore, QueuedRecord, RecordStatus, RecordStore, SqliteStore};
use fieldsync_sync::{Connectivity, ConnectivityMonitor, EngineConfig, EngineParts, SyncEngine};

fn memory_parts(store: &MemoryStore, backend: &MemoryBackend) -> EngineParts {
    EngineParts {
        records: Arc::new(store.clone()),
        scalars: Arc::new(store.clone()),
        backend: Arc::new(backend.clone()),
        connectivity: ConnectivityMonitor::new(Connectivity::Offline),
        probe: None,
    }
}

async fn wait_for_history(engine: &SyncEngine, entries: usize) {
    for _ in 0..400 {
        if engine.sync_history().await.unwrap().len() >= entries {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} history entries", entries);
}

/// Wait until the scheduler is idle again after a run.
async fn wait_until_idle(engine: &SyncEngine) {
    while engine.is_syncing() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_offline_capture_then_reconnect() {
    let store = MemoryStore::new();
    let backend = MemoryBackend::new();
    let engine = SyncEngine::with_parts(memory_parts(&store, &backend), &EngineConfig::default())
        .await
        .unwrap();
    engine.start().unwrap();

    let mut ids = Vec::new();
    for n in 0..3 {
        let id = engine
            .enqueue(RecordType::Activity, json!({"n": n}))
            .await
            .unwrap();
        ids.push(id);
    }
    assert_eq!(engine.pending_count().await.unwrap(), 3);
    assert!(backend.attempts().is_empty());

    backend.fail_attempt(1);
    engine.connectivity().set_online(true);
    wait_for_history(&engine, 1).await;

    // One run, all three attempted in creation order.
    let attempted: Vec<_> = backend.attempts().into_iter().map(|(_, p)| p).collect();
    assert_eq!(attempted, vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]);

    assert_eq!(engine.pending_count().await.unwrap(), 1);
    let failed = engine.record(&ids[1]).await.unwrap().unwrap();
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.last_error.is_some());

    let history = engine.sync_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].item_count, 2);

    // Manual retry of everything that failed.
    wait_until_idle(&engine).await;
    assert_eq!(engine.retry_all_failed().await.unwrap(), 1);
    let retried = engine.record(&ids[1]).await.unwrap().unwrap();
    assert_eq!(retried.status, RecordStatus::Pending);
    wait_for_history(&engine, 2).await;

    assert_eq!(engine.pending_count().await.unwrap(), 0);
    let history = engine.sync_history().await.unwrap();
    assert!(history[0].success);
    assert_eq!(history[0].item_count, 1);
    assert_eq!(backend.delivered().len(), 3);
    assert!(engine.last_sync_time().await.unwrap().is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_stuck_record_recovered_after_crash() {
    let store = MemoryStore::new();
    let mut record = QueuedRecord::new(RecordType::Photo, json!({"uri": "file:///a.jpg"}));
    record.mark_syncing();
    let id = store.add(&record).await.unwrap();

    let engine = SyncEngine::with_parts(
        memory_parts(&store, &MemoryBackend::new()),
        &EngineConfig::default(),
    )
    .await
    .unwrap();

    let recovered = engine.record(&id).await.unwrap().unwrap();
    assert_eq!(recovered.status, RecordStatus::Pending);
    assert_eq!(recovered.retry_count, 0);
}

#[tokio::test]
async fn test_stuck_record_recovered_from_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        let mut record = QueuedRecord::new(RecordType::Visit, json!({"farm": "north"}));
        record.mark_syncing();
        store.add(&record).await.unwrap()
    };

    let mut config = EngineConfig::default();
    config.database_path = path;
    let engine = SyncEngine::open(&config).await.unwrap();

    let recovered = engine.record(&id).await.unwrap().unwrap();
    assert_eq!(recovered.status, RecordStatus::Pending);
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");
    let backend = MemoryBackend::new();

    let sqlite_parts = |backend: &MemoryBackend| {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        EngineParts {
            records: store.clone(),
            scalars: store,
            backend: Arc::new(backend.clone()),
            connectivity: ConnectivityMonitor::new(Connectivity::Offline),
            probe: None,
        }
    };

    {
        let engine = SyncEngine::with_parts(sqlite_parts(&backend), &EngineConfig::default())
            .await
            .unwrap();
        engine
            .enqueue(RecordType::Farmer, json!({"name": "Ana"}))
            .await
            .unwrap();
        engine
            .enqueue(RecordType::Batch, json!({"kg": 12.5}))
            .await
            .unwrap();
    }

    let engine = SyncEngine::with_parts(sqlite_parts(&backend), &EngineConfig::default())
        .await
        .unwrap();
    assert_eq!(engine.pending_count().await.unwrap(), 2);

    engine.connectivity().set_online(true);
    let report = engine.sync_now().await.unwrap().unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(
        backend.delivered(),
        vec![
            (RecordType::Farmer, json!({"name": "Ana"})),
            (RecordType::Batch, json!({"kg": 12.5})),
        ]
    );
    assert_eq!(engine.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_at_most_one_run() {
    let store = MemoryStore::new();
    let backend = MemoryBackend::new();
    backend.set_delay(Duration::from_millis(30));
    let engine = SyncEngine::with_parts(memory_parts(&store, &backend), &EngineConfig::default())
        .await
        .unwrap();

    engine.enqueue(RecordType::Activity, json!({})).await.unwrap();
    engine.enqueue(RecordType::Activity, json!({})).await.unwrap();
    engine.connectivity().set_online(true);

    let (first, second) = tokio::join!(engine.sync_now(), engine.sync_now());
    let reports: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].delivered, 2);
    assert_eq!(backend.attempts().len(), 2);
    assert_eq!(engine.sync_history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_records_abandoned_after_max_attempts() {
    let store = MemoryStore::new();
    let backend = MemoryBackend::new();
    backend.set_reachable(false);

    let mut config = EngineConfig::default();
    config.retry = config.retry.with_max_attempts(2);
    let engine = SyncEngine::with_parts(memory_parts(&store, &backend), &config)
        .await
        .unwrap();

    let id = engine.enqueue(RecordType::Visit, json!({})).await.unwrap();
    engine.connectivity().set_online(true);

    engine.sync_now().await.unwrap();
    assert_eq!(
        engine.record(&id).await.unwrap().unwrap().status,
        RecordStatus::Failed
    );

    engine.sync_now().await.unwrap();
    let abandoned = engine.record(&id).await.unwrap().unwrap();
    assert_eq!(abandoned.status, RecordStatus::Abandoned);
    assert_eq!(abandoned.retry_count, 2);

    // Abandoned records stay put until a manual retry.
    let report = engine.sync_now().await.unwrap().unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(engine.pending_count().await.unwrap(), 1);

    backend.set_reachable(true);
    assert!(engine.retry_item(&id).await.unwrap());
    engine.sync_now().await.unwrap();
    assert_eq!(engine.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_trigger_during_run_does_not_start_second_pass() {
    let store = MemoryStore::new();
    let backend = MemoryBackend::new();
    backend.fail_attempt(0);
    backend.set_delay(Duration::from_millis(40));
    let engine = SyncEngine::with_parts(memory_parts(&store, &backend), &EngineConfig::default())
        .await
        .unwrap();
    engine.enqueue(RecordType::Activity, json!({"n": 0})).await.unwrap();
    engine.enqueue(RecordType::Activity, json!({"n": 1})).await.unwrap();

    engine.start().unwrap();
    engine.connectivity().set_online(true);
    for _ in 0..400 {
        if engine.is_syncing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(engine.is_syncing());

    assert!(engine.trigger_sync());
    engine.enqueue(RecordType::Visit, json!({})).await.unwrap();
    wait_for_history(&engine, 1).await;
    wait_until_idle(&engine).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The failed record was not delivered again by a second pass.
    assert_eq!(backend.attempts().len(), 2);
    assert_eq!(engine.sync_history().await.unwrap().len(), 1);
    let counts = engine.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.pending, 1);

    engine.shutdown().await;
}
