//! In-memory backend for testing and dry runs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldsync_common::{Error, RecordType, Result};

use crate::backend::{ReachabilityProbe, RemoteBackend};
use crate::routes::Routes;

#[derive(Debug, Default)]
struct Script {
    /// Accepted submissions in arrival order.
    delivered: Vec<(RecordType, serde_json::Value)>,
    /// Every submission that reached the backend, accepted or not.
    attempts: Vec<(RecordType, serde_json::Value)>,
    /// Zero-based attempt numbers that fail with a network error.
    failing_attempts: HashSet<usize>,
    delay: Option<Duration>,
}

/// Backend that keeps accepted records in memory.
///
/// Failures can be scripted per attempt, and a delay can be added to every
/// submission to keep a run in flight.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    routes: Routes,
    script: Arc<Mutex<Script>>,
    reachable: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create a backend accepting every known record type.
    pub fn new() -> Self {
        Self::with_routes(Routes::default())
    }

    /// Create a backend with an explicit route table.
    pub fn with_routes(routes: Routes) -> Self {
        Self {
            routes,
            script: Arc::new(Mutex::new(Script::default())),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Fail the given zero-based attempt with a network error.
    pub fn fail_attempt(&self, attempt: usize) {
        self.with_script(|s| {
            s.failing_attempts.insert(attempt);
        });
    }

    /// Delay every submission.
    pub fn set_delay(&self, delay: Duration) {
        self.with_script(|s| s.delay = Some(delay));
    }

    /// When unreachable, every submission fails with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Payloads accepted so far.
    pub fn delivered(&self) -> Vec<(RecordType, serde_json::Value)> {
        self.with_script(|s| s.delivered.clone())
    }

    /// Every submission that reached the backend.
    pub fn attempts(&self) -> Vec<(RecordType, serde_json::Value)> {
        self.with_script(|s| s.attempts.clone())
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut script)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn submit(&self, record_type: &RecordType, payload: &serde_json::Value) -> Result<()> {
        self.routes.resolve(record_type)?;

        let (attempt, delay) = self.with_script(|s| {
            s.attempts.push((record_type.clone(), payload.clone()));
            (s.attempts.len() - 1, s.delay)
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Network("backend unreachable".to_string()));
        }

        self.with_script(|s| {
            if s.failing_attempts.contains(&attempt) {
                return Err(Error::Network(format!("simulated failure on attempt {}", attempt)));
            }
            s.delivered.push((record_type.clone(), payload.clone()));
            Ok(())
        })
    }
}

#[async_trait]
impl ReachabilityProbe for MemoryBackend {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
