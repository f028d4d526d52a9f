//! Sync scheduling: the single-run loop fed by triggers, connectivity
//! transitions and backoff-spaced retries.

use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use fieldsync_common::Result;

use crate::connectivity::Connectivity;
use crate::queue::{SyncRequest, SyncTrigger};
use crate::retry::RetryConfig;
use crate::synchronizer::SyncReport;

/// Front end of a running scheduler.
pub struct SyncScheduler {
    trigger: SyncTrigger,
    shutdown: watch::Sender<bool>,
}

impl SyncScheduler {
    /// Create a scheduler around an existing trigger channel.
    ///
    /// `requests` must be the receiving end of `trigger`.
    pub fn new(
        trigger: SyncTrigger,
        requests: mpsc::Receiver<SyncRequest>,
        connectivity: watch::Receiver<Connectivity>,
        retry: RetryConfig,
    ) -> (Self, SyncSchedulerHandle) {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let scheduler = Self { trigger, shutdown };
        let handle = SyncSchedulerHandle {
            requests,
            connectivity,
            shutdown: shutdown_rx,
            retry,
        };

        (scheduler, handle)
    }

    /// Request a run. Coalesced with any request already waiting.
    pub fn request_sync(&self) {
        self.trigger.request(SyncRequest::Manual);
    }

    /// Stop the background task after its current run.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Background half of the scheduler.
pub struct SyncSchedulerHandle {
    requests: mpsc::Receiver<SyncRequest>,
    connectivity: watch::Receiver<Connectivity>,
    shutdown: watch::Receiver<bool>,
    retry: RetryConfig,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is awaited to
    /// completion before the next request is looked at, so runs never overlap.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<SyncReport>>> + Send,
    {
        let mut failed_runs: u32 = 0;
        let mut retry_at: Option<Instant> = None;
        let mut watching_connectivity = true;

        info!("Sync scheduler started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let request = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }

                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => {
                        info!("Trigger channel closed");
                        break;
                    }
                },

                changed = self.connectivity.changed(), if watching_connectivity => {
                    if changed.is_err() {
                        watching_connectivity = false;
                        continue;
                    }
                    let state = *self.connectivity.borrow_and_update();
                    if !state.is_online() {
                        retry_at = None;
                        continue;
                    }
                    SyncRequest::Reconnected
                }

                _ = Self::wait_for_retry(retry_at) => {
                    retry_at = None;
                    SyncRequest::Scheduled
                }
            };

            debug!("Processing sync request: {:?}", request);
            match sync_fn(request).await {
                Ok(Some(report)) if report.is_success() => {
                    failed_runs = 0;
                    retry_at = None;
                }
                Ok(Some(report)) => {
                    retry_at = self.schedule_retry(&mut failed_runs);
                    info!(
                        "{} records still failing; next automatic retry {}",
                        report.failed,
                        describe(retry_at)
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Sync run failed: {}", e);
                    retry_at = self.schedule_retry(&mut failed_runs);
                }
            }

            self.discard_stale_requests();
        }

        info!("Sync scheduler shutting down");
    }

    /// Drop triggers that arrived while the run was in progress.
    ///
    /// The run that just finished covered them; records enqueued during it
    /// wait for the next trigger.
    fn discard_stale_requests(&mut self) {
        let mut dropped = 0;
        while self.requests.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} sync requests raised during the run", dropped);
        }
        drop(self.connectivity.borrow_and_update());
    }

    fn schedule_retry(&self, failed_runs: &mut u32) -> Option<Instant> {
        if !self.retry.scheduled {
            return None;
        }
        let delay = self.retry.delay_for_attempt(*failed_runs);
        *failed_runs = failed_runs.saturating_add(1);
        Some(Instant::now() + delay)
    }

    async fn wait_for_retry(retry_at: Option<Instant>) {
        match retry_at {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

fn describe(retry_at: Option<Instant>) -> String {
    match retry_at {
        Some(deadline) => format!("in {:?}", deadline.saturating_duration_since(Instant::now())),
        None => "on reconnect".to_string(),
    }
}
