//! fieldsync sync engine
//!
//! Offline-first delivery of captured field records:
//! - Sync queue manager owning the per-record state machine
//! - Edge-triggered connectivity monitor and reachability poller
//! - Batch synchronizer running at most one pass at a time
//! - Scheduler reacting to enqueues, reconnects and backoff-spaced retries
//! - Engine facade exposing the query and control surface

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod synchronizer;

// Re-export main types
pub use config::{default_database_path, EngineConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor, ReachabilityPoller, Subscription};
pub use engine::{EngineParts, SyncEngine};
pub use queue::{QueueCounts, SyncQueue, SyncRequest, SyncTrigger};
pub use retry::RetryConfig;
pub use scheduler::{SyncScheduler, SyncSchedulerHandle};
pub use status::StatusView;
pub use synchronizer::{BatchSynchronizer, SyncProgress, SyncReport};
