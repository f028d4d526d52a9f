//! Local persistence for the fieldsync queue.
//!
//! This module provides a trait-based interface for the durable record table
//! and the scalar key/value store, with a SQLite implementation for devices
//! and an in-memory implementation for tests.
//!
//! # Design Principles
//! - Every mutating call is committed before it returns
//! - Removal is idempotent
//! - Records come back oldest capture first

pub mod history;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use history::{SyncHistory, SyncHistoryEntry, DEFAULT_HISTORY_CAPACITY};
pub use memory::MemoryStore;
pub use record::{QueuedRecord, RecordStatus};
pub use sqlite::SqliteStore;
pub use store::{RecordStore, ScalarStore};
