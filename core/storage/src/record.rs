//! Queued record model and its per-item state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use fieldsync_common::{Error, RecordId, RecordType};

/// Delivery status of a queued record.
///
/// A record that reaches the server is removed from the store, so there is
/// no "synced" state here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting for the next sync run.
    Pending,
    /// A delivery attempt is in flight.
    Syncing,
    /// Last delivery attempt failed; retried on the next run.
    Failed,
    /// Retry ceiling reached. Only a manual retry brings it back.
    Abandoned,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Syncing => "syncing",
            RecordStatus::Failed => "failed",
            RecordStatus::Abandoned => "abandoned",
        }
    }

    /// Whether a sync run picks this record up.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, RecordStatus::Pending | RecordStatus::Failed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "syncing" => Ok(RecordStatus::Syncing),
            "failed" => Ok(RecordStatus::Failed),
            "abandoned" => Ok(RecordStatus::Abandoned),
            other => Err(Error::Serialization(format!(
                "Unknown record status: {}",
                other
            ))),
        }
    }
}

/// One unit of captured field data awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRecord {
    /// Locally generated identifier.
    pub id: RecordId,
    /// Selects the remote endpoint.
    pub record_type: RecordType,
    /// Domain data from the capture layer. Opaque to the engine.
    pub payload: serde_json::Value,
    /// Current delivery status.
    pub status: RecordStatus,
    /// Capture time (client clock).
    pub created_at: DateTime<Utc>,
    /// Number of failed delivery attempts.
    pub retry_count: u32,
    /// Estimated payload size in bytes, for display only.
    pub approx_size: u64,
    /// Message of the last delivery failure.
    pub last_error: Option<String>,
    /// When the last delivery attempt started.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedRecord {
    /// Build a fresh pending record.
    pub fn new(record_type: RecordType, payload: serde_json::Value) -> Self {
        let approx_size = serde_json::to_vec(&payload)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);

        Self {
            id: RecordId::generate(),
            record_type,
            payload,
            status: RecordStatus::Pending,
            created_at: Utc::now(),
            retry_count: 0,
            approx_size,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Mark as syncing.
    pub fn mark_syncing(&mut self) {
        self.status = RecordStatus::Syncing;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Mark as failed. With a ceiling, reaching it abandons the record.
    pub fn mark_failed(&mut self, error: impl Into<String>, max_attempts: Option<u32>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.status = match max_attempts {
            Some(max) if self.retry_count >= max => RecordStatus::Abandoned,
            _ => RecordStatus::Failed,
        };
    }

    /// Put a failed record back in line without touching its retry count.
    pub fn requeue(&mut self) {
        if self.status == RecordStatus::Failed {
            self.status = RecordStatus::Pending;
        }
    }

    /// Manual retry: failed or abandoned records restart from zero.
    pub fn reset_for_retry(&mut self) {
        if matches!(self.status, RecordStatus::Failed | RecordStatus::Abandoned) {
            self.status = RecordStatus::Pending;
            self.retry_count = 0;
        }
    }
}
