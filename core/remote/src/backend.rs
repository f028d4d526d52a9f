//! Remote backend trait definition.

use async_trait::async_trait;

use fieldsync_common::{RecordType, Result};

/// Destination for queued records.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Get the backend name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Submit one record payload to the endpoint for its type.
    ///
    /// # Postconditions
    /// - `Ok(())` means the remote accepted the record
    ///
    /// # Errors
    /// - `UnsupportedType` if no endpoint exists for `record_type`; no request is made
    /// - `Network`, `Timeout` or `Rejected` for delivery failures
    async fn submit(&self, record_type: &RecordType, payload: &serde_json::Value) -> Result<()>;
}

/// Platform reachability signal.
///
/// A positive answer is a hint that delivery is worth attempting, not a
/// promise that it will succeed.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Check whether the network looks reachable right now.
    async fn is_reachable(&self) -> bool;
}
