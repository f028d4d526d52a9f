//! Common error types for fieldsync.

use thiserror::Error;

/// Top-level error type for fieldsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote request did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Remote endpoint answered with a non-success status.
    #[error("Rejected by remote ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// No remote endpoint is known for a record type.
    #[error("Unsupported record type: {0}")]
    UnsupportedType(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from delivering a record to the remote.
    ///
    /// Delivery failures are recoverable: the record is marked failed and
    /// picked up again by a later run.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Rejected { .. }
        )
    }

    /// Whether this error came from the local store layer.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::Network("down".to_string()).is_delivery_failure());
        assert!(Error::Timeout("30s".to_string()).is_delivery_failure());
        assert!(Error::Rejected {
            status: 500,
            body: String::new()
        }
        .is_delivery_failure());

        assert!(!Error::UnsupportedType("tree".to_string()).is_delivery_failure());
        assert!(!Error::UnsupportedType("tree".to_string()).is_storage_failure());

        assert!(Error::Storage("disk full".to_string()).is_storage_failure());
        assert!(!Error::Storage("disk full".to_string()).is_delivery_failure());
    }

    #[test]
    fn test_rejected_display() {
        let err = Error::Rejected {
            status: 409,
            body: "duplicate key".to_string(),
        };
        assert_eq!(err.to_string(), "Rejected by remote (409): duplicate key");
    }
}
