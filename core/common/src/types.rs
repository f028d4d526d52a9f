//! Common types used throughout fieldsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a queued record.
///
/// Generated on the capturing device and never reused, so it stays stable
/// across restarts and doubles as the store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "RecordId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of captured record. Selects the remote endpoint and payload shape.
///
/// Parsing never fails: a tag this build does not know about is kept as
/// `Unknown` so that rows written by another client version still load.
/// Delivering such a record fails with `Error::UnsupportedType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordType {
    Farmer,
    Activity,
    Visit,
    Photo,
    Batch,
    Unknown(String),
}

impl RecordType {
    /// All record types this build knows how to deliver.
    pub const KNOWN: [RecordType; 5] = [
        RecordType::Farmer,
        RecordType::Activity,
        RecordType::Visit,
        RecordType::Photo,
        RecordType::Batch,
    ];

    /// Wire tag for this type.
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::Farmer => "farmer",
            RecordType::Activity => "activity",
            RecordType::Visit => "visit",
            RecordType::Photo => "photo",
            RecordType::Batch => "batch",
            RecordType::Unknown(tag) => tag,
        }
    }

    /// Whether this is one of the known types.
    pub fn is_known(&self) -> bool {
        !matches!(self, RecordType::Unknown(_))
    }
}

impl From<&str> for RecordType {
    fn from(tag: &str) -> Self {
        match tag {
            "farmer" => RecordType::Farmer,
            "activity" => RecordType::Activity,
            "visit" => RecordType::Visit,
            "photo" => RecordType::Photo,
            "batch" => RecordType::Batch,
            other => RecordType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for RecordType {
    fn from(tag: String) -> Self {
        RecordType::from(tag.as_str())
    }
}

impl From<RecordType> for String {
    fn from(record_type: RecordType) -> Self {
        record_type.as_str().to_string()
    }
}

impl FromStr for RecordType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(RecordType::from(s))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
