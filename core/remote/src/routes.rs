//! Record type to endpoint mapping.

use std::collections::HashMap;

use fieldsync_common::{Error, RecordType, Result};

/// Fixed mapping from record type to endpoint path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    paths: HashMap<RecordType, String>,
}

impl Routes {
    /// Create an empty route table.
    pub fn empty() -> Self {
        Self {
            paths: HashMap::new(),
        }
    }

    /// Set or replace the endpoint for a type.
    ///
    /// # Errors
    /// - `path` is empty
    pub fn set(&mut self, record_type: RecordType, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(Error::Config(format!(
                "Empty endpoint for record type '{}'",
                record_type
            )));
        }
        self.paths.insert(record_type, path.to_string());
        Ok(())
    }

    /// Builder-style [`Routes::set`].
    pub fn with(mut self, record_type: RecordType, path: impl Into<String>) -> Result<Self> {
        self.set(record_type, path)?;
        Ok(self)
    }

    /// Apply overrides keyed by type tag.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Result<Self> {
        for (tag, path) in overrides {
            self.set(RecordType::from(tag.as_str()), path.clone())?;
        }
        Ok(self)
    }

    /// Resolve the endpoint path for a type.
    ///
    /// # Errors
    /// - `UnsupportedType` if the type has no route
    pub fn resolve(&self, record_type: &RecordType) -> Result<&str> {
        self.paths
            .get(record_type)
            .map(String::as_str)
            .ok_or_else(|| Error::UnsupportedType(record_type.to_string()))
    }

    /// Check if a type has a route.
    pub fn has_route(&self, record_type: &RecordType) -> bool {
        self.paths.contains_key(record_type)
    }
}

impl Default for Routes {
    fn default() -> Self {
        let paths = [
            (RecordType::Farmer, "farmers"),
            (RecordType::Activity, "activities"),
            (RecordType::Visit, "visits"),
            (RecordType::Photo, "photos"),
            (RecordType::Batch, "harvest_batches"),
        ]
        .into_iter()
        .map(|(record_type, path)| (record_type, path.to_string()))
        .collect();

        Self { paths }
    }
}
