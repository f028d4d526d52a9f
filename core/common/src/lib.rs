//! Common utilities and types shared across fieldsync crates.
//!
//! This module provides the error taxonomy and the identifier types that every
//! layer of the sync engine agrees on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{RecordId, RecordType};
