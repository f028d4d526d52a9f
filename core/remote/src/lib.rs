//! Remote delivery for queued records.
//!
//! The engine treats the backend as one opaque endpoint per record type:
//! a record is submitted as a single request and the only thing read back
//! is whether it was accepted.

pub mod backend;
pub mod http;
pub mod memory;
pub mod routes;

pub use backend::{ReachabilityProbe, RemoteBackend};
pub use http::{HttpBackend, HttpConfig};
pub use memory::MemoryBackend;
pub use routes::Routes;
