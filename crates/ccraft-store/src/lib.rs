//! Relational record store for video and transcript rows.
//!
//! Talks to a PostgREST endpoint over HTTP with service-key auth. Provides:
//! - [`RecordStore`] trait used by the workers
//! - [`PostgrestStore`] with retry and per-request metrics
//! - [`MemoryStore`] for tests

pub mod error;
pub mod memory;
pub mod metrics;
pub mod postgrest;
pub mod retry;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgrest::{PostgrestStore, StoreConfig};
pub use retry::RetryConfig;
pub use store::RecordStore;
