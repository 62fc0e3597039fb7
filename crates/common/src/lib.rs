//! TenderWatch Common Library
//!
//! Shared code for the ingestion service and the enrichment worker:
//! - Domain model (notices, documents, watchlists, import runs, translations)
//! - Persistence boundary with Postgres and in-memory implementations
//! - Error types and handling
//! - Configuration management
//! - AI collaborator clients and outbound signal queue
//! - Retry, keyed locking, metrics

pub mod ai;
pub mod config;
pub mod db;
pub mod errors;
pub mod locks;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, Repository, Store};
pub use errors::{AppError, ErrorKind, Result};
pub use locks::KeyedLocks;
pub use queue::{Signal, SignalSink};
pub use retry::RetryPolicy;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
