//! Cinema Common Library
//!
//! Shared code for the Cinema ETL and gateway services including:
//! - Movie records and the channel codec
//! - Database models, the batch materializer and the vote aggregator
//! - Redis pub/sub transport
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod records;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Materializer, Repository, VoteAggregator};
pub use errors::{AppError, Result};
pub use records::MovieRecord;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
