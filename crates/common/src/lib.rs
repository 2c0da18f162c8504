//! Qualtrics ETL Common Library
//!
//! Shared code for the Qualtrics ETL services including:
//! - Database entities, repository, and connection pool
//! - Remote survey platform client abstraction
//! - Error types and handling
//! - Configuration management
//! - Extract file storage
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod qualtrics;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use qualtrics::QualtricsApi;
pub use storage::ExtractStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
