//! Storage error types

use std::time::Duration;

use graphwright_core::{BreakerError, GuardrailError};
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-specific error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The graph-store breaker rejected the call without reaching the store
    #[error("circuit '{name}' is open, retry in {:.1}s", .retry_in.as_secs_f64())]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("Query rejected: {0}")]
    Guardrail(#[from] GuardrailError),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] ::rusqlite::Error),
}

impl StorageError {
    /// True for failures the caller may retry after backing off
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<BreakerError<StorageError>> for StorageError {
    fn from(e: BreakerError<StorageError>) -> Self {
        match e {
            BreakerError::Open { name, retry_in } => Self::CircuitOpen { name, retry_in },
            BreakerError::Dependency(inner) => inner,
        }
    }
}
