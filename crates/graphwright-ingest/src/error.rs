//! Error types for Graphwright ingestion

use std::path::PathBuf;

use graphwright_core::limits::ValidationError;
use graphwright_core::SecurityError;
use graphwright_storage::StorageError;
use thiserror::Error;

/// Result type alias using the ingestion error
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures that stop a build before it produces a report.
///
/// Per-file and per-record problems never surface here; they are
/// collected in the [`BuildReport`](graphwright_core::BuildReport).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown extractor: {0}")]
    UnknownExtractor(String),

    #[error("Rejected build path: {0}")]
    Security(#[from] SecurityError),

    #[error("Core error: {0}")]
    Core(#[from] graphwright_core::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
