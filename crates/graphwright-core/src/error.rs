//! Error types for Graphwright Core

use std::time::Duration;

use thiserror::Error;

use crate::record::ScalarKind;

/// Result type alias using Graphwright's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Guardrail violation: {0}")]
    Guardrail(#[from] GuardrailError),

    #[error("Rate limited: {0}")]
    RateLimited(#[from] RateLimitError),

    #[error("Validation error: {0}")]
    Validation(#[from] crate::limits::ValidationError),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A record that does not conform to the graph schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("unknown relationship type '{0}'")]
    UnknownRelationshipType(String),

    #[error("{node_type} is missing required property '{property}'")]
    MissingProperty { node_type: String, property: String },

    #[error("{node_type}.{property} expected {expected}, found {found}")]
    WrongKind {
        node_type: String,
        property: String,
        expected: ScalarKind,
        found: ScalarKind,
    },

    #[error("{node_type} key property '{property}' is empty")]
    EmptyKey { node_type: String, property: String },

    #[error("{node_type} is keyed by {expected:?}, record uses {found:?}")]
    KeyMismatch {
        node_type: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{rel_type} does not allow {from} -> {to}")]
    PairNotAllowed {
        rel_type: String,
        from: String,
        to: String,
    },
}

/// Rejected external path. Messages never echo the raw input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("empty path provided")]
    EmptyPath,

    #[error("null byte in path")]
    NullByte,

    #[error("path traversal detected")]
    Traversal,

    #[error("absolute paths are not allowed")]
    AbsolutePath,

    #[error("path escapes allowed directory")]
    EscapesRoot,

    #[error("path too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("root directory is not accessible")]
    RootUnavailable,
}

/// Query rejected before execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardrailError {
    #[error("empty query")]
    Empty,

    #[error("query too long: {len} chars (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("forbidden operation: {0}")]
    Forbidden(String),

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("unknown relationship type: {0}")]
    UnknownRelationshipType(String),
}

/// Caller exceeded its request budget
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rate limit exceeded for '{key}', retry after {:.1}s", .retry_after.as_secs_f64())]
pub struct RateLimitError {
    pub key: String,
    pub retry_after: Duration,
}

/// Outcome of a call routed through a circuit breaker
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the dependency
    #[error("circuit '{name}' is open, retry in {:.1}s", .retry_in.as_secs_f64())]
    Open { name: String, retry_in: Duration },

    /// The dependency was invoked and failed
    #[error(transparent)]
    Dependency(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Map the dependency error, keeping open-circuit rejections as they are
    pub fn map_dependency<F, T>(self, f: F) -> BreakerError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::Open { name, retry_in } => BreakerError::Open { name, retry_in },
            Self::Dependency(e) => BreakerError::Dependency(f(e)),
        }
    }
}
