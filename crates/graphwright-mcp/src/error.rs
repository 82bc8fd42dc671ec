//! Tool-call error taxonomy

use std::time::Duration;

use graphwright_core::{GuardrailError, RateLimitError, SecurityError};
use graphwright_storage::StorageError;
use thiserror::Error;

/// A failed tool call. The rendered message starts with [`ToolError::tag`].
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("rate_limited: {0}")]
    RateLimited(#[from] RateLimitError),

    #[error("security: {0}")]
    Security(#[from] SecurityError),

    #[error("guardrail: {0}")]
    Guardrail(#[from] GuardrailError),

    #[error("circuit_open: graph store unavailable, retry in {:.1}s", .retry_in.as_secs_f64())]
    CircuitOpen { retry_in: Duration },

    #[error("dependency: {0}")]
    Dependency(String),

    #[error("invalid_arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Security(_) => "security",
            Self::Guardrail(_) => "guardrail",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Dependency(_) => "dependency",
            Self::InvalidArguments(_) => "invalid_arguments",
        }
    }

    /// How long the caller should wait before retrying, when known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(e) => Some(e.retry_after),
            Self::CircuitOpen { retry_in } => Some(*retry_in),
            _ => None,
        }
    }
}

impl From<StorageError> for ToolError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::CircuitOpen { retry_in, .. } => Self::CircuitOpen { retry_in },
            StorageError::Guardrail(g) => Self::Guardrail(g),
            StorageError::UnsupportedQuery(msg) => Self::InvalidArguments(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<graphwright_core::limits::ValidationError> for ToolError {
    fn from(e: graphwright_core::limits::ValidationError) -> Self {
        Self::InvalidArguments(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_start_with_tag() {
        let errors = vec![
            ToolError::RateLimited(RateLimitError {
                key: "stdio".into(),
                retry_after: Duration::from_millis(600),
            }),
            ToolError::Security(SecurityError::Traversal),
            ToolError::Guardrail(GuardrailError::Forbidden("DELETE".into())),
            ToolError::CircuitOpen {
                retry_in: Duration::from_secs(30),
            },
            ToolError::Dependency("disk full".into()),
            ToolError::InvalidArguments("missing field `path`".into()),
        ];
        for e in errors {
            assert!(e.to_string().starts_with(&format!("{}: ", e.tag())), "{}", e);
        }
    }

    #[test]
    fn test_storage_errors_map_to_tags() {
        let open = StorageError::CircuitOpen {
            name: "graph_store".into(),
            retry_in: Duration::from_secs(5),
        };
        let e = ToolError::from(open);
        assert_eq!(e.tag(), "circuit_open");
        assert_eq!(e.retry_after(), Some(Duration::from_secs(5)));

        assert_eq!(ToolError::from(StorageError::Guardrail(GuardrailError::Empty)).tag(), "guardrail");
        assert_eq!(ToolError::from(StorageError::UnsupportedQuery("x".into())).tag(), "invalid_arguments");
        assert_eq!(ToolError::from(StorageError::Database("locked".into())).tag(), "dependency");
    }
}
