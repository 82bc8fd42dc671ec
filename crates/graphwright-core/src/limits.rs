//! Input validation limits for security and resource protection

/// Default number of results returned by a query (100)
pub const MAX_RESULTS_DEFAULT: usize = 100;

/// Hard cap on results returned by a query (1000)
pub const MAX_RESULTS_ABSOLUTE: usize = 1000;

/// Maximum accepted query length (8KB)
pub const MAX_QUERY_LEN: usize = 8 * 1024;

/// Maximum accepted path length (4KB)
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum repository id length (128 chars)
pub const MAX_REPO_ID_LEN: usize = 128;

/// Default records per batch commit (100)
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Maximum records per batch commit (10000)
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Default extraction worker count (4)
pub const DEFAULT_WORKERS: usize = 4;

/// Maximum extraction worker count (64)
pub const MAX_WORKERS: usize = 64;

/// Maximum stored length of a variable value (1000 chars)
pub const MAX_VARIABLE_VALUE_LEN: usize = 1000;

/// Maximum stored length of a docstring (500 chars)
pub const MAX_DOCSTRING_LEN: usize = 500;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyRepoId,
    RepoIdTooLong { len: usize, max: usize },
    InvalidRepoIdChar(char),
    BatchSizeOutOfRange { size: usize, max: usize },
    WorkersOutOfRange { workers: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRepoId => write!(f, "Repository id cannot be empty"),
            Self::RepoIdTooLong { len, max } => {
                write!(f, "Repository id too long: {} chars (max {})", len, max)
            }
            Self::InvalidRepoIdChar(c) => write!(
                f,
                "Invalid character {:?} in repository id (allowed: letters, digits, '-', '_')",
                c
            ),
            Self::BatchSizeOutOfRange { size, max } => {
                write!(f, "Batch size out of range: {} (1..={})", size, max)
            }
            Self::WorkersOutOfRange { workers, max } => {
                write!(f, "Worker count out of range: {} (1..={})", workers, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a repository id against `^[A-Za-z0-9_-]+$`
pub fn validate_repo_id(repo_id: &str) -> Result<(), ValidationError> {
    if repo_id.is_empty() {
        return Err(ValidationError::EmptyRepoId);
    }
    if repo_id.len() > MAX_REPO_ID_LEN {
        return Err(ValidationError::RepoIdTooLong {
            len: repo_id.len(),
            max: MAX_REPO_ID_LEN,
        });
    }
    if let Some(c) = repo_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidRepoIdChar(c));
    }
    Ok(())
}

/// Validate batch size
pub fn validate_batch_size(size: usize) -> Result<(), ValidationError> {
    if size == 0 || size > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchSizeOutOfRange {
            size,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Validate worker count
pub fn validate_workers(workers: usize) -> Result<(), ValidationError> {
    if workers == 0 || workers > MAX_WORKERS {
        return Err(ValidationError::WorkersOutOfRange {
            workers,
            max: MAX_WORKERS,
        });
    }
    Ok(())
}

/// Clamp a caller-supplied result limit into `1..=MAX_RESULTS_ABSOLUTE`
pub fn validate_limit_param(limit: Option<i64>) -> usize {
    match limit {
        None => MAX_RESULTS_DEFAULT,
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n)
            .unwrap_or(MAX_RESULTS_ABSOLUTE)
            .min(MAX_RESULTS_ABSOLUTE),
    }
}

/// Truncate to at most `max` chars on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
