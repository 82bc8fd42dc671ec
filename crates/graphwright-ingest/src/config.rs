//! Ingestion settings

use std::time::Duration;

use graphwright_core::limits::{
    validate_batch_size, validate_workers, DEFAULT_BATCH_SIZE, DEFAULT_WORKERS,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tuning knobs for one build run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Records per batch commit
    pub batch_size: usize,
    /// Flush a non-empty buffer after this long without reaching `batch_size`
    pub flush_interval_ms: u64,
    /// Files parsed concurrently
    pub workers: usize,
    /// Capacity of the queue between workers and the graph builder
    pub queue_capacity: usize,
    /// Files larger than this are skipped
    pub max_file_size: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: 500,
            workers: DEFAULT_WORKERS,
            queue_capacity: 1024,
            max_file_size: 1024 * 1024,
        }
    }
}

impl IngestConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        validate_batch_size(self.batch_size)?;
        validate_workers(self.workers)?;
        if self.queue_capacity == 0 {
            return Err(crate::IngestError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.workers, 4);
        assert_eq!(config.flush_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        assert!(IngestConfig::default().with_workers(0).validate().is_err());
        assert!(IngestConfig::default().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_partial_toml_like_json_uses_defaults() {
        let config: IngestConfig = serde_json::from_str(r#"{"workers": 8}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.batch_size, 100);
    }
}
