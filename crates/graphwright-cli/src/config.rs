//! CLI configuration stored as `config.toml` in the data directory

use std::path::{Path, PathBuf};

use anyhow::Context;
use graphwright_core::limits::{validate_batch_size, validate_workers};
use graphwright_core::RateLimitConfig;
use graphwright_ingest::IngestConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

pub fn config_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Configuration for the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch_size: usize,
    pub workers: usize,
    pub flush_interval_ms: u64,
    pub requests_per_minute: u32,
    pub burst: u32,
    pub http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        let ingest = IngestConfig::default();
        let rate = RateLimitConfig::default();
        Self {
            batch_size: ingest.batch_size,
            workers: ingest.workers,
            flush_interval_ms: ingest.flush_interval_ms,
            requests_per_minute: rate.requests_per_minute,
            burst: rate.burst,
            http_addr: "127.0.0.1:5003".to_string(),
        }
    }
}

impl Config {
    pub fn keys() -> &'static [&'static str] {
        &[
            "batch_size",
            "workers",
            "flush_interval_ms",
            "requests_per_minute",
            "burst",
            "http_addr",
        ]
    }

    /// Load from `data_dir`; a missing file gives the defaults
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = config_file_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let path = config_file_path(data_dir);
        std::fs::write(&path, toml::to_string_pretty(self)?).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        Some(match key {
            "batch_size" => self.batch_size.to_string(),
            "workers" => self.workers.to_string(),
            "flush_interval_ms" => self.flush_interval_ms.to_string(),
            "requests_per_minute" => self.requests_per_minute.to_string(),
            "burst" => self.burst.to_string(),
            "http_addr" => self.http_addr.clone(),
            _ => return None,
        })
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let number = || -> anyhow::Result<u64> {
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a non-negative integer", key))
        };
        match key {
            "batch_size" => {
                let n = number()? as usize;
                validate_batch_size(n)?;
                self.batch_size = n;
            }
            "workers" => {
                let n = number()? as usize;
                validate_workers(n)?;
                self.workers = n;
            }
            "flush_interval_ms" => self.flush_interval_ms = number()?.max(1),
            "requests_per_minute" => self.requests_per_minute = positive_u32(key, number()?)?,
            "burst" => self.burst = positive_u32(key, number()?)?,
            "http_addr" => {
                value
                    .parse::<std::net::SocketAddr>()
                    .with_context(|| format!("http_addr must be host:port, got '{}'", value))?;
                self.http_addr = value.to_string();
            }
            _ => anyhow::bail!("Unknown config key: {} (available: {})", key, Self::keys().join(", ")),
        }
        Ok(())
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            workers: self.workers,
            flush_interval_ms: self.flush_interval_ms,
            ..IngestConfig::default()
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: self.requests_per_minute,
            burst: self.burst,
        }
    }
}

fn positive_u32(key: &str, n: u64) -> anyhow::Result<u32> {
    match u32::try_from(n) {
        Ok(n) if n > 0 => Ok(n),
        _ => anyhow::bail!("{} must be between 1 and {}", key, u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.get("http_addr").as_deref(), Some("127.0.0.1:5003"));
        assert_eq!(config.get("batch_size").as_deref(), Some("100"));
    }

    #[test]
    fn test_set_save_load() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.set("workers", "8").unwrap();
        config.set("http_addr", "0.0.0.0:9000").unwrap();
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.workers, 8);
        assert_eq!(loaded.http_addr, "0.0.0.0:9000");
        assert_eq!(loaded.ingest_config().workers, 8);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("workers", "0").is_err());
        assert!(config.set("batch_size", "lots").is_err());
        assert!(config.set("burst", "0").is_err());
        assert!(config.set("http_addr", "nowhere").is_err());
        assert!(config.set("colour", "blue").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(config_file_path(dir.path()), "burst = 3\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.burst, 3);
        assert_eq!(config.rate_limit().requests_per_minute, 100);
    }
}
