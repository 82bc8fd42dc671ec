//! Per-caller token bucket rate limiting

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::RateLimitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained refill rate
    pub requests_per_minute: u32,
    /// Bucket capacity: requests a fresh or idle caller may issue at once
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            burst: 10,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per caller key.
///
/// Each key starts with a full bucket of `burst` tokens; tokens refill at
/// `requests_per_minute / 60` per second up to `burst`.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one token for `key`, or report how long to wait
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity(),
            last_refill: now,
        });
        self.refill(bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let retry_after = self.time_for(1.0 - bucket.tokens);
        tracing::debug!(
            caller = key,
            retry_after_secs = retry_after.as_secs_f64(),
            "Rate limit exceeded"
        );
        Err(RateLimitError {
            key: key.to_string(),
            retry_after,
        })
    }

    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    /// Whole tokens currently available to `key`
    pub fn remaining(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let mut buckets = self.lock();
        match buckets.get_mut(key) {
            Some(bucket) => {
                self.refill(bucket, now);
                bucket.tokens.floor() as u32
            }
            None => self.capacity() as u32,
        }
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop buckets that have been idle long enough to be full again
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let full_after = self.time_for(self.capacity());
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < full_after);
        before - buckets.len()
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.burst.max(1))
    }

    fn rate_per_sec(&self) -> f64 {
        f64::from(self.config.requests_per_minute.max(1)) / 60.0
    }

    fn time_for(&self, tokens: f64) -> Duration {
        Duration::from_secs_f64((tokens / self.rate_per_sec()).max(0.0))
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec()).min(self.capacity());
        bucket.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }
}
