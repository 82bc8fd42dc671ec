//! Circuit breaker for calls to external dependencies
//!
//! One breaker instance protects one dependency and is shared by every
//! caller of it. State transitions:
//!
//! - `Closed`: calls pass through. Failures inside the trailing window are
//!   counted, a success resets the count, and reaching the threshold opens
//!   the breaker.
//! - `Open`: calls are rejected without invoking the dependency until the
//!   cooldown elapses, then the breaker moves to `HalfOpen`.
//! - `HalfOpen`: a limited number of trial calls pass. Any failure reopens
//!   the breaker, enough successes close it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::BreakerError;

/// Breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within `window` that open the breaker
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
    /// Time spent open before trial calls are allowed
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u32,
    /// Successful trial calls needed to close
    pub success_threshold: u32,
}

impl BreakerConfig {
    /// Preset for the graph store client
    pub fn graph_store() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }

    /// Preset for query translation endpoints
    pub fn query_translation() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::graph_store()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: usize,
    /// Seconds until trial calls are allowed, when open
    pub retry_in_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    trial_successes: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trials_in_flight: 0,
                trial_successes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, reporting `HalfOpen` once the cooldown has elapsed
    pub fn state(&self) -> BreakerState {
        let now = self.clock.now();
        let inner = self.lock();
        match inner.state {
            BreakerState::Open if self.cooldown_elapsed(&inner, now) => BreakerState::HalfOpen,
            state => state,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        let (state, retry_in_secs) = match inner.state {
            BreakerState::Open => match self.remaining_cooldown(&inner, now) {
                Some(left) => (BreakerState::Open, Some(left.as_secs_f64())),
                None => (BreakerState::HalfOpen, None),
            },
            state => (state, None),
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failures.len(),
            retry_in_secs,
        }
    }

    /// Run `f` through the breaker.
    ///
    /// Returns `BreakerError::Open` without calling `f` while the breaker is
    /// open. Errors from `f` are counted and returned as
    /// `BreakerError::Dependency`.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().map_err(|retry_in| BreakerError::Open {
            name: self.name.clone(),
            retry_in,
        })?;

        let mut guard = TrialGuard {
            breaker: self,
            admission,
            settled: false,
        };
        let result = f().await;
        guard.settled = true;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(_) => self.on_failure(admission),
        }
        result.map_err(BreakerError::Dependency)
    }

    /// Close the breaker and forget recorded failures
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.close(&mut inner);
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => match self.remaining_cooldown(&inner, now) {
                Some(left) => Err(left),
                None => {
                    tracing::info!(breaker = %self.name, "Circuit half-open, allowing trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_successes = 0;
                    inner.trials_in_flight = 1;
                    Ok(Admission::Trial)
                }
            },
            BreakerState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_max_calls.max(1) {
                    inner.trials_in_flight += 1;
                    Ok(Admission::Trial)
                } else {
                    Err(Duration::ZERO)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (BreakerState::Closed, _) => inner.failures.clear(),
            (BreakerState::HalfOpen, Admission::Trial) => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.success_threshold.max(1) {
                    tracing::info!(breaker = %self.name, "Circuit closed");
                    self.close(&mut inner);
                }
            }
            // Outcome of a call admitted under an earlier state
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match (inner.state, admission) {
            (BreakerState::Closed, _) => {
                inner.failures.push_back(now);
                let window = self.config.window;
                while let Some(first) = inner.failures.front() {
                    if now.saturating_duration_since(*first) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() >= self.config.failure_threshold.max(1) as usize {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures.len(),
                        cooldown_secs = self.config.cooldown.as_secs_f64(),
                        "Circuit opened"
                    );
                    self.open(&mut inner, now);
                }
            }
            (BreakerState::HalfOpen, Admission::Trial) => {
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit reopened");
                self.open(&mut inner, now);
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;
    }

    fn remaining_cooldown(&self, inner: &Inner, now: Instant) -> Option<Duration> {
        let opened = inner.opened_at?;
        let elapsed = now.saturating_duration_since(opened);
        if elapsed >= self.config.cooldown {
            None
        } else {
            Some(self.config.cooldown - elapsed)
        }
    }

    fn cooldown_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        self.remaining_cooldown(inner, now).is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Frees a half-open trial slot if the call future is dropped before it settles
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        let config = BreakerConfig {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: 1,
        };
        CircuitBreaker::with_clock("test", config, clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        b.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Dependency("boom"))));
        }
        assert_eq!(b.state(), BreakerState::Closed);

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }

        let invoked = AtomicUsize::new(0);
        let result = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(result.unwrap_err().is_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }

        clock.advance(Duration::from_secs(31));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }

        clock.advance(Duration::from_secs(31));
        assert!(matches!(fail(&b).await, Err(BreakerError::Dependency(_))));
        assert_eq!(b.state(), BreakerState::Open);

        // cooldown restarted
        clock.advance(Duration::from_secs(10));
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        let _ = fail(&b).await;

        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_failures_outside_window_expire() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());

        let _ = fail(&b).await;
        let _ = fail(&b).await;
        clock.advance(Duration::from_secs(61));
        let _ = fail(&b).await;

        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_limits_trial_calls() {
        let clock = Arc::new(ManualClock::new());
        let b = Arc::new(breaker(clock.clone()));
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        clock.advance(Duration::from_secs(31));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = rx.await;
                    Ok::<_, &'static str>(())
                })
                .await
            })
        };
        while b.lock().trials_in_flight == 0 {
            tokio::task::yield_now().await;
        }

        // second caller is turned away while the trial is in flight
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open { .. })));

        tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
