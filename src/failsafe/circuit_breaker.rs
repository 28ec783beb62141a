//! Circuit breaker implementation
//!
//! ```text
//! Closed ──[volume met && failure_threshold failures]──> Open
//!   ▲                                                      │
//!   │                                                      │ [reset_timeout elapsed]
//!   │                                                      ▼
//!   └──[half_open_max_attempts successes]───────────── HalfOpen
//!                     [any probe failure] ───────────────> Open
//! ```
//!
//! All counters and the state live behind one mutex so that concurrent callers
//! always observe and produce a single consistent transition. The lock is
//! never held across an `.await`.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// State changes kept per breaker
const STATE_LOG_CAPACITY: usize = 100;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (allowing limited requests to test)
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Error returned by calls made through a breaker
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was not attempted because the circuit is open
    #[error("Circuit breaker '{breaker}' is open, retry after {retry_after_secs}s")]
    Open {
        /// Dependency name
        breaker: String,
        /// Seconds until the breaker will admit a probe
        retry_after_secs: u64,
    },

    /// The call did not finish within its time budget
    #[error("Call through circuit breaker '{breaker}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Dependency name
        breaker: String,
        /// Time budget that was exceeded
        timeout_ms: u64,
    },

    /// The call ran and failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "CIRCUIT_OPEN",
            Self::Timeout { .. } => "DEPENDENCY_TIMEOUT",
            Self::Inner(_) => "DEPENDENCY_ERROR",
        }
    }

    /// Whether the call was short-circuited without running
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Retry hint, only present for open-circuit rejections
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Open {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    /// The underlying call error, if the call ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// One entry of the bounded state change log
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    /// Previous state
    pub from: CircuitState,
    /// New state
    pub to: CircuitState,
    /// When the change happened
    pub at: DateTime<Utc>,
}

/// Serialisable snapshot of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    /// Dependency name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures counted while closed
    pub failures: u32,
    /// Probe successes counted while half-open
    pub successes: u32,
    /// Probes currently in flight
    pub half_open_attempts: u32,
    /// Every call offered to the breaker
    pub total_requests: u64,
    /// Calls that succeeded
    pub successful_requests: u64,
    /// Calls that failed or timed out
    pub failed_requests: u64,
    /// Calls rejected without running
    pub rejected_requests: u64,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Time of the most recent state change
    pub last_state_change_at: DateTime<Utc>,
    /// Most recent state changes, oldest first
    pub state_changes: Vec<StateChange>,
}

struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; permits from older generations only
    /// touch the request counters
    generation: u64,
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_state_change_at: DateTime<Utc>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    last_error: Option<String>,
    state_log: VecDeque<StateChange>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            failures: 0,
            successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
            last_state_change_at: Utc::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            last_error: None,
            state_log: VecDeque::with_capacity(STATE_LOG_CAPACITY),
        }
    }
}

/// Rejection produced by [`CircuitBreaker::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Seconds until a probe may be admitted
    pub retry_after_secs: u64,
}

/// Admission ticket for one call through the breaker.
///
/// Settle it with [`BreakerPermit::success`] or [`BreakerPermit::failure`].
/// Dropping it unsettled (e.g. the caller's future was dropped) frees the
/// half-open probe slot without counting an outcome.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Record a successful call
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.probe);
    }

    /// Record a failed call
    pub fn failure(mut self, error: &str) {
        self.settled = true;
        self.breaker.on_failure(self.generation, self.probe, error);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config: config.clone(),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    /// Dependency name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// An open circuit whose reset timeout has elapsed is reported (and
    /// moved) as half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `f` through the breaker
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] without running `f` when the circuit is open
    /// (or the half-open probe budget is used up), otherwise
    /// [`BreakerError::Inner`] with the error from `f`.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.acquire()?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure(&e.to_string());
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Run `f` through the breaker, racing it against `timeout`.
    ///
    /// A timeout counts as a failure.
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute`], plus [`BreakerError::Timeout`].
    pub async fn execute_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.acquire()?;
        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure(&e.to_string());
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                permit.failure(&format!("timed out after {timeout_ms}ms"));
                Err(BreakerError::Timeout {
                    breaker: self.name.clone(),
                    timeout_ms,
                })
            }
        }
    }

    fn acquire<E>(&self) -> Result<BreakerPermit<'_>, BreakerError<E>> {
        self.try_acquire().map_err(|r| BreakerError::Open {
            breaker: self.name.clone(),
            retry_after_secs: r.retry_after_secs,
        })
    }

    /// Ask for admission of one call without running anything.
    ///
    /// # Errors
    ///
    /// [`Rejected`] when the circuit is open or no probe slot is free.
    #[tracing::instrument(level = "trace", skip(self), fields(breaker = %self.name))]
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Rejected> {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;

        if !self.config.enabled {
            return Ok(self.permit(&inner, false));
        }

        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(self.permit(&inner, false)),
            CircuitState::Open => {
                inner.rejected_requests += 1;
                telemetry_metrics::counter!("settlement_breaker_rejections_total", "breaker" => self.name.clone())
                    .increment(1);
                let retry_after_secs = self.remaining_open_secs(&inner);
                debug!(breaker = %self.name, retry_after_secs, "Circuit open, rejecting request");
                Err(Rejected { retry_after_secs })
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_attempts {
                    inner.half_open_in_flight += 1;
                    debug!(
                        breaker = %self.name,
                        in_flight = inner.half_open_in_flight,
                        "Circuit half-open, allowing probe request"
                    );
                    Ok(self.permit(&inner, true))
                } else {
                    inner.rejected_requests += 1;
                    debug!(breaker = %self.name, "Half-open probe budget used up, rejecting request");
                    Err(Rejected {
                        retry_after_secs: 1,
                    })
                }
            }
        }
    }

    fn permit(&self, inner: &BreakerInner, probe: bool) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        }
    }

    fn on_success(&self, generation: u64, probe: bool) {
        let mut inner = self.inner.lock();
        inner.successful_requests += 1;
        if !self.config.enabled || generation != inner.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::HalfOpen => {
                if probe {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                inner.successes += 1;
                debug!(
                    breaker = %self.name,
                    successes = inner.successes,
                    threshold = self.config.half_open_max_attempts,
                    "Success in half-open state"
                );
                if inner.successes >= self.config.half_open_max_attempts {
                    self.transition_to(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64, probe: bool, error: &str) {
        let mut inner = self.inner.lock();
        inner.failed_requests += 1;
        inner.last_error = Some(error.to_string());
        if !self.config.enabled || generation != inner.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    total_requests = inner.total_requests,
                    error,
                    "Failure in closed state"
                );
                if inner.total_requests >= self.config.volume_threshold
                    && inner.failures >= self.config.failure_threshold
                {
                    self.transition_to(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if probe {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                warn!(breaker = %self.name, error, "Probe failed in half-open state, reopening circuit");
                self.transition_to(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if generation == inner.generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Move an expired open circuit to half-open
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
        {
            self.transition_to(inner, CircuitState::HalfOpen);
        }
    }

    fn remaining_open_secs(&self, inner: &BreakerInner) -> u64 {
        let remaining = inner.opened_at.map_or(self.config.reset_timeout, |at| {
            self.config.reset_timeout.saturating_sub(at.elapsed())
        });
        // Round up so callers never retry before the probe window
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        secs.max(1)
    }

    fn transition_to(&self, inner: &mut BreakerInner, new_state: CircuitState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }

        let now = Utc::now();
        inner.state = new_state;
        inner.generation += 1;
        inner.last_state_change_at = now;
        inner.half_open_in_flight = 0;
        inner.successes = 0;
        if inner.state_log.len() == STATE_LOG_CAPACITY {
            inner.state_log.pop_front();
        }
        inner.state_log.push_back(StateChange {
            from: old_state,
            to: new_state,
            at: now,
        });

        match new_state {
            CircuitState::Closed => {
                inner.failures = 0;
                inner.opened_at = None;
                info!(breaker = %self.name, "Circuit breaker closed");
            }
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    reset_timeout_ms = self.config.reset_timeout.as_millis(),
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, "Circuit breaker half-open");
            }
        }
    }

    /// Force the breaker closed and clear its counters (operator action)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to(&mut inner, CircuitState::Closed);
        inner.failures = 0;
        info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    /// Snapshot of counters and recent state changes
    pub fn metrics(&self) -> BreakerMetrics {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            half_open_attempts: inner.half_open_in_flight,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            rejected_requests: inner.rejected_requests,
            last_error: inner.last_error.clone(),
            last_state_change_at: inner.last_state_change_at,
            state_changes: inner.state_log.iter().cloned().collect(),
        }
    }

    /// Human-readable status for operators
    pub fn status_message(&self) -> String {
        let mut inner = self.inner.lock();
        if !self.config.enabled {
            return format!("Dependency '{}' circuit breaker is disabled (closed)", self.name);
        }
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => format!("Dependency '{}' is healthy (circuit closed)", self.name),
            CircuitState::Open => format!(
                "Dependency '{}' circuit breaker is open after {} failures, retry in {} seconds",
                self.name,
                inner.failures,
                self.remaining_open_secs(&inner)
            ),
            CircuitState::HalfOpen => format!(
                "Dependency '{}' circuit breaker is half-open, testing recovery ({}/{} probe successes)",
                self.name, inner.successes, self.config.half_open_max_attempts
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, volume_threshold: u64, half_open: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: half_open,
            volume_threshold,
        }
    }

    async fn fail(cb: &CircuitBreaker) -> BreakerError<String> {
        cb.execute(|| async { Err::<(), _>("ECONNRESET".to_string()) })
            .await
            .unwrap_err()
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        cb.execute(|| async { Ok::<_, String>(7) }).await
    }

    #[tokio::test]
    async fn stays_closed_below_failure_threshold() {
        // GIVEN: failure_threshold=5, volume_threshold=3
        let cb = CircuitBreaker::new("sms", &config(5, 3, 2));

        // WHEN: 4 calls all fail
        for _ in 0..4 {
            fail(&cb).await;
        }

        // THEN: still closed
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 4);
    }

    #[tokio::test]
    async fn opens_on_fifth_failure_once_volume_is_met() {
        let cb = CircuitBreaker::new("sms", &config(5, 3, 2));
        for _ in 0..5 {
            fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Open circuit rejects without running the call
        let mut ran = false;
        let err = cb
            .execute(|| {
                ran = true;
                async { Ok::<_, String>(()) }
            })
            .await
            .unwrap_err();
        assert!(!ran);
        assert!(err.is_open());
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert!(err.retry_after().unwrap() >= Duration::from_secs(1));
        assert_eq!(cb.metrics().rejected_requests, 1);
    }

    #[tokio::test]
    async fn volume_threshold_prevents_cold_start_trip() {
        // GIVEN: one failure would trip, but 10 requests are required first
        let cb = CircuitBreaker::new("email", &config(1, 10, 1));

        // WHEN: the very first call fails
        fail(&cb).await;

        // THEN: not enough volume yet
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new("email", &config(3, 1, 1));
        fail(&cb).await;
        fail(&cb).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.metrics().failures, 0);
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_max_attempts_probes() {
        let cb = CircuitBreaker::new("payment-gateway", &config(1, 1, 2));
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Still open just before the reset timeout
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let p1 = cb.try_acquire().expect("first probe");
        let p2 = cb.try_acquire().expect("second probe");
        assert!(cb.try_acquire().is_err(), "third concurrent probe must be rejected");

        p1.success();
        p2.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_and_restarts_timer() {
        let cb = CircuitBreaker::new("payment-gateway", &config(1, 1, 3));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        succeed(&cb).await.unwrap();
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_its_slot() {
        let cb = CircuitBreaker::new("sms", &config(1, 1, 1));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let permit = cb.try_acquire().expect("probe");
        assert!(cb.try_acquire().is_err());
        drop(permit);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let cb = CircuitBreaker::new("payment-gateway", &config(1, 1, 1));
        let err = cb
            .execute_with_timeout(Duration::from_secs(10), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BreakerError::Timeout { timeout_ms: 10_000, .. }));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.metrics().last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn disabled_breaker_never_opens() {
        let mut cfg = config(1, 1, 1);
        cfg.enabled = false;
        let cb = CircuitBreaker::new("whatsapp", &cfg);
        for _ in 0..20 {
            fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.status_message().contains("disabled"));
    }

    #[tokio::test]
    async fn state_log_is_bounded() {
        let cb = CircuitBreaker::new("sms", &config(1, 1, 1));
        for _ in 0..120 {
            fail(&cb).await;
            cb.reset();
        }
        let metrics = cb.metrics();
        assert_eq!(metrics.state_changes.len(), STATE_LOG_CAPACITY);
        assert_eq!(metrics.state_changes.last().unwrap().to, CircuitState::Closed);
    }

    #[tokio::test]
    async fn concurrent_failures_leave_one_consistent_transition() {
        let cb = std::sync::Arc::new(CircuitBreaker::new("sms", &config(3, 3, 1)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = std::sync::Arc::clone(&cb);
                tokio::spawn(async move {
                    let _ = cb
                        .execute(|| async { Err::<(), _>("ETIMEDOUT".to_string()) })
                        .await;
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        let opens = metrics
            .state_changes
            .iter()
            .filter(|c| c.to == CircuitState::Open)
            .count();
        assert_eq!(opens, 1);
        assert_eq!(
            metrics.failed_requests + metrics.rejected_requests,
            16,
            "every call is either failed or rejected"
        );
    }

    #[tokio::test]
    async fn status_message_reports_open_state() {
        let cb = CircuitBreaker::new("payment-gateway", &config(2, 1, 1));
        fail(&cb).await;
        fail(&cb).await;
        let message = cb.status_message();
        assert!(message.contains("'payment-gateway'"));
        assert!(message.contains("is open after 2 failures"));
        assert!(message.contains("retry in"));
    }
}
