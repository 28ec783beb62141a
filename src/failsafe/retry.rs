//! Retry logic with exponential backoff
//!
//! Only transient failures are retried. Anything else, including business rule
//! violations, is returned on first occurrence without spending the retry
//! budget. When the budget runs out the last error is returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Errors that know whether retrying could help
pub trait Transient {
    /// `true` for connection resets, timeouts, failovers and similar
    fn is_transient(&self) -> bool;
}

/// Persistence-engine error codes treated as transient: host unreachable,
/// network timeout, shutdown in progress, primary stepped down, not writable
/// primary, interrupted at shutdown/failover, node recovering.
pub const TRANSIENT_ERROR_CODES: &[i64] = &[
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13435, 13436,
];

static TRANSIENT_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(ECONNRESET|ETIMEDOUT|ECONNREFUSED|EPIPE|EHOSTUNREACH|ENOTFOUND|EAI_AGAIN|socket hang up|connection (reset|refused|closed)|timed? ?out|not (master|primary)|primary stepped down|node is recovering|topology was destroyed|server selection)",
    )
    .expect("transient error pattern is valid")
});

/// Classify a failure by its engine error code and message
#[must_use]
pub fn is_transient_error(code: Option<i64>, message: &str) -> bool {
    code.is_some_and(|c| TRANSIENT_ERROR_CODES.contains(&c)) || TRANSIENT_PATTERNS.is_match(message)
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
    /// Relative jitter (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min(initial_delay * 2^retry, max_delay)`, no jitter
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Base delay with jitter applied
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread)
    }
}

/// Execute a future with retry logic, classifying errors via [`Transient`]
///
/// # Errors
///
/// Returns the first permanent error, or the last transient error once the
/// retry budget is exhausted.
///
/// ```
/// use carpool_settlement::failsafe::{RetryPolicy, with_retry};
/// use carpool_settlement::store::StoreError;
///
/// # tokio_test::block_on(async {
/// let found: Result<u32, StoreError> =
///     with_retry(&RetryPolicy::none(), "find_trip", || async { Ok(7) }).await;
/// assert_eq!(found.unwrap(), 7);
/// # })
/// ```
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, name: &str, f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    with_retry_if(policy, name, E::is_transient, f).await
}

/// Execute a future with retry logic and a caller-supplied classifier
///
/// # Errors
///
/// Returns the first error `is_transient` rejects, or the last error once the
/// retry budget is exhausted.
pub async fn with_retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    name: &str,
    is_transient: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut retries = 0u32;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_transient(&e) {
                    return Err(e);
                }

                if retries >= policy.max_retries {
                    warn!(
                        operation = name,
                        attempts = retries + 1,
                        error = %e,
                        "Max retry attempts reached"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(retries);
                debug!(
                    operation = name,
                    retry = retries + 1,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
                retries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[derive(Debug)]
    enum TestError {
        Reset,
        Validation,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Reset => f.write_str("read ECONNRESET"),
                Self::Validation => f.write_str("amount must be positive"),
            }
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            is_transient_error(None, &self.to_string())
        }
    }

    fn policy(max_retries: u32, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter,
        }
    }

    #[test]
    fn classifies_codes_and_patterns() {
        assert!(is_transient_error(Some(189), "Primary stepped down"));
        assert!(is_transient_error(Some(11600), ""));
        assert!(is_transient_error(None, "connect ECONNREFUSED 127.0.0.1:27017"));
        assert!(is_transient_error(None, "operation timed out"));
        assert!(is_transient_error(None, "not master and secondaryOk=false"));
        assert!(!is_transient_error(Some(11000), "E11000 duplicate key error"));
        assert!(!is_transient_error(None, "INVALID_REFUND_AMOUNT"));
    }

    #[test]
    fn base_delay_doubles_then_caps() {
        let p = policy(5, 0.0);
        let delays: Vec<_> = (0..5).map(|r| p.base_delay(r).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(p.base_delay(64), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let p = policy(3, 0.1);
        for _ in 0..200 {
            let d = p.delay_for(1).as_secs_f64();
            assert!((0.179..=0.221).contains(&d), "delay {d} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_error_with_growing_delays() {
        // GIVEN: an operation that always fails with ECONNRESET
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);

        // WHEN: retried with max_retries = 4
        let result: Result<(), TestError> = with_retry(&policy(4, 0.1), "append", || {
            seen.lock().push(Instant::now());
            async { Err(TestError::Reset) }
        })
        .await;

        // THEN: 1 + 4 attempts, gaps strictly increasing until capped
        assert!(matches!(result, Err(TestError::Reset)));
        let times = attempts.lock().clone();
        assert_eq!(times.len(), 5);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] < gaps[1]);
        assert!(gaps[1] < gaps[2]);
        for gap in &gaps {
            assert!(*gap <= Duration::from_millis(550), "gap {gap:?} exceeds cap + jitter");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(&policy(5, 0.1), "validate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Validation) }
        })
        .await;

        assert!(matches!(result, Err(TestError::Validation)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = with_retry(&policy(3, 0.0), "update", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(TestError::Reset) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn custom_classifier_overrides_trait() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> =
            with_retry_if(&policy(3, 0.0), "custom", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Reset) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
