//! Configuration management

use std::{collections::HashMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::payment::Money;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Circuit breaker and retry configuration
    pub failsafe: FailsafeConfig,
    /// Isolation queue configuration
    pub isolation: IsolationConfig,
    /// Fee model and gateway call settings
    pub payments: PaymentConfig,
    /// Post-completion cashback
    pub cashback: CashbackConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or holds values that fail validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CARPOOL_SETTLEMENT_PAYMENTS__GATEWAY_TIMEOUT=10s style overrides
        figment = figment.merge(Env::prefixed("CARPOOL_SETTLEMENT_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Reject values the engine cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.payments.driver_advance_percent > 100 {
            return Err(Error::Config(format!(
                "payments.driver_advance_percent must be <= 100, got {}",
                self.payments.driver_advance_percent
            )));
        }
        if self.payments.platform_fee_per_seat.is_negative() {
            return Err(Error::Config(
                "payments.platform_fee_per_seat must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.isolation.notification_eviction_ratio) {
            return Err(Error::Config(format!(
                "isolation.notification_eviction_ratio must be within 0..=1, got {}",
                self.isolation.notification_eviction_ratio
            )));
        }
        if !(0.0..1.0).contains(&self.failsafe.retry.jitter) {
            return Err(Error::Config(format!(
                "failsafe.retry.jitter must be within 0..1, got {}",
                self.failsafe.retry.jitter
            )));
        }
        for (name, cb) in
            std::iter::once(("default", &self.failsafe.circuit_breaker)).chain(
                self.failsafe
                    .overrides
                    .iter()
                    .map(|(name, cb)| (name.as_str(), cb)),
            )
        {
            if cb.half_open_max_attempts == 0 || cb.failure_threshold == 0 {
                return Err(Error::Config(format!(
                    "circuit breaker '{name}': thresholds must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                std::env::var("HOME").map_or_else(
                    |_| path_str.clone(),
                    |home| path_str.replacen('~', &home, 1),
                )
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Failsafe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FailsafeConfig {
    /// Circuit breaker defaults, applied to every dependency
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-dependency circuit breaker settings, keyed by dependency name
    pub overrides: HashMap<String, CircuitBreakerConfig>,
    /// Retry configuration for transient persistence failures
    pub retry: RetryConfig,
}

impl FailsafeConfig {
    /// Circuit breaker settings for a named dependency
    #[must_use]
    pub fn breaker_config(&self, name: &str) -> &CircuitBreakerConfig {
        self.overrides.get(name).unwrap_or(&self.circuit_breaker)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker
    pub enabled: bool,
    /// Failures (while closed) before opening
    pub failure_threshold: u32,
    /// Time to wait before half-open
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Concurrent probes admitted while half-open, and consecutive probe
    /// successes needed to close again
    pub half_open_max_attempts: u32,
    /// Requests that must have been seen before the circuit may trip
    pub volume_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 3,
            volume_threshold: 10,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for the exponential delay (before jitter)
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Relative jitter applied to every delay (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

/// Isolation queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Maximum outstanding notification items
    pub notification_capacity: usize,
    /// Share of the notification queue dropped (oldest first) when full
    pub notification_eviction_ratio: f64,
    /// Maximum outstanding payment items; new items are rejected beyond this
    pub payment_capacity: usize,
    /// Attempts before an item is marked failed
    pub max_attempts: u32,
    /// Items pulled per reprocessing pass
    pub batch_size: usize,
    /// Age after which terminal notification items are purged
    #[serde(with = "humantime_serde")]
    pub terminal_retention: Duration,
    /// Time budget for a direct notification send before it is queued
    #[serde(with = "humantime_serde")]
    pub notification_timeout: Duration,
    /// Per-item processing estimate used for queue wait hints (notifications)
    #[serde(with = "humantime_serde")]
    pub notification_item_time: Duration,
    /// Per-item processing estimate used for queue wait hints (payments)
    #[serde(with = "humantime_serde")]
    pub payment_item_time: Duration,
    /// Interval between background reprocessing sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            notification_capacity: 10_000,
            notification_eviction_ratio: 0.1,
            payment_capacity: 1_000,
            max_attempts: 3,
            batch_size: 50,
            terminal_retention: Duration::from_secs(60 * 60),
            notification_timeout: Duration::from_secs(10),
            notification_item_time: Duration::from_millis(100),
            payment_item_time: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Fee model and payment gateway call settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Platform fee charged per seat to each side (minor units)
    pub platform_fee_per_seat: Money,
    /// Share of driver earnings paid at trip start
    pub driver_advance_percent: u8,
    /// Time budget for a single gateway call
    #[serde(with = "humantime_serde")]
    pub gateway_timeout: Duration,
    /// Gateway label recorded on transactions
    pub gateway_label: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            platform_fee_per_seat: Money::from_minor(1_000),
            driver_advance_percent: 70,
            gateway_timeout: Duration::from_secs(15),
            gateway_label: "cashfree".to_string(),
        }
    }
}

/// Loyalty cashback configuration, rates in basis points of the fare paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CashbackConfig {
    /// Enable cashback crediting on trip completion
    pub enabled: bool,
    /// Bronze tier rate
    pub bronze_bps: u32,
    /// Silver tier rate
    pub silver_bps: u32,
    /// Gold tier rate
    pub gold_bps: u32,
    /// Platinum tier rate
    pub platinum_bps: u32,
}

impl Default for CashbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bronze_bps: 100,
            silver_bps: 200,
            gold_bps: 300,
            platinum_bps: 500,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string ("30s", or "250ms" when
    /// not a whole number of seconds)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "100ms", "30s", "5m", "1h" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns the integer parse error for malformed input.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
