//! Named circuit breaker registry
//!
//! One breaker per dependency name, created lazily on first use and shared by
//! every call site that names the same dependency. The registry is an
//! ordinary value: construct one per process (or per test) and pass it by
//! `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{BreakerMetrics, CircuitBreaker};
use crate::config::{CircuitBreakerConfig, FailsafeConfig};

/// Well-known dependency names
pub mod dependencies {
    /// Payment gateway (orders, captures, refunds, payouts)
    pub const PAYMENT_GATEWAY: &str = "payment-gateway";
    /// SMS provider
    pub const SMS: &str = "sms";
    /// Email provider
    pub const EMAIL: &str = "email";
    /// `WhatsApp` provider
    pub const WHATSAPP: &str = "whatsapp";
}

/// Registry of circuit breakers keyed by dependency name
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create a registry from failsafe configuration
    #[must_use]
    pub fn new(config: &FailsafeConfig) -> Self {
        Self {
            defaults: config.circuit_breaker.clone(),
            overrides: config.overrides.clone(),
            breakers: DashMap::new(),
        }
    }

    /// Create a registry where every dependency uses `defaults`
    #[must_use]
    pub fn with_defaults(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for `name`, creating it on first use
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = self.overrides.get(name).unwrap_or(&self.defaults);
            debug!(breaker = name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        });
        Arc::clone(entry.value())
    }

    /// Get the breaker for `name` only if it has been used
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Metrics for every breaker created so far, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerMetrics> {
        let mut all: Vec<BreakerMetrics> = self
            .breakers
            .iter()
            .map(|entry| entry.value().metrics())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Force every breaker closed
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    /// Number of breakers created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Return `true` when no breaker has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
