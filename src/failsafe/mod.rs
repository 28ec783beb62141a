//! Failsafe mechanisms: circuit breakers, the named breaker registry, and
//! retry with backoff for transient persistence failures

mod circuit_breaker;
mod registry;
mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerMetrics, BreakerPermit, CircuitBreaker, CircuitState, Rejected,
    StateChange,
};
pub use registry::{BreakerRegistry, dependencies};
pub use retry::{
    RetryPolicy, TRANSIENT_ERROR_CODES, Transient, is_transient_error, with_retry, with_retry_if,
};
