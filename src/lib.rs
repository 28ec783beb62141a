//! Carpool Settlement Library
//!
//! Payment settlement and resilience engine for a carpooling marketplace.
//!
//! # Features
//!
//! - **Payment state machine**: collection, driver advance at trip start,
//!   escrow vault released exactly once at completion, bounded refunds
//! - **Failsafes**: per-dependency circuit breakers, retries with jittered
//!   exponential backoff, timeouts
//! - **Isolation queues**: calls to an unavailable dependency are parked and
//!   replayed once it recovers
//! - **Capture gate**: held funds are captured only after every passenger's
//!   pickup code is verified
//! - **Loyalty cashback**: credited from trip-completion events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod failsafe;
pub mod isolation;
pub mod notify;
pub mod payment;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
