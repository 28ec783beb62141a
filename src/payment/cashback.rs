//! Loyalty cashback on trip completion
//!
//! Runs off [`SettlementEvent::TripCompleted`], never inline with the vault
//! release, so a cashback failure can't be mistaken for a settlement failure.
//! Credits are keyed by `cashback:{trip}:{booking}` and applied at most once.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Money;
use crate::config::CashbackConfig;
use crate::events::{SettlementEvent, TripCompletedEvent};
use crate::failsafe::{RetryPolicy, with_retry};
use crate::store::{LoyaltyTier, SettlementStore};

/// Cashback rates per loyalty tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashbackPolicy {
    enabled: bool,
    rates: [u32; 4],
}

impl Default for CashbackPolicy {
    fn default() -> Self {
        Self::from_config(&CashbackConfig::default())
    }
}

impl CashbackPolicy {
    /// Build from configuration
    #[must_use]
    pub fn from_config(config: &CashbackConfig) -> Self {
        Self {
            enabled: config.enabled,
            rates: [
                config.bronze_bps,
                config.silver_bps,
                config.gold_bps,
                config.platinum_bps,
            ],
        }
    }

    /// Whether cashback is credited at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rate for `tier` in basis points
    #[must_use]
    pub fn rate_bps(&self, tier: LoyaltyTier) -> u32 {
        let idx = match tier {
            LoyaltyTier::Bronze => 0,
            LoyaltyTier::Silver => 1,
            LoyaltyTier::Gold => 2,
            LoyaltyTier::Platinum => 3,
        };
        self.rates[idx]
    }

    /// Cashback owed on `amount_paid`, rounded down to the minor unit
    #[must_use]
    pub fn cashback_for(&self, tier: LoyaltyTier, amount_paid: Money) -> Money {
        if !self.enabled || !amount_paid.is_positive() {
            return Money::ZERO;
        }
        // Amounts too large to scale earn nothing
        amount_paid
            .basis_points(self.rate_bps(tier))
            .unwrap_or(Money::ZERO)
    }
}

/// What one completed trip produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CashbackReport {
    /// Wallets credited
    pub credited: usize,
    /// Bookings with nothing to credit, or already credited
    pub skipped: usize,
    /// Credits that failed after retries
    pub failed: usize,
    /// Sum credited
    pub total: Money,
}

/// Credit cashback for every booking in a completed trip
///
/// Failures are logged and counted, never returned.
pub async fn apply_cashback(
    store: &dyn SettlementStore,
    policy: &CashbackPolicy,
    retry: &RetryPolicy,
    event: &TripCompletedEvent,
) -> CashbackReport {
    let mut report = CashbackReport::default();

    for booking in &event.bookings {
        let amount = policy.cashback_for(booking.loyalty_tier, booking.amount_paid);
        if !amount.is_positive() {
            report.skipped += 1;
            continue;
        }

        let reference = format!("cashback:{}:{}", event.trip_id, booking.booking_id);
        let credited = with_retry(retry, "credit_wallet", || {
            store.credit_wallet(&booking.passenger_id, amount, &reference)
        })
        .await;

        match credited {
            Ok(true) => {
                report.credited += 1;
                report.total += amount;
            }
            Ok(false) => {
                debug!(reference, "Cashback already credited");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(
                    trip_id = %event.trip_id,
                    booking_id = %booking.booking_id,
                    error = %e,
                    "Cashback credit failed"
                );
                report.failed += 1;
            }
        }
    }

    if report.credited > 0 {
        info!(
            trip_id = %event.trip_id,
            credited = report.credited,
            total = %report.total,
            "Cashback credited"
        );
    }
    report
}

/// Credit cashback for every trip completion published on `events`
///
/// Stops when the channel closes.
pub fn spawn_cashback_listener(
    store: Arc<dyn SettlementStore>,
    policy: CashbackPolicy,
    retry: RetryPolicy,
    mut events: broadcast::Receiver<SettlementEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SettlementEvent::TripCompleted(event)) => {
                    apply_cashback(store.as_ref(), &policy, &retry, &event).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Settlement events closed, cashback listener stopping");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Cashback listener fell behind, events skipped");
                }
            }
        }
    })
}
