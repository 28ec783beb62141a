//! Settlement events
//!
//! Side effects that must never be mistaken for payment failures (cashback,
//! passenger messaging) listen here instead of being called inline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::payment::Money;
use crate::store::{BookingId, DriverId, LoyaltyTier, PassengerId, TripId};

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A booking settled by trip completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedBooking {
    /// Booking
    pub booking_id: BookingId,
    /// Passenger
    pub passenger_id: PassengerId,
    /// Amount the passenger paid
    pub amount_paid: Money,
    /// Passenger loyalty tier
    pub loyalty_tier: LoyaltyTier,
}

/// Payload of [`SettlementEvent::TripCompleted`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TripCompletedEvent {
    /// Trip
    pub trip_id: TripId,
    /// Driver
    pub driver_id: DriverId,
    /// Vault amount released
    pub vault_released: Money,
    /// Bookings moved to completed
    pub bookings: Vec<CompletedBooking>,
    /// Completion time
    pub completed_at: DateTime<Utc>,
}

/// Events published by the settlement engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// Trip moved to in-progress and the advance was issued
    TripStarted {
        /// Trip
        trip_id: TripId,
        /// Advance amount
        advance: Money,
        /// Advance queued behind an unavailable gateway
        pending_confirmation: bool,
    },
    /// Vault released and bookings completed
    TripCompleted(TripCompletedEvent),
    /// Refund recorded
    RefundIssued {
        /// Trip
        trip_id: TripId,
        /// Amount refunded
        amount: Money,
        /// Passenger targeted, `None` for the whole trip
        passenger_id: Option<PassengerId>,
    },
    /// Gateway refused a driver payout
    PayoutFailed {
        /// Trip
        trip_id: TripId,
        /// Driver
        driver_id: DriverId,
        /// Amount not paid
        amount: Money,
        /// Gateway reason
        reason: String,
    },
}

/// Broadcast channel for [`SettlementEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SettlementEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; returns the number of subscribers reached
    pub fn publish(&self, event: SettlementEvent) -> usize {
        // No subscribers is not an error
        self.tx.send(event).map_or_else(
            |_| {
                trace!("Settlement event dropped, no subscribers");
                0
            },
            |n| n,
        )
    }
}
