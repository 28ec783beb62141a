//! Persistence interface for settlement documents
//!
//! The engine reads and writes through [`SettlementStore`] only; nothing
//! depends on a particular storage engine. Writes that guard money movement
//! (trip status, vault release, capture claims, refund reservations) are
//! compare-and-set so that concurrent callers cannot both win.

mod documents;
mod memory;

pub use documents::{
    Authorization, AuthorizationStatus, Booking, BookingId, BookingStatus, DriverEarnings,
    DriverId, EarningsDelta, LoyaltyTier, PassengerId, PaymentStatus, PickupStatus, Trip, TripId,
    TripStatus,
};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::failsafe::{Transient, is_transient_error};
use crate::payment::{Money, Transaction, VaultStatus};

/// Persistence errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Document does not exist
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Document kind
        entity: &'static str,
        /// Document id
        id: String,
    },

    /// Write conflicts with existing state (e.g. duplicate id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage engine failure
    #[error("Store error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Backend {
        /// Engine error code, if any
        code: Option<i64>,
        /// Engine error message
        message: String,
    },
}

impl StoreError {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Backend { .. } => "STORE_ERROR",
        }
    }

    pub(crate) fn trip_not_found(id: &TripId) -> Self {
        Self::NotFound {
            entity: "trip",
            id: id.to_string(),
        }
    }

    pub(crate) fn booking_not_found(id: &BookingId) -> Self {
        Self::NotFound {
            entity: "booking",
            id: id.to_string(),
        }
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Backend { code, message } => is_transient_error(*code, message),
            Self::NotFound { .. } | Self::Conflict(_) => false,
        }
    }
}

/// Result of a compare-and-set write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// Written; holds the previous value
    Applied(T),
    /// Not written; holds the value actually found
    Rejected(T),
}

impl<T> CasOutcome<T> {
    /// Whether the write happened
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Document-shaped store for trips, bookings, earnings and wallets
#[async_trait]
pub trait SettlementStore: Send + Sync {
    // ── Trips ──

    /// Insert a new trip
    async fn insert_trip(&self, trip: Trip) -> Result<(), StoreError>;

    /// Find a trip by id
    async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, StoreError>;

    /// Move a trip to `to` only if its status is one of `from`
    async fn transition_trip_status(
        &self,
        id: &TripId,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<CasOutcome<TripStatus>, StoreError>;

    /// Flip the vault from locked to released, at most once
    async fn release_vault(&self, id: &TripId) -> Result<CasOutcome<VaultStatus>, StoreError>;

    /// Append to the trip's transaction log
    async fn append_transaction(&self, id: &TripId, tx: Transaction) -> Result<(), StoreError>;

    /// Append a refund only while the trip's refunded total, `tx` included,
    /// stays within `limit`
    ///
    /// `Applied` holds what is still refundable after the append; `Rejected`
    /// holds what was refundable when the append was refused.
    async fn reserve_refund(
        &self,
        id: &TripId,
        tx: Transaction,
        limit: Money,
    ) -> Result<CasOutcome<Money>, StoreError>;

    /// Transaction log in creation order
    async fn transactions(&self, id: &TripId) -> Result<Vec<Transaction>, StoreError>;

    // ── Bookings ──

    /// Insert a new booking
    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    /// Find a booking by id
    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError>;

    /// All bookings on a trip, oldest first
    async fn bookings_for_trip(&self, trip_id: &TripId) -> Result<Vec<Booking>, StoreError>;

    /// Mark a booking picked up; `false` if it already was
    async fn mark_picked_up(&self, id: &BookingId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Set booking status
    async fn set_booking_status(&self, id: &BookingId, status: BookingStatus)
    -> Result<(), StoreError>;

    /// Set passenger payment status
    async fn set_payment_status(&self, id: &BookingId, status: PaymentStatus)
    -> Result<(), StoreError>;

    /// Record a new hold on a booking
    async fn set_authorization(
        &self,
        id: &BookingId,
        authorization: Authorization,
    ) -> Result<(), StoreError>;

    /// Move a booking's hold from `Authorized` to `CapturePending`, at most once
    async fn claim_capture(
        &self,
        id: &BookingId,
    ) -> Result<CasOutcome<AuthorizationStatus>, StoreError>;

    /// Update the capture progress of a booking's hold
    async fn set_authorization_status(
        &self,
        id: &BookingId,
        status: AuthorizationStatus,
        gateway_transaction_id: Option<String>,
    ) -> Result<(), StoreError>;

    // ── Earnings and wallets ──

    /// Apply a delta to a driver's earnings, returning the new counters
    async fn apply_earnings(
        &self,
        driver_id: &DriverId,
        delta: EarningsDelta,
    ) -> Result<DriverEarnings, StoreError>;

    /// Current earnings counters
    async fn driver_earnings(&self, driver_id: &DriverId) -> Result<DriverEarnings, StoreError>;

    /// Credit a wallet once per `reference`; `false` if already credited
    async fn credit_wallet(
        &self,
        passenger_id: &PassengerId,
        amount: Money,
        reference: &str,
    ) -> Result<bool, StoreError>;

    /// Current wallet balance
    async fn wallet_balance(&self, passenger_id: &PassengerId) -> Result<Money, StoreError>;
}
