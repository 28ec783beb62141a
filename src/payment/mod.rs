//! Payment state machine
//!
//! Money for a trip moves `collected → advance_paid → vault_released`, with
//! refunds as an overlay reachable from any state. Every step appends an
//! immutable [`Transaction`]; corrections are new transactions.

mod breakdown;
mod cashback;
mod engine;
mod gateway;
mod money;
mod transaction;

pub use breakdown::{
    FeeSchedule, PaymentBreakdown, VaultStatus, calculate_payment_breakdown, parse_fare,
};
pub use cashback::{CashbackPolicy, CashbackReport, apply_cashback, spawn_cashback_listener};
pub use engine::{
    AuthorizationOutcome, NewTrip, ReconcileReport, RefundOutcome, RefundRequest,
    SettlementEngine, TripCompleteOutcome, TripStartOutcome,
};
pub use gateway::{
    GatewayError, GatewayOutcome, GatewayReceipt, GuardedGateway, OrderRequest, PaymentCall,
    PaymentGateway,
};
pub use money::{MINOR_PER_MAJOR, Money, MoneyError};
pub use transaction::{
    Transaction, TransactionKind, TransactionStatus, refunded_total, unsettled_pending,
};

use thiserror::Error;

use crate::store::{BookingId, PassengerId, StoreError, TripId, TripStatus};

/// Payment state machine errors
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// Fare below zero
    #[error("Fare must not be negative, got {fare}")]
    NegativeFare {
        /// Fare given
        fare: Money,
    },

    /// Fare not a usable amount
    #[error("Invalid fare: {reason}")]
    InvalidFare {
        /// What was wrong
        reason: String,
    },

    /// Refund of zero or less
    #[error("Refund amount must be positive, got {amount}")]
    InvalidRefundAmount {
        /// Amount given
        amount: Money,
    },

    /// Unknown trip
    #[error("Trip '{trip_id}' not found")]
    TripNotFound {
        /// Trip
        trip_id: TripId,
    },

    /// Trip not in a state that allows the operation
    #[error("Trip '{trip_id}' is {actual}, expected {expected}")]
    InvalidTripStatus {
        /// Trip
        trip_id: TripId,
        /// Status found
        actual: TripStatus,
        /// Status(es) required
        expected: &'static str,
    },

    /// Completion already paid out the vault
    #[error("Vault for trip '{trip_id}' has already been released")]
    VaultAlreadyReleased {
        /// Trip
        trip_id: TripId,
    },

    /// Refund larger than what was collected
    #[error("Refund of {amount} exceeds total collected {total}")]
    RefundExceedsTotal {
        /// Requested
        amount: Money,
        /// Collected
        total: Money,
    },

    /// Refund larger than the refundable remainder
    #[error("Refund of {amount} exceeds refundable maximum {maximum}")]
    RefundExceedsMaximum {
        /// Requested
        amount: Money,
        /// Still refundable after fees and earlier refunds
        maximum: Money,
    },

    /// Unknown booking
    #[error("Booking '{booking_id}' not found")]
    BookingNotFound {
        /// Booking
        booking_id: BookingId,
    },

    /// Refund targeted a passenger with no booking on the trip
    #[error("Passenger '{passenger_id}' has no booking on trip '{trip_id}'")]
    PassengerNotOnTrip {
        /// Trip
        trip_id: TripId,
        /// Passenger
        passenger_id: PassengerId,
    },

    /// Gateway refused the operation
    #[error(transparent)]
    Gateway(GatewayError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NegativeFare { .. } => "NEGATIVE_FARE_NOT_ALLOWED",
            Self::InvalidFare { .. } => "INVALID_FARE",
            Self::InvalidRefundAmount { .. } => "INVALID_REFUND_AMOUNT",
            Self::TripNotFound { .. } => "TRIP_NOT_FOUND",
            Self::InvalidTripStatus { .. } => "INVALID_TRIP_STATUS",
            Self::VaultAlreadyReleased { .. } => "VAULT_ALREADY_RELEASED",
            Self::RefundExceedsTotal { .. } => "REFUND_EXCEEDS_TOTAL",
            Self::RefundExceedsMaximum { .. } => "REFUND_EXCEEDS_MAXIMUM",
            Self::BookingNotFound { .. } | Self::PassengerNotOnTrip { .. } => "BOOKING_NOT_FOUND",
            Self::Gateway(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }
}
