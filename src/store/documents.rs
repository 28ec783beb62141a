//! Persisted document shapes: trips with their embedded payment breakdown and
//! transaction log, passenger bookings, driver earnings, wallets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payment::{Money, PaymentBreakdown, Transaction};

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

document_id!(
    /// Trip identifier
    TripId
);
document_id!(
    /// Booking identifier
    BookingId
);
document_id!(
    /// Passenger identifier
    PassengerId
);
document_id!(
    /// Driver identifier
    DriverId
);

// ── Trips ─────────────────────────────────────────────────────────────────────

/// Trip lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Posted, no driver confirmed yet
    Scheduled,
    /// Driver confirmed
    DriverAssigned,
    /// Trip started, advance paid
    InProgress,
    /// Trip finished, vault released
    Completed,
    /// Trip cancelled
    Cancelled,
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::DriverAssigned => "driver_assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Trip document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    /// Trip id
    pub id: TripId,
    /// Driver running the trip
    pub driver_id: DriverId,
    /// Gateway beneficiary that receives driver payouts
    pub beneficiary_id: String,
    /// Lifecycle status
    pub status: TripStatus,
    /// Payment breakdown fixed at creation
    pub breakdown: PaymentBreakdown,
    /// Append-only transaction log, creation order
    pub transactions: Vec<Transaction>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ── Bookings ──────────────────────────────────────────────────────────────────

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Requested, not yet accepted
    Pending,
    /// Accepted by the driver
    Confirmed,
    /// Trip completed for this passenger
    Completed,
    /// Cancelled
    Cancelled,
}

/// Passenger payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing authorized yet
    Pending,
    /// Funds held
    Authorized,
    /// Funds captured
    Paid,
    /// Refunded (fully or partially)
    Refunded,
    /// Capture failed
    Failed,
}

/// Pickup verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    /// Not yet verified
    Pending,
    /// Verified by pickup code; never reverts
    PickedUp,
}

/// Held-funds authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Held, not yet captured
    Authorized,
    /// Capture queued behind an unavailable gateway
    CapturePending,
    /// Captured
    Captured,
    /// Capture failed permanently, needs manual follow-up
    Failed,
}

/// Gateway order holding a passenger's funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Gateway order id
    pub gateway_order_id: String,
    /// Amount held
    pub amount: Money,
    /// Capture progress
    pub status: AuthorizationStatus,
    /// Gateway reference of the capture, once captured
    pub gateway_transaction_id: Option<String>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Loyalty tier driving cashback rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    /// Entry tier
    #[default]
    Bronze,
    /// Second tier
    Silver,
    /// Third tier
    Gold,
    /// Top tier
    Platinum,
}

/// Passenger booking on a shared trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id
    pub id: BookingId,
    /// Trip booked
    pub trip_id: TripId,
    /// Passenger
    pub passenger_id: PassengerId,
    /// Seats booked
    pub seats: u32,
    /// Amount the passenger pays, fees included
    pub amount: Money,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Pickup verification status
    pub pickup_status: PickupStatus,
    /// When the pickup was verified
    pub picked_up_at: Option<DateTime<Utc>>,
    /// 4-digit pickup code
    #[serde(skip_serializing)]
    pub pickup_code: String,
    /// Held funds, if authorized
    pub authorization: Option<Authorization>,
    /// Passenger loyalty tier at booking time
    pub loyalty_tier: LoyaltyTier,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// New confirmed booking with a fresh pickup code and no authorization
    #[must_use]
    pub fn confirmed(
        id: impl Into<BookingId>,
        trip_id: impl Into<TripId>,
        passenger_id: impl Into<PassengerId>,
        seats: u32,
        amount: Money,
    ) -> Self {
        Self {
            id: id.into(),
            trip_id: trip_id.into(),
            passenger_id: passenger_id.into(),
            seats,
            amount,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            pickup_status: PickupStatus::Pending,
            picked_up_at: None,
            pickup_code: crate::capture::generate_pickup_code(),
            authorization: None,
            loyalty_tier: LoyaltyTier::default(),
            created_at: Utc::now(),
        }
    }

    /// Attach an authorized hold
    #[must_use]
    pub fn with_authorization(mut self, gateway_order_id: impl Into<String>) -> Self {
        self.authorization = Some(Authorization {
            gateway_order_id: gateway_order_id.into(),
            amount: self.amount,
            status: AuthorizationStatus::Authorized,
            gateway_transaction_id: None,
            updated_at: Utc::now(),
        });
        self.payment_status = PaymentStatus::Authorized;
        self
    }

    /// Set the loyalty tier
    #[must_use]
    pub fn with_tier(mut self, tier: LoyaltyTier) -> Self {
        self.loyalty_tier = tier;
        self
    }

    /// Replace the generated pickup code
    #[must_use]
    pub fn with_pickup_code(mut self, code: impl Into<String>) -> Self {
        self.pickup_code = code.into();
        self
    }

    /// Whether pickup has been verified
    #[must_use]
    pub fn is_picked_up(&self) -> bool {
        self.pickup_status == PickupStatus::PickedUp
    }
}

// ── Earnings ──────────────────────────────────────────────────────────────────

/// Driver earnings counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEarnings {
    /// Earnings settled in full (advance + released vault)
    pub total: Money,
    /// Advances paid on trips still in progress
    pub pending: Money,
    /// Amounts held in escrow on trips still in progress
    pub vault: Money,
}

/// Signed change applied to [`DriverEarnings`] in one write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EarningsDelta {
    /// Change to `total`
    pub total: Money,
    /// Change to `pending`
    pub pending: Money,
    /// Change to `vault`
    pub vault: Money,
}

impl DriverEarnings {
    /// Apply a delta in place
    pub fn apply(&mut self, delta: EarningsDelta) {
        self.total += delta.total;
        self.pending += delta.pending;
        self.vault += delta.vault;
    }
}
