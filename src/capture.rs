//! OTP-gated capture
//!
//! Each passenger gets a 4-digit pickup code. The driver enters it at pickup,
//! which marks the booking picked up (never reverted). Funds for a trip are
//! captured only once every confirmed booking is picked up; captures then run
//! independently and the gate reports per-booking results instead of failing
//! as a whole.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::failsafe::{RetryPolicy, with_retry};
use crate::payment::{Money, SettlementEngine};
use crate::store::{
    AuthorizationStatus, Booking, BookingId, BookingStatus, PassengerId, SettlementStore,
    StoreError, TripId,
};

/// Capture gate errors
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Unknown booking
    #[error("Booking '{booking_id}' not found")]
    BookingNotFound {
        /// Booking
        booking_id: BookingId,
    },

    /// Wrong pickup code
    #[error("Invalid pickup code for booking '{booking_id}'")]
    InvalidOtp {
        /// Booking
        booking_id: BookingId,
    },

    /// Pickup verification needs a confirmed booking
    #[error("Booking '{booking_id}' is {status:?}, expected Confirmed")]
    BookingNotConfirmed {
        /// Booking
        booking_id: BookingId,
        /// Status found
        status: BookingStatus,
    },

    /// Capture barrier not met
    #[error("Only {verified} of {total} passengers verified on trip '{trip_id}'")]
    NotAllPassengersVerified {
        /// Trip
        trip_id: TripId,
        /// Picked-up bookings
        verified: usize,
        /// Confirmed bookings
        total: usize,
    },

    /// Nothing to capture
    #[error("Trip '{trip_id}' has no confirmed bookings")]
    NoConfirmedBookings {
        /// Trip
        trip_id: TripId,
    },

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CaptureError {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BookingNotFound { .. } => "BOOKING_NOT_FOUND",
            Self::InvalidOtp { .. } => "INVALID_OTP",
            Self::BookingNotConfirmed { .. } => "BOOKING_NOT_CONFIRMED",
            Self::NotAllPassengersVerified { .. } => "NOT_ALL_PASSENGERS_VERIFIED",
            Self::NoConfirmedBookings { .. } => "NO_CONFIRMED_BOOKINGS",
            Self::Store(e) => e.code(),
        }
    }
}

/// Fresh 4-digit pickup code, zero-padded
#[must_use]
pub fn generate_pickup_code() -> String {
    format!("{:04}", rand::rng().random_range(0..10_000u16))
}

/// Result of [`CaptureGate::verify_pickup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickupVerification {
    /// Booking
    pub booking_id: BookingId,
    /// When pickup was verified
    pub picked_up_at: DateTime<Utc>,
    /// Pickup had already been verified; nothing changed
    pub already_verified: bool,
}

/// How one booking's capture ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CaptureResult {
    /// Funds captured
    Captured {
        /// Gateway reference
        reference: String,
    },
    /// Capture queued behind an unavailable gateway
    Queued {
        /// Queue item id
        item_id: Uuid,
    },
    /// Capture failed; needs manual follow-up
    Failed {
        /// Error code
        code: String,
        /// What went wrong
        reason: String,
    },
    /// Another capture already claimed the hold; nothing was sent
    Skipped {
        /// Hold status found
        status: AuthorizationStatus,
    },
}

/// Per-booking capture entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureItem {
    /// Booking
    pub booking_id: BookingId,
    /// Passenger
    pub passenger_id: PassengerId,
    /// Amount captured or attempted
    pub amount: Money,
    /// Outcome
    #[serde(flatten)]
    pub result: CaptureResult,
}

/// Result of [`CaptureGate::capture_payments`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    /// Trip
    pub trip_id: TripId,
    /// Picked-up bookings
    pub verified_passengers: usize,
    /// Confirmed bookings
    pub total_passengers: usize,
    /// Captures completed
    pub captured_count: usize,
    /// Captures failed
    pub failed_count: usize,
    /// Captures queued
    pub queued_count: usize,
    /// Holds claimed by a concurrent capture
    pub skipped_count: usize,
    /// Per-booking detail
    pub items: Vec<CaptureItem>,
}

/// Pickup verification and the all-passengers capture barrier
#[derive(Debug, Clone)]
pub struct CaptureGate {
    engine: Arc<SettlementEngine>,
    retry: RetryPolicy,
}

impl CaptureGate {
    /// Create a gate that captures through `engine`
    #[must_use]
    pub fn new(engine: Arc<SettlementEngine>, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    fn store(&self) -> &dyn SettlementStore {
        self.engine.store().as_ref()
    }

    /// Verify a passenger's pickup code
    ///
    /// Verifying an already picked-up booking succeeds without changes.
    ///
    /// # Errors
    ///
    /// [`CaptureError::BookingNotFound`], [`CaptureError::BookingNotConfirmed`],
    /// [`CaptureError::InvalidOtp`], or [`CaptureError::Store`].
    #[tracing::instrument(skip(self, code), fields(booking_id = %booking_id))]
    pub async fn verify_pickup(
        &self,
        booking_id: &BookingId,
        code: &str,
    ) -> Result<PickupVerification, CaptureError> {
        let booking = with_retry(&self.retry, "find_booking", || {
            self.store().find_booking(booking_id)
        })
        .await?
        .ok_or_else(|| CaptureError::BookingNotFound {
            booking_id: booking_id.clone(),
        })?;

        if let (true, Some(at)) = (booking.is_picked_up(), booking.picked_up_at) {
            return Ok(PickupVerification {
                booking_id: booking.id,
                picked_up_at: at,
                already_verified: true,
            });
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(CaptureError::BookingNotConfirmed {
                booking_id: booking.id,
                status: booking.status,
            });
        }
        if !bool::from(code.trim().as_bytes().ct_eq(booking.pickup_code.as_bytes())) {
            warn!("Pickup code mismatch");
            return Err(CaptureError::InvalidOtp {
                booking_id: booking.id,
            });
        }

        let now = Utc::now();
        let changed = with_retry(&self.retry, "mark_picked_up", || {
            self.store().mark_picked_up(booking_id, now)
        })
        .await?;
        info!(already_verified = !changed, "Pickup verified");

        Ok(PickupVerification {
            booking_id: booking.id,
            picked_up_at: now,
            already_verified: !changed,
        })
    }

    /// Capture held funds for every authorized booking on a trip, once every
    /// confirmed booking is picked up
    ///
    /// Individual capture failures land in the report; they never fail the
    /// call.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoConfirmedBookings`],
    /// [`CaptureError::NotAllPassengersVerified`], or [`CaptureError::Store`]
    /// if bookings can't be read.
    #[tracing::instrument(skip(self), fields(trip_id = %trip_id))]
    pub async fn capture_payments(&self, trip_id: &TripId) -> Result<CaptureReport, CaptureError> {
        let bookings: Vec<Booking> = with_retry(&self.retry, "bookings_for_trip", || {
            self.store().bookings_for_trip(trip_id)
        })
        .await?
        .into_iter()
        .filter(|b| matches!(b.status, BookingStatus::Confirmed | BookingStatus::Completed))
        .collect();

        let total = bookings.len();
        if total == 0 {
            return Err(CaptureError::NoConfirmedBookings {
                trip_id: trip_id.clone(),
            });
        }
        let verified = bookings.iter().filter(|b| b.is_picked_up()).count();
        if verified < total {
            return Err(CaptureError::NotAllPassengersVerified {
                trip_id: trip_id.clone(),
                verified,
                total,
            });
        }

        let captures = bookings.iter().filter_map(|booking| {
            let auth = booking
                .authorization
                .as_ref()
                .filter(|a| a.status == AuthorizationStatus::Authorized)?;
            Some(async move {
                let result = match self.engine.capture_booking(booking, auth).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(booking_id = %booking.id, error = %e, "Capture bookkeeping failed");
                        CaptureResult::Failed {
                            code: e.code().to_string(),
                            reason: e.to_string(),
                        }
                    }
                };
                CaptureItem {
                    booking_id: booking.id.clone(),
                    passenger_id: booking.passenger_id.clone(),
                    amount: auth.amount,
                    result,
                }
            })
        });
        let items = join_all(captures).await;

        let count = |pred: fn(&CaptureResult) -> bool| items.iter().filter(|i| pred(&i.result)).count();
        let report = CaptureReport {
            trip_id: trip_id.clone(),
            verified_passengers: verified,
            total_passengers: total,
            captured_count: count(|r| matches!(r, CaptureResult::Captured { .. })),
            failed_count: count(|r| matches!(r, CaptureResult::Failed { .. })),
            queued_count: count(|r| matches!(r, CaptureResult::Queued { .. })),
            skipped_count: count(|r| matches!(r, CaptureResult::Skipped { .. })),
            items,
        };
        info!(
            captured = report.captured_count,
            failed = report.failed_count,
            queued = report.queued_count,
            skipped = report.skipped_count,
            "Capture finished"
        );
        Ok(report)
    }
}
