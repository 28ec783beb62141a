//! Settlement engine: the per-trip payment state machine
//!
//! ```text
//! open_trip ─> collected ─[on_trip_start]─> advance_paid ─[on_trip_complete]─> vault_released
//!                    └──────────────[on_refund, any state]──────────────┘
//! ```
//!
//! Guard writes (trip status, vault release, capture claim, refund
//! reservation) are compare-and-set and happen before any money moves, so a
//! concurrent or repeated call fails with a state-conflict error instead of
//! paying twice. Each individual persistence write is retried on transient
//! failures; multi-step transitions as a whole never are.

mod reconcile;

pub use reconcile::ReconcileReport;

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transaction::refunded_total;
use super::{
    FeeSchedule, GatewayOutcome, GuardedGateway, Money, OrderRequest, PaymentCall, PaymentError,
    Transaction, TransactionKind, TransactionStatus, calculate_payment_breakdown,
};
use crate::capture::CaptureResult;
use crate::config::Config;
use crate::events::{CompletedBooking, EventBus, SettlementEvent, TripCompletedEvent};
use crate::failsafe::{RetryPolicy, with_retry};
use crate::notify::{AdminNotifier, PayoutFailure};
use crate::store::{
    Authorization, AuthorizationStatus, Booking, BookingId, BookingStatus, CasOutcome,
    DriverEarnings, DriverId, EarningsDelta, PassengerId, PaymentStatus, SettlementStore,
    StoreError, Trip, TripId, TripStatus,
};

/// Parameters for [`SettlementEngine::open_trip`]
#[derive(Debug, Clone)]
pub struct NewTrip {
    /// Trip id
    pub id: TripId,
    /// Driver
    pub driver_id: DriverId,
    /// Gateway beneficiary for driver payouts
    pub beneficiary_id: String,
    /// Fare per seat before fees
    pub fare_per_seat: Money,
    /// Seats sold
    pub seats: u32,
}

/// Result of [`SettlementEngine::on_trip_start`]
#[derive(Debug, Clone, Serialize)]
pub struct TripStartOutcome {
    /// Trip
    pub trip_id: TripId,
    /// Advance owed to the driver
    pub advance: Money,
    /// Advance transaction, absent when there was nothing to pay
    pub transaction: Option<Transaction>,
    /// Advance queued behind an unavailable gateway
    pub pending_confirmation: bool,
}

/// Result of [`SettlementEngine::on_trip_complete`]
#[derive(Debug, Clone, Serialize)]
pub struct TripCompleteOutcome {
    /// Trip
    pub trip_id: TripId,
    /// Vault amount released
    pub vault_released: Money,
    /// Payout transaction, absent when there was nothing to pay
    pub transaction: Option<Transaction>,
    /// Payout queued behind an unavailable gateway
    pub pending_confirmation: bool,
    /// Bookings moved to completed
    pub bookings_completed: Vec<BookingId>,
}

/// Parameters for [`SettlementEngine::on_refund`]
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Trip
    pub trip_id: TripId,
    /// Amount to refund
    pub amount: Money,
    /// Reason passed to the gateway
    pub reason: String,
    /// Passenger to refund; every booking on the trip when `None`
    pub passenger_id: Option<PassengerId>,
}

/// Result of [`SettlementEngine::on_refund`]
#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    /// Refund transaction
    pub transaction: Transaction,
    /// Bookings marked refunded
    pub refunded_bookings: Vec<BookingId>,
    /// Refund queued behind an unavailable gateway
    pub pending_confirmation: bool,
    /// What can still be refunded on the trip
    pub remaining_refundable: Money,
}

/// Result of [`SettlementEngine::authorize_booking`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    /// Funds held
    Authorized(Authorization),
    /// Booking was already authorized; nothing was sent
    AlreadyAuthorized(Authorization),
    /// Order creation queued behind an unavailable gateway
    Queued {
        /// Queue item id
        item_id: Uuid,
    },
}

/// The payment state machine
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    gateway: GuardedGateway,
    fees: FeeSchedule,
    retry: RetryPolicy,
    admin: Arc<dyn AdminNotifier>,
    events: EventBus,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("gateway", &self.gateway)
            .field("fees", &self.fees)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: GuardedGateway,
        fees: FeeSchedule,
        retry: RetryPolicy,
        admin: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            fees,
            retry,
            admin,
            events: EventBus::default(),
        }
    }

    /// Create an engine with fees and retry policy from `config`
    #[must_use]
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SettlementStore>,
        gateway: GuardedGateway,
        admin: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self::new(
            store,
            gateway,
            FeeSchedule::from_config(&config.payments),
            RetryPolicy::new(&config.failsafe.retry),
            admin,
        )
    }

    /// Settlement events
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Store backing the engine
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    /// Guarded gateway used for every money movement
    #[must_use]
    pub fn gateway(&self) -> &GuardedGateway {
        &self.gateway
    }

    // ── Trip creation and collection ──────────────────────────────────────────

    /// Create a trip with its payment breakdown fixed from fare and seats
    ///
    /// # Errors
    ///
    /// [`PaymentError::NegativeFare`] / [`PaymentError::InvalidFare`] for
    /// unusable fares, [`PaymentError::Store`] if the insert fails.
    #[tracing::instrument(skip(self, trip), fields(trip_id = %trip.id))]
    pub async fn open_trip(&self, trip: NewTrip) -> Result<Trip, PaymentError> {
        let breakdown = calculate_payment_breakdown(trip.fare_per_seat, trip.seats, &self.fees)?;
        let doc = Trip {
            id: trip.id,
            driver_id: trip.driver_id,
            beneficiary_id: trip.beneficiary_id,
            status: TripStatus::Scheduled,
            breakdown,
            transactions: Vec::new(),
            created_at: Utc::now(),
        };
        self.store_call("insert_trip", || self.store.insert_trip(doc.clone()))
            .await?;
        info!(total = %doc.breakdown.total_collected, "Trip opened");
        Ok(doc)
    }

    /// Record money received from the gateway for a trip
    ///
    /// # Errors
    ///
    /// [`PaymentError::TripNotFound`], or [`PaymentError::Store`].
    #[tracing::instrument(skip(self), fields(trip_id = %trip_id))]
    pub async fn on_payment_collected(
        &self,
        trip_id: &TripId,
        gateway_payment_id: &str,
        amount: Money,
    ) -> Result<Transaction, PaymentError> {
        self.load_trip(trip_id).await?;
        let tx = Transaction::new(TransactionKind::Collection, amount, self.gateway.label())
            .with_reference(gateway_payment_id);
        self.append(trip_id, &tx).await?;
        info!(%amount, gateway_payment_id, "Payment collected");
        Ok(tx)
    }

    /// Hold a passenger's funds by creating a gateway order for the booking
    ///
    /// # Errors
    ///
    /// [`PaymentError::BookingNotFound`], [`PaymentError::Gateway`] when the
    /// gateway refuses, or [`PaymentError::Store`].
    #[tracing::instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn authorize_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<AuthorizationOutcome, PaymentError> {
        let booking = self.load_booking(booking_id).await?;
        if let Some(existing) = booking.authorization {
            return Ok(AuthorizationOutcome::AlreadyAuthorized(existing));
        }

        let order = OrderRequest {
            order_id: order_id(booking_id),
            amount: booking.amount,
            customer_id: booking.passenger_id.to_string(),
        };
        let call = PaymentCall::CreateOrder(order.clone());
        match self.gateway.call(call, Some(booking.trip_id.as_str())).await {
            GatewayOutcome::Completed(_) => {
                let authorization = self.record_authorization(booking_id, &order).await?;
                Ok(AuthorizationOutcome::Authorized(authorization))
            }
            GatewayOutcome::Queued { receipt, .. } => Ok(AuthorizationOutcome::Queued {
                item_id: receipt.id,
            }),
            GatewayOutcome::Failed(e) => Err(PaymentError::Gateway(e)),
        }
    }

    /// Store a fresh hold for `order` and mark the booking authorized
    async fn record_authorization(
        &self,
        booking_id: &BookingId,
        order: &OrderRequest,
    ) -> Result<Authorization, PaymentError> {
        let authorization = Authorization {
            gateway_order_id: order.order_id.clone(),
            amount: order.amount,
            status: AuthorizationStatus::Authorized,
            gateway_transaction_id: None,
            updated_at: Utc::now(),
        };
        self.store_call("set_authorization", || {
            self.store
                .set_authorization(booking_id, authorization.clone())
        })
        .await?;
        self.store_call("set_payment_status", || {
            self.store
                .set_payment_status(booking_id, PaymentStatus::Authorized)
        })
        .await?;
        info!(%booking_id, amount = %order.amount, "Booking authorized");
        Ok(authorization)
    }

    // ── Trip start ────────────────────────────────────────────────────────────

    /// Start a trip: move it to in-progress and pay the driver's advance
    ///
    /// The trip moves to in-progress even when the gateway is down (the
    /// advance is queued) or refuses the payout (operators are alerted).
    ///
    /// # Errors
    ///
    /// [`PaymentError::TripNotFound`], [`PaymentError::InvalidTripStatus`]
    /// unless the trip is scheduled or driver-assigned, or
    /// [`PaymentError::Store`].
    #[tracing::instrument(skip(self), fields(trip_id = %trip_id))]
    pub async fn on_trip_start(&self, trip_id: &TripId) -> Result<TripStartOutcome, PaymentError> {
        let trip = self.load_trip(trip_id).await?;

        let from = [TripStatus::Scheduled, TripStatus::DriverAssigned];
        let cas = self
            .store_call("transition_trip_status", || {
                self.store
                    .transition_trip_status(trip_id, &from, TripStatus::InProgress)
            })
            .await?;
        if let CasOutcome::Rejected(actual) = cas {
            return Err(PaymentError::InvalidTripStatus {
                trip_id: trip_id.clone(),
                actual,
                expected: "scheduled or driver_assigned",
            });
        }

        let advance = trip.breakdown.driver_advance;
        let (transaction, pending_confirmation) = self
            .pay_driver(&trip, TransactionKind::Advance, advance, format!("advance_{trip_id}"))
            .await?;

        let delta = EarningsDelta {
            pending: advance,
            vault: trip.breakdown.vault_amount,
            ..EarningsDelta::default()
        };
        self.store_call("apply_earnings", || {
            self.store.apply_earnings(&trip.driver_id, delta)
        })
        .await?;

        self.events.publish(SettlementEvent::TripStarted {
            trip_id: trip_id.clone(),
            advance,
            pending_confirmation,
        });
        info!(%advance, pending_confirmation, "Trip started");

        Ok(TripStartOutcome {
            trip_id: trip_id.clone(),
            advance,
            transaction,
            pending_confirmation,
        })
    }

    // ── Trip completion ───────────────────────────────────────────────────────

    /// Complete a trip: release the vault to the driver, settle earnings and
    /// complete every confirmed booking
    ///
    /// # Errors
    ///
    /// [`PaymentError::VaultAlreadyReleased`] when called again,
    /// [`PaymentError::InvalidTripStatus`] unless the trip is in progress,
    /// [`PaymentError::TripNotFound`], or [`PaymentError::Store`].
    #[tracing::instrument(skip(self), fields(trip_id = %trip_id))]
    pub async fn on_trip_complete(
        &self,
        trip_id: &TripId,
    ) -> Result<TripCompleteOutcome, PaymentError> {
        let trip = self.load_trip(trip_id).await?;
        let already_released = || PaymentError::VaultAlreadyReleased {
            trip_id: trip_id.clone(),
        };

        if trip.breakdown.vault_status == super::VaultStatus::Released {
            return Err(already_released());
        }
        if trip.status != TripStatus::InProgress {
            return Err(PaymentError::InvalidTripStatus {
                trip_id: trip_id.clone(),
                actual: trip.status,
                expected: "in_progress",
            });
        }
        let cas = self
            .store_call("release_vault", || self.store.release_vault(trip_id))
            .await?;
        if !cas.is_applied() {
            return Err(already_released());
        }

        let breakdown = &trip.breakdown;
        let vault = breakdown.vault_amount;
        let (transaction, pending_confirmation) = self
            .pay_driver(&trip, TransactionKind::Payout, vault, format!("vault_{trip_id}"))
            .await?;

        let delta = EarningsDelta {
            total: breakdown.driver_advance + vault,
            pending: Money::ZERO - breakdown.driver_advance,
            vault: Money::ZERO - vault,
        };
        self.store_call("apply_earnings", || {
            self.store.apply_earnings(&trip.driver_id, delta)
        })
        .await?;

        let cas = self
            .store_call("transition_trip_status", || {
                self.store.transition_trip_status(
                    trip_id,
                    &[TripStatus::InProgress],
                    TripStatus::Completed,
                )
            })
            .await?;
        if let CasOutcome::Rejected(actual) = cas {
            warn!(status = %actual, "Trip changed status during completion");
        }

        let mut completed = Vec::new();
        for booking in self.bookings(trip_id).await? {
            if booking.status != BookingStatus::Confirmed {
                continue;
            }
            self.store_call("set_booking_status", || {
                self.store
                    .set_booking_status(&booking.id, BookingStatus::Completed)
            })
            .await?;
            completed.push(CompletedBooking {
                booking_id: booking.id,
                passenger_id: booking.passenger_id,
                amount_paid: booking.amount,
                loyalty_tier: booking.loyalty_tier,
            });
        }

        let bookings_completed = completed.iter().map(|b| b.booking_id.clone()).collect();
        self.events
            .publish(SettlementEvent::TripCompleted(TripCompletedEvent {
                trip_id: trip_id.clone(),
                driver_id: trip.driver_id.clone(),
                vault_released: vault,
                bookings: completed,
                completed_at: Utc::now(),
            }));
        info!(%vault, pending_confirmation, "Trip completed, vault released");

        Ok(TripCompleteOutcome {
            trip_id: trip_id.clone(),
            vault_released: vault,
            transaction,
            pending_confirmation,
            bookings_completed,
        })
    }

    // ── Refunds ───────────────────────────────────────────────────────────────

    /// Refund money on a trip
    ///
    /// Bounds: `0 < amount ≤ total_collected`, and `amount` must fit in what
    /// is left after platform fees and earlier refunds. The refund is reserved
    /// against that remainder before the gateway is called, so concurrent
    /// refunds cannot overshoot it. Rejections write nothing.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidRefundAmount`],
    /// [`PaymentError::RefundExceedsTotal`],
    /// [`PaymentError::RefundExceedsMaximum`],
    /// [`PaymentError::PassengerNotOnTrip`], [`PaymentError::Gateway`] when
    /// the gateway refuses (the reservation is settled as failed), or
    /// [`PaymentError::Store`].
    #[tracing::instrument(skip(self, request), fields(trip_id = %request.trip_id, amount = %request.amount))]
    pub async fn on_refund(&self, request: RefundRequest) -> Result<RefundOutcome, PaymentError> {
        let RefundRequest {
            trip_id,
            amount,
            reason,
            passenger_id,
        } = request;

        if !amount.is_positive() {
            return Err(PaymentError::InvalidRefundAmount { amount });
        }
        let trip = self.load_trip(&trip_id).await?;
        let total = trip.breakdown.total_collected;
        if amount > total {
            return Err(PaymentError::RefundExceedsTotal { amount, total });
        }
        let limit = trip.breakdown.max_refundable();
        let maximum = (limit - refunded_total(&trip.transactions)).max(Money::ZERO);
        if amount > maximum {
            return Err(PaymentError::RefundExceedsMaximum { amount, maximum });
        }

        let mut targets = self.bookings(&trip_id).await?;
        if let Some(passenger) = &passenger_id {
            targets.retain(|b| &b.passenger_id == passenger);
            if targets.is_empty() {
                return Err(PaymentError::PassengerNotOnTrip {
                    trip_id,
                    passenger_id: passenger.clone(),
                });
            }
        }

        let refund_id = format!("refund_{}", Uuid::new_v4().simple());
        let mut reservation = Transaction::new(TransactionKind::Refund, amount, self.gateway.label())
            .with_status(TransactionStatus::Pending)
            .with_request_key(refund_id.clone())
            .with_note(reason.clone());
        if let (Some(_), [booking]) = (&passenger_id, targets.as_slice()) {
            reservation = reservation.for_booking(booking.id.clone(), booking.passenger_id.clone());
        }
        let reserved = self
            .store_call("reserve_refund", || {
                self.store
                    .reserve_refund(&trip_id, reservation.clone(), limit)
            })
            .await?;
        let remaining_refundable = match reserved {
            CasOutcome::Applied(remaining) => remaining,
            CasOutcome::Rejected(maximum) => {
                return Err(PaymentError::RefundExceedsMaximum { amount, maximum });
            }
        };

        let call = PaymentCall::Refund {
            order_id: Self::refund_order(&trip, passenger_id.as_ref(), &targets),
            amount,
            refund_id,
            reason,
        };
        let outcome = self.gateway.call(call, Some(trip_id.as_str())).await;
        let pending_confirmation = outcome.pending_confirmation();
        let settle = || {
            Transaction::new(TransactionKind::Refund, amount, self.gateway.label())
                .settling(&reservation)
        };
        let transaction = match outcome {
            GatewayOutcome::Completed(receipt) => {
                let settled = settle().with_reference(receipt.reference);
                self.append(&trip_id, &settled).await?;
                settled
            }
            GatewayOutcome::Queued { .. } => reservation.clone(),
            GatewayOutcome::Failed(e) => {
                let failed = settle()
                    .with_status(TransactionStatus::Failed)
                    .with_note(e.to_string());
                self.append(&trip_id, &failed).await?;
                warn!(error = %e, "Refund rejected by gateway");
                return Err(PaymentError::Gateway(e));
            }
        };

        let mut refunded_bookings = Vec::with_capacity(targets.len());
        for booking in targets {
            self.store_call("set_payment_status", || {
                self.store
                    .set_payment_status(&booking.id, PaymentStatus::Refunded)
            })
            .await?;
            refunded_bookings.push(booking.id);
        }

        self.events.publish(SettlementEvent::RefundIssued {
            trip_id: trip_id.clone(),
            amount,
            passenger_id,
        });
        info!(pending_confirmation, bookings = refunded_bookings.len(), "Refund issued");

        Ok(RefundOutcome {
            transaction,
            refunded_bookings,
            pending_confirmation,
            remaining_refundable,
        })
    }

    /// Order to refund against: the targeted passenger's hold, else the
    /// trip's latest settled collection
    fn refund_order(trip: &Trip, passenger: Option<&PassengerId>, targets: &[Booking]) -> String {
        let held = passenger.and_then(|_| {
            targets
                .iter()
                .find_map(|b| b.authorization.as_ref())
                .map(|a| a.gateway_order_id.clone())
        });
        held.or_else(|| {
            trip.transactions
                .iter()
                .rev()
                .filter(|t| {
                    t.kind == TransactionKind::Collection
                        && t.status == TransactionStatus::Completed
                })
                .find_map(|t| t.gateway_transaction_id.clone())
        })
        .unwrap_or_else(|| format!("trip_{}", trip.id))
    }

    // ── Capture ───────────────────────────────────────────────────────────────

    /// Capture one booking's held funds and record the collection
    ///
    /// The hold is claimed (authorized to capture-pending) before the gateway
    /// is called; a booking whose claim is refused is reported as
    /// [`CaptureResult::Skipped`] and nothing is sent. A gateway refusal is
    /// not an error here: the hold is marked failed, a failed transaction is
    /// appended, and [`CaptureResult::Failed`] is returned for manual
    /// follow-up.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Store`] when bookkeeping fails after retries.
    #[tracing::instrument(skip(self, booking, authorization), fields(booking_id = %booking.id))]
    pub async fn capture_booking(
        &self,
        booking: &Booking,
        authorization: &Authorization,
    ) -> Result<CaptureResult, PaymentError> {
        let claim = self
            .store_call("claim_capture", || self.store.claim_capture(&booking.id))
            .await?;
        if let CasOutcome::Rejected(status) = claim {
            debug!(?status, "Hold already claimed, skipping capture");
            return Ok(CaptureResult::Skipped { status });
        }

        let order_id = authorization.gateway_order_id.clone();
        let call = PaymentCall::Capture {
            order_id: order_id.clone(),
            amount: authorization.amount,
        };
        let outcome = self.gateway.call(call, Some(booking.trip_id.as_str())).await;

        let tx = Transaction::new(
            TransactionKind::Collection,
            authorization.amount,
            self.gateway.label(),
        )
        .for_booking(booking.id.clone(), booking.passenger_id.clone())
        .with_request_key(order_id);

        let (update, tx, result) = match outcome {
            GatewayOutcome::Completed(receipt) => (
                Some((AuthorizationStatus::Captured, PaymentStatus::Paid)),
                tx.with_reference(receipt.reference.clone()),
                CaptureResult::Captured {
                    reference: receipt.reference,
                },
            ),
            // The claim already left the hold capture-pending
            GatewayOutcome::Queued { receipt, .. } => (
                None,
                tx.with_status(TransactionStatus::Pending),
                CaptureResult::Queued {
                    item_id: receipt.id,
                },
            ),
            GatewayOutcome::Failed(e) => {
                warn!(error = %e, "Capture rejected, marked for manual follow-up");
                (
                    Some((AuthorizationStatus::Failed, PaymentStatus::Failed)),
                    tx.with_status(TransactionStatus::Failed)
                        .with_note(e.to_string()),
                    CaptureResult::Failed {
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        };

        if let Some((auth_status, payment_status)) = update {
            self.finish_capture(
                &booking.id,
                auth_status,
                payment_status,
                tx.gateway_transaction_id.clone(),
            )
            .await?;
        }
        self.append(&booking.trip_id, &tx).await?;
        Ok(result)
    }

    /// Record the end of a capture on the booking and its hold
    async fn finish_capture(
        &self,
        booking_id: &BookingId,
        auth_status: AuthorizationStatus,
        payment_status: PaymentStatus,
        reference: Option<String>,
    ) -> Result<(), PaymentError> {
        self.store_call("set_authorization_status", || {
            self.store
                .set_authorization_status(booking_id, auth_status, reference.clone())
        })
        .await?;
        self.store_call("set_payment_status", || {
            self.store.set_payment_status(booking_id, payment_status)
        })
        .await?;
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// A trip's transaction log in creation order
    ///
    /// # Errors
    ///
    /// [`PaymentError::Store`].
    pub async fn transactions(&self, trip_id: &TripId) -> Result<Vec<Transaction>, PaymentError> {
        Ok(self
            .store_call("transactions", || self.store.transactions(trip_id))
            .await?)
    }

    /// A driver's earnings counters
    ///
    /// # Errors
    ///
    /// [`PaymentError::Store`].
    pub async fn driver_earnings(&self, driver_id: &DriverId) -> Result<DriverEarnings, PaymentError> {
        Ok(self
            .store_call("driver_earnings", || self.store.driver_earnings(driver_id))
            .await?)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Pay a driver through the guarded gateway and record the transaction.
    /// Returns the transaction (none for a zero amount) and whether the
    /// payout is still pending confirmation.
    async fn pay_driver(
        &self,
        trip: &Trip,
        kind: TransactionKind,
        amount: Money,
        transfer_id: String,
    ) -> Result<(Option<Transaction>, bool), PaymentError> {
        if !amount.is_positive() {
            return Ok((None, false));
        }

        let call = PaymentCall::Payout {
            beneficiary_id: trip.beneficiary_id.clone(),
            amount,
            transfer_id: transfer_id.clone(),
        };
        let outcome = self.gateway.call(call, Some(trip.id.as_str())).await;
        let pending = outcome.pending_confirmation();

        let tx = Transaction::new(kind, amount, self.gateway.label())
            .with_request_key(transfer_id.clone());
        let tx = match outcome {
            GatewayOutcome::Completed(receipt) => tx.with_reference(receipt.reference),
            GatewayOutcome::Queued { .. } => tx
                .with_status(TransactionStatus::Pending)
                .with_note(format!("queued transfer {transfer_id}")),
            GatewayOutcome::Failed(e) => {
                let note = format!("transfer {transfer_id} failed: {e}");
                self.report_payout_failure(trip, amount, transfer_id, e.to_string());
                tx.with_status(TransactionStatus::Failed).with_note(note)
            }
        };
        self.append(&trip.id, &tx).await?;
        Ok((Some(tx), pending))
    }

    /// Alert operators and publish the failure; never blocks or fails the caller
    fn report_payout_failure(&self, trip: &Trip, amount: Money, transfer_id: String, reason: String) {
        warn!(%amount, transfer_id, reason = %reason, "Driver payout failed");
        telemetry_metrics::counter!("settlement_payout_failures_total").increment(1);

        self.events.publish(SettlementEvent::PayoutFailed {
            trip_id: trip.id.clone(),
            driver_id: trip.driver_id.clone(),
            amount,
            reason: reason.clone(),
        });

        let failure = PayoutFailure {
            trip_id: trip.id.clone(),
            driver_id: trip.driver_id.clone(),
            amount,
            transfer_id,
        };
        let admin = Arc::clone(&self.admin);
        tokio::spawn(async move {
            if let Err(e) = admin.notify_payout_failure(&failure, &reason).await {
                warn!(trip_id = %failure.trip_id, error = %e, "Admin payout alert failed");
            }
        });
    }

    async fn load_trip(&self, trip_id: &TripId) -> Result<Trip, PaymentError> {
        self.store_call("find_trip", || self.store.find_trip(trip_id))
            .await?
            .ok_or_else(|| PaymentError::TripNotFound {
                trip_id: trip_id.clone(),
            })
    }

    async fn load_booking(&self, booking_id: &BookingId) -> Result<Booking, PaymentError> {
        self.store_call("find_booking", || self.store.find_booking(booking_id))
            .await?
            .ok_or_else(|| PaymentError::BookingNotFound {
                booking_id: booking_id.clone(),
            })
    }

    async fn bookings(&self, trip_id: &TripId) -> Result<Vec<Booking>, PaymentError> {
        Ok(self
            .store_call("bookings_for_trip", || self.store.bookings_for_trip(trip_id))
            .await?)
    }

    async fn append(&self, trip_id: &TripId, tx: &Transaction) -> Result<(), PaymentError> {
        self.store_call("append_transaction", || {
            self.store.append_transaction(trip_id, tx.clone())
        })
        .await?;
        Ok(())
    }

    /// One store call, retried on transient failures
    async fn store_call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.retry, operation, f).await
    }
}

/// Gateway order id used to hold a booking's funds
fn order_id(booking_id: &BookingId) -> String {
    format!("order_{booking_id}")
}
