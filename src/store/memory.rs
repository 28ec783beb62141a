//! In-memory [`SettlementStore`]
//!
//! Backed by `DashMap`s; every single-document write happens under that
//! document's shard lock, which gives the same per-document atomicity a
//! document database offers for single-document updates.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use super::{
    Authorization, AuthorizationStatus, Booking, BookingId, BookingStatus, CasOutcome,
    DriverEarnings, DriverId, EarningsDelta, PassengerId, PaymentStatus, PickupStatus,
    SettlementStore, StoreError, Trip, TripId, TripStatus,
};
use crate::payment::{Money, Transaction, TransactionKind, VaultStatus, refunded_total};

#[derive(Debug, Default)]
struct Wallet {
    balance: Money,
    references: HashSet<String>,
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    trips: DashMap<TripId, Trip>,
    bookings: DashMap<BookingId, Booking>,
    earnings: DashMap<DriverId, DriverEarnings>,
    wallets: DashMap<PassengerId, Wallet>,
    /// Errors returned by the next writes, in order
    injected: Mutex<VecDeque<StoreError>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write fail with `error`. Queued errors are consumed one
    /// per write, oldest first; reads are unaffected.
    pub fn inject_write_failure(&self, error: StoreError) {
        self.injected.lock().push_back(error);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        match self.injected.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn with_booking<T>(
        &self,
        id: &BookingId,
        f: impl FnOnce(&mut Booking) -> T,
    ) -> Result<T, StoreError> {
        self.check_write()?;
        let mut booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;
        Ok(f(&mut booking))
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn insert_trip(&self, trip: Trip) -> Result<(), StoreError> {
        self.check_write()?;
        match self.trips.entry(trip.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("trip '{}' exists", trip.id))),
            Entry::Vacant(slot) => {
                slot.insert(trip);
                Ok(())
            }
        }
    }

    async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, StoreError> {
        Ok(self.trips.get(id).map(|t| t.value().clone()))
    }

    async fn transition_trip_status(
        &self,
        id: &TripId,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<CasOutcome<TripStatus>, StoreError> {
        self.check_write()?;
        let mut trip = self
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::trip_not_found(id))?;
        let current = trip.status;
        if from.contains(&current) {
            trip.status = to;
            Ok(CasOutcome::Applied(current))
        } else {
            Ok(CasOutcome::Rejected(current))
        }
    }

    async fn release_vault(&self, id: &TripId) -> Result<CasOutcome<VaultStatus>, StoreError> {
        self.check_write()?;
        let mut trip = self
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::trip_not_found(id))?;
        match trip.breakdown.vault_status {
            VaultStatus::Locked => {
                trip.breakdown.vault_status = VaultStatus::Released;
                Ok(CasOutcome::Applied(VaultStatus::Locked))
            }
            VaultStatus::Released => Ok(CasOutcome::Rejected(VaultStatus::Released)),
        }
    }

    async fn append_transaction(&self, id: &TripId, tx: Transaction) -> Result<(), StoreError> {
        self.check_write()?;
        let mut trip = self
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::trip_not_found(id))?;
        trip.transactions.push(tx);
        Ok(())
    }

    async fn reserve_refund(
        &self,
        id: &TripId,
        tx: Transaction,
        limit: Money,
    ) -> Result<CasOutcome<Money>, StoreError> {
        if tx.kind != TransactionKind::Refund {
            return Err(StoreError::Conflict(format!(
                "only refunds can be reserved, got {:?}",
                tx.kind
            )));
        }
        self.check_write()?;
        let mut trip = self
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::trip_not_found(id))?;
        let available = limit - refunded_total(&trip.transactions);
        if tx.amount > available {
            return Ok(CasOutcome::Rejected(available.max(Money::ZERO)));
        }
        let remaining = available - tx.amount;
        trip.transactions.push(tx);
        Ok(CasOutcome::Applied(remaining))
    }

    async fn transactions(&self, id: &TripId) -> Result<Vec<Transaction>, StoreError> {
        self.trips
            .get(id)
            .map(|t| t.transactions.clone())
            .ok_or_else(|| StoreError::trip_not_found(id))
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.check_write()?;
        match self.bookings.entry(booking.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "booking '{}' exists",
                booking.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(booking);
                Ok(())
            }
        }
    }

    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(id).map(|b| b.value().clone()))
    }

    async fn bookings_for_trip(&self, trip_id: &TripId) -> Result<Vec<Booking>, StoreError> {
        let mut found: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| &b.trip_id == trip_id)
            .map(|b| b.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn mark_picked_up(&self, id: &BookingId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with_booking(id, |booking| {
            if booking.pickup_status == PickupStatus::PickedUp {
                return false;
            }
            booking.pickup_status = PickupStatus::PickedUp;
            booking.picked_up_at = Some(at);
            true
        })
    }

    async fn set_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        self.with_booking(id, |booking| booking.status = status)
    }

    async fn set_payment_status(
        &self,
        id: &BookingId,
        status: PaymentStatus,
    ) -> Result<(), StoreError> {
        self.with_booking(id, |booking| booking.payment_status = status)
    }

    async fn set_authorization(
        &self,
        id: &BookingId,
        authorization: Authorization,
    ) -> Result<(), StoreError> {
        self.with_booking(id, |booking| booking.authorization = Some(authorization))
    }

    async fn claim_capture(
        &self,
        id: &BookingId,
    ) -> Result<CasOutcome<AuthorizationStatus>, StoreError> {
        self.with_booking(id, |booking| {
            let Some(auth) = booking.authorization.as_mut() else {
                return Err(StoreError::Conflict(format!(
                    "booking '{id}' has no authorization"
                )));
            };
            if auth.status != AuthorizationStatus::Authorized {
                return Ok(CasOutcome::Rejected(auth.status));
            }
            auth.status = AuthorizationStatus::CapturePending;
            auth.updated_at = Utc::now();
            Ok(CasOutcome::Applied(AuthorizationStatus::Authorized))
        })?
    }

    async fn set_authorization_status(
        &self,
        id: &BookingId,
        status: AuthorizationStatus,
        gateway_transaction_id: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_booking(id, |booking| {
            let Some(auth) = booking.authorization.as_mut() else {
                return Err(StoreError::Conflict(format!(
                    "booking '{id}' has no authorization"
                )));
            };
            auth.status = status;
            if gateway_transaction_id.is_some() {
                auth.gateway_transaction_id = gateway_transaction_id;
            }
            auth.updated_at = Utc::now();
            Ok(())
        })?
    }

    async fn apply_earnings(
        &self,
        driver_id: &DriverId,
        delta: EarningsDelta,
    ) -> Result<DriverEarnings, StoreError> {
        self.check_write()?;
        let mut earnings = self.earnings.entry(driver_id.clone()).or_default();
        earnings.apply(delta);
        Ok(earnings.clone())
    }

    async fn driver_earnings(&self, driver_id: &DriverId) -> Result<DriverEarnings, StoreError> {
        Ok(self
            .earnings
            .get(driver_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn credit_wallet(
        &self,
        passenger_id: &PassengerId,
        amount: Money,
        reference: &str,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut wallet = self.wallets.entry(passenger_id.clone()).or_default();
        if !wallet.references.insert(reference.to_string()) {
            return Ok(false);
        }
        wallet.balance += amount;
        Ok(true)
    }

    async fn wallet_balance(&self, passenger_id: &PassengerId) -> Result<Money, StoreError> {
        Ok(self
            .wallets
            .get(passenger_id)
            .map_or(Money::ZERO, |w| w.balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{FeeSchedule, TransactionKind, calculate_payment_breakdown};

    fn trip(id: &str, status: TripStatus) -> Trip {
        Trip {
            id: id.into(),
            driver_id: "driver-1".into(),
            beneficiary_id: "bene-1".into(),
            status,
            breakdown: calculate_payment_breakdown(
                Money::from_major(100),
                2,
                &FeeSchedule::default(),
            )
            .unwrap(),
            transactions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn status_transition_is_compare_and_set() {
        // GIVEN: a scheduled trip
        let store = InMemoryStore::new();
        store.insert_trip(trip("t1", TripStatus::Scheduled)).await.unwrap();
        let from = [TripStatus::Scheduled, TripStatus::DriverAssigned];

        // WHEN: two callers try to start it
        let first = store
            .transition_trip_status(&"t1".into(), &from, TripStatus::InProgress)
            .await
            .unwrap();
        let second = store
            .transition_trip_status(&"t1".into(), &from, TripStatus::InProgress)
            .await
            .unwrap();

        // THEN: only the first wins
        assert_eq!(first, CasOutcome::Applied(TripStatus::Scheduled));
        assert_eq!(second, CasOutcome::Rejected(TripStatus::InProgress));
    }

    #[tokio::test]
    async fn vault_releases_once() {
        let store = InMemoryStore::new();
        store.insert_trip(trip("t1", TripStatus::InProgress)).await.unwrap();
        assert!(store.release_vault(&"t1".into()).await.unwrap().is_applied());
        assert!(!store.release_vault(&"t1".into()).await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn refund_reservation_stops_at_the_limit() {
        // GIVEN: a trip allowing 500 of refunds
        let store = InMemoryStore::new();
        store.insert_trip(trip("t1", TripStatus::Completed)).await.unwrap();
        let limit = Money::from_minor(500);
        let refund = |minor| {
            Transaction::new(TransactionKind::Refund, Money::from_minor(minor), "test")
                .with_status(crate::payment::TransactionStatus::Pending)
        };

        // WHEN: reserving 300, then 300 again, then the 200 left
        let first = store.reserve_refund(&"t1".into(), refund(300), limit).await.unwrap();
        let second = store.reserve_refund(&"t1".into(), refund(300), limit).await.unwrap();
        let third = store.reserve_refund(&"t1".into(), refund(200), limit).await.unwrap();

        // THEN: the over-limit reservation is refused and not written
        assert_eq!(first, CasOutcome::Applied(Money::from_minor(200)));
        assert_eq!(second, CasOutcome::Rejected(Money::from_minor(200)));
        assert_eq!(third, CasOutcome::Applied(Money::ZERO));
        assert_eq!(store.transactions(&"t1".into()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn capture_claim_is_granted_once() {
        let store = InMemoryStore::new();
        store
            .insert_booking(
                Booking::confirmed("b1", "t1", "p1", 1, Money::from_major(110))
                    .with_authorization("order_b1"),
            )
            .await
            .unwrap();
        store
            .insert_booking(Booking::confirmed("b2", "t1", "p2", 1, Money::from_major(110)))
            .await
            .unwrap();

        let first = store.claim_capture(&"b1".into()).await.unwrap();
        let second = store.claim_capture(&"b1".into()).await.unwrap();

        assert_eq!(first, CasOutcome::Applied(AuthorizationStatus::Authorized));
        assert_eq!(second, CasOutcome::Rejected(AuthorizationStatus::CapturePending));
        assert!(matches!(
            store.claim_capture(&"b2".into()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn transaction_log_keeps_append_order() {
        let store = InMemoryStore::new();
        store.insert_trip(trip("t1", TripStatus::Scheduled)).await.unwrap();
        for kind in [TransactionKind::Collection, TransactionKind::Advance, TransactionKind::Payout] {
            store
                .append_transaction(&"t1".into(), Transaction::new(kind, Money::from_major(1), "test"))
                .await
                .unwrap();
        }
        let kinds: Vec<_> = store
            .transactions(&"t1".into())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![TransactionKind::Collection, TransactionKind::Advance, TransactionKind::Payout]
        );
    }

    #[tokio::test]
    async fn injected_failures_hit_writes_in_order() {
        let store = InMemoryStore::new();
        store.inject_write_failure(StoreError::Backend {
            code: Some(91),
            message: "shutdown".into(),
        });
        assert!(store.insert_trip(trip("t1", TripStatus::Scheduled)).await.is_err());
        assert!(store.insert_trip(trip("t1", TripStatus::Scheduled)).await.is_ok());
        assert!(matches!(
            store.insert_trip(trip("t1", TripStatus::Scheduled)).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn pickup_mark_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .insert_booking(Booking::confirmed("b1", "t1", "p1", 1, Money::from_major(110)))
            .await
            .unwrap();
        assert!(store.mark_picked_up(&"b1".into(), Utc::now()).await.unwrap());
        let first_at = store.find_booking(&"b1".into()).await.unwrap().unwrap().picked_up_at;
        assert!(!store.mark_picked_up(&"b1".into(), Utc::now()).await.unwrap());
        let second_at = store.find_booking(&"b1".into()).await.unwrap().unwrap().picked_up_at;
        assert_eq!(first_at, second_at);
    }

    #[tokio::test]
    async fn wallet_credit_is_deduplicated_by_reference() {
        let store = InMemoryStore::new();
        let p: PassengerId = "p1".into();
        assert!(store.credit_wallet(&p, Money::from_minor(250), "cashback:t1:b1").await.unwrap());
        assert!(!store.credit_wallet(&p, Money::from_minor(250), "cashback:t1:b1").await.unwrap());
        assert_eq!(store.wallet_balance(&p).await.unwrap(), Money::from_minor(250));
    }

    #[tokio::test]
    async fn earnings_deltas_accumulate() {
        let store = InMemoryStore::new();
        let d: DriverId = "d1".into();
        store
            .apply_earnings(
                &d,
                EarningsDelta {
                    pending: Money::from_minor(700),
                    vault: Money::from_minor(300),
                    ..EarningsDelta::default()
                },
            )
            .await
            .unwrap();
        let after = store
            .apply_earnings(
                &d,
                EarningsDelta {
                    total: Money::from_minor(1_000),
                    pending: Money::from_minor(-700),
                    vault: Money::from_minor(-300),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            after,
            DriverEarnings {
                total: Money::from_minor(1_000),
                pending: Money::ZERO,
                vault: Money::ZERO,
            }
        );
    }
}
