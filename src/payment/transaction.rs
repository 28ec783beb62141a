//! Append-only transaction records
//!
//! Entries are never edited. A pending entry is resolved by a later entry
//! whose `settles` points back at it, so the log shows both the request and
//! its outcome.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;
use crate::store::{BookingId, PassengerId};

/// What moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Passenger money in (payment or capture)
    Collection,
    /// Driver advance at trip start
    Advance,
    /// Vault release at completion
    Payout,
    /// Money back to a passenger
    Refund,
}

/// Outcome of the movement at the time it was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Accepted but queued behind an unavailable gateway
    Pending,
    /// Settled by the gateway
    Completed,
    /// Rejected; needs manual follow-up
    Failed,
}

/// One immutable entry in a trip's transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record id
    pub id: Uuid,
    /// Movement type
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Amount moved
    pub amount: Money,
    /// Status when recorded
    pub status: TransactionStatus,
    /// Gateway name
    pub gateway: String,
    /// Gateway-side reference
    pub gateway_transaction_id: Option<String>,
    /// Booking concerned, if any
    pub booking_id: Option<BookingId>,
    /// Passenger concerned, if any
    pub passenger_id: Option<PassengerId>,
    /// Free-form note (refund reason, failure reason)
    pub note: Option<String>,
    /// Idempotency key of the gateway call behind this entry
    #[serde(default)]
    pub request_key: Option<String>,
    /// Earlier pending entry this one resolves
    #[serde(default)]
    pub settles: Option<Uuid>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// New completed transaction
    #[must_use]
    pub fn new(kind: TransactionKind, amount: Money, gateway: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            amount,
            status: TransactionStatus::Completed,
            gateway: gateway.to_string(),
            gateway_transaction_id: None,
            booking_id: None,
            passenger_id: None,
            note: None,
            request_key: None,
            settles: None,
            created_at: Utc::now(),
        }
    }

    /// Set the status
    #[must_use]
    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the gateway reference
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.gateway_transaction_id = Some(reference.into());
        self
    }

    /// Attach to a booking and its passenger
    #[must_use]
    pub fn for_booking(mut self, booking_id: BookingId, passenger_id: PassengerId) -> Self {
        self.booking_id = Some(booking_id);
        self.passenger_id = Some(passenger_id);
        self
    }

    /// Attach a note
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Record the idempotency key of the gateway call
    #[must_use]
    pub fn with_request_key(mut self, key: impl Into<String>) -> Self {
        self.request_key = Some(key.into());
        self
    }

    /// Resolve `pending`, inheriting its booking and request key
    #[must_use]
    pub fn settling(mut self, pending: &Self) -> Self {
        self.settles = Some(pending.id);
        self.booking_id.clone_from(&pending.booking_id);
        self.passenger_id.clone_from(&pending.passenger_id);
        self.request_key.clone_from(&pending.request_key);
        self
    }

    /// Whether the record counts toward settled or in-flight totals
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.status != TransactionStatus::Failed
    }
}

fn settled_ids(log: &[Transaction]) -> HashSet<Uuid> {
    log.iter().filter_map(|t| t.settles).collect()
}

/// Sum of refunds that are completed or still in flight
///
/// A pending refund counts until an entry settles it; from then on only the
/// settling entry counts (nothing, if it failed).
#[must_use]
pub fn refunded_total(log: &[Transaction]) -> Money {
    let settled = settled_ids(log);
    log.iter()
        .filter(|t| {
            t.kind == TransactionKind::Refund && t.is_effective() && !settled.contains(&t.id)
        })
        .map(|t| t.amount)
        .sum()
}

/// The unsettled pending entry recorded for gateway call `key`
#[must_use]
pub fn unsettled_pending<'a>(log: &'a [Transaction], key: &str) -> Option<&'a Transaction> {
    let settled = settled_ids(log);
    log.iter().find(|t| {
        t.status == TransactionStatus::Pending
            && t.request_key.as_deref() == Some(key)
            && !settled.contains(&t.id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_kind_as_type() {
        let tx = Transaction::new(TransactionKind::Advance, Money::from_minor(70), "cashfree")
            .with_reference("cf_123");
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "advance");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["amount"], 70);
        assert_eq!(json["gateway_transaction_id"], "cf_123");
    }

    #[test]
    fn refunded_total_ignores_failed_refunds() {
        let log = vec![
            Transaction::new(TransactionKind::Collection, Money::from_minor(1_000), "g"),
            Transaction::new(TransactionKind::Refund, Money::from_minor(100), "g"),
            Transaction::new(TransactionKind::Refund, Money::from_minor(50), "g")
                .with_status(TransactionStatus::Pending),
            Transaction::new(TransactionKind::Refund, Money::from_minor(400), "g")
                .with_status(TransactionStatus::Failed),
        ];
        assert_eq!(refunded_total(&log), Money::from_minor(150));
    }

    #[test]
    fn settled_reservations_are_counted_once() {
        // GIVEN: two reserved refunds, one completed and one failed later
        let kept = Transaction::new(TransactionKind::Refund, Money::from_minor(300), "g")
            .with_status(TransactionStatus::Pending)
            .with_request_key("r1");
        let dropped = Transaction::new(TransactionKind::Refund, Money::from_minor(200), "g")
            .with_status(TransactionStatus::Pending)
            .with_request_key("r2");
        let log = vec![
            kept.clone(),
            dropped.clone(),
            Transaction::new(TransactionKind::Refund, Money::from_minor(300), "g").settling(&kept),
            Transaction::new(TransactionKind::Refund, Money::from_minor(200), "g")
                .with_status(TransactionStatus::Failed)
                .settling(&dropped),
        ];

        // THEN: only the completed refund counts and nothing is left pending
        assert_eq!(refunded_total(&log), Money::from_minor(300));
        assert!(unsettled_pending(&log, "r1").is_none());
        assert!(unsettled_pending(&log, "r2").is_none());
        assert_eq!(log[2].request_key.as_deref(), Some("r1"));
    }
}
