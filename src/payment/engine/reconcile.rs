//! Writing replayed gateway calls back to the trip
//!
//! A call diverted to the payment queue leaves a pending transaction behind
//! (order creation leaves no authorization at all). When a reprocessing pass
//! settles the queue item, its outcome lands here and is matched to the trip
//! by the item's trip id and the call's idempotency key.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{SettlementEngine, order_id};
use crate::isolation::{PaymentReplayer, QueueError, ReprocessReport, SettledPayment};
use crate::payment::{
    GatewayReceipt, OrderRequest, PaymentCall, PaymentError, Transaction, TransactionStatus,
    unsettled_pending,
};
use crate::store::{AuthorizationStatus, PaymentStatus, TripId};

/// Result of [`SettlementEngine::reconcile_queued`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Queue pass counters
    pub replay: ReprocessReport,
    /// Settled items written back to their trip
    pub applied: usize,
    /// Settled items with nothing left to write
    pub ignored: usize,
    /// Settled items whose write-back failed
    pub errors: usize,
}

impl SettlementEngine {
    /// Replay up to `batch_size` queued gateway calls and write every final
    /// result back to its trip
    ///
    /// Write-back failures are logged and counted; the queue item is already
    /// terminal and is listed by
    /// [`crate::isolation::IsolationQueues::failed_payments`] or the trip log
    /// for manual follow-up.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the queue store fails.
    pub async fn reconcile_queued(&self, batch_size: usize) -> Result<ReconcileReport, QueueError> {
        let replay = self.gateway.reprocess(batch_size).await?;
        let mut report = ReconcileReport {
            replay: replay.report,
            ..ReconcileReport::default()
        };
        for settled in &replay.settled {
            match self.reconcile(settled).await {
                Ok(true) => report.applied += 1,
                Ok(false) => report.ignored += 1,
                Err(e) => {
                    warn!(
                        item_id = %settled.item_id,
                        operation = settled.call.operation(),
                        error = %e,
                        "Reconciling replayed gateway call failed"
                    );
                    report.errors += 1;
                }
            }
        }
        if !replay.settled.is_empty() {
            info!(
                applied = report.applied,
                ignored = report.ignored,
                errors = report.errors,
                "Replayed gateway calls reconciled"
            );
        }
        Ok(report)
    }

    /// Write one settled queue item back to its trip
    ///
    /// Returns `false` when there is nothing to write: no trip id, a status
    /// lookup, or an outcome that was already applied.
    ///
    /// # Errors
    ///
    /// [`PaymentError::TripNotFound`] or [`PaymentError::Store`].
    #[tracing::instrument(skip(self, settled), fields(item_id = %settled.item_id, operation = settled.call.operation()))]
    pub async fn reconcile(&self, settled: &SettledPayment) -> Result<bool, PaymentError> {
        let Some(trip_id) = settled.trip_id.as_deref().map(TripId::from) else {
            debug!("Replayed call has no trip, nothing to reconcile");
            return Ok(false);
        };
        let result = &settled.result;
        match &settled.call {
            PaymentCall::CreateOrder(order) => self.reconcile_order(&trip_id, order, result).await,
            PaymentCall::Capture { order_id, .. } => {
                self.reconcile_capture(&trip_id, order_id, result).await
            }
            PaymentCall::Refund { refund_id, .. } => Ok(self
                .settle_pending(&trip_id, refund_id, result)
                .await?
                .is_some()),
            PaymentCall::Payout { transfer_id, .. } => {
                self.reconcile_payout(&trip_id, transfer_id, result).await
            }
            PaymentCall::Status { .. } => Ok(false),
        }
    }

    async fn reconcile_order(
        &self,
        trip_id: &TripId,
        order: &OrderRequest,
        result: &Result<GatewayReceipt, String>,
    ) -> Result<bool, PaymentError> {
        let Some(booking) = self
            .bookings(trip_id)
            .await?
            .into_iter()
            .find(|b| order_id(&b.id) == order.order_id)
        else {
            warn!(order_id = order.order_id, "Replayed order matches no booking");
            return Ok(false);
        };
        if booking.authorization.is_some() {
            return Ok(false);
        }
        match result {
            Ok(_) => {
                self.record_authorization(&booking.id, order).await?;
            }
            Err(reason) => {
                warn!(booking_id = %booking.id, reason = %reason, "Queued order creation failed");
                self.store_call("set_payment_status", || {
                    self.store
                        .set_payment_status(&booking.id, PaymentStatus::Failed)
                })
                .await?;
            }
        }
        Ok(true)
    }

    async fn reconcile_capture(
        &self,
        trip_id: &TripId,
        order_id: &str,
        result: &Result<GatewayReceipt, String>,
    ) -> Result<bool, PaymentError> {
        let Some(tx) = self.settle_pending(trip_id, order_id, result).await? else {
            return Ok(false);
        };
        let Some(booking_id) = tx.booking_id.as_ref() else {
            return Ok(true);
        };
        let (auth_status, payment_status) = match result {
            Ok(_) => (AuthorizationStatus::Captured, PaymentStatus::Paid),
            Err(_) => (AuthorizationStatus::Failed, PaymentStatus::Failed),
        };
        self.finish_capture(
            booking_id,
            auth_status,
            payment_status,
            tx.gateway_transaction_id.clone(),
        )
        .await?;
        Ok(true)
    }

    async fn reconcile_payout(
        &self,
        trip_id: &TripId,
        transfer_id: &str,
        result: &Result<GatewayReceipt, String>,
    ) -> Result<bool, PaymentError> {
        let Some(tx) = self.settle_pending(trip_id, transfer_id, result).await? else {
            return Ok(false);
        };
        if let Err(reason) = result {
            let trip = self.load_trip(trip_id).await?;
            self.report_payout_failure(&trip, tx.amount, transfer_id.to_string(), reason.clone());
        }
        Ok(true)
    }

    /// Append the entry resolving the pending transaction of call `key`.
    /// `None` when no unsettled pending entry carries that key.
    async fn settle_pending(
        &self,
        trip_id: &TripId,
        key: &str,
        result: &Result<GatewayReceipt, String>,
    ) -> Result<Option<Transaction>, PaymentError> {
        let log = self.transactions(trip_id).await?;
        let Some(pending) = unsettled_pending(&log, key) else {
            debug!(%trip_id, key, "No pending transaction for replayed call");
            return Ok(None);
        };
        let tx = Transaction::new(pending.kind, pending.amount, self.gateway.label()).settling(pending);
        let tx = match result {
            Ok(receipt) => tx.with_reference(receipt.reference.clone()),
            Err(reason) => tx
                .with_status(TransactionStatus::Failed)
                .with_note(reason.clone()),
        };
        self.append(trip_id, &tx).await?;
        info!(%trip_id, key, kind = ?tx.kind, status = ?tx.status, "Queued transaction settled");
        Ok(Some(tx))
    }
}

#[async_trait]
impl PaymentReplayer for SettlementEngine {
    async fn replay_payments(&self, batch_size: usize) -> Result<ReprocessReport, QueueError> {
        self.reconcile_queued(batch_size).await.map(|r| r.replay)
    }
}
