//! Payment gateway seam
//!
//! [`PaymentGateway`] is the narrow client interface; the wire format of any
//! particular provider lives behind it. [`GuardedGateway`] is the only path
//! the engine uses: every call goes through the `payment-gateway` breaker,
//! is raced against a timeout, and is diverted to the payment isolation
//! queue when the gateway is unavailable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::Money;
use crate::config::PaymentConfig;
use crate::failsafe::{BreakerError, CircuitBreaker, CircuitState, Transient, dependencies};
use crate::isolation::{EnqueueReceipt, IsolationQueues, PaymentReplay, QueueError};

/// Gateway client errors
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connection failure
    #[error("Gateway network error: {0}")]
    Network(String),

    /// No answer in time
    #[error("Gateway timed out: {0}")]
    Timeout(String),

    /// Gateway refused the request
    #[error("Gateway rejected request ({code}): {message}")]
    Rejected {
        /// Provider error code
        code: String,
        /// Provider message
        message: String,
    },

    /// Gateway unavailable and the call could not be queued either
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "GATEWAY_NETWORK_ERROR",
            Self::Timeout(_) => "GATEWAY_TIMEOUT",
            Self::Rejected { .. } => "GATEWAY_REJECTED",
            Self::Unavailable(_) => "GATEWAY_UNAVAILABLE",
        }
    }
}

impl Transient for GatewayError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Gateway acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReceipt {
    /// Gateway-side reference (payment id, refund id, transfer reference)
    pub reference: String,
    /// Provider status string
    pub status: String,
}

/// Order creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-generated order id, passed through as the idempotency key
    pub order_id: String,
    /// Amount to hold
    pub amount: Money,
    /// Customer reference
    pub customer_id: String,
}

/// Payment gateway client
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order holding the passenger's funds
    async fn create_order(&self, order: &OrderRequest) -> Result<GatewayReceipt, GatewayError>;

    /// Capture held funds
    async fn capture_payment(
        &self,
        order_id: &str,
        amount: Money,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Refund against an order; `refund_id` is the idempotency key
    async fn create_refund(
        &self,
        order_id: &str,
        amount: Money,
        refund_id: &str,
        reason: &str,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Pay a beneficiary; `transfer_id` is the idempotency key
    async fn initiate_payout(
        &self,
        beneficiary_id: &str,
        amount: Money,
        transfer_id: &str,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Look up an order
    async fn get_payment_status(&self, order_id: &str) -> Result<GatewayReceipt, GatewayError>;
}

/// A gateway call captured as data so it can be queued and replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PaymentCall {
    /// [`PaymentGateway::create_order`]
    CreateOrder(OrderRequest),
    /// [`PaymentGateway::capture_payment`]
    Capture {
        /// Order
        order_id: String,
        /// Amount
        amount: Money,
    },
    /// [`PaymentGateway::create_refund`]
    Refund {
        /// Order
        order_id: String,
        /// Amount
        amount: Money,
        /// Idempotency key
        refund_id: String,
        /// Reason
        reason: String,
    },
    /// [`PaymentGateway::initiate_payout`]
    Payout {
        /// Beneficiary
        beneficiary_id: String,
        /// Amount
        amount: Money,
        /// Idempotency key
        transfer_id: String,
    },
    /// [`PaymentGateway::get_payment_status`]
    Status {
        /// Order
        order_id: String,
    },
}

impl PaymentCall {
    /// Operation name for logs
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::CreateOrder(_) => "create_order",
            Self::Capture { .. } => "capture_payment",
            Self::Refund { .. } => "create_refund",
            Self::Payout { .. } => "initiate_payout",
            Self::Status { .. } => "get_payment_status",
        }
    }

    /// Run against a gateway client
    ///
    /// # Errors
    ///
    /// Whatever the client returns.
    pub async fn execute(
        &self,
        gateway: &dyn PaymentGateway,
    ) -> Result<GatewayReceipt, GatewayError> {
        match self {
            Self::CreateOrder(order) => gateway.create_order(order).await,
            Self::Capture { order_id, amount } => gateway.capture_payment(order_id, *amount).await,
            Self::Refund {
                order_id,
                amount,
                refund_id,
                reason,
            } => {
                gateway
                    .create_refund(order_id, *amount, refund_id, reason)
                    .await
            }
            Self::Payout {
                beneficiary_id,
                amount,
                transfer_id,
            } => {
                gateway
                    .initiate_payout(beneficiary_id, *amount, transfer_id)
                    .await
            }
            Self::Status { order_id } => gateway.get_payment_status(order_id).await,
        }
    }
}

/// Outcome of a guarded gateway call
#[derive(Debug, Clone)]
pub enum GatewayOutcome {
    /// Gateway answered
    Completed(GatewayReceipt),
    /// Gateway unavailable; the call was queued and the caller may proceed
    Queued {
        /// Queue receipt
        receipt: EnqueueReceipt,
        /// Why the call could not be made now
        reason: String,
    },
    /// Gateway refused, or unavailable with nowhere to queue
    Failed(GatewayError),
}

impl GatewayOutcome {
    /// The call is queued and its result is not known yet
    #[must_use]
    pub fn pending_confirmation(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Breaker + timeout + isolation queue around a [`PaymentGateway`]
#[derive(Clone)]
pub struct GuardedGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: Arc<CircuitBreaker>,
    queues: Arc<IsolationQueues>,
    timeout: Duration,
    label: String,
}

impl std::fmt::Debug for GuardedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedGateway")
            .field("label", &self.label)
            .field("timeout", &self.timeout)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl GuardedGateway {
    /// Wrap `inner`, sharing the `payment-gateway` breaker from the queues'
    /// registry
    #[must_use]
    pub fn new(
        inner: Arc<dyn PaymentGateway>,
        queues: Arc<IsolationQueues>,
        config: &PaymentConfig,
    ) -> Self {
        let breaker = queues.registry().get(dependencies::PAYMENT_GATEWAY);
        Self {
            inner,
            breaker,
            queues,
            timeout: config.gateway_timeout,
            label: config.gateway_label.clone(),
        }
    }

    /// Gateway name recorded on transactions
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Breaker guarding the gateway
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Isolation queues used for diverted calls
    #[must_use]
    pub fn queues(&self) -> &Arc<IsolationQueues> {
        &self.queues
    }

    /// Make a gateway call, diverting it to the payment queue when the
    /// breaker is open, the call times out, or it fails transiently.
    /// Permanent rejections are returned as [`GatewayOutcome::Failed`].
    pub async fn call(&self, call: PaymentCall, trip_id: Option<&str>) -> GatewayOutcome {
        let operation = call.operation();

        let reason = if self.breaker.state() == CircuitState::Open {
            format!("circuit '{}' open", self.breaker.name())
        } else {
            match self
                .breaker
                .execute_with_timeout(self.timeout, || call.execute(self.inner.as_ref()))
                .await
            {
                Ok(receipt) => {
                    debug!(operation, reference = %receipt.reference, "Gateway call completed");
                    return GatewayOutcome::Completed(receipt);
                }
                Err(BreakerError::Inner(e)) if !e.is_transient() => {
                    warn!(operation, error = %e, "Gateway rejected call");
                    return GatewayOutcome::Failed(e);
                }
                Err(e) => e.to_string(),
            }
        };

        match self.queues.enqueue_payment(call, trip_id).await {
            Ok(receipt) => {
                warn!(
                    operation,
                    trip_id = trip_id.unwrap_or("-"),
                    reason = %reason,
                    position = receipt.position,
                    "Gateway unavailable, call queued for reconciliation"
                );
                GatewayOutcome::Queued { receipt, reason }
            }
            Err(QueueError::Full { capacity, .. }) => {
                warn!(operation, capacity, reason = %reason, "Gateway unavailable and payment queue full");
                GatewayOutcome::Failed(GatewayError::Unavailable(format!(
                    "{reason}; payment queue full ({capacity})"
                )))
            }
            Err(e) => GatewayOutcome::Failed(GatewayError::Unavailable(format!("{reason}; {e}"))),
        }
    }

    /// Replay up to `batch_size` queued gateway calls
    ///
    /// Items that completed or ran out of attempts are returned in
    /// [`PaymentReplay::settled`]; writing them back to the trip is
    /// [`super::SettlementEngine::reconcile`]'s job.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the queue store fails.
    pub async fn reprocess(&self, batch_size: usize) -> Result<PaymentReplay, QueueError> {
        self.queues
            .reprocess_payments(self.inner.as_ref(), self.timeout, batch_size)
            .await
    }
}
