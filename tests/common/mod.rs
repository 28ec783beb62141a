//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use carpool_settlement::capture::CaptureGate;
use carpool_settlement::config::{CircuitBreakerConfig, IsolationConfig, PaymentConfig};
use carpool_settlement::failsafe::{BreakerRegistry, RetryPolicy};
use carpool_settlement::isolation::IsolationQueues;
use carpool_settlement::notify::{
    AdminNotifier, DeliveryReceipt, NotificationDispatch, NotificationRequest, NotifyError,
    PayoutFailure,
};
use carpool_settlement::payment::{
    FeeSchedule, GatewayError, GatewayReceipt, GuardedGateway, Money, NewTrip, OrderRequest,
    PaymentGateway, SettlementEngine,
};
use carpool_settlement::store::{Booking, InMemoryStore, SettlementStore};

// ── Gateway ───────────────────────────────────────────────────────────────────

/// Gateway operations a script can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Order,
    Capture,
    Refund,
    Payout,
    Status,
}

/// One recorded gateway call: operation and the id it was made for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCall {
    pub op: Op,
    pub key: String,
    pub amount: Option<Money>,
}

/// Gateway that succeeds unless told otherwise, and records every call
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<(Op, GatewayError)>>,
    calls: Mutex<Vec<GatewayCall>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: GatewayError) {
        self.script.lock().push_back((op, error));
    }

    /// Hold every later call for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, op: Op) -> Vec<GatewayCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    async fn answer(
        &self,
        op: Op,
        key: &str,
        amount: Option<Money>,
    ) -> Result<GatewayReceipt, GatewayError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(GatewayCall {
            op,
            key: key.to_string(),
            amount,
        });
        let mut script = self.script.lock();
        if let Some(pos) = script.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = script.remove(pos) {
                return Err(err);
            }
        }
        Ok(GatewayReceipt {
            reference: format!("gw_{key}"),
            status: "SUCCESS".to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(&self, order: &OrderRequest) -> Result<GatewayReceipt, GatewayError> {
        self.answer(Op::Order, &order.order_id, Some(order.amount)).await
    }

    async fn capture_payment(
        &self,
        order_id: &str,
        amount: Money,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.answer(Op::Capture, order_id, Some(amount)).await
    }

    async fn create_refund(
        &self,
        order_id: &str,
        amount: Money,
        _refund_id: &str,
        _reason: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.answer(Op::Refund, order_id, Some(amount)).await
    }

    async fn initiate_payout(
        &self,
        _beneficiary_id: &str,
        amount: Money,
        transfer_id: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.answer(Op::Payout, transfer_id, Some(amount)).await
    }

    async fn get_payment_status(&self, order_id: &str) -> Result<GatewayReceipt, GatewayError> {
        self.answer(Op::Status, order_id, None).await
    }
}

pub fn network_error() -> GatewayError {
    GatewayError::Network("ECONNRESET".to_string())
}

pub fn rejection() -> GatewayError {
    GatewayError::Rejected {
        code: "beneficiary_inactive".to_string(),
        message: "Beneficiary account is not active".to_string(),
    }
}

// ── Notifications ─────────────────────────────────────────────────────────────

/// Notification provider that can be switched off
#[derive(Default)]
pub struct RecordingDispatch {
    down: Mutex<bool>,
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingDispatch {
    pub fn set_down(&self, down: bool) {
        *self.down.lock() = down;
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationDispatch for RecordingDispatch {
    async fn send(&self, request: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError> {
        if *self.down.lock() {
            return Err(NotifyError::Provider("connection refused".to_string()));
        }
        let mut sent = self.sent.lock();
        sent.push(request.clone());
        Ok(DeliveryReceipt {
            message_id: format!("msg-{}", sent.len()),
        })
    }
}

/// Admin hook that records payout failures
#[derive(Default)]
pub struct RecordingAdmin {
    failures: Mutex<Vec<(PayoutFailure, String)>>,
}

impl RecordingAdmin {
    pub fn failures(&self) -> Vec<(PayoutFailure, String)> {
        self.failures.lock().clone()
    }
}

#[async_trait]
impl AdminNotifier for RecordingAdmin {
    async fn notify_payout_failure(
        &self,
        failure: &PayoutFailure,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.failures
            .lock()
            .push((failure.clone(), reason.to_string()));
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// Breaker that opens on the first failure and probes once after 30s
pub fn hair_trigger() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 1,
        reset_timeout: Duration::from_secs(30),
        half_open_max_attempts: 1,
        volume_threshold: 1,
    }
}

/// Everything wired together over in-memory stores
pub struct Harness {
    pub registry: Arc<BreakerRegistry>,
    pub queues: Arc<IsolationQueues>,
    pub gateway: Arc<ScriptedGateway>,
    pub store: Arc<InMemoryStore>,
    pub admin: Arc<RecordingAdmin>,
    pub engine: Arc<SettlementEngine>,
    pub gate: CaptureGate,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_breakers(CircuitBreakerConfig::default(), IsolationConfig::default())
    }

    pub fn with_breakers(breakers: CircuitBreakerConfig, isolation: IsolationConfig) -> Self {
        let registry = Arc::new(BreakerRegistry::with_defaults(breakers));
        let queues = Arc::new(IsolationQueues::new(&isolation, Arc::clone(&registry)));
        let gateway = Arc::new(ScriptedGateway::default());
        let guarded = GuardedGateway::new(
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&queues),
            &PaymentConfig::default(),
        );
        let store = Arc::new(InMemoryStore::new());
        let admin = Arc::new(RecordingAdmin::default());
        let engine = Arc::new(SettlementEngine::new(
            Arc::clone(&store) as Arc<dyn SettlementStore>,
            guarded,
            FeeSchedule::default(),
            RetryPolicy::none(),
            Arc::clone(&admin) as Arc<dyn AdminNotifier>,
        ));
        let gate = CaptureGate::new(Arc::clone(&engine), RetryPolicy::none());
        Self {
            registry,
            queues,
            gateway,
            store,
            admin,
            engine,
            gate,
        }
    }

    /// Open a trip at 200.00 per seat and book one seat per passenger, each
    /// with pickup code `nnnn` and an authorized hold `order_bn`
    pub async fn trip_with_passengers(&self, trip_id: &str, passengers: usize) {
        let seats = u32::try_from(passengers).unwrap();
        let trip = self
            .engine
            .open_trip(NewTrip {
                id: trip_id.into(),
                driver_id: "driver-1".into(),
                beneficiary_id: "bene-driver-1".into(),
                fare_per_seat: Money::from_major(200),
                seats,
            })
            .await
            .unwrap();
        let per_seat = trip.breakdown.total_collected.minor() / i64::from(seats.max(1));
        for n in 1..=passengers {
            let booking = Booking::confirmed(
                format!("{trip_id}-b{n}"),
                trip_id,
                format!("p{n}"),
                1,
                Money::from_minor(per_seat),
            )
            .with_pickup_code(n.to_string().repeat(4));
            self.store.insert_booking(booking).await.unwrap();
        }
    }
}

/// Yield until `check` holds or the attempts run out
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    check()
}
