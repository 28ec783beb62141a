//! Failure isolation queues
//!
//! Calls to a degraded dependency are parked here so that the operation that
//! needed them can carry on. Two queues with different overflow policies:
//!
//! - notifications: high volume, lossy; when full the oldest 10% are dropped
//! - payments: low volume, lossless; when full new items are rejected
//!
//! Items are replayed by [`IsolationQueues::reprocess_notifications`] and
//! [`IsolationQueues::reprocess_payments`] (or the background task from
//! [`spawn_sweeper`]) through the same breaker that diverted them. An item
//! that fails `max_attempts` times is marked failed; failed payment items are
//! kept for manual reconciliation. Payment items that complete or fail come
//! back as [`SettledPayment`]s so their outcome can be written to the trip.

mod item;
mod store;

pub use item::{
    EnqueueReceipt, QueueError, QueueItem, QueueItemStatus, QueueKind, QueueStats,
    ReprocessReport,
};
pub use store::{InMemoryQueueStore, OverflowPolicy, PushOutcome, QueueStore};

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IsolationConfig;
use crate::failsafe::{BreakerError, BreakerRegistry, CircuitState, dependencies};
use crate::notify::{DeliveryReceipt, NotificationDispatch, NotificationRequest};
use crate::payment::{GatewayReceipt, PaymentCall, PaymentGateway};

/// Outcome of a protected notification send. The caller always proceeds.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Delivered directly
    Sent(DeliveryReceipt),
    /// Deferred for reprocessing
    Queued {
        /// Queue receipt
        receipt: EnqueueReceipt,
        /// Why the direct send was not possible
        reason: String,
    },
    /// Could neither send nor queue
    Dropped {
        /// Why
        reason: String,
    },
}

/// Counts for both queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IsolationStats {
    /// Notification queue
    pub notifications: QueueStats,
    /// Payment queue
    pub payments: QueueStats,
}

/// Final result of a queued gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledPayment {
    /// Queue item id
    pub item_id: Uuid,
    /// Trip correlation key
    pub trip_id: Option<String>,
    /// The call that was replayed
    pub call: PaymentCall,
    /// Gateway receipt, or the last error once the attempt budget ran out
    pub result: Result<GatewayReceipt, String>,
}

/// Result of one payment reprocessing pass
#[derive(Debug, Clone, Default)]
pub struct PaymentReplay {
    /// Counters
    pub report: ReprocessReport,
    /// Items that completed or failed for good in this pass
    pub settled: Vec<SettledPayment>,
}

/// Replays queued gateway calls and writes their outcome back
#[async_trait]
pub trait PaymentReplayer: Send + Sync {
    /// Run one pass over at most `batch_size` items
    async fn replay_payments(&self, batch_size: usize) -> Result<ReprocessReport, QueueError>;
}

type Settled<P, T> = Vec<(QueueItem<P>, Result<T, String>)>;

/// The notification and payment isolation queues
pub struct IsolationQueues {
    registry: Arc<BreakerRegistry>,
    notifications: Arc<dyn QueueStore<NotificationRequest>>,
    payments: Arc<dyn QueueStore<PaymentCall>>,
    config: IsolationConfig,
}

impl std::fmt::Debug for IsolationQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationQueues")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IsolationQueues {
    /// In-memory queues sized from `config`
    #[must_use]
    pub fn new(config: &IsolationConfig, registry: Arc<BreakerRegistry>) -> Self {
        let notifications = InMemoryQueueStore::new(
            QueueKind::Notification,
            config.notification_capacity,
            OverflowPolicy::EvictOldest {
                ratio: config.notification_eviction_ratio,
            },
        );
        let payments = InMemoryQueueStore::new(
            QueueKind::Payment,
            config.payment_capacity,
            OverflowPolicy::Reject,
        );
        Self::with_stores(config, registry, Arc::new(notifications), Arc::new(payments))
    }

    /// Queues over caller-supplied (e.g. durable) stores
    #[must_use]
    pub fn with_stores(
        config: &IsolationConfig,
        registry: Arc<BreakerRegistry>,
        notifications: Arc<dyn QueueStore<NotificationRequest>>,
        payments: Arc<dyn QueueStore<PaymentCall>>,
    ) -> Self {
        Self {
            registry,
            notifications,
            payments,
            config: config.clone(),
        }
    }

    /// Breaker registry shared with call sites
    #[must_use]
    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    /// Queue configuration
    #[must_use]
    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    // ── Enqueue ───────────────────────────────────────────────────────────────

    /// Park a notification
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the store fails.
    pub async fn enqueue_notification(
        &self,
        request: NotificationRequest,
    ) -> Result<EnqueueReceipt, QueueError> {
        let item = QueueItem::new(QueueKind::Notification, request);
        self.push(
            self.notifications.as_ref(),
            item,
            self.config.notification_item_time,
        )
        .await
    }

    /// Park a payment gateway call
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the payment queue is at capacity.
    pub async fn enqueue_payment(
        &self,
        call: PaymentCall,
        trip_id: Option<&str>,
    ) -> Result<EnqueueReceipt, QueueError> {
        let mut item = QueueItem::new(QueueKind::Payment, call);
        if let Some(trip_id) = trip_id {
            item = item.with_trip(trip_id);
        }
        self.push(self.payments.as_ref(), item, self.config.payment_item_time)
            .await
    }

    async fn push<P: Send + Sync + 'static>(
        &self,
        store: &dyn QueueStore<P>,
        item: QueueItem<P>,
        per_item: Duration,
    ) -> Result<EnqueueReceipt, QueueError> {
        let id = item.id;
        let pushed = store.enqueue(item).await?;
        let position = u32::try_from(pushed.position).unwrap_or(u32::MAX);
        debug!(queue = %store.kind(), %id, position, "Item queued");
        Ok(EnqueueReceipt {
            id,
            position: pushed.position,
            estimated_wait: per_item.saturating_mul(position),
            evicted: pushed.evicted,
        })
    }

    // ── Protected call sites ──────────────────────────────────────────────────

    /// Send a notification through its channel breaker, queueing it when the
    /// breaker is open or the send fails or times out
    pub async fn dispatch_notification(
        &self,
        dispatcher: &dyn NotificationDispatch,
        request: NotificationRequest,
    ) -> DispatchOutcome {
        let breaker = self.registry.get(request.channel.dependency());

        let reason = if breaker.state() == CircuitState::Open {
            format!("circuit '{}' open", breaker.name())
        } else {
            match breaker
                .execute_with_timeout(self.config.notification_timeout, || {
                    dispatcher.send(&request)
                })
                .await
            {
                Ok(receipt) => return DispatchOutcome::Sent(receipt),
                Err(e) => e.to_string(),
            }
        };

        match self.enqueue_notification(request).await {
            Ok(receipt) => {
                debug!(reason = %reason, position = receipt.position, "Notification queued");
                DispatchOutcome::Queued { receipt, reason }
            }
            Err(e) => {
                warn!(error = %e, reason = %reason, "Notification dropped");
                DispatchOutcome::Dropped {
                    reason: format!("{reason}; {e}"),
                }
            }
        }
    }

    // ── Reprocessing ──────────────────────────────────────────────────────────

    /// Replay up to `batch_size` queued notifications. Items whose channel
    /// breaker is open stay pending without spending an attempt.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the store fails.
    pub async fn reprocess_notifications(
        &self,
        dispatcher: &dyn NotificationDispatch,
        batch_size: usize,
    ) -> Result<ReprocessReport, QueueError> {
        let (report, _) = self
            .reprocess(
                self.notifications.as_ref(),
                batch_size,
                self.config.notification_timeout,
                |request: &NotificationRequest| request.channel.dependency(),
                |request| async move { dispatcher.send(&request).await },
            )
            .await?;
        Ok(report)
    }

    /// Replay up to `batch_size` queued gateway calls, each raced against
    /// `timeout`. Nothing is attempted while the gateway breaker is open.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the store fails.
    pub async fn reprocess_payments(
        &self,
        gateway: &dyn PaymentGateway,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<PaymentReplay, QueueError> {
        if self.registry.get(dependencies::PAYMENT_GATEWAY).state() == CircuitState::Open {
            let pending = self.payments.stats().await?.pending;
            debug!(pending, "Payment gateway circuit open, skipping reprocessing");
            return Ok(PaymentReplay {
                report: ReprocessReport {
                    skipped: pending,
                    remaining: pending,
                    ..ReprocessReport::default()
                },
                settled: Vec::new(),
            });
        }
        let (report, settled) = self
            .reprocess(
                self.payments.as_ref(),
                batch_size,
                timeout,
                |_: &PaymentCall| dependencies::PAYMENT_GATEWAY,
                |call| async move { call.execute(gateway).await },
            )
            .await?;
        let settled = settled
            .into_iter()
            .map(|(item, result)| SettledPayment {
                item_id: item.id,
                trip_id: item.trip_id,
                call: item.payload,
                result,
            })
            .collect();
        Ok(PaymentReplay { report, settled })
    }

    async fn reprocess<P, B, F, Fut, T, E>(
        &self,
        store: &dyn QueueStore<P>,
        batch_size: usize,
        timeout: Duration,
        breaker_for: B,
        send: F,
    ) -> Result<(ReprocessReport, Settled<P, T>), QueueError>
    where
        P: Clone + Send + Sync + 'static,
        B: Fn(&P) -> &'static str,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut report = ReprocessReport::default();
        let mut settled = Vec::new();

        for mut item in store.dequeue(batch_size).await? {
            let breaker = self.registry.get(breaker_for(&item.payload));
            let payload = item.payload.clone();
            let result = breaker
                .execute_with_timeout(timeout, || send(payload))
                .await;

            match result {
                Ok(value) => {
                    item.attempts += 1;
                    item.status = QueueItemStatus::Completed;
                    item.last_attempt_at = Some(Utc::now());
                    item.last_error = None;
                    report.processed += 1;
                    report.succeeded += 1;
                    settled.push((item.clone(), Ok(value)));
                }
                Err(BreakerError::Open { .. }) => {
                    item.status = QueueItemStatus::Pending;
                    report.skipped += 1;
                }
                Err(e) => {
                    item.attempts += 1;
                    item.last_attempt_at = Some(Utc::now());
                    item.last_error = Some(e.to_string());
                    report.processed += 1;
                    if item.attempts >= self.config.max_attempts {
                        item.status = QueueItemStatus::Failed;
                        report.failed += 1;
                        settled.push((item.clone(), Err(e.to_string())));
                        warn!(
                            queue = %item.kind,
                            id = %item.id,
                            trip_id = item.trip_id.as_deref().unwrap_or("-"),
                            attempts = item.attempts,
                            error = %e,
                            "Queued item failed permanently"
                        );
                    } else {
                        item.status = QueueItemStatus::Pending;
                        report.requeued += 1;
                    }
                }
            }
            store.update(item).await?;
        }

        report.remaining = store.stats().await?.pending;
        if report.processed > 0 {
            info!(
                queue = %store.kind(),
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                remaining = report.remaining,
                "Reprocessing pass finished"
            );
        }
        Ok((report, settled))
    }

    // ── Maintenance ───────────────────────────────────────────────────────────

    /// Purge terminal notification items and completed payment items older
    /// than the retention window. Failed payment items are never purged.
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if a store fails.
    pub async fn cleanup(&self) -> Result<usize, QueueError> {
        let retention = chrono::Duration::from_std(self.config.terminal_retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let notifications = self.notifications.purge(cutoff, true).await?;
        let payments = self.payments.purge(cutoff, false).await?;
        if notifications + payments > 0 {
            debug!(notifications, payments, "Purged terminal queue items");
        }
        Ok(notifications + payments)
    }

    /// Item counts for both queues
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if a store fails.
    pub async fn stats(&self) -> Result<IsolationStats, QueueError> {
        Ok(IsolationStats {
            notifications: self.notifications.stats().await?,
            payments: self.payments.stats().await?,
        })
    }

    /// Payment items awaiting manual reconciliation
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the store fails.
    pub async fn failed_payments(&self) -> Result<Vec<QueueItem<PaymentCall>>, QueueError> {
        self.payments
            .items_with_status(QueueItemStatus::Failed)
            .await
    }

    /// Payment items still waiting to be replayed
    ///
    /// # Errors
    ///
    /// [`QueueError::Backend`] if the store fails.
    pub async fn pending_payments(
        &self,
        limit: usize,
    ) -> Result<Vec<QueueItem<PaymentCall>>, QueueError> {
        self.payments.peek_pending(limit).await
    }
}

/// Spawn a background task that replays both queues and purges old items
/// every `sweep_interval`
///
/// Payment items are replayed through `payments` so their outcome reaches the
/// trip. The task holds only weak references and ends once `queues` is
/// dropped everywhere else.
pub fn spawn_sweeper(
    queues: &Arc<IsolationQueues>,
    dispatcher: Arc<dyn NotificationDispatch>,
    payments: Weak<dyn PaymentReplayer>,
) -> JoinHandle<()> {
    let batch_size = queues.config.batch_size;
    let interval = queues.config.sweep_interval;
    let weak_queues = Arc::downgrade(queues);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(queues) = weak_queues.upgrade() else {
                debug!("Isolation queues dropped, stopping sweeper");
                break;
            };
            if let Err(e) = queues
                .reprocess_notifications(dispatcher.as_ref(), batch_size)
                .await
            {
                warn!(error = %e, "Notification reprocessing failed");
            }
            if let Some(replayer) = payments.upgrade() {
                if let Err(e) = replayer.replay_payments(batch_size).await {
                    warn!(error = %e, "Payment reprocessing failed");
                }
            }
            if let Err(e) = queues.cleanup().await {
                warn!(error = %e, "Queue cleanup failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::config::CircuitBreakerConfig;
    use crate::notify::{Channel, NotifyError};

    struct FlakyDispatch {
        failures_left: AtomicU32,
        sent: AtomicU32,
    }

    impl FlakyDispatch {
        fn failing(n: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(n),
                sent: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationDispatch for FlakyDispatch {
        async fn send(&self, _: &NotificationRequest) -> Result<DeliveryReceipt, NotifyError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(NotifyError::Provider("ECONNRESET".into()));
            }
            let n = self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryReceipt {
                message_id: format!("msg-{n}"),
            })
        }
    }

    fn queues(breaker: CircuitBreakerConfig) -> IsolationQueues {
        let config = IsolationConfig {
            notification_capacity: 10,
            payment_capacity: 2,
            ..IsolationConfig::default()
        };
        IsolationQueues::new(&config, Arc::new(BreakerRegistry::with_defaults(breaker)))
    }

    fn lenient() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 100,
            ..CircuitBreakerConfig::default()
        }
    }

    fn sms(n: u32) -> NotificationRequest {
        NotificationRequest::new(Channel::Sms, format!("+9100000000{n}"), "Your ride is here")
    }

    #[tokio::test]
    async fn failed_send_is_queued_and_caller_proceeds() {
        // GIVEN: a provider that fails once
        let q = queues(lenient());
        let dispatcher = FlakyDispatch::failing(1);

        // WHEN: dispatching
        let outcome = q.dispatch_notification(&dispatcher, sms(1)).await;

        // THEN: it is queued, not propagated
        let DispatchOutcome::Queued { receipt, reason } = outcome else {
            panic!("expected queued, got {outcome:?}");
        };
        assert_eq!(receipt.position, 1);
        assert_eq!(receipt.estimated_wait, Duration::from_millis(100));
        assert!(reason.contains("ECONNRESET"));

        // AND: reprocessing delivers it
        let report = q.reprocess_notifications(&dispatcher, 10).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(q.stats().await.unwrap().notifications.completed, 1);
    }

    #[tokio::test]
    async fn open_breaker_queues_without_calling() {
        let q = queues(CircuitBreakerConfig {
            failure_threshold: 1,
            volume_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let dispatcher = FlakyDispatch::failing(1);
        q.dispatch_notification(&dispatcher, sms(1)).await;
        assert_eq!(q.registry().get("sms").state(), CircuitState::Open);

        let outcome = q.dispatch_notification(&dispatcher, sms(2)).await;
        assert!(matches!(outcome, DispatchOutcome::Queued { ref reason, .. } if reason.contains("open")));
        assert_eq!(dispatcher.sent.load(Ordering::SeqCst), 0);

        // Reprocessing leaves both pending without spending attempts
        let report = q.reprocess_notifications(&dispatcher, 10).await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.processed, 0);
        let pending = q.notifications.peek_pending(10).await.unwrap();
        assert!(pending.iter().all(|i| i.attempts == 0));
    }

    #[tokio::test]
    async fn item_fails_after_three_attempts() {
        let q = queues(lenient());
        let dispatcher = FlakyDispatch::failing(100);
        q.enqueue_notification(sms(1)).await.unwrap();

        let first = q.reprocess_notifications(&dispatcher, 10).await.unwrap();
        let second = q.reprocess_notifications(&dispatcher, 10).await.unwrap();
        let third = q.reprocess_notifications(&dispatcher, 10).await.unwrap();

        assert_eq!((first.requeued, second.requeued, third.failed), (1, 1, 1));
        assert_eq!(third.remaining, 0);
        let stats = q.stats().await.unwrap().notifications;
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_failed_payments() {
        let config = IsolationConfig {
            terminal_retention: Duration::ZERO,
            ..IsolationConfig::default()
        };
        let q = IsolationQueues::new(&config, Arc::new(BreakerRegistry::with_defaults(lenient())));
        let receipt = q
            .enqueue_payment(
                PaymentCall::Status {
                    order_id: "order_1".into(),
                },
                Some("t1"),
            )
            .await
            .unwrap();
        let mut item = q.payments.dequeue(1).await.unwrap().remove(0);
        assert_eq!(item.id, receipt.id);
        item.status = QueueItemStatus::Failed;
        item.last_attempt_at = Some(Utc::now() - chrono::Duration::hours(2));
        q.payments.update(item).await.unwrap();

        q.cleanup().await.unwrap();

        let failed = q.failed_payments().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].trip_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn payment_queue_rejects_at_capacity() {
        let q = queues(lenient());
        let call = || PaymentCall::Status {
            order_id: "o".into(),
        };
        q.enqueue_payment(call(), None).await.unwrap();
        q.enqueue_payment(call(), None).await.unwrap();
        let err = q.enqueue_payment(call(), None).await.unwrap_err();
        assert_eq!(err.code(), "QUEUE_FULL");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_queues_are_dropped() {
        struct CountingReplayer(AtomicU32);

        #[async_trait]
        impl PaymentReplayer for CountingReplayer {
            async fn replay_payments(&self, _: usize) -> Result<ReprocessReport, QueueError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ReprocessReport::default())
            }
        }

        let q = Arc::new(queues(lenient()));
        let dispatcher = Arc::new(FlakyDispatch::failing(0));
        let replayer = Arc::new(CountingReplayer(AtomicU32::new(0)));
        q.enqueue_notification(sms(1)).await.unwrap();

        let handle = spawn_sweeper(
            &q,
            Arc::clone(&dispatcher) as Arc<dyn NotificationDispatch>,
            Arc::downgrade(&replayer) as Weak<dyn PaymentReplayer>,
        );

        // Ticks at 0s and 30s
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(dispatcher.sent.load(Ordering::SeqCst), 1);
        assert_eq!(replayer.0.load(Ordering::SeqCst), 2);

        drop(q);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn replayed_payments_report_their_outcome() {
        struct Outage;

        #[async_trait]
        impl PaymentGateway for Outage {
            async fn create_order(
                &self,
                order: &crate::payment::OrderRequest,
            ) -> Result<GatewayReceipt, crate::payment::GatewayError> {
                Ok(GatewayReceipt {
                    reference: format!("cf_{}", order.order_id),
                    status: "ACTIVE".into(),
                })
            }
            async fn capture_payment(
                &self,
                _: &str,
                _: crate::payment::Money,
            ) -> Result<GatewayReceipt, crate::payment::GatewayError> {
                Err(crate::payment::GatewayError::Network("ECONNRESET".into()))
            }
            async fn create_refund(
                &self,
                _: &str,
                _: crate::payment::Money,
                _: &str,
                _: &str,
            ) -> Result<GatewayReceipt, crate::payment::GatewayError> {
                Err(crate::payment::GatewayError::Network("ECONNRESET".into()))
            }
            async fn initiate_payout(
                &self,
                _: &str,
                _: crate::payment::Money,
                _: &str,
            ) -> Result<GatewayReceipt, crate::payment::GatewayError> {
                Err(crate::payment::GatewayError::Network("ECONNRESET".into()))
            }
            async fn get_payment_status(
                &self,
                _: &str,
            ) -> Result<GatewayReceipt, crate::payment::GatewayError> {
                Err(crate::payment::GatewayError::Network("ECONNRESET".into()))
            }
        }

        // GIVEN: a queued order and a queued capture, against a gateway that
        // accepts orders but keeps failing captures
        let q = queues(lenient());
        q.enqueue_payment(
            PaymentCall::CreateOrder(crate::payment::OrderRequest {
                order_id: "order_b1".into(),
                amount: crate::payment::Money::from_major(210),
                customer_id: "p1".into(),
            }),
            Some("t1"),
        )
        .await
        .unwrap();
        q.enqueue_payment(
            PaymentCall::Capture {
                order_id: "order_b2".into(),
                amount: crate::payment::Money::from_major(210),
            },
            Some("t1"),
        )
        .await
        .unwrap();

        // WHEN: replaying until the attempt budget is spent
        let timeout = Duration::from_secs(1);
        let first = q.reprocess_payments(&Outage, timeout, 10).await.unwrap();
        let second = q.reprocess_payments(&Outage, timeout, 10).await.unwrap();
        let third = q.reprocess_payments(&Outage, timeout, 10).await.unwrap();

        // THEN: the order settles on the first pass with its receipt
        let [order] = first.settled.as_slice() else {
            panic!("expected the order only, got {:?}", first.settled);
        };
        assert!(matches!(order.call, PaymentCall::CreateOrder(_)));
        assert_eq!(order.result.as_ref().map(|r| r.reference.as_str()), Ok("cf_order_b1"));

        // AND: the capture settles as failed once, on the last attempt
        assert!(second.settled.is_empty());
        let [capture] = third.settled.as_slice() else {
            panic!("expected the capture only, got {:?}", third.settled);
        };
        assert_eq!(capture.trip_id.as_deref(), Some("t1"));
        assert!(capture.result.as_ref().is_err_and(|e| e.contains("ECONNRESET")));
    }
}
