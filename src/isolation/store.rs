//! Queue storage
//!
//! [`QueueStore`] is the seam for a durable backing store; call sites only
//! see `IsolationQueues`. [`InMemoryQueueStore`] keeps outstanding items in
//! FIFO order and terminal items in a side list until they are purged.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::item::{QueueError, QueueItem, QueueItemStatus, QueueKind, QueueStats};

/// What to do when an enqueue finds the queue at capacity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverflowPolicy {
    /// Drop the oldest `ceil(capacity × ratio)` outstanding items (at least one)
    EvictOldest {
        /// Share of capacity to drop
        ratio: f64,
    },
    /// Refuse the new item
    Reject,
}

/// Where an accepted item landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    /// 1-based position among outstanding items
    pub position: usize,
    /// Items evicted to make room
    pub evicted: usize,
}

/// Storage for one isolation queue
#[async_trait]
pub trait QueueStore<P: Send + Sync + 'static>: Send + Sync {
    /// Queue this store holds
    fn kind(&self) -> QueueKind;

    /// Add a pending item, applying the overflow policy
    async fn enqueue(&self, item: QueueItem<P>) -> Result<PushOutcome, QueueError>;

    /// Claim up to `limit` pending items (oldest first) as processing
    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueItem<P>>, QueueError>;

    /// Look at up to `limit` pending items without claiming them
    async fn peek_pending(&self, limit: usize) -> Result<Vec<QueueItem<P>>, QueueError>;

    /// Write back an item after an attempt
    async fn update(&self, item: QueueItem<P>) -> Result<(), QueueError>;

    /// Drop terminal items last touched at or before `cutoff`. Failed items
    /// are kept unless `include_failed`.
    async fn purge(&self, cutoff: DateTime<Utc>, include_failed: bool)
    -> Result<usize, QueueError>;

    /// All items with `status`, oldest first
    async fn items_with_status(
        &self,
        status: QueueItemStatus,
    ) -> Result<Vec<QueueItem<P>>, QueueError>;

    /// Counts by status
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

struct Items<P> {
    live: VecDeque<QueueItem<P>>,
    terminal: Vec<QueueItem<P>>,
    evicted: u64,
}

/// Bounded in-memory queue. Contents are lost on restart.
pub struct InMemoryQueueStore<P> {
    kind: QueueKind,
    capacity: usize,
    policy: OverflowPolicy,
    items: Mutex<Items<P>>,
}

impl<P> std::fmt::Debug for InMemoryQueueStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let items = self.items.lock();
        f.debug_struct("InMemoryQueueStore")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("outstanding", &items.live.len())
            .field("terminal", &items.terminal.len())
            .finish()
    }
}

impl<P> InMemoryQueueStore<P> {
    /// Create an empty queue
    #[must_use]
    pub fn new(kind: QueueKind, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            kind,
            capacity,
            policy,
            items: Mutex::new(Items {
                live: VecDeque::with_capacity(capacity.min(1_024)),
                terminal: Vec::new(),
                evicted: 0,
            }),
        }
    }

    fn eviction_batch(&self, ratio: f64) -> usize {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let n = (self.capacity as f64 * ratio).ceil() as usize;
        n.max(1)
    }
}

#[async_trait]
impl<P> QueueStore<P> for InMemoryQueueStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn kind(&self) -> QueueKind {
        self.kind
    }

    async fn enqueue(&self, item: QueueItem<P>) -> Result<PushOutcome, QueueError> {
        let queue = self.kind.to_string();
        let mut items = self.items.lock();
        let mut evicted = 0;

        if items.live.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Reject => {
                    telemetry_metrics::counter!("settlement_queue_rejected_total", "queue" => queue)
                        .increment(1);
                    warn!(queue = %self.kind, capacity = self.capacity, "Queue full, rejecting item");
                    return Err(QueueError::Full {
                        kind: self.kind,
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::EvictOldest { ratio } => {
                    let n = self.eviction_batch(ratio).min(items.live.len());
                    items.live.drain(..n);
                    items.evicted += n as u64;
                    evicted = n;
                    telemetry_metrics::counter!("settlement_queue_evicted_total", "queue" => queue.clone())
                        .increment(n as u64);
                    warn!(queue = %self.kind, evicted = n, "Queue full, evicted oldest items");
                    if items.live.len() >= self.capacity {
                        return Err(QueueError::Full {
                            kind: self.kind,
                            capacity: self.capacity,
                        });
                    }
                }
            }
        }

        items.live.push_back(item);
        telemetry_metrics::counter!("settlement_queue_enqueued_total", "queue" => queue).increment(1);
        Ok(PushOutcome {
            position: items.live.len(),
            evicted,
        })
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<QueueItem<P>>, QueueError> {
        let mut items = self.items.lock();
        let claimed: Vec<QueueItem<P>> = items
            .live
            .iter_mut()
            .filter(|i| i.status == QueueItemStatus::Pending)
            .take(limit)
            .map(|i| {
                i.status = QueueItemStatus::Processing;
                i.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn peek_pending(&self, limit: usize) -> Result<Vec<QueueItem<P>>, QueueError> {
        let items = self.items.lock();
        Ok(items
            .live
            .iter()
            .filter(|i| i.status == QueueItemStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, item: QueueItem<P>) -> Result<(), QueueError> {
        let mut items = self.items.lock();
        let Some(idx) = items.live.iter().position(|i| i.id == item.id) else {
            // Evicted while in flight
            debug!(queue = %self.kind, id = %item.id, "Update for unknown item ignored");
            return Ok(());
        };
        if item.status.is_terminal() {
            items.live.remove(idx);
            items.terminal.push(item);
        } else {
            items.live[idx] = item;
        }
        Ok(())
    }

    async fn purge(
        &self,
        cutoff: DateTime<Utc>,
        include_failed: bool,
    ) -> Result<usize, QueueError> {
        let mut items = self.items.lock();
        let before = items.terminal.len();
        items.terminal.retain(|i| {
            let purgeable = i.status == QueueItemStatus::Completed || include_failed;
            !(purgeable && i.touched_at() <= cutoff)
        });
        Ok(before - items.terminal.len())
    }

    async fn items_with_status(
        &self,
        status: QueueItemStatus,
    ) -> Result<Vec<QueueItem<P>>, QueueError> {
        let items = self.items.lock();
        let matching = |i: &&QueueItem<P>| i.status == status;
        Ok(if status.is_terminal() {
            items.terminal.iter().filter(matching).cloned().collect()
        } else {
            items.live.iter().filter(matching).cloned().collect()
        })
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let items = self.items.lock();
        let mut stats = QueueStats {
            evicted: items.evicted,
            capacity: self.capacity,
            ..QueueStats::default()
        };
        for item in items.live.iter().chain(items.terminal.iter()) {
            match item.status {
                QueueItemStatus::Pending => stats.pending += 1,
                QueueItemStatus::Processing => stats.processing += 1,
                QueueItemStatus::Completed => stats.completed += 1,
                QueueItemStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
