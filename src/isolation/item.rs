//! Queue items and enqueue results

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which isolation queue an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// High volume, lossy
    Notification,
    /// Low volume, lossless
    Payment,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notification => f.write_str("notification"),
            Self::Payment => f.write_str("payment"),
        }
    }
}

/// Processing status of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    /// Waiting for the next reprocessing pass
    Pending,
    /// Claimed by a reprocessing pass
    Processing,
    /// Sent successfully
    Completed,
    /// Gave up after the attempt budget
    Failed,
}

impl QueueItemStatus {
    /// Completed or failed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A deferred dependency call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem<P> {
    /// Item id
    pub id: Uuid,
    /// Queue
    pub kind: QueueKind,
    /// The call to replay
    pub payload: P,
    /// Attempts made by reprocessing
    pub attempts: u32,
    /// When the item was queued
    pub created_at: DateTime<Utc>,
    /// Last reprocessing attempt (or terminal transition)
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Status
    pub status: QueueItemStatus,
    /// Trip correlation key (payment items)
    pub trip_id: Option<String>,
    /// Error from the most recent attempt
    pub last_error: Option<String>,
}

impl<P> QueueItem<P> {
    /// New pending item
    #[must_use]
    pub fn new(kind: QueueKind, payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            status: QueueItemStatus::Pending,
            trip_id: None,
            last_error: None,
        }
    }

    /// Attach a trip correlation key
    #[must_use]
    pub fn with_trip(mut self, trip_id: impl Into<String>) -> Self {
        self.trip_id = Some(trip_id.into());
        self
    }

    /// Time the item last changed, for retention
    #[must_use]
    pub fn touched_at(&self) -> DateTime<Utc> {
        self.last_attempt_at.unwrap_or(self.created_at)
    }
}

/// Accepted enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    /// Item id
    pub id: Uuid,
    /// 1-based position among outstanding items
    pub position: usize,
    /// Rough wait before the item is replayed
    #[serde(rename = "estimated_wait_ms", serialize_with = "as_millis")]
    pub estimated_wait: Duration,
    /// Items dropped to make room
    pub evicted: usize,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Isolation queue errors
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Queue at capacity and its policy is to reject
    #[error("{kind} queue is full ({capacity} items)")]
    Full {
        /// Queue
        kind: QueueKind,
        /// Configured capacity
        capacity: usize,
    },

    /// Backing store failure
    #[error("Queue store error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Full { .. } => "QUEUE_FULL",
            Self::Backend(_) => "QUEUE_STORE_ERROR",
        }
    }
}

/// Per-status item counts of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pending
    pub pending: usize,
    /// Processing
    pub processing: usize,
    /// Completed, not yet purged
    pub completed: usize,
    /// Failed, not yet purged
    pub failed: usize,
    /// Evicted since start
    pub evicted: u64,
    /// Configured capacity
    pub capacity: usize,
}

impl QueueStats {
    /// Items counted against capacity
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}

/// Result of one reprocessing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReprocessReport {
    /// Items attempted
    pub processed: usize,
    /// Attempts that succeeded
    pub succeeded: usize,
    /// Items that reached the attempt budget in this pass
    pub failed: usize,
    /// Items that failed and went back to pending
    pub requeued: usize,
    /// Items not attempted because their breaker was open
    pub skipped: usize,
    /// Pending items left afterwards
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_serializes_wait_in_millis() {
        let receipt = EnqueueReceipt {
            id: Uuid::nil(),
            position: 3,
            estimated_wait: Duration::from_millis(1_500),
            evicted: 0,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["estimated_wait_ms"], 1_500);
        assert_eq!(json["position"], 3);
    }

    #[test]
    fn touched_at_prefers_last_attempt() {
        let mut item = QueueItem::new(QueueKind::Payment, ()).with_trip("t1");
        assert_eq!(item.touched_at(), item.created_at);
        let later = item.created_at + chrono::Duration::seconds(5);
        item.last_attempt_at = Some(later);
        assert_eq!(item.touched_at(), later);
        assert_eq!(item.trip_id.as_deref(), Some("t1"));
    }
}
