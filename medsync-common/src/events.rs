//! Event types for the MedSync event system
//!
//! Provides the shared `SyncEvent` definitions and the `EventBus` used to
//! broadcast job progress to SSE subscribers and internal listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// MedSync event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission. All events carry a timestamp so that late subscribers can
/// order what they observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A sync job changed state (Queued → Fetching, Fetching → RateLimited, ...)
    JobStateChanged {
        job_id: Uuid,
        source_id: String,
        old_state: String,
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// One page of a source finished the fetch → parse → ingest → checkpoint
    /// cycle. `sequence` is the committed checkpoint sequence number.
    PageCompleted {
        job_id: Uuid,
        source_id: String,
        sequence: u64,
        records: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch of canonical records was durably committed.
    BatchCommitted {
        source_id: String,
        dataset_kind: String,
        batch_size: usize,
        new_records: usize,
        exact_duplicates: usize,
        merged: usize,
        timestamp: DateTime<Utc>,
    },

    /// A near-duplicate record was consolidated into an existing row.
    RecordsMerged {
        dataset_kind: String,
        winner: Uuid,
        similarity: f64,
        policy: String,
        timestamp: DateTime<Utc>,
    },

    /// Storage governor paused intake (managed tree over budget).
    StoragePaused {
        used_bytes: u64,
        budget_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Storage governor resumed intake (free space recovered).
    StorageResumed {
        used_bytes: u64,
        budget_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A sync job reached Completed.
    JobCompleted {
        job_id: Uuid,
        source_id: String,
        items_processed: u64,
        items_failed: u64,
        duration_seconds: u64,
        timestamp: DateTime<Utc>,
    },

    /// A sync job reached Failed (consecutive-failure budget exhausted).
    JobFailed {
        job_id: Uuid,
        source_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event type name for SSE `event:` fields and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::JobStateChanged { .. } => "JobStateChanged",
            SyncEvent::PageCompleted { .. } => "PageCompleted",
            SyncEvent::BatchCommitted { .. } => "BatchCommitted",
            SyncEvent::RecordsMerged { .. } => "RecordsMerged",
            SyncEvent::StoragePaused { .. } => "StoragePaused",
            SyncEvent::StorageResumed { .. } => "StorageResumed",
            SyncEvent::JobCompleted { .. } => "JobCompleted",
            SyncEvent::JobFailed { .. } => "JobFailed",
        }
    }
}

/// Broadcast bus for SyncEvents
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lag and drop
/// old events rather than blocking emitters.
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error if nobody is listening.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// Progress events are advisory; emitters must not fail because nothing
    /// is connected yet.
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}
