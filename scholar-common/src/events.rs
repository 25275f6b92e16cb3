//! Event types for the scholar event system
//!
//! Orchestration progress is broadcast to any interested subscriber (status
//! pages, log shippers, tests). Emission never blocks a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Ingest lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// A job left `pending` and began executing stages
    JobStarted {
        job_id: Uuid,
        /// "directory_scrape" or "enrichment_batch"
        kind: String,
        unit_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage was entered
    StageStarted {
        job_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage produced its output
    StageCompleted {
        job_id: Uuid,
        stage: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stage raised; the job is aborted
    StageFailed {
        job_id: Uuid,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A job reached a terminal status
    JobCompleted {
        job_id: Uuid,
        status: String,
        found: usize,
        created: usize,
        updated: usize,
        skipped: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A multi-job run finished all of its batches
    BatchCompleted {
        total: usize,
        successful: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::JobStarted { .. } => "JobStarted",
            IngestEvent::StageStarted { .. } => "StageStarted",
            IngestEvent::StageCompleted { .. } => "StageCompleted",
            IngestEvent::StageFailed { .. } => "StageFailed",
            IngestEvent::JobCompleted { .. } => "JobCompleted",
            IngestEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }
}

/// Broadcast bus for [`IngestEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
