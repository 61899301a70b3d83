//! Event types for the processing pipeline
//!
//! Provides the shared event definitions and EventBus used to report run
//! progress and to notify reader-side caches after an activation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Instance, RunStatus};

/// Processing event types
///
/// Events are broadcast via EventBus and are serializable so that status
/// tooling can forward them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcessingEvent {
    /// A processing job started writing to `instance`
    JobStarted {
        job_id: Uuid,
        instance: Instance,
        provider_ids: Vec<i32>,
        timestamp: DateTime<Utc>,
    },

    /// One provider's run started
    ProviderRunStarted {
        run_id: Uuid,
        data_provider_id: i32,
        instance: Instance,
        timestamp: DateTime<Utc>,
    },

    /// A verbatim chunk was transformed and written
    ///
    /// Emitted once per chunk; not persisted.
    ChunkProcessed {
        run_id: Uuid,
        data_provider_id: i32,
        /// Verbatim records read so far
        read: u64,
        /// Processed observations written so far
        processed: u64,
        /// Invalid observations so far
        invalid: u64,
        timestamp: DateTime<Utc>,
    },

    /// One provider's run reached a terminal status
    ProviderRunCompleted {
        run_id: Uuid,
        data_provider_id: i32,
        status: RunStatus,
        count: u64,
        timestamp: DateTime<Utc>,
    },

    /// The active-instance indicator changed
    ///
    /// Readers caching the active instance must drop their cached value.
    ActiveInstanceChanged {
        previous: Instance,
        active: Instance,
        /// True when set through the operator override
        overridden: bool,
        timestamp: DateTime<Utc>,
    },

    /// Reader-side caches were cleared
    CacheCleared {
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers see a `Lagged` error instead of stalling producers.
///
/// # Examples
///
/// ```
/// use sos_common::events::{EventBus, ProcessingEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ProcessingEvent::CacheCleared {
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(ProcessingEvent::CacheCleared { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProcessingEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ProcessingEvent,
    ) -> Result<usize, broadcast::error::SendError<ProcessingEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ProcessingEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
