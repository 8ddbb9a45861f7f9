//! Event types for the DSW event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! pipeline, the verification timer and the status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::NotificationKind;

/// Pipeline event types
///
/// Broadcast via [`EventBus`]; serializable so they can be forwarded to
/// external observers unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A post produced a persisted event
    PostEnriched {
        post_id: Uuid,
        event_id: Uuid,
        severity: f32,
        location: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A post was filtered, deduplicated or rejected
    PostFiltered {
        post_id: Uuid,
        /// "filtered", "duplicate" or "rejected"
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Spike detector created an alert
    AlertCreated {
        alert_id: Uuid,
        location: String,
        severity: f32,
        event_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// An event flipped to verified
    EventVerified {
        event_id: Uuid,
        verification_id: Uuid,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// An alert flipped to verified through one of its events
    AlertVerified {
        alert_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Dispatcher finished (or skipped) a notification
    NotificationDispatched {
        kind: NotificationKind,
        subject_id: Option<Uuid>,
        successful: u32,
        failed: u32,
        skipped: bool,
        timestamp: DateTime<Utc>,
    },

    /// Orchestrator finished one cycle
    CycleCompleted {
        cycle: u64,
        posts_processed: usize,
        alerts_created: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Periodic health summary
    SystemStatus {
        status: String,
        events_created: u64,
        alerts_created: u64,
        notifications_sent: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::PostEnriched { .. } => "PostEnriched",
            PipelineEvent::PostFiltered { .. } => "PostFiltered",
            PipelineEvent::AlertCreated { .. } => "AlertCreated",
            PipelineEvent::EventVerified { .. } => "EventVerified",
            PipelineEvent::AlertVerified { .. } => "AlertVerified",
            PipelineEvent::NotificationDispatched { .. } => "NotificationDispatched",
            PipelineEvent::CycleCompleted { .. } => "CycleCompleted",
            PipelineEvent::SystemStatus { .. } => "SystemStatus",
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use dsw_common::events::{EventBus, PipelineEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PipelineEvent::AlertVerified {
///     alert_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
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
