//! # Bus Events
//!
//! Defines all message types that flow through the shared bus as one
//! tagged union. Request-shaped variants carry a correlation id and
//! map to a response kind; responders echo the correlation id back.

use serde::{Deserialize, Serialize};
use shared_types::StateSnapshot;
use uuid::Uuid;

/// All events that can be published to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusEvent {
    // =========================================================================
    // STATE MANAGEMENT
    // =========================================================================
    /// A key's current snapshot changed.
    StateChanged {
        key: String,
        snapshot: StateSnapshot,
    },

    // =========================================================================
    // RECOVERY
    // =========================================================================
    /// Ask an external collaborator to retry a failed operation.
    /// Response: `RetryResolved` with the same correlation id.
    RetryRequested {
        correlation_id: Uuid,
        state_key: String,
        attempt: u32,
    },

    /// Result of a retry request.
    RetryResolved {
        correlation_id: Uuid,
        state_key: String,
        success: bool,
        detail: Option<String>,
    },

    /// Ask an external collaborator to perform a manual merge.
    /// Response: `MergeResolved` with the same correlation id.
    MergeRequested {
        correlation_id: Uuid,
        state_key: String,
    },

    /// Result of a manual merge request.
    MergeResolved {
        correlation_id: Uuid,
        state_key: String,
        success: bool,
    },

    // =========================================================================
    // SCHEDULER
    // =========================================================================
    /// The scheduler loop started.
    SchedulerStarted { check_interval_ms: u64 },

    /// The scheduler loop stopped.
    SchedulerStopped,

    /// One due-check sweep finished.
    SchedulerSwept {
        checked_at: u64,
        triggered: usize,
        total_items: usize,
    },

    // =========================================================================
    // PUBLISHING
    // =========================================================================
    /// Trigger publication of a due plan item.
    /// Response: `PublishResolved` with the same correlation id.
    PublishRequested {
        correlation_id: Uuid,
        item_id: String,
    },

    /// Acknowledgment of a publish trigger.
    PublishResolved {
        correlation_id: Uuid,
        item_id: String,
        success: bool,
        error: Option<String>,
    },

    /// Progress report for an in-flight publication.
    PublishProgress {
        item_id: String,
        stage: PublishStage,
        percent: u8,
        error: Option<String>,
    },

    /// A publication (or a whole sweep) failed outside the
    /// request/response path.
    PublishFailed {
        item_id: Option<String>,
        error: String,
        timestamp: u64,
    },

    /// A plan item's status was updated.
    PlanItemUpdated {
        item_id: String,
        status: PlanItemStatus,
        error: Option<String>,
        timestamp: u64,
    },
}

impl BusEvent {
    /// Get the kind discriminant for subscription matching.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::StateChanged { .. } => MessageKind::StateChanged,
            Self::RetryRequested { .. } => MessageKind::RetryRequested,
            Self::RetryResolved { .. } => MessageKind::RetryResolved,
            Self::MergeRequested { .. } => MessageKind::MergeRequested,
            Self::MergeResolved { .. } => MessageKind::MergeResolved,
            Self::SchedulerStarted { .. } => MessageKind::SchedulerStarted,
            Self::SchedulerStopped => MessageKind::SchedulerStopped,
            Self::SchedulerSwept { .. } => MessageKind::SchedulerSwept,
            Self::PublishRequested { .. } => MessageKind::PublishRequested,
            Self::PublishResolved { .. } => MessageKind::PublishResolved,
            Self::PublishProgress { .. } => MessageKind::PublishProgress,
            Self::PublishFailed { .. } => MessageKind::PublishFailed,
            Self::PlanItemUpdated { .. } => MessageKind::PlanItemUpdated,
        }
    }

    /// Get the topic for coarse filtering.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self.kind() {
            MessageKind::StateChanged => Topic::StateManagement,
            MessageKind::RetryRequested
            | MessageKind::RetryResolved
            | MessageKind::MergeRequested
            | MessageKind::MergeResolved => Topic::Recovery,
            MessageKind::SchedulerStarted
            | MessageKind::SchedulerStopped
            | MessageKind::SchedulerSwept => Topic::Scheduler,
            MessageKind::PublishRequested
            | MessageKind::PublishResolved
            | MessageKind::PublishProgress
            | MessageKind::PublishFailed
            | MessageKind::PlanItemUpdated => Topic::Publishing,
        }
    }

    /// Correlation id, for request/response pairing.
    #[must_use]
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            Self::RetryRequested { correlation_id, .. }
            | Self::RetryResolved { correlation_id, .. }
            | Self::MergeRequested { correlation_id, .. }
            | Self::MergeResolved { correlation_id, .. }
            | Self::PublishRequested { correlation_id, .. }
            | Self::PublishResolved { correlation_id, .. } => Some(*correlation_id),
            _ => None,
        }
    }

    /// The kind a responder answers this event with, when the event is
    /// request-shaped.
    #[must_use]
    pub fn response_kind(&self) -> Option<MessageKind> {
        match self {
            Self::RetryRequested { .. } => Some(MessageKind::RetryResolved),
            Self::MergeRequested { .. } => Some(MessageKind::MergeResolved),
            Self::PublishRequested { .. } => Some(MessageKind::PublishResolved),
            _ => None,
        }
    }

    /// Success flag carried by response-shaped events.
    #[must_use]
    pub fn is_success(&self) -> Option<bool> {
        match self {
            Self::RetryResolved { success, .. }
            | Self::MergeResolved { success, .. }
            | Self::PublishResolved { success, .. } => Some(*success),
            _ => None,
        }
    }
}

/// Message kind discriminants for subscription matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    StateChanged,
    RetryRequested,
    RetryResolved,
    MergeRequested,
    MergeResolved,
    SchedulerStarted,
    SchedulerStopped,
    SchedulerSwept,
    PublishRequested,
    PublishResolved,
    PublishProgress,
    PublishFailed,
    PlanItemUpdated,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StateChanged => "STATE_CHANGED",
            Self::RetryRequested => "RETRY_REQUESTED",
            Self::RetryResolved => "RETRY_RESOLVED",
            Self::MergeRequested => "MERGE_REQUESTED",
            Self::MergeResolved => "MERGE_RESOLVED",
            Self::SchedulerStarted => "SCHEDULER_STARTED",
            Self::SchedulerStopped => "SCHEDULER_STOPPED",
            Self::SchedulerSwept => "SCHEDULER_SWEPT",
            Self::PublishRequested => "PUBLISH_REQUESTED",
            Self::PublishResolved => "PUBLISH_RESOLVED",
            Self::PublishProgress => "PUBLISH_PROGRESS",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::PlanItemUpdated => "PLAN_ITEM_UPDATED",
        };
        write!(f, "{name}")
    }
}

/// Coarse event grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    StateManagement,
    Recovery,
    Scheduler,
    Publishing,
}

/// Stage of an in-flight publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStage {
    Queued,
    Publishing,
    Uploading,
    Completed,
    Failed,
}

/// Lifecycle status of a plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanItemStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
}

/// The envelope every published event travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub id: Uuid,
    pub event: BusEvent,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub source: String,
    pub requires_ack: bool,
    pub ttl: u64,
}
