//! # Audit Events
//!
//! Event shapes, filters, and aggregate statistics for the audit
//! trail. Field casing is pinned to the persisted JSON layout.

use serde::{Deserialize, Serialize};
use shared_types::{ConflictStrategy, Severity, SnapshotSource, StateValue};
use std::collections::HashMap;

/// Kind of audited event. Broader than state mutations: recovery and
/// validation outcomes are recorded here too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    Set,
    Update,
    Delete,
    Merge,
    Rollback,
    Retry,
    Conflict,
    ValidationFailed,
}

/// Context recorded alongside an audit event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SnapshotSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_strategy: Option<ConflictStrategy>,
}

/// One audit record. Append-only once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventKind,
    pub key: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub user_id: Option<String>,
    pub old_value: Option<StateValue>,
    pub new_value: Option<StateValue>,
    #[serde(default)]
    pub metadata: AuditMetadata,
    pub severity: Severity,
}

/// Input to [`crate::AuditTrail::log_event`]; the trail fills in the
/// id, timestamp, and default user.
#[derive(Debug, Clone, Default)]
pub struct AuditEventDraft {
    pub event_type: Option<AuditEventKind>,
    pub key: String,
    pub user_id: Option<String>,
    pub old_value: Option<StateValue>,
    pub new_value: Option<StateValue>,
    pub metadata: AuditMetadata,
    pub severity: Option<Severity>,
}

impl AuditEventDraft {
    /// Start a draft for `kind` on `key` at `severity`.
    #[must_use]
    pub fn new(kind: AuditEventKind, key: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_type: Some(kind),
            key: key.into(),
            severity: Some(severity),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_old_value(mut self, value: StateValue) -> Self {
        self.old_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_new_value(mut self, value: StateValue) -> Self {
        self.new_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: AuditMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Combinable filters over the event log. `None` axes match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_types: Option<Vec<AuditEventKind>>,
    pub keys: Option<Vec<String>>,
    pub severity: Option<Severity>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub user_id: Option<String>,
}

impl AuditFilter {
    pub(crate) fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(kinds) = &self.event_types {
            if !kinds.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(keys) = &self.keys {
            if !keys.is_empty() && !keys.contains(&event.key) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        if self.start_time.is_some() || self.end_time.is_some() {
            let start = self.start_time.unwrap_or(0);
            let end = self.end_time.unwrap_or(u64::MAX);
            if event.timestamp < start || event.timestamp > end {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Timestamp span of a filtered event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

/// Aggregate counts over a filtered event set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total_events: usize,
    pub events_by_type: HashMap<AuditEventKind, usize>,
    pub events_by_severity: HashMap<Severity, usize>,
    pub events_by_key: HashMap<String, usize>,
    pub time_range: TimeRange,
}

/// Bundle produced by [`crate::AuditTrail::export`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditExport {
    pub events: Vec<AuditEvent>,
    pub stats: AuditStats,
    pub exported_at: u64,
}
