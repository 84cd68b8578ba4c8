//! Configuration and bookkeeping entities for the state manager.

use serde::{Deserialize, Serialize};
use shared_types::{ConflictStrategy, SnapshotSource, StateEvent, StateSnapshot};
use std::collections::HashMap;

/// State manager configuration. All knobs are numeric policy or plain
/// strings, settable at construction time only.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Namespace prefix for every storage key this manager writes.
    pub prefix: String,
    /// Cap on the internal mutation history.
    pub max_history: usize,
    /// Strategy applied when a remote write conflicts.
    pub strategy: ConflictStrategy,
    /// Mirror mutations into the audit trail.
    pub audit_enabled: bool,
    /// Keys that may exist in storage from before this manager ran,
    /// possibly un-prefixed and not snapshot-shaped.
    pub legacy_keys: Vec<String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            prefix: "state_".to_string(),
            max_history: 100,
            strategy: ConflictStrategy::default(),
            audit_enabled: true,
            legacy_keys: vec!["plan".to_string()],
        }
    }
}

/// Options for [`crate::StateManager::set_state`].
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Skip conflict detection and store the incoming snapshot as-is.
    pub optimistic: bool,
    /// Origin of the write; only `Remote` can conflict.
    pub source: SnapshotSource,
    /// Free-form reason recorded on the mutation event.
    pub reason: Option<String>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            optimistic: false,
            source: SnapshotSource::Local,
            reason: None,
        }
    }
}

impl SetOptions {
    /// Options for a remote-sourced write.
    #[must_use]
    pub fn remote() -> Self {
        Self {
            source: SnapshotSource::Remote,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Kind of a rollback-bookkeeping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateRecoveryKind {
    Rollback,
    Retry,
    Merge,
}

/// Status of a rollback-bookkeeping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateRecoveryStatus {
    Pending,
    Completed,
    Failed,
}

/// Rollback/retry bookkeeping kept (and persisted) by the state
/// manager itself. Distinct from the recovery service's action log:
/// this one records which snapshot a remediation targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecoveryAction {
    pub key: String,
    pub action: StateRecoveryKind,
    pub target_snapshot: StateSnapshot,
    pub triggered_at: u64,
    pub completed_at: Option<u64>,
    pub status: StateRecoveryStatus,
}

/// Result of [`crate::StateManager::validate_integrity`].
///
/// The fingerprint is recomputed from the same in-memory data it was
/// derived from, so `valid` is always true in practice; this is a
/// tamper-evidence stub, not cross-process verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub expected: String,
    pub actual: String,
}

/// Full dump produced by [`crate::StateManager::export_state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateExport {
    pub states: HashMap<String, StateSnapshot>,
    pub events: Vec<StateEvent>,
    pub recoveries: Vec<StateRecoveryAction>,
    pub exported_at: u64,
}
