//! # Core Entities
//!
//! The shared vocabulary of the closed loop: snapshots, conflicts,
//! mutation events, and severity classification. All shapes serialize
//! to the JSON layout the durable store expects, so field casing
//! matters and is pinned with serde attributes.

use crate::checksum::fingerprint;
use serde::{Deserialize, Serialize};

/// Dynamic user data held by the state manager.
///
/// State values are arbitrary JSON; typed payloads only exist on the
/// message bus, where every message type is a known enum variant.
pub type StateValue = serde_json::Value;

/// Where a snapshot originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Produced by this process.
    Local,
    /// Received from a remote writer (the only source that can conflict).
    Remote,
    /// Pushed down from a server-authoritative sync.
    Server,
}

/// An immutable, versioned view of one key's data.
///
/// Versions are issued from a single process-wide counter, so they are
/// strictly increasing across *all* keys, which keeps last-write-wins
/// comparisons well-defined. The checksum is an equality fingerprint,
/// nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub data: StateValue,
    pub version: u64,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub checksum: String,
    pub source: SnapshotSource,
}

impl StateSnapshot {
    /// Build a snapshot, computing the fingerprint of `data`.
    #[must_use]
    pub fn new(data: StateValue, version: u64, timestamp: u64, source: SnapshotSource) -> Self {
        let checksum = fingerprint(&data);
        Self {
            data,
            version,
            timestamp,
            checksum,
            source,
        }
    }

    /// True when the other snapshot carries byte-identical data.
    #[must_use]
    pub fn same_data(&self, other: &StateSnapshot) -> bool {
        self.checksum == other.checksum
    }
}

/// How a detected conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The remote (incoming) snapshot wins.
    LastWriteWins,
    /// The local (currently stored) snapshot wins.
    ClientWins,
    /// Objects deep-merge (remote wins scalars, arrays replaced
    /// wholesale by remote); anything else falls back to remote.
    ManualMerge,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::LastWriteWins
    }
}

/// Two writers disagreeing on a key's value.
///
/// Produced transiently during conflict detection and consumed
/// immediately by resolution; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConflict {
    pub key: String,
    pub local_version: StateSnapshot,
    pub remote_version: StateSnapshot,
    pub strategy: ConflictStrategy,
    pub detected_at: u64,
}

/// Kind of state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEventKind {
    Set,
    Update,
    Delete,
    Merge,
}

/// One entry in the state manager's internal mutation history.
///
/// This is the lightweight rollback-bookkeeping log, distinct from the
/// audit trail's broader event log; the two are separately owned and
/// separately capped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: StateEventKind,
    pub snapshot_before: Option<StateSnapshot>,
    pub snapshot_after: StateSnapshot,
    pub user_id: Option<String>,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Severity classification for audited events.
///
/// Drives the presentation layer (console diagnostics, UI toasts in
/// the original system); the core only records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}
