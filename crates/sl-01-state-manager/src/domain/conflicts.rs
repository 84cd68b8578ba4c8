//! Conflict detection and resolution.

use crate::domain::merge::deep_merge;
use shared_types::{ConflictStrategy, StateConflict, StateSnapshot, StateValue};

/// Detect a conflict between the stored snapshot and an incoming one.
///
/// A conflict exists only when the incoming snapshot is `Remote`, its
/// version exceeds the stored version, *and* its data differs (by
/// fingerprint). Two remote snapshots with different versions but
/// identical data are not a conflict.
#[must_use]
pub fn detect_conflict(
    key: &str,
    current: &StateSnapshot,
    incoming: &StateSnapshot,
    strategy: ConflictStrategy,
    now: u64,
) -> Option<StateConflict> {
    if incoming.source != shared_types::SnapshotSource::Remote {
        return None;
    }
    if incoming.version <= current.version {
        return None;
    }
    if incoming.same_data(current) {
        return None;
    }

    Some(StateConflict {
        key: key.to_string(),
        local_version: current.clone(),
        remote_version: incoming.clone(),
        strategy,
        detected_at: now,
    })
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the remote (incoming) snapshot.
    Remote,
    /// Keep the local (currently stored) snapshot.
    Local,
    /// Store the merged data as a fresh local snapshot.
    Merged(StateValue),
}

/// Resolve a conflict per its strategy.
#[must_use]
pub fn resolve(conflict: &StateConflict) -> Resolution {
    match conflict.strategy {
        ConflictStrategy::LastWriteWins => Resolution::Remote,
        ConflictStrategy::ClientWins => Resolution::Local,
        ConflictStrategy::ManualMerge => {
            let local = &conflict.local_version.data;
            let remote = &conflict.remote_version.data;
            if local.is_object() && remote.is_object() {
                Resolution::Merged(deep_merge(local, remote))
            } else {
                Resolution::Remote
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::SnapshotSource;

    fn snap(data: serde_json::Value, version: u64, source: SnapshotSource) -> StateSnapshot {
        StateSnapshot::new(data, version, 1_000, source)
    }

    #[test]
    fn test_local_writes_never_conflict() {
        let current = snap(json!(1), 1, SnapshotSource::Local);
        let incoming = snap(json!(2), 2, SnapshotSource::Local);
        assert!(detect_conflict("k", &current, &incoming, ConflictStrategy::LastWriteWins, 0).is_none());
    }

    #[test]
    fn test_identical_remote_data_is_not_a_conflict() {
        let current = snap(json!({"a": 1}), 1, SnapshotSource::Local);
        let incoming = snap(json!({"a": 1}), 2, SnapshotSource::Remote);
        assert!(detect_conflict("k", &current, &incoming, ConflictStrategy::LastWriteWins, 0).is_none());
    }

    #[test]
    fn test_differing_remote_data_conflicts() {
        let current = snap(json!({"a": 1}), 1, SnapshotSource::Local);
        let incoming = snap(json!({"a": 2}), 2, SnapshotSource::Remote);
        let conflict =
            detect_conflict("k", &current, &incoming, ConflictStrategy::ClientWins, 42).unwrap();
        assert_eq!(conflict.key, "k");
        assert_eq!(conflict.strategy, ConflictStrategy::ClientWins);
        assert_eq!(conflict.detected_at, 42);
    }

    #[test]
    fn test_stale_remote_version_is_not_a_conflict() {
        let current = snap(json!({"a": 1}), 5, SnapshotSource::Local);
        let incoming = snap(json!({"a": 2}), 3, SnapshotSource::Remote);
        assert!(detect_conflict("k", &current, &incoming, ConflictStrategy::LastWriteWins, 0).is_none());
    }

    #[test]
    fn test_resolution_strategies() {
        let local = snap(json!({"a": 1}), 1, SnapshotSource::Local);
        let remote = snap(json!({"b": 2}), 2, SnapshotSource::Remote);

        let mut conflict = StateConflict {
            key: "k".into(),
            local_version: local,
            remote_version: remote,
            strategy: ConflictStrategy::LastWriteWins,
            detected_at: 0,
        };
        assert_eq!(resolve(&conflict), Resolution::Remote);

        conflict.strategy = ConflictStrategy::ClientWins;
        assert_eq!(resolve(&conflict), Resolution::Local);

        conflict.strategy = ConflictStrategy::ManualMerge;
        assert_eq!(
            resolve(&conflict),
            Resolution::Merged(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn test_manual_merge_of_non_objects_falls_back_to_remote() {
        let conflict = StateConflict {
            key: "k".into(),
            local_version: snap(json!([1, 2]), 1, SnapshotSource::Local),
            remote_version: snap(json!([3]), 2, SnapshotSource::Remote),
            strategy: ConflictStrategy::ManualMerge,
            detected_at: 0,
        };
        assert_eq!(resolve(&conflict), Resolution::Remote);
    }
}
