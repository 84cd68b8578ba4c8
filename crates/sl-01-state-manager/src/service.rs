//! # State Manager Service
//!
//! Single source of truth for a set of named values, with versioning,
//! conflict handling, subscriber notification, and crash-safe
//! persistence.
//!
//! Storage layout (all under the configured prefix):
//!
//! ```text
//! <prefix><key>              current snapshot
//! <prefix><key>_v<version>   versioned backup (last 5 kept)
//! <prefix>audit_trail        internal mutation history
//! <prefix>recovery_actions   rollback bookkeeping
//! ```

use crate::domain::conflicts::{detect_conflict, resolve, Resolution};
use crate::domain::entities::{
    IntegrityReport, SetOptions, StateConfig, StateExport, StateRecoveryAction, StateRecoveryKind,
    StateRecoveryStatus,
};
use crate::domain::errors::StateError;
use shared_store::StoreHandle;
use shared_types::{
    fingerprint, Severity, SnapshotSource, StateEvent, StateEventKind, StateSnapshot, StateValue,
    TimeSource,
};
use sl_03_audit_trail::{AuditEventDraft, AuditEventKind, AuditMetadata, AuditTrail};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Versioned backups retained per key.
const BACKUP_WINDOW: u64 = 5;

/// Storage suffix for the internal mutation history.
const EVENT_HISTORY_KEY: &str = "audit_trail";

/// Storage suffix for the rollback bookkeeping log.
const RECOVERY_LOG_KEY: &str = "recovery_actions";

type Callback = Arc<dyn Fn(&StateValue) + Send + Sync>;

struct SubscriberEntry {
    id: u64,
    callback: Callback,
}

struct Inner {
    states: HashMap<String, StateSnapshot>,
    version_counter: u64,
    event_history: Vec<StateEvent>,
    recovery_log: Vec<StateRecoveryAction>,
    subscribers: HashMap<String, Vec<SubscriberEntry>>,
    next_subscriber_id: u64,
}

/// Subscription handle for one key. Dropping it unsubscribes; a key
/// with no remaining subscribers releases its subscriber set.
pub struct StateSubscription {
    inner: Arc<Mutex<Inner>>,
    key: String,
    id: u64,
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let Some(entries) = inner.subscribers.get_mut(&self.key) else {
            return;
        };
        entries.retain(|e| e.id != self.id);
        if entries.is_empty() {
            inner.subscribers.remove(&self.key);
        }
    }
}

/// The state manager. Shared via `Arc`; all methods take `&self`.
pub struct StateManager {
    config: StateConfig,
    inner: Arc<Mutex<Inner>>,
    store: StoreHandle,
    audit: Option<Arc<AuditTrail>>,
    clock: Arc<dyn TimeSource>,
}

impl StateManager {
    /// Create a manager seeded with `initial_state`, then restore any
    /// persisted snapshots (persisted data wins over seeds). Legacy
    /// keys found in storage, prefixed or not, are wrapped into
    /// synthetic snapshots when they are not already snapshot-shaped.
    #[must_use]
    pub fn new(
        initial_state: HashMap<String, StateValue>,
        config: StateConfig,
        store: StoreHandle,
        audit: Option<Arc<AuditTrail>>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let now = clock.now_ms();
        let mut inner = Inner {
            states: HashMap::new(),
            version_counter: 0,
            event_history: Vec::new(),
            recovery_log: Vec::new(),
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        };

        let seed_count = initial_state.len();
        for (key, value) in initial_state {
            inner.version_counter += 1;
            inner.states.insert(
                key,
                StateSnapshot::new(value, inner.version_counter, now, SnapshotSource::Local),
            );
        }

        Self::load_known_keys(&mut inner, &config, &store);
        Self::load_legacy_keys(&mut inner, &config, &store, now);
        Self::load_histories(&mut inner, &config, &store);

        info!(keys = seed_count, "State manager initialized");

        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            store,
            audit,
            clock,
        }
    }

    fn load_known_keys(inner: &mut Inner, config: &StateConfig, store: &StoreHandle) {
        let known: Vec<String> = inner.states.keys().cloned().collect();
        for key in known {
            match store.get_json::<StateSnapshot>(&format!("{}{}", config.prefix, key)) {
                Ok(Some(snapshot)) => {
                    debug!(key = %key, version = snapshot.version, "Loaded snapshot from storage");
                    inner.version_counter = inner.version_counter.max(snapshot.version);
                    inner.states.insert(key, snapshot);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Malformed persisted snapshot; not restored");
                }
            }
        }
    }

    fn load_legacy_keys(inner: &mut Inner, config: &StateConfig, store: &StoreHandle, now: u64) {
        for key in &config.legacy_keys {
            if inner.states.contains_key(key) {
                continue;
            }
            let Some(raw) = Self::load_legacy_value(store, &config.prefix, key) else {
                continue;
            };
            // Already snapshot-shaped data is used as-is; raw values
            // get wrapped into a synthetic local snapshot.
            let snapshot = match serde_json::from_value::<StateSnapshot>(raw.clone()) {
                Ok(snapshot) => {
                    inner.version_counter = inner.version_counter.max(snapshot.version);
                    snapshot
                }
                Err(_) => {
                    inner.version_counter += 1;
                    StateSnapshot::new(raw, inner.version_counter, now, SnapshotSource::Local)
                }
            };
            info!(key = %key, "Loaded legacy state from storage");
            inner.states.insert(key.clone(), snapshot);
        }
    }

    fn load_legacy_value(store: &StoreHandle, prefix: &str, key: &str) -> Option<StateValue> {
        for candidate in [format!("{prefix}{key}"), key.to_string()] {
            match store.get_json::<StateValue>(&candidate) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %candidate, error = %e, "Malformed legacy record; skipped");
                }
            }
        }
        None
    }

    fn load_histories(inner: &mut Inner, config: &StateConfig, store: &StoreHandle) {
        let history_key = format!("{}{}", config.prefix, EVENT_HISTORY_KEY);
        match store.get_json::<Vec<StateEvent>>(&history_key) {
            Ok(Some(history)) => inner.event_history = history,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load mutation history"),
        }

        let log_key = format!("{}{}", config.prefix, RECOVERY_LOG_KEY);
        match store.get_json::<Vec<StateRecoveryAction>>(&log_key) {
            Ok(Some(log)) => inner.recovery_log = log,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load recovery log"),
        }
    }

    /// Current data for a key.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<StateValue> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.states.get(key).map(|s| s.data.clone()))
    }

    /// Current snapshot (with metadata) for a key.
    #[must_use]
    pub fn get_snapshot(&self, key: &str) -> Option<StateSnapshot> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.states.get(key).cloned())
    }

    /// Write a value with conflict detection and persistence.
    ///
    /// Returns the winning snapshot: the incoming one, or - when a
    /// remote write conflicted - whatever the configured strategy
    /// chose.
    pub fn set_state(&self, key: &str, value: StateValue, options: SetOptions) -> StateSnapshot {
        let now = self.clock.now_ms();

        let (winning, before, conflict_strategy, callbacks) = {
            let Ok(mut inner) = self.inner.lock() else {
                // A poisoned lock means a callback panicked; surface the
                // write as a detached snapshot rather than panicking too.
                return StateSnapshot::new(value, 0, now, options.source);
            };

            inner.version_counter += 1;
            let incoming =
                StateSnapshot::new(value, inner.version_counter, now, options.source);
            let before = inner.states.get(key).cloned();

            let mut conflict_strategy = None;
            let winning = match (&before, options.optimistic) {
                (Some(current), false) => {
                    match detect_conflict(key, current, &incoming, self.config.strategy, now) {
                        Some(conflict) => {
                            warn!(
                                key = %key,
                                local_version = conflict.local_version.version,
                                remote_version = conflict.remote_version.version,
                                strategy = ?conflict.strategy,
                                "State conflict detected; resolving"
                            );
                            conflict_strategy = Some(conflict.strategy);
                            match resolve(&conflict) {
                                Resolution::Remote => conflict.remote_version.clone(),
                                Resolution::Local => conflict.local_version.clone(),
                                Resolution::Merged(merged) => {
                                    inner.version_counter += 1;
                                    StateSnapshot::new(
                                        merged,
                                        inner.version_counter,
                                        now,
                                        SnapshotSource::Local,
                                    )
                                }
                            }
                        }
                        None => incoming,
                    }
                }
                _ => incoming,
            };

            inner.states.insert(key.to_string(), winning.clone());

            let kind = if before.is_some() {
                StateEventKind::Update
            } else {
                StateEventKind::Set
            };
            let event = StateEvent {
                key: key.to_string(),
                kind,
                snapshot_before: before.clone(),
                snapshot_after: winning.clone(),
                user_id: None,
                timestamp: now,
                reason: options.reason.clone(),
            };
            Self::push_event(&mut inner.event_history, event, self.config.max_history);

            self.save_snapshot(key, &winning);
            self.save_event_history(&inner.event_history);

            (winning, before, conflict_strategy, self.callbacks_for(&inner, key))
        };

        debug!(key = %key, version = winning.version, "State written");

        if self.config.audit_enabled {
            let kind = if before.is_some() {
                AuditEventKind::Update
            } else {
                AuditEventKind::Set
            };
            let severity = if conflict_strategy.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            self.audit(
                kind,
                key,
                before.as_ref().map(|s| s.data.clone()),
                Some(winning.data.clone()),
                severity,
                AuditMetadata {
                    source: Some(winning.source),
                    reason: options.reason,
                    version: Some(winning.version),
                    checksum: Some(winning.checksum.clone()),
                    conflict_strategy,
                },
            );
        }

        Self::notify(&callbacks, &winning.data);
        winning
    }

    /// Register a subscriber for a key. The callback fires immediately
    /// with the current value (when set) and on every subsequent write.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> StateSubscription
    where
        F: Fn(&StateValue) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let (id, current) = {
            let Ok(mut inner) = self.inner.lock() else {
                return StateSubscription {
                    inner: self.inner.clone(),
                    key: key.to_string(),
                    id: u64::MAX,
                };
            };
            inner.next_subscriber_id += 1;
            let id = inner.next_subscriber_id;
            inner
                .subscribers
                .entry(key.to_string())
                .or_default()
                .push(SubscriberEntry {
                    id,
                    callback: callback.clone(),
                });
            (id, inner.states.get(key).map(|s| s.data.clone()))
        };

        if let Some(value) = current {
            callback(&value);
        }

        StateSubscription {
            inner: self.inner.clone(),
            key: key.to_string(),
            id,
        }
    }

    /// Restore a prior persisted snapshot for `key`.
    ///
    /// Defaults to `current.version - 1`. A missing backup is a hard
    /// error, never a silent success.
    pub fn rollback(
        &self,
        key: &str,
        target_version: Option<u64>,
    ) -> Result<StateSnapshot, StateError> {
        let now = self.clock.now_ms();

        let current = self
            .get_snapshot(key)
            .ok_or_else(|| StateError::NoCurrentState {
                key: key.to_string(),
            })?;
        let target = target_version.unwrap_or_else(|| current.version.saturating_sub(1));

        let backup_key = format!("{}{}_v{}", self.config.prefix, key, target);
        let backup = match self.store.get_json::<StateSnapshot>(&backup_key) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return Err(StateError::BackupNotFound {
                    key: key.to_string(),
                    version: target,
                })
            }
            Err(e) => {
                return Err(StateError::CorruptBackup {
                    key: key.to_string(),
                    version: target,
                    message: e.to_string(),
                })
            }
        };

        let callbacks = {
            let Ok(mut inner) = self.inner.lock() else {
                return Err(StateError::NoCurrentState {
                    key: key.to_string(),
                });
            };

            inner.recovery_log.push(StateRecoveryAction {
                key: key.to_string(),
                action: StateRecoveryKind::Rollback,
                target_snapshot: backup.clone(),
                triggered_at: now,
                completed_at: None,
                status: StateRecoveryStatus::Pending,
            });

            inner.states.insert(key.to_string(), backup.clone());

            let event = StateEvent {
                key: key.to_string(),
                kind: StateEventKind::Set,
                snapshot_before: Some(current.clone()),
                snapshot_after: backup.clone(),
                user_id: None,
                timestamp: now,
                reason: Some(format!("Rollback to version {target}")),
            };
            Self::push_event(&mut inner.event_history, event, self.config.max_history);

            self.save_snapshot(key, &backup);
            self.save_event_history(&inner.event_history);

            if let Some(action) = inner.recovery_log.last_mut() {
                action.status = StateRecoveryStatus::Completed;
                action.completed_at = Some(now);
            }
            self.save_recovery_log(&inner.recovery_log);

            self.callbacks_for(&inner, key)
        };

        info!(key = %key, version = target, "Rolled back state");

        if self.config.audit_enabled {
            self.audit(
                AuditEventKind::Rollback,
                key,
                Some(current.data.clone()),
                Some(backup.data.clone()),
                Severity::Warning,
                AuditMetadata {
                    source: Some(backup.source),
                    reason: Some(format!("Rollback to version {target}")),
                    version: Some(backup.version),
                    checksum: Some(backup.checksum.clone()),
                    conflict_strategy: None,
                },
            );
        }

        Self::notify(&callbacks, &backup.data);
        Ok(backup)
    }

    /// Re-apply the most recent *pending* recovery entry's target
    /// snapshot for `key`. Returns `None` with a warning when nothing
    /// is pending.
    pub fn retry(&self, key: &str) -> Option<StateSnapshot> {
        let now = self.clock.now_ms();

        let (target, callbacks) = {
            let Ok(mut inner) = self.inner.lock() else {
                return None;
            };
            let Some(index) = inner
                .recovery_log
                .iter()
                .rposition(|a| a.key == key && a.status == StateRecoveryStatus::Pending)
            else {
                warn!(key = %key, "No pending recovery action");
                return None;
            };

            let target = {
                let action = &mut inner.recovery_log[index];
                action.action = StateRecoveryKind::Retry;
                action.status = StateRecoveryStatus::Completed;
                action.completed_at = Some(now);
                action.target_snapshot.clone()
            };

            inner.states.insert(key.to_string(), target.clone());
            self.save_snapshot(key, &target);
            self.save_recovery_log(&inner.recovery_log);

            (target, self.callbacks_for(&inner, key))
        };

        info!(key = %key, version = target.version, "Retried pending recovery");

        if self.config.audit_enabled {
            self.audit(
                AuditEventKind::Retry,
                key,
                None,
                Some(target.data.clone()),
                Severity::Info,
                AuditMetadata {
                    version: Some(target.version),
                    ..AuditMetadata::default()
                },
            );
        }

        Self::notify(&callbacks, &target.data);
        Some(target)
    }

    /// Recompute the stored data's fingerprint and compare it to the
    /// one recorded at snapshot creation.
    ///
    /// The data is immutable once snapshotted, so this is always valid
    /// in practice - a tamper-evidence stub, not cross-process
    /// verification.
    #[must_use]
    pub fn validate_integrity(&self, key: &str) -> IntegrityReport {
        let Some(snapshot) = self.get_snapshot(key) else {
            return IntegrityReport {
                valid: false,
                expected: "N/A".to_string(),
                actual: "N/A".to_string(),
            };
        };

        let actual = fingerprint(&snapshot.data);
        IntegrityReport {
            valid: actual == snapshot.checksum,
            expected: snapshot.checksum,
            actual,
        }
    }

    /// Internal mutation history, optionally narrowed to one key.
    #[must_use]
    pub fn state_events(&self, key: Option<&str>) -> Vec<StateEvent> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .event_history
                    .iter()
                    .filter(|e| key.map_or(true, |k| e.key == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rollback bookkeeping, optionally narrowed to one key.
    #[must_use]
    pub fn recovery_log(&self, key: Option<&str>) -> Vec<StateRecoveryAction> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .recovery_log
                    .iter()
                    .filter(|a| key.map_or(true, |k| a.key == k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full dump for debugging and backup.
    #[must_use]
    pub fn export_state(&self) -> StateExport {
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .map(|inner| StateExport {
                states: inner.states.clone(),
                events: inner.event_history.clone(),
                recoveries: inner.recovery_log.clone(),
                exported_at: now,
            })
            .unwrap_or(StateExport {
                states: HashMap::new(),
                events: Vec::new(),
                recoveries: Vec::new(),
                exported_at: now,
            })
    }

    /// Force-persist every current snapshot and both histories.
    ///
    /// Also runs on drop, mirroring the original's teardown flush.
    pub fn flush(&self) {
        let Ok(inner) = self.inner.lock() else {
            return;
        };
        for (key, snapshot) in &inner.states {
            self.save_snapshot(key, snapshot);
        }
        self.save_event_history(&inner.event_history);
        self.save_recovery_log(&inner.recovery_log);
        debug!(keys = inner.states.len(), "Flushed state to storage");
    }

    /// Reset everything: in-memory state, subscribers, histories, and
    /// every storage key under this manager's prefix.
    pub fn clear(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.states.clear();
        inner.subscribers.clear();
        inner.event_history.clear();
        inner.recovery_log.clear();

        match self.store.scan_prefix(&self.config.prefix) {
            Ok(entries) => {
                for (key, _) in entries {
                    if let Err(e) = self.store.remove(&key) {
                        warn!(key = %key, error = %e, "Failed to remove storage key");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to scan storage for clear"),
        }
        info!("All state cleared");
    }

    fn push_event(history: &mut Vec<StateEvent>, event: StateEvent, max_history: usize) {
        history.push(event);
        if history.len() > max_history {
            let excess = history.len() - max_history;
            history.drain(0..excess);
        }
    }

    fn callbacks_for(&self, inner: &Inner, key: &str) -> Vec<Callback> {
        inner
            .subscribers
            .get(key)
            .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
            .unwrap_or_default()
    }

    fn notify(callbacks: &[Callback], value: &StateValue) {
        for callback in callbacks {
            callback(value);
        }
    }

    fn audit(
        &self,
        kind: AuditEventKind,
        key: &str,
        old_value: Option<StateValue>,
        new_value: Option<StateValue>,
        severity: Severity,
        metadata: AuditMetadata,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let mut draft = AuditEventDraft::new(kind, key, severity).with_metadata(metadata);
        draft.old_value = old_value;
        draft.new_value = new_value;
        audit.log_event(draft);
    }

    /// Persist the current snapshot plus its versioned backup, then
    /// prune backups older than the retention window.
    fn save_snapshot(&self, key: &str, snapshot: &StateSnapshot) {
        let current_key = format!("{}{}", self.config.prefix, key);
        if let Err(e) = self.store.put_json(&current_key, snapshot) {
            warn!(key = %key, error = %e, "Failed to persist snapshot");
        }

        let backup_key = format!("{current_key}_v{}", snapshot.version);
        if let Err(e) = self.store.put_json(&backup_key, snapshot) {
            warn!(key = %key, error = %e, "Failed to persist backup");
        }

        if snapshot.version > BACKUP_WINDOW {
            let cutoff = snapshot.version - BACKUP_WINDOW;
            let scan_prefix = format!("{current_key}_v");
            if let Ok(entries) = self.store.scan_prefix(&scan_prefix) {
                for (stored_key, _) in entries {
                    let Ok(version) = stored_key[scan_prefix.len()..].parse::<u64>() else {
                        continue;
                    };
                    if version <= cutoff {
                        if let Err(e) = self.store.remove(&stored_key) {
                            warn!(key = %stored_key, error = %e, "Failed to prune backup");
                        }
                    }
                }
            }
        }
    }

    fn save_event_history(&self, history: &[StateEvent]) {
        let key = format!("{}{}", self.config.prefix, EVENT_HISTORY_KEY);
        if let Err(e) = self.store.put_json(&key, &history) {
            warn!(error = %e, "Failed to persist mutation history");
        }
    }

    fn save_recovery_log(&self, log: &[StateRecoveryAction]) {
        let key = format!("{}{}", self.config.prefix, RECOVERY_LOG_KEY);
        if let Err(e) = self.store.put_json(&key, &log) {
            warn!(error = %e, "Failed to persist recovery log");
        }
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("prefix", &self.config.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{ConflictStrategy, ManualClock};
    use sl_03_audit_trail::AuditFilter;

    fn manager_with(config: StateConfig) -> (StateManager, StoreHandle) {
        let store = StoreHandle::in_memory();
        let manager = StateManager::new(
            HashMap::new(),
            config,
            store.clone(),
            None,
            ManualClock::at(1_000),
        );
        (manager, store)
    }

    fn manager() -> (StateManager, StoreHandle) {
        manager_with(StateConfig {
            legacy_keys: vec![],
            ..StateConfig::default()
        })
    }

    #[test]
    fn test_get_unknown_key_is_none() {
        let (manager, _) = manager();
        assert!(manager.get_state("nope").is_none());
        assert!(manager.get_snapshot("nope").is_none());
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (manager, _) = manager();
        let snapshot = manager.set_state("counter", json!(7), SetOptions::default());
        assert_eq!(snapshot.version, 1);
        assert_eq!(manager.get_state("counter"), Some(json!(7)));
    }

    #[test]
    fn test_versions_are_monotonic_across_keys() {
        let (manager, _) = manager();
        let mut last = 0;
        for (key, value) in [("a", 1), ("b", 2), ("a", 3), ("c", 4)] {
            let snapshot = manager.set_state(key, json!(value), SetOptions::default());
            assert!(snapshot.version > last);
            last = snapshot.version;
        }
    }

    #[test]
    fn test_initial_state_is_seeded() {
        let store = StoreHandle::in_memory();
        let manager = StateManager::new(
            HashMap::from([("plan".to_string(), json!({"schedule": []}))]),
            StateConfig::default(),
            store,
            None,
            ManualClock::at(1_000),
        );
        assert_eq!(manager.get_state("plan"), Some(json!({"schedule": []})));
    }

    #[test]
    fn test_last_write_wins_keeps_remote() {
        let (manager, _) = manager();
        manager.set_state("k", json!("A"), SetOptions::default());
        let snapshot = manager.set_state("k", json!("B"), SetOptions::remote());
        assert_eq!(snapshot.data, json!("B"));
        assert_eq!(manager.get_state("k"), Some(json!("B")));
    }

    #[test]
    fn test_client_wins_keeps_local() {
        let (manager, _) = manager_with(StateConfig {
            strategy: ConflictStrategy::ClientWins,
            legacy_keys: vec![],
            ..StateConfig::default()
        });
        let local = manager.set_state("k", json!("A"), SetOptions::default());
        let snapshot = manager.set_state("k", json!("B"), SetOptions::remote());
        assert_eq!(snapshot.version, local.version);
        assert_eq!(manager.get_state("k"), Some(json!("A")));
    }

    #[test]
    fn test_identical_remote_data_never_conflicts() {
        // With client-wins, a conflict would keep the *old* snapshot;
        // identical data must instead store the incoming one.
        let (manager, _) = manager_with(StateConfig {
            strategy: ConflictStrategy::ClientWins,
            legacy_keys: vec![],
            ..StateConfig::default()
        });
        manager.set_state("k", json!({"a": 1}), SetOptions::remote());
        let second = manager.set_state("k", json!({"a": 1}), SetOptions::remote());
        let stored = manager.get_snapshot("k").unwrap();
        assert_eq!(stored.version, second.version);
        assert_eq!(stored.source, SnapshotSource::Remote);
    }

    #[test]
    fn test_manual_merge_of_objects() {
        let (manager, _) = manager_with(StateConfig {
            strategy: ConflictStrategy::ManualMerge,
            legacy_keys: vec![],
            ..StateConfig::default()
        });
        manager.set_state("k", json!({"a": 1, "b": {"x": 1}}), SetOptions::default());
        let merged = manager.set_state("k", json!({"b": {"y": 2}, "c": 3}), SetOptions::remote());

        assert_eq!(merged.data, json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));
        assert_eq!(merged.source, SnapshotSource::Local);
        assert_eq!(manager.get_state("k"), Some(merged.data.clone()));
    }

    #[test]
    fn test_optimistic_write_skips_conflict_detection() {
        let (manager, _) = manager_with(StateConfig {
            strategy: ConflictStrategy::ClientWins,
            legacy_keys: vec![],
            ..StateConfig::default()
        });
        manager.set_state("k", json!("A"), SetOptions::default());
        let snapshot = manager.set_state(
            "k",
            json!("B"),
            SetOptions {
                optimistic: true,
                source: SnapshotSource::Remote,
                reason: None,
            },
        );
        assert_eq!(snapshot.data, json!("B"));
        assert_eq!(manager.get_state("k"), Some(json!("B")));
    }

    #[test]
    fn test_subscribe_immediate_and_updates() {
        let (manager, _) = manager();
        manager.set_state("k", json!(1), SetOptions::default());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sub = manager.subscribe("k", move |value| {
            seen_clone.lock().unwrap().push(value.clone());
        });

        manager.set_state("k", json!(2), SetOptions::default());
        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2)]);

        drop(sub);
        manager.set_state("k", json!(3), SetOptions::default());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_subscribe_unset_key_gets_no_immediate_call() {
        let (manager, _) = manager();
        let seen = Arc::new(Mutex::new(0u32));
        let seen_clone = seen.clone();
        let _sub = manager.subscribe("k", move |_| {
            *seen_clone.lock().unwrap() += 1;
        });
        assert_eq!(*seen.lock().unwrap(), 0);

        manager.set_state("k", json!(1), SetOptions::default());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_rollback_default_restores_previous_version() {
        let (manager, _) = manager();
        manager.set_state("k", json!(1), SetOptions::default());
        manager.set_state("k", json!(2), SetOptions::default());
        manager.set_state("k", json!(3), SetOptions::default());

        let restored = manager.rollback("k", None).unwrap();
        assert_eq!(restored.data, json!(2));
        assert_eq!(manager.get_state("k"), Some(json!(2)));

        let restored = manager.rollback("k", Some(1)).unwrap();
        assert_eq!(restored.data, json!(1));
    }

    #[test]
    fn test_rollback_records_completed_action_and_event() {
        let (manager, _) = manager();
        manager.set_state("k", json!(1), SetOptions::default());
        manager.set_state("k", json!(2), SetOptions::default());
        manager.rollback("k", None).unwrap();

        let log = manager.recovery_log(Some("k"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, StateRecoveryKind::Rollback);
        assert_eq!(log[0].status, StateRecoveryStatus::Completed);

        let events = manager.state_events(Some("k"));
        let rollback_event = events.last().unwrap();
        assert_eq!(rollback_event.kind, StateEventKind::Set);
        assert_eq!(
            rollback_event.reason.as_deref(),
            Some("Rollback to version 1")
        );
    }

    #[test]
    fn test_rollback_without_state_fails() {
        let (manager, _) = manager();
        let err = manager.rollback("ghost", None).unwrap_err();
        assert!(matches!(err, StateError::NoCurrentState { .. }));
    }

    #[test]
    fn test_rollback_without_backup_fails() {
        let (manager, _) = manager();
        manager.set_state("k", json!(1), SetOptions::default());
        // Only one version ever set: no backup below it.
        let err = manager.rollback("k", None).unwrap_err();
        assert!(matches!(err, StateError::BackupNotFound { version: 0, .. }));

        let err = manager.rollback("k", Some(99)).unwrap_err();
        assert!(matches!(err, StateError::BackupNotFound { version: 99, .. }));
    }

    #[test]
    fn test_retry_without_pending_is_none() {
        let (manager, _) = manager();
        manager.set_state("k", json!(1), SetOptions::default());
        assert!(manager.retry("k").is_none());
    }

    #[test]
    fn test_retry_applies_pending_target() {
        let store = StoreHandle::in_memory();
        let clock = ManualClock::at(1_000);
        let target = StateSnapshot::new(json!("recovered"), 9, 900, SnapshotSource::Local);

        // A pending action survives from a previous run that died
        // mid-recovery.
        store
            .put_json(
                "state_recovery_actions",
                &vec![StateRecoveryAction {
                    key: "k".to_string(),
                    action: StateRecoveryKind::Rollback,
                    target_snapshot: target.clone(),
                    triggered_at: 900,
                    completed_at: None,
                    status: StateRecoveryStatus::Pending,
                }],
            )
            .unwrap();

        let manager = StateManager::new(
            HashMap::new(),
            StateConfig {
                legacy_keys: vec![],
                ..StateConfig::default()
            },
            store,
            None,
            clock,
        );

        let applied = manager.retry("k").unwrap();
        assert_eq!(applied.data, json!("recovered"));
        assert_eq!(manager.get_state("k"), Some(json!("recovered")));

        let log = manager.recovery_log(Some("k"));
        assert_eq!(log[0].status, StateRecoveryStatus::Completed);
        assert_eq!(log[0].action, StateRecoveryKind::Retry);
    }

    #[test]
    fn test_history_capped_oldest_dropped() {
        let (manager, _) = manager_with(StateConfig {
            max_history: 10,
            legacy_keys: vec![],
            ..StateConfig::default()
        });
        for i in 0..15 {
            manager.set_state("k", json!(i), SetOptions::default());
        }
        let events = manager.state_events(None);
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].snapshot_after.data, json!(5));
    }

    #[test]
    fn test_backups_pruned_to_window() {
        let (manager, store) = manager();
        for i in 1..=7 {
            manager.set_state("k", json!(i), SetOptions::default());
        }
        // Versions 1 and 2 fall outside the 5-deep window.
        assert!(!store.exists("state_k_v1").unwrap());
        assert!(!store.exists("state_k_v2").unwrap());
        for v in 3..=7 {
            assert!(store.exists(&format!("state_k_v{v}")).unwrap());
        }
    }

    #[test]
    fn test_reload_continues_version_counter() {
        let store = StoreHandle::in_memory();
        let config = StateConfig {
            legacy_keys: vec![],
            ..StateConfig::default()
        };
        let last_version = {
            let manager = StateManager::new(
                HashMap::from([("k".to_string(), json!(0))]),
                config.clone(),
                store.clone(),
                None,
                ManualClock::at(1_000),
            );
            manager.set_state("k", json!(1), SetOptions::default());
            manager.set_state("k", json!(2), SetOptions::default()).version
        };

        let manager = StateManager::new(
            HashMap::from([("k".to_string(), json!(0))]),
            config,
            store,
            None,
            ManualClock::at(2_000),
        );
        // Persisted snapshot wins over the seed.
        assert_eq!(manager.get_state("k"), Some(json!(2)));
        let next = manager.set_state("k", json!(3), SetOptions::default());
        assert!(next.version > last_version);
    }

    #[test]
    fn test_malformed_snapshot_keeps_seed() {
        let store = StoreHandle::in_memory();
        store.put_json("state_k", &json!(42)).unwrap(); // not snapshot-shaped

        let manager = StateManager::new(
            HashMap::from([("k".to_string(), json!("seed"))]),
            StateConfig {
                legacy_keys: vec![],
                ..StateConfig::default()
            },
            store,
            None,
            ManualClock::at(1_000),
        );
        assert_eq!(manager.get_state("k"), Some(json!("seed")));
    }

    #[test]
    fn test_legacy_raw_value_is_wrapped() {
        let store = StoreHandle::in_memory();
        store
            .put_json("plan", &json!({"schedule": [{"id": "v1"}]}))
            .unwrap();

        let manager = StateManager::new(
            HashMap::new(),
            StateConfig::default(), // legacy_keys includes "plan"
            store,
            None,
            ManualClock::at(1_000),
        );

        let snapshot = manager.get_snapshot("plan").unwrap();
        assert_eq!(snapshot.data, json!({"schedule": [{"id": "v1"}]}));
        assert_eq!(snapshot.source, SnapshotSource::Local);
    }

    #[test]
    fn test_legacy_snapshot_shaped_value_is_used_as_is() {
        let store = StoreHandle::in_memory();
        let snapshot = StateSnapshot::new(json!({"schedule": []}), 42, 500, SnapshotSource::Server);
        store.put_json("state_plan", &snapshot).unwrap();

        let manager = StateManager::new(
            HashMap::new(),
            StateConfig::default(),
            store,
            None,
            ManualClock::at(1_000),
        );

        let loaded = manager.get_snapshot("plan").unwrap();
        assert_eq!(loaded.version, 42);
        assert_eq!(loaded.source, SnapshotSource::Server);
        // The counter continues above the legacy version.
        let next = manager.set_state("other", json!(1), SetOptions::default());
        assert!(next.version > 42);
    }

    #[test]
    fn test_validate_integrity() {
        let (manager, _) = manager();
        manager.set_state("k", json!({"a": 1}), SetOptions::default());
        let report = manager.validate_integrity("k");
        assert!(report.valid);
        assert_eq!(report.expected, report.actual);

        let missing = manager.validate_integrity("ghost");
        assert!(!missing.valid);
        assert_eq!(missing.expected, "N/A");
    }

    #[test]
    fn test_audit_trail_mirrors_mutations() {
        let store = StoreHandle::in_memory();
        let clock = ManualClock::at(1_000);
        let audit = Arc::new(AuditTrail::new(store.clone(), clock.clone()));
        let manager = StateManager::new(
            HashMap::new(),
            StateConfig {
                strategy: ConflictStrategy::LastWriteWins,
                legacy_keys: vec![],
                ..StateConfig::default()
            },
            store,
            Some(audit.clone()),
            clock.clone(),
        );

        manager.set_state("plan", json!({"a": 1}), SetOptions::default());
        clock.advance(10);
        manager.set_state("plan", json!({"a": 2}), SetOptions::default());
        clock.advance(10);
        // Conflicting remote write: audited at warning severity.
        manager.set_state("plan", json!({"a": 3}), SetOptions::remote());

        let events = audit.events(&AuditFilter::default());
        assert_eq!(events.len(), 3);
        // Newest first: the conflict-resolved write.
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(
            events[0].metadata.conflict_strategy,
            Some(ConflictStrategy::LastWriteWins)
        );
        assert_eq!(events[1].event_type, AuditEventKind::Update);
        assert_eq!(events[2].event_type, AuditEventKind::Set);
        assert_eq!(events[2].severity, Severity::Info);
    }

    #[test]
    fn test_clear_removes_only_prefixed_keys() {
        let (manager, store) = manager();
        manager.set_state("k", json!(1), SetOptions::default());
        store.put_json("foreign_key", &json!(true)).unwrap();

        manager.clear();
        assert!(manager.get_state("k").is_none());
        assert!(!store.exists("state_k").unwrap());
        assert!(store.exists("foreign_key").unwrap());
    }

    #[test]
    fn test_export_state() {
        let (manager, _) = manager();
        manager.set_state("a", json!(1), SetOptions::default());
        manager.set_state("b", json!(2), SetOptions::default());

        let export = manager.export_state();
        assert_eq!(export.states.len(), 2);
        assert_eq!(export.events.len(), 2);
        assert!(export.recoveries.is_empty());
        assert_eq!(export.exported_at, 1_000);
    }
}
