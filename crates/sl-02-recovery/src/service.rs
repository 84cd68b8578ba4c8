//! # Recovery Service
//!
//! Dispatches typed remediation actions, records outcomes, and keeps
//! running statistics. Never errors to its caller.

use crate::actions::{
    RecoveryAction, RecoveryKind, RecoveryRequest, RecoveryStats, RecoveryStatus,
};
use crate::policy::{parse_attempt, RecoveryPolicy};
use crate::MAX_COMPLETED_PER_KEY;
use serde::{Deserialize, Serialize};
use shared_bus::{BusEvent, MessageBus};
use shared_store::StoreHandle;
use shared_types::TimeSource;
use sl_01_state_manager::StateManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage key for the persisted action log and stats.
const STORAGE_KEY: &str = "recoveryService_data";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRecovery {
    actions: HashMap<String, Vec<RecoveryAction>>,
    stats: RecoveryStats,
}

/// Bundle produced by [`RecoveryService::export_state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryExport {
    pub actions: HashMap<String, Vec<RecoveryAction>>,
    pub stats: RecoveryStats,
    pub exported_at: u64,
}

enum Outcome {
    Succeeded,
    Failed(String),
    /// No attempt was made; the reason is recorded on the action.
    Skipped(String),
}

struct Inner {
    actions: HashMap<String, Vec<RecoveryAction>>,
    stats: RecoveryStats,
}

/// The recovery service. Shared via `Arc`; all methods take `&self`.
pub struct RecoveryService {
    policy: RecoveryPolicy,
    inner: Mutex<Inner>,
    state: Arc<StateManager>,
    bus: Arc<MessageBus>,
    store: StoreHandle,
    clock: Arc<dyn TimeSource>,
}

impl RecoveryService {
    /// Create a service, restoring any persisted action log.
    #[must_use]
    pub fn new(
        policy: RecoveryPolicy,
        state: Arc<StateManager>,
        bus: Arc<MessageBus>,
        store: StoreHandle,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let persisted = match store.get_json::<PersistedRecovery>(STORAGE_KEY) {
            Ok(Some(persisted)) => {
                debug!(keys = persisted.actions.len(), "Loaded recovery log from storage");
                persisted
            }
            Ok(None) => PersistedRecovery::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load recovery log; starting fresh");
                PersistedRecovery::default()
            }
        };

        info!(
            max_retry_attempts = policy.max_retry_attempts,
            ack_timeout_ms = policy.ack_timeout_ms,
            "Recovery service initialized"
        );

        Self {
            policy,
            inner: Mutex::new(Inner {
                actions: persisted.actions,
                stats: persisted.stats,
            }),
            state,
            bus,
            store,
            clock,
        }
    }

    /// Execute one remediation. Returns `true` only on a confirmed
    /// success; every failure is caught, recorded, and returned as
    /// `false`.
    pub async fn execute_recovery(&self, request: RecoveryRequest) -> bool {
        let now = self.clock.now_ms();
        let action_id = Uuid::new_v4().to_string();

        {
            let Ok(mut inner) = self.inner.lock() else {
                return false;
            };
            inner
                .actions
                .entry(request.state_key.clone())
                .or_default()
                .push(RecoveryAction {
                    id: action_id.clone(),
                    kind: request.kind,
                    state_key: request.state_key.clone(),
                    target_version: request.target_version,
                    reason: request.reason.clone(),
                    status: RecoveryStatus::Pending,
                    error: None,
                    triggered_at: now,
                    completed_at: None,
                });
            self.persist(&mut inner);
        }

        info!(
            kind = ?request.kind,
            key = %request.state_key,
            reason = %request.reason,
            "Executing recovery"
        );

        let outcome = match request.kind {
            RecoveryKind::Rollback => self.run_rollback(&request),
            RecoveryKind::Retry => self.run_retry(&request).await,
            RecoveryKind::ManualMerge => self.run_manual_merge(&request).await,
            RecoveryKind::AutoRetry => self.run_auto_retry(&request).await,
        };

        self.finalize(&request.state_key, &action_id, outcome)
    }

    fn run_rollback(&self, request: &RecoveryRequest) -> Outcome {
        match self
            .state
            .rollback(&request.state_key, request.target_version)
        {
            Ok(snapshot) => {
                debug!(key = %request.state_key, version = snapshot.version, "Rollback completed");
                Outcome::Succeeded
            }
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    async fn run_retry(&self, request: &RecoveryRequest) -> Outcome {
        let attempt = parse_attempt(&request.reason);
        if attempt >= self.policy.max_retry_attempts {
            warn!(
                key = %request.state_key,
                attempt,
                max = self.policy.max_retry_attempts,
                "Max retry attempts reached"
            );
            return Outcome::Failed(format!(
                "Max retry attempts ({}) reached",
                self.policy.max_retry_attempts
            ));
        }

        let delay = self.policy.backoff_delay(attempt);
        debug!(key = %request.state_key, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
        tokio::time::sleep(delay).await;

        self.request_retry(&request.state_key, attempt + 1).await
    }

    async fn run_manual_merge(&self, request: &RecoveryRequest) -> Outcome {
        let event = BusEvent::MergeRequested {
            correlation_id: Uuid::new_v4(),
            state_key: request.state_key.clone(),
        };
        match self.bus.request(event, self.policy.ack_timeout()).await {
            Ok(response) if response.is_success() == Some(true) => Outcome::Succeeded,
            Ok(_) => Outcome::Failed("Manual merge was not acknowledged".to_string()),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    async fn run_auto_retry(&self, request: &RecoveryRequest) -> Outcome {
        let last_failed = {
            let Ok(inner) = self.inner.lock() else {
                return Outcome::Failed("Recovery lock poisoned".to_string());
            };
            inner.actions.get(&request.state_key).and_then(|actions| {
                actions
                    .iter()
                    .rev()
                    .find(|a| a.status == RecoveryStatus::Failed && a.error.is_some())
                    .cloned()
            })
        };

        let Some(failed) = last_failed else {
            return Outcome::Skipped("No failed action to auto-retry".to_string());
        };
        let error = failed.error.unwrap_or_default();

        if !self.policy.is_retryable(&error) {
            info!(key = %request.state_key, error = %error, "Error not retryable; skipping");
            return Outcome::Skipped(format!("Error not retryable: {error}"));
        }

        debug!(
            key = %request.state_key,
            delay_ms = self.policy.auto_retry_delay_ms,
            "Auto-retrying after delay"
        );
        tokio::time::sleep(self.policy.auto_retry_delay()).await;

        self.request_retry(&request.state_key, 1).await
    }

    async fn request_retry(&self, state_key: &str, attempt: u32) -> Outcome {
        let event = BusEvent::RetryRequested {
            correlation_id: Uuid::new_v4(),
            state_key: state_key.to_string(),
            attempt,
        };
        match self.bus.request(event, self.policy.ack_timeout()).await {
            Ok(response) if response.is_success() == Some(true) => Outcome::Succeeded,
            Ok(_) => Outcome::Failed("Retry was not acknowledged as successful".to_string()),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    /// Record the outcome on the action, update the stats, persist,
    /// and collapse the outcome into the boolean result.
    fn finalize(&self, state_key: &str, action_id: &str, outcome: Outcome) -> bool {
        let now = self.clock.now_ms();
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };

        if let Some(action) = inner
            .actions
            .get_mut(state_key)
            .and_then(|actions| actions.iter_mut().find(|a| a.id == action_id))
        {
            action.completed_at = Some(now);
            match &outcome {
                Outcome::Succeeded => action.status = RecoveryStatus::Completed,
                Outcome::Failed(error) => {
                    action.status = RecoveryStatus::Failed;
                    action.error = Some(error.clone());
                }
                Outcome::Skipped(reason) => {
                    action.status = RecoveryStatus::Skipped;
                    action.error = Some(reason.clone());
                }
            }
        }

        inner.stats.total_actions += 1;
        match &outcome {
            Outcome::Succeeded => inner.stats.successful_recoveries += 1,
            Outcome::Failed(error) => {
                warn!(key = %state_key, error = %error, "Recovery failed");
                inner.stats.failed_recoveries += 1;
            }
            Outcome::Skipped(_) => inner.stats.skipped_actions += 1,
        }
        Self::recompute_stats(&mut inner);
        self.persist(&mut inner);

        matches!(outcome, Outcome::Succeeded)
    }

    fn recompute_stats(inner: &mut Inner) {
        let completed: Vec<&RecoveryAction> = inner
            .actions
            .values()
            .flatten()
            .filter(|a| a.status == RecoveryStatus::Completed)
            .collect();

        if !completed.is_empty() {
            let total_time: u64 = completed
                .iter()
                .map(|a| a.completed_at.unwrap_or(a.triggered_at) - a.triggered_at)
                .sum();
            inner.stats.avg_recovery_time_ms = total_time as f64 / completed.len() as f64;
        }

        let attempted = inner.stats.successful_recoveries + inner.stats.failed_recoveries;
        inner.stats.success_rate = if attempted > 0 {
            inner.stats.successful_recoveries as f64 / attempted as f64 * 100.0
        } else {
            0.0
        };
    }

    /// Persist the action log (pruned) and stats.
    fn persist(&self, inner: &mut Inner) {
        Self::prune_completed(&mut inner.actions);
        let persisted = PersistedRecovery {
            actions: inner.actions.clone(),
            stats: inner.stats.clone(),
        };
        if let Err(e) = self.store.put_json(STORAGE_KEY, &persisted) {
            warn!(error = %e, "Failed to persist recovery log");
        }
    }

    /// Keep the newest completed actions per key; pending, failed, and
    /// skipped entries are retained without pruning.
    fn prune_completed(actions: &mut HashMap<String, Vec<RecoveryAction>>) {
        for entries in actions.values_mut() {
            let completed_count = entries
                .iter()
                .filter(|a| a.status == RecoveryStatus::Completed)
                .count();
            if completed_count <= MAX_COMPLETED_PER_KEY {
                continue;
            }

            let mut completed: Vec<RecoveryAction> = entries
                .iter()
                .filter(|a| a.status == RecoveryStatus::Completed)
                .cloned()
                .collect();
            completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
            completed.truncate(MAX_COMPLETED_PER_KEY);

            let mut kept: Vec<RecoveryAction> = entries
                .iter()
                .filter(|a| a.status != RecoveryStatus::Completed)
                .cloned()
                .collect();
            kept.extend(completed);
            *entries = kept;
        }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> RecoveryPolicy {
        self.policy.clone()
    }

    /// Running statistics.
    #[must_use]
    pub fn stats(&self) -> RecoveryStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }

    /// All actions still pending, across keys.
    #[must_use]
    pub fn pending_actions(&self) -> Vec<RecoveryAction> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .actions
                    .values()
                    .flatten()
                    .filter(|a| a.status == RecoveryStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Action history for one state key.
    #[must_use]
    pub fn recovery_history(&self, state_key: &str) -> Vec<RecoveryAction> {
        self.inner
            .lock()
            .map(|inner| inner.actions.get(state_key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Full dump of the action log and stats for external consumption.
    #[must_use]
    pub fn export_state(&self) -> RecoveryExport {
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .map(|inner| RecoveryExport {
                actions: inner.actions.clone(),
                stats: inner.stats.clone(),
                exported_at: now,
            })
            .unwrap_or(RecoveryExport {
                actions: HashMap::new(),
                stats: RecoveryStats::default(),
                exported_at: now,
            })
    }

    /// Drop all actions and reset statistics.
    pub fn clear(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.actions.clear();
        inner.stats = RecoveryStats::default();
        if let Err(e) = self.store.remove(STORAGE_KEY) {
            warn!(error = %e, "Failed to clear persisted recovery log");
        }
        info!("Recovery log cleared");
    }
}

impl std::fmt::Debug for RecoveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryService").finish_non_exhaustive()
    }
}
