//! # Recovery Actions
//!
//! Action records, the request shape callers hand to the service, and
//! running statistics.

use serde::{Deserialize, Serialize};

/// Kind of remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryKind {
    Rollback,
    Retry,
    ManualMerge,
    AutoRetry,
}

/// Terminal and transitional action statuses.
///
/// `Skipped` marks an auto-retry refused for a non-retryable error: no
/// attempt was made, distinguishable from `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// One recovery invocation, recorded per state key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecoveryKind,
    pub state_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<u64>,
    pub reason: String,
    pub status: RecoveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub triggered_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

/// What a caller asks the service to do.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRequest {
    pub kind: RecoveryKind,
    pub state_key: String,
    pub target_version: Option<u64>,
    pub reason: String,
}

impl RecoveryRequest {
    /// Roll a key back, optionally to an explicit version.
    #[must_use]
    pub fn rollback(
        state_key: impl Into<String>,
        target_version: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind: RecoveryKind::Rollback,
            state_key: state_key.into(),
            target_version,
            reason: reason.into(),
        }
    }

    /// Ask an external collaborator to retry an operation. Encode the
    /// attempt count in the reason (`"... attempt N"`).
    #[must_use]
    pub fn retry(state_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: RecoveryKind::Retry,
            state_key: state_key.into(),
            target_version: None,
            reason: reason.into(),
        }
    }

    /// Ask an external collaborator to merge manually.
    #[must_use]
    pub fn manual_merge(state_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: RecoveryKind::ManualMerge,
            state_key: state_key.into(),
            target_version: None,
            reason: reason.into(),
        }
    }

    /// Re-examine the latest failure for a key and retry when the
    /// policy allows it.
    #[must_use]
    pub fn auto_retry(state_key: impl Into<String>) -> Self {
        Self {
            kind: RecoveryKind::AutoRetry,
            state_key: state_key.into(),
            target_version: None,
            reason: "auto retry".to_string(),
        }
    }
}

/// Running outcome statistics.
///
/// `success_rate` is computed over attempted actions (successful +
/// failed); skipped actions count toward `total_actions` and
/// `skipped_actions` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub total_actions: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub skipped_actions: u64,
    pub avg_recovery_time_ms: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization_shape() {
        let action = RecoveryAction {
            id: "r1".into(),
            kind: RecoveryKind::ManualMerge,
            state_key: "plan".into(),
            target_version: None,
            reason: "conflict".into(),
            status: RecoveryStatus::Pending,
            error: None,
            triggered_at: 100,
            completed_at: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "MANUAL_MERGE");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["stateKey"], "plan");
        assert!(value.get("targetVersion").is_none());
    }

    #[test]
    fn test_request_constructors() {
        let request = RecoveryRequest::rollback("plan", Some(3), "bad write");
        assert_eq!(request.kind, RecoveryKind::Rollback);
        assert_eq!(request.target_version, Some(3));

        let request = RecoveryRequest::auto_retry("plan");
        assert_eq!(request.kind, RecoveryKind::AutoRetry);
    }
}
