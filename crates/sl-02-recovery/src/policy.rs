//! # Recovery Policies
//!
//! Numeric knobs and retryable-error patterns, configurable per
//! failure category. Patterns are case-insensitive substrings of the
//! recorded error message.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy governing one recovery service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicy {
    pub max_retry_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Case-insensitive substrings matched against error messages.
    pub retryable_errors: Vec<String>,
    pub auto_retry_delay_ms: u64,
    pub ack_timeout_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            retryable_errors: vec![
                "connection refused".to_string(),
                "connection reset".to_string(),
                "connection aborted".to_string(),
                "timed out".to_string(),
                "502".to_string(),
                "503".to_string(),
                "504".to_string(),
            ],
            auto_retry_delay_ms: 5_000,
            ack_timeout_ms: 10_000,
        }
    }
}

/// Failure categories with dedicated policy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// Two writers disagreed on a key's value.
    Conflict,
    /// An acknowledgment or API call ran out of time.
    Timeout,
    /// Transport-level failures.
    Network,
    /// Upstream 5xx responses.
    Server,
    /// Storage exhausted. Non-retryable: retrying does not free space.
    StorageFull,
}

impl RecoveryPolicy {
    /// Preset policy for a failure category.
    #[must_use]
    pub fn for_category(category: FailureCategory) -> Self {
        let base = Self::default();
        match category {
            FailureCategory::Conflict => Self {
                retryable_errors: vec!["conflict".to_string()],
                auto_retry_delay_ms: 2_000,
                ..base
            },
            FailureCategory::Timeout => Self {
                retryable_errors: vec!["timeout".to_string(), "timed out".to_string()],
                backoff_multiplier: 3.0,
                ..base
            },
            FailureCategory::Network => Self {
                retryable_errors: vec![
                    "network".to_string(),
                    "fetch".to_string(),
                    "connection".to_string(),
                ],
                backoff_multiplier: 2.0,
                ..base
            },
            FailureCategory::Server => Self {
                retryable_errors: vec![
                    "500".to_string(),
                    "502".to_string(),
                    "503".to_string(),
                    "504".to_string(),
                    "server".to_string(),
                ],
                max_retry_attempts: 3,
                ..base
            },
            FailureCategory::StorageFull => Self {
                retryable_errors: vec![
                    "quota".to_string(),
                    "storage".to_string(),
                    "disk".to_string(),
                    "memory".to_string(),
                ],
                max_retry_attempts: 0,
                ..base
            },
        }
    }

    /// True when the error message matches any retryable pattern.
    #[must_use]
    pub fn is_retryable(&self, error: &str) -> bool {
        let error = error.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|pattern| error.contains(&pattern.to_lowercase()))
    }

    /// Exponential backoff for a retry attempt, capped at
    /// `max_backoff_ms`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX) - 1;
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((backoff as u64).min(self.max_backoff_ms))
    }

    /// The acknowledgment timeout as a `Duration`.
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// The auto-retry delay as a `Duration`.
    #[must_use]
    pub fn auto_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auto_retry_delay_ms)
    }
}

/// Extract the attempt count from a reason like `"retry attempt 3"`;
/// 0 when absent.
#[must_use]
pub fn parse_attempt(reason: &str) -> u32 {
    let Some(index) = reason.find("attempt ") else {
        return 0;
    };
    let digits: String = reason[index + "attempt ".len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}
