//! # Runtime Configuration
//!
//! Defaults for every policy knob, overridable through `SL_*`
//! environment variables. Only numeric knobs and plain strings are
//! configurable; behavior switches live in code.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SL_STORAGE_BACKEND` | `file` | `file` or `memory` |
//! | `SL_STORAGE_PATH` | `stateloop.db` | File-store path |
//! | `SL_STATE_PREFIX` | `state_` | State key namespace |
//! | `SL_STATE_MAX_HISTORY` | `100` | Mutation history cap |
//! | `SL_CONFLICT_STRATEGY` | `last-write-wins` | Conflict resolution |
//! | `SL_BUS_TTL_MS` | `60000` | Message TTL / history window |
//! | `SL_BUS_ACK_TIMEOUT_MS` | `5000` | Default request timeout |
//! | `SL_MAX_RETRY_ATTEMPTS` | `5` | Recovery retry ceiling |
//! | `SL_INITIAL_BACKOFF_MS` | `1000` | First retry backoff |
//! | `SL_MAX_BACKOFF_MS` | `30000` | Backoff cap |
//! | `SL_AUTO_RETRY_DELAY_MS` | `5000` | Auto-retry delay |
//! | `SL_RECOVERY_ACK_TIMEOUT_MS` | `10000` | Recovery request timeout |
//! | `SL_CHECK_INTERVAL_SECS` | `60` | Scheduler sweep period |
//! | `SL_PUBLISH_TIMEOUT_SECS` | `30` | Publish ack timeout |

use shared_bus::BusConfig;
use shared_types::ConflictStrategy;
use sl_01_state_manager::StateConfig;
use sl_02_recovery::RecoveryPolicy;
use sl_04_scheduler::SchedulerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Which store adapter backs the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Ephemeral; for tests and dry runs.
    Memory,
    /// Single-file durable store.
    File,
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: PathBuf::from("stateloop.db"),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub storage: StorageConfig,
    pub state: StateConfig,
    pub bus: BusConfig,
    pub recovery: RecoveryPolicy,
    pub scheduler: SchedulerConfig,
}

impl RuntimeConfig {
    /// Defaults overridden by any `SL_*` environment variables set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(backend) = env_str("SL_STORAGE_BACKEND") {
            config.storage.backend = match backend.as_str() {
                "memory" => StorageBackend::Memory,
                _ => StorageBackend::File,
            };
        }
        if let Some(path) = env_str("SL_STORAGE_PATH") {
            config.storage.path = PathBuf::from(path);
        }

        if let Some(prefix) = env_str("SL_STATE_PREFIX") {
            config.state.prefix = prefix;
        }
        if let Some(max_history) = env_parse("SL_STATE_MAX_HISTORY") {
            config.state.max_history = max_history;
        }
        if let Some(strategy) = env_str("SL_CONFLICT_STRATEGY") {
            config.state.strategy = match strategy.as_str() {
                "client-wins" => ConflictStrategy::ClientWins,
                "manual-merge" => ConflictStrategy::ManualMerge,
                _ => ConflictStrategy::LastWriteWins,
            };
        }

        if let Some(ttl) = env_parse("SL_BUS_TTL_MS") {
            config.bus.default_ttl_ms = ttl;
        }
        if let Some(timeout) = env_parse("SL_BUS_ACK_TIMEOUT_MS") {
            config.bus.ack_timeout_ms = timeout;
        }

        if let Some(attempts) = env_parse("SL_MAX_RETRY_ATTEMPTS") {
            config.recovery.max_retry_attempts = attempts;
        }
        if let Some(backoff) = env_parse("SL_INITIAL_BACKOFF_MS") {
            config.recovery.initial_backoff_ms = backoff;
        }
        if let Some(cap) = env_parse("SL_MAX_BACKOFF_MS") {
            config.recovery.max_backoff_ms = cap;
        }
        if let Some(delay) = env_parse("SL_AUTO_RETRY_DELAY_MS") {
            config.recovery.auto_retry_delay_ms = delay;
        }
        if let Some(timeout) = env_parse("SL_RECOVERY_ACK_TIMEOUT_MS") {
            config.recovery.ack_timeout_ms = timeout;
        }

        if let Some(secs) = env_parse("SL_CHECK_INTERVAL_SECS") {
            config.scheduler.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("SL_PUBLISH_TIMEOUT_SECS") {
            config.scheduler.publish_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.state.max_history, 100);
        assert_eq!(config.recovery.max_retry_attempts, 5);
        assert_eq!(config.scheduler.check_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        // Process-wide env vars: prefix unlikely to collide.
        std::env::set_var("SL_STATE_MAX_HISTORY", "7");
        std::env::set_var("SL_CONFLICT_STRATEGY", "manual-merge");
        std::env::set_var("SL_STORAGE_BACKEND", "memory");

        let config = RuntimeConfig::from_env();
        assert_eq!(config.state.max_history, 7);
        assert_eq!(config.state.strategy, ConflictStrategy::ManualMerge);
        assert_eq!(config.storage.backend, StorageBackend::Memory);

        std::env::remove_var("SL_STATE_MAX_HISTORY");
        std::env::remove_var("SL_CONFLICT_STRATEGY");
        std::env::remove_var("SL_STORAGE_BACKEND");
    }
}
