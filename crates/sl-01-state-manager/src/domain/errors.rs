//! Error types for state operations.
//!
//! Only programmer-error conditions surface as errors; conflicts are
//! resolved and storage hiccups are logged, never thrown.

use thiserror::Error;

/// Errors that can occur in the State Management subsystem.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// Rollback requested for a key that was never set.
    #[error("Cannot rollback {key}: no current state")]
    NoCurrentState { key: String },

    /// No persisted backup exists at the requested version.
    #[error("Cannot rollback {key} to version {version}: backup not found")]
    BackupNotFound { key: String, version: u64 },

    /// A persisted backup exists but cannot be parsed.
    #[error("Backup for {key} at version {version} is corrupt: {message}")]
    CorruptBackup {
        key: String,
        version: u64,
        message: String,
    },
}
