//! # sl-02-recovery
//!
//! Recovery subsystem for StateLoop: executes typed remediation
//! actions against failures reported by other components, tracks
//! outcome statistics, and applies exponential backoff for retries.
//!
//! ## Role in System
//!
//! - **Rollback** delegates to the state manager
//! - **Retry / ManualMerge** ask an external collaborator over the bus
//!   and succeed only on an acknowledged success
//! - **AutoRetry** re-examines the most recent failure against the
//!   policy's retryable-error patterns and refuses non-retryable ones
//!   without counting an attempt
//!
//! `execute_recovery` never returns an error to its caller: every
//! internal failure is caught, recorded on the action, and reflected
//! in the boolean result and the stats counters.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod actions;
pub mod policy;
pub mod service;

pub use actions::{
    RecoveryAction, RecoveryKind, RecoveryRequest, RecoveryStats, RecoveryStatus,
};
pub use policy::{FailureCategory, RecoveryPolicy};
pub use service::{RecoveryExport, RecoveryService};

/// Completed actions retained per state key; other statuses are kept
/// without pruning.
pub const MAX_COMPLETED_PER_KEY: usize = 50;
