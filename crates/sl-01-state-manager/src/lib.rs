//! # sl-01-state-manager
//!
//! State Management subsystem for StateLoop.
//!
//! ## Role in System
//!
//! - **Single Source of Truth**: authoritative current snapshot per key
//! - **Globally monotonic versions**: one counter across all keys, so
//!   last-write-wins comparisons are well-defined under any interleaving
//! - **Conflict handling**: remote writes that disagree with the stored
//!   data are resolved per the configured strategy, never surfaced as
//!   errors
//! - **Crash-safe persistence**: every write keeps a 5-deep window of
//!   versioned backups per key, enabling rollback
//!
//! ## Closed-Loop Flow
//!
//! ```text
//! caller ──set_state──→ [State Manager] ──StateEvent──→ internal history
//!                            │    │
//!                            │    └──AuditEvent──→ [Audit Trail]
//!                            │
//!                 subscribers notified, snapshot persisted
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod service;

pub use domain::conflicts::{detect_conflict, resolve, Resolution};
pub use domain::entities::{
    IntegrityReport, SetOptions, StateConfig, StateExport, StateRecoveryAction,
    StateRecoveryKind, StateRecoveryStatus,
};
pub use domain::errors::StateError;
pub use domain::merge::deep_merge;
pub use service::{StateManager, StateSubscription};
