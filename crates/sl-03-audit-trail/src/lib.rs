//! # sl-03-audit-trail
//!
//! Durable, queryable log of notable domain events with severity
//! classification - broader than state mutations: any subsystem may
//! record here.
//!
//! ## Role in System
//!
//! - **Leaf component**: depends on nothing else in the core
//! - **Separately owned log**: independent of the state manager's
//!   internal mutation history, with its own retention policy
//! - **Severity-driven presentation**: the `severity` field is what a
//!   presentation layer keys diagnostics and alerts off

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod trail;

// Re-export main types
pub use events::{
    AuditEvent, AuditEventDraft, AuditEventKind, AuditExport, AuditFilter, AuditMetadata,
    AuditStats, TimeRange,
};
pub use trail::{AuditTrail, SessionInfo};

/// Maximum retained audit events; oldest are pruned first.
pub const MAX_EVENTS: usize = 1000;
