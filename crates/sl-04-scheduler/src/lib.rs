//! # sl-04-scheduler
//!
//! Scheduler subsystem for StateLoop: polls an externally-owned plan
//! and, for due items, triggers publication over the message bus with
//! a bounded-time acknowledgment.
//!
//! ## Role in System
//!
//! - **Consumer of the core**: reads and writes the plan through the
//!   [`PlanSource`] port (the production adapter goes through the
//!   state manager, so every status change is versioned and audited)
//! - **Bus requester**: `PublishRequested` → awaits `PublishResolved`
//! - **Degraded mode**: with no bus attached, a publish is assumed
//!   successful after a fixed delay - an explicitly weaker guarantee
//!   carried over from the original system

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod plan;
pub mod service;

pub use plan::{Plan, PlanError, PlanItem, PlanSource, StatePlanSource};
pub use service::{
    ProgressReport, Scheduler, SchedulerConfig, SchedulerState, SchedulerStats,
};
