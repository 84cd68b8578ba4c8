//! # Shared Types - Core Data Model
//!
//! Entity definitions shared across StateLoop subsystems: state
//! snapshots, conflict descriptions, mutation events, severity
//! classification, the equality fingerprint, and the time source port.
//!
//! Nothing in this crate performs I/O; it is the vocabulary the
//! subsystems speak to each other.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod checksum;
pub mod entities;
pub mod time;

// Re-export main types
pub use checksum::fingerprint;
pub use entities::{
    ConflictStrategy, Severity, SnapshotSource, StateConflict, StateEvent, StateEventKind,
    StateSnapshot, StateValue,
};
pub use time::{ManualClock, SystemClock, TimeSource};
