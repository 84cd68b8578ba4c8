//! # Shared Bus - In-Process Messaging
//!
//! Publish/subscribe and request/response messaging between otherwise
//! unaware subsystems. Every message type is a known [`BusEvent`]
//! variant, so handling sites match exhaustively instead of inspecting
//! duck-typed payloads.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Recovery     │                    │ External     │
//! │ Service      │    request()       │ collaborator │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │ Message Bus  │ ─────────┘
//!                  │              │  subscribe()
//!                  └──────────────┘
//! ```
//!
//! ## Delivery contract
//!
//! - Synchronous, in-process delivery in priority order (highest
//!   subscriber priority first, registration order within a priority).
//! - One handler's failure never prevents delivery to the rest.
//! - `request` races a one-shot response subscription against a timer;
//!   the subscription is dropped on both settlement paths.
//! - History is bounded by age, not count, and is diagnostic only.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod error;
pub mod events;
pub mod subscriber;

// Re-export main types
pub use bus::{BusConfig, BusStats, HistoryFilter, MessageBus, PublishOptions};
pub use error::{BusError, HandlerError};
pub use events::{BusEvent, BusMessage, MessageKind, PlanItemStatus, PublishStage, Topic};
pub use subscriber::{BusSubscription, SubscribeOptions};

/// Default message time-to-live in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Default acknowledgment timeout for requests, in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;

/// Default subscriber priority.
pub const DEFAULT_PRIORITY: u8 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl() {
        assert_eq!(DEFAULT_TTL_MS, 60_000);
    }

    #[test]
    fn test_default_priority() {
        assert_eq!(DEFAULT_PRIORITY, 5);
    }
}
