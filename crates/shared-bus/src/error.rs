//! # Bus Errors

use crate::events::MessageKind;
use thiserror::Error;
use uuid::Uuid;

/// Errors from bus operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    /// A request received no matching response in time. Carries a
    /// distinguishable shape so callers can special-case timeouts from
    /// genuine errors.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout { request_id: Uuid, timeout_ms: u64 },

    /// `request` was called with an event that has no response kind.
    #[error("Event kind {kind} is not request-shaped")]
    NotRequestable { kind: MessageKind },

    /// The one-shot response channel closed before settling. Indicates
    /// an internal invariant violation, not a timeout.
    #[error("Response channel closed for request {request_id}")]
    ResponseChannelClosed { request_id: Uuid },
}

impl BusError {
    /// True when this error is the timeout shape.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }
}

/// Failure reported by a subscriber's handler. Logged per subscriber;
/// never propagated to the publisher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
