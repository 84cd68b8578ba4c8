//! # Subscriptions
//!
//! Subscription bookkeeping and the guard handed back to subscribers.
//! Dropping the guard removes the subscription, so a subscriber that
//! goes away cannot accumulate in the registry.

use crate::error::HandlerError;
use crate::events::{BusMessage, MessageKind};
use crate::DEFAULT_PRIORITY;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Handler invoked for each delivered message.
pub type Handler = Box<dyn Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Per-subscription delivery predicate, evaluated against the full
/// envelope before the handler is invoked.
pub type Predicate = Box<dyn Fn(&BusMessage) -> bool + Send + Sync>;

pub(crate) type Registry = Arc<RwLock<HashMap<MessageKind, Vec<Arc<SubscriptionEntry>>>>>;

/// Options for [`crate::MessageBus::subscribe_with`].
pub struct SubscribeOptions {
    /// Delivery priority; higher priorities are delivered first,
    /// registration order within equal priorities.
    pub priority: u8,
    /// Optional predicate narrowing which messages this subscriber
    /// receives.
    pub predicate: Option<Predicate>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            predicate: None,
        }
    }
}

impl SubscribeOptions {
    /// Options with a custom priority.
    #[must_use]
    pub fn priority(priority: u8) -> Self {
        Self {
            priority,
            predicate: None,
        }
    }
}

/// One registered subscriber.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: Uuid,
    /// Registration sequence; ties delivery order within a priority.
    pub(crate) seq: u64,
    pub(crate) kind: MessageKind,
    pub(crate) priority: u8,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) handler: Handler,
    pub(crate) created_at: u64,
    pub(crate) delivered: AtomicU64,
    pub(crate) acknowledged: AtomicU64,
    /// Epoch ms of the last acknowledgment; 0 when never acked.
    pub(crate) last_acked_at: AtomicU64,
}

impl SubscriptionEntry {
    pub(crate) fn accepts(&self, message: &BusMessage) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(message))
    }
}

/// A subscription handle.
///
/// When dropped, the subscription is removed from the registry and the
/// kind's bucket is released once empty.
pub struct BusSubscription {
    pub(crate) registry: Registry,
    pub(crate) entry: Arc<SubscriptionEntry>,
}

impl BusSubscription {
    /// The kind this subscription listens on.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.entry.kind
    }

    /// Number of messages delivered to this subscriber.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.entry.delivered.load(Ordering::Relaxed)
    }

    /// Number of ack-requiring messages this subscriber handled
    /// successfully.
    #[must_use]
    pub fn acknowledged(&self) -> u64 {
        self.entry.acknowledged.load(Ordering::Relaxed)
    }

    /// Epoch ms of the last acknowledgment, if any.
    #[must_use]
    pub fn last_acked_at(&self) -> Option<u64> {
        match self.entry.last_acked_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Registration timestamp in epoch ms.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.entry.created_at
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        let Ok(mut registry) = self.registry.write() else {
            return;
        };
        let Some(bucket) = registry.get_mut(&self.entry.kind) else {
            return;
        };
        bucket.retain(|e| e.id != self.entry.id);
        if bucket.is_empty() {
            registry.remove(&self.entry.kind);
        }
        debug!(kind = %self.entry.kind, "Subscription dropped");
    }
}
