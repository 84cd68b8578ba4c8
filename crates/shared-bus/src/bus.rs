//! # Message Bus
//!
//! The publishing side: synchronous priority-ordered delivery,
//! request/response with timeout, and the bounded diagnostic history.

use crate::error::{BusError, HandlerError};
use crate::events::{BusEvent, BusMessage, MessageKind};
use crate::subscriber::{
    BusSubscription, Predicate, Registry, SubscribeOptions, SubscriptionEntry,
};
use crate::{DEFAULT_ACK_TIMEOUT_MS, DEFAULT_TTL_MS};
use shared_store::StoreHandle;
use shared_types::{SystemClock, TimeSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Storage key for the persisted message history.
const HISTORY_KEY: &str = "messageBus_data";

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Default message time-to-live in milliseconds; also the floor of
    /// the history retention window.
    pub default_ttl_ms: u64,
    /// Default request acknowledgment timeout in milliseconds.
    pub ack_timeout_ms: u64,
    /// Persist the message history to the durable store.
    pub enable_persistence: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            enable_persistence: true,
        }
    }
}

/// Options for [`MessageBus::publish`].
#[derive(Default)]
pub struct PublishOptions {
    /// Logical source of the message; defaults to `"unknown"`.
    pub source: Option<String>,
    /// Track acknowledgment bookkeeping on each delivery.
    pub requires_ack: bool,
    /// Override the configured default TTL.
    pub ttl_ms: Option<u64>,
}

impl PublishOptions {
    /// Options with a named source.
    #[must_use]
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }
}

/// Filter for [`MessageBus::message_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub kind: Option<MessageKind>,
    /// Only messages with `timestamp >= since`.
    pub since: Option<u64>,
    pub limit: Option<usize>,
}

/// Bus observability counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    pub total_subscriptions: usize,
    pub subscriptions_by_kind: HashMap<String, usize>,
    pub messages_published: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub history_len: usize,
}

/// In-process message bus.
///
/// All methods take `&self`; instances are shared via `Arc`.
pub struct MessageBus {
    config: BusConfig,
    registry: Registry,
    history: Mutex<Vec<BusMessage>>,
    next_seq: AtomicU64,
    messages_published: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    store: Option<StoreHandle>,
    clock: Arc<dyn TimeSource>,
}

impl MessageBus {
    /// Create a bus with no persistence and the wall clock.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_clock(config, None, Arc::new(SystemClock))
    }

    /// Create a bus persisting its history through `store`.
    #[must_use]
    pub fn with_store(config: BusConfig, store: StoreHandle) -> Self {
        Self::with_clock(config, Some(store), Arc::new(SystemClock))
    }

    /// Full constructor with an explicit clock (used by tests and the
    /// runtime container).
    #[must_use]
    pub fn with_clock(
        config: BusConfig,
        store: Option<StoreHandle>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let history = store
            .as_ref()
            .map(|s| Self::load_history(s))
            .unwrap_or_default();

        debug!(
            default_ttl_ms = config.default_ttl_ms,
            ack_timeout_ms = config.ack_timeout_ms,
            loaded = history.len(),
            "Message bus initialized"
        );

        Self {
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
            history: Mutex::new(history),
            next_seq: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            store,
            clock,
        }
    }

    /// The configured default acknowledgment timeout.
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.config.ack_timeout_ms)
    }

    /// Publish an event to all matching subscribers.
    ///
    /// Delivery is synchronous, highest priority first, registration
    /// order within a priority. A handler failure is logged and never
    /// prevents delivery to the remaining subscribers.
    ///
    /// Returns the message id.
    pub fn publish(&self, event: BusEvent, options: PublishOptions) -> Uuid {
        let message = BusMessage {
            id: Uuid::new_v4(),
            timestamp: self.clock.now_ms(),
            source: options.source.unwrap_or_else(|| "unknown".to_string()),
            requires_ack: options.requires_ack,
            ttl: options.ttl_ms.unwrap_or(self.config.default_ttl_ms),
            event,
        };

        self.record_history(&message);
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let targets = self.matching_subscribers(&message);
        if targets.is_empty() {
            debug!(kind = %message.event.kind(), "No subscribers for message");
        }
        for entry in &targets {
            self.deliver(entry, &message);
        }

        if self.config.enable_persistence {
            self.save_history();
        }

        message.id
    }

    /// `publish` with default options - a convenience alias, not a
    /// distinct delivery mode.
    pub fn broadcast(&self, event: BusEvent) -> Uuid {
        self.publish(event, PublishOptions::default())
    }

    /// Subscribe a handler to one message kind with default options.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> BusSubscription
    where
        F: Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_with(kind, SubscribeOptions::default(), handler)
    }

    /// Subscribe with explicit priority and delivery predicate.
    pub fn subscribe_with<F>(
        &self,
        kind: MessageKind,
        options: SubscribeOptions,
        handler: F,
    ) -> BusSubscription
    where
        F: Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let entry = Arc::new(SubscriptionEntry {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            kind,
            priority: options.priority,
            predicate: options.predicate,
            handler: Box::new(handler),
            created_at: self.clock.now_ms(),
            delivered: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            last_acked_at: AtomicU64::new(0),
        });

        if let Ok(mut registry) = self.registry.write() {
            registry.entry(kind).or_default().push(entry.clone());
        }
        debug!(kind = %kind, priority = entry.priority, "Subscribed");

        BusSubscription {
            registry: self.registry.clone(),
            entry,
        }
    }

    /// Publish a request-shaped event and await its response.
    ///
    /// Exactly one of two outcomes occurs: the correlated response
    /// arrives first and is returned, or the timer fires first and
    /// [`BusError::RequestTimeout`] is returned. The one-shot response
    /// subscription is dropped on both paths.
    pub async fn request(
        &self,
        event: BusEvent,
        timeout: Duration,
    ) -> Result<BusEvent, BusError> {
        let kind = event.kind();
        let response_kind = event
            .response_kind()
            .ok_or(BusError::NotRequestable { kind })?;
        let correlation_id = event
            .correlation_id()
            .ok_or(BusError::NotRequestable { kind })?;

        let (tx, rx) = oneshot::channel::<BusEvent>();
        let tx_slot = Mutex::new(Some(tx));

        // Register the one-shot responder before publishing so a
        // synchronous responder cannot race past us.
        let response_sub = self.subscribe_with(
            response_kind,
            SubscribeOptions {
                priority: 10,
                predicate: Some(Box::new(move |m: &BusMessage| {
                    m.event.correlation_id() == Some(correlation_id)
                }) as Predicate),
            },
            move |m| {
                if let Ok(mut slot) = tx_slot.lock() {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(m.event.clone());
                    }
                }
                Ok(())
            },
        );

        let request_id = self.publish(
            event,
            PublishOptions {
                source: Some("local".to_string()),
                requires_ack: true,
                ttl_ms: None,
            },
        );

        let outcome = tokio::time::timeout(timeout, rx).await;
        drop(response_sub);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BusError::ResponseChannelClosed { request_id }),
            Err(_elapsed) => {
                warn!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(BusError::RequestTimeout {
                    request_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Remove every subscription for a kind.
    pub fn unsubscribe_all(&self, kind: MessageKind) {
        if let Ok(mut registry) = self.registry.write() {
            registry.remove(&kind);
        }
    }

    /// Total number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry
            .read()
            .map(|r| r.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Message history, newest first.
    #[must_use]
    pub fn message_history(&self, filter: &HistoryFilter) -> Vec<BusMessage> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let mut matching: Vec<BusMessage> = history
            .iter()
            .filter(|m| filter.kind.map_or(true, |k| m.event.kind() == k))
            .filter(|m| filter.since.map_or(true, |since| m.timestamp >= since))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let (total, by_kind) = self
            .registry
            .read()
            .map(|r| {
                let by_kind: HashMap<String, usize> = r
                    .iter()
                    .map(|(kind, bucket)| (kind.to_string(), bucket.len()))
                    .collect();
                let total: usize = by_kind.values().sum();
                (total, by_kind)
            })
            .unwrap_or_default();

        BusStats {
            total_subscriptions: total,
            subscriptions_by_kind: by_kind,
            messages_published: self.messages_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            history_len: self.history.lock().map(|h| h.len()).unwrap_or(0),
        }
    }

    /// Drop the message history (memory and store).
    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
        if self.config.enable_persistence {
            self.save_history();
        }
        debug!("Message history cleared");
    }

    /// Snapshot the matching subscribers for a message, in delivery
    /// order, without holding the registry lock during delivery.
    fn matching_subscribers(&self, message: &BusMessage) -> Vec<Arc<SubscriptionEntry>> {
        let Ok(registry) = self.registry.read() else {
            return Vec::new();
        };
        let Some(bucket) = registry.get(&message.event.kind()) else {
            return Vec::new();
        };
        let mut targets: Vec<Arc<SubscriptionEntry>> = bucket
            .iter()
            .filter(|e| e.accepts(message))
            .cloned()
            .collect();
        targets.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        targets
    }

    fn deliver(&self, entry: &SubscriptionEntry, message: &BusMessage) {
        entry.delivered.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(1, Ordering::Relaxed);

        match (entry.handler)(message) {
            Ok(()) => {
                if message.requires_ack {
                    entry.acknowledged.fetch_add(1, Ordering::Relaxed);
                    entry
                        .last_acked_at
                        .store(self.clock.now_ms(), Ordering::Relaxed);
                    debug!(id = %message.id, kind = %message.event.kind(), "Message acknowledged");
                }
            }
            Err(e) => {
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = %message.id,
                    kind = %message.event.kind(),
                    error = %e,
                    "Handler failed; continuing delivery"
                );
            }
        }
    }

    /// Append to the history and prune by age: entries older than
    /// `max(60s, default_ttl)` are dropped.
    fn record_history(&self, message: &BusMessage) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        history.push(message.clone());

        let now = self.clock.now_ms();
        let max_age = DEFAULT_TTL_MS.max(self.config.default_ttl_ms);
        history.retain(|m| now.saturating_sub(m.timestamp) <= max_age);
    }

    fn save_history(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let Ok(history) = self.history.lock() else {
            return;
        };
        if let Err(e) = store.put_json(HISTORY_KEY, &*history) {
            warn!(error = %e, "Failed to persist message history");
        }
    }

    fn load_history(store: &StoreHandle) -> Vec<BusMessage> {
        match store.get_json::<Vec<BusMessage>>(HISTORY_KEY) {
            Ok(Some(history)) => history,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load message history; starting fresh");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}
