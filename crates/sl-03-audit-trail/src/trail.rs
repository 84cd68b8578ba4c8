//! # Audit Trail Service
//!
//! Append-only in-memory log persisted wholesale to its own storage
//! key, with session bookkeeping for correlating events to one run.

use crate::events::{
    AuditEvent, AuditEventDraft, AuditEventKind, AuditExport, AuditFilter, AuditStats, TimeRange,
};
use crate::MAX_EVENTS;
use shared_store::StoreHandle;
use shared_types::{Severity, TimeSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Storage key for the persisted event list.
const STORAGE_KEY: &str = "audit_trail";

/// Current session descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub start: u64,
    pub event_count: usize,
}

struct Inner {
    events: Vec<AuditEvent>,
    session_id: String,
    session_start: u64,
}

/// The audit trail. Shared via `Arc`; all methods take `&self`.
pub struct AuditTrail {
    inner: Mutex<Inner>,
    store: StoreHandle,
    clock: Arc<dyn TimeSource>,
}

impl AuditTrail {
    /// Create a trail over `store`, loading any persisted events.
    #[must_use]
    pub fn new(store: StoreHandle, clock: Arc<dyn TimeSource>) -> Self {
        let events = match store.get_json::<Vec<AuditEvent>>(STORAGE_KEY) {
            Ok(Some(events)) => {
                debug!(count = events.len(), "Loaded audit trail from storage");
                events
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load audit trail; starting fresh");
                Vec::new()
            }
        };

        let session_id = Self::generate_session_id();
        let session_start = clock.now_ms();
        info!(session = %session_id, "Audit trail initialized");

        Self {
            inner: Mutex::new(Inner {
                events,
                session_id,
                session_start,
            }),
            store,
            clock,
        }
    }

    fn generate_session_id() -> String {
        format!("audit_{}", Uuid::new_v4().simple())
    }

    /// Log one event. Missing fields are filled in: id, timestamp, and
    /// a session-derived user id.
    pub fn log_event(&self, draft: AuditEventDraft) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let now = self.clock.now_ms();

        let event = AuditEvent {
            id: format!("{}_{}", inner.session_id, Uuid::new_v4().simple()),
            event_type: draft.event_type.unwrap_or(AuditEventKind::Set),
            key: draft.key,
            timestamp: now,
            user_id: draft
                .user_id
                .or_else(|| Some(format!("session_{}", inner.session_id))),
            old_value: draft.old_value,
            new_value: draft.new_value,
            metadata: draft.metadata,
            severity: draft.severity.unwrap_or(Severity::Info),
        };

        debug!(
            kind = ?event.event_type,
            key = %event.key,
            severity = %event.severity,
            "Audit event logged"
        );

        inner.events.push(event);
        Self::prune(&mut inner.events);
        self.persist(&inner.events);
    }

    /// Log a batch of events.
    pub fn log_events(&self, drafts: Vec<AuditEventDraft>) {
        for draft in drafts {
            self.log_event(draft);
        }
    }

    /// Filtered events, newest first.
    #[must_use]
    pub fn events(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut matching: Vec<AuditEvent> = inner
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching
    }

    /// Aggregate statistics over the filtered set.
    #[must_use]
    pub fn stats(&self, filter: &AuditFilter) -> AuditStats {
        let filtered = self.events(filter);

        let mut by_type: HashMap<AuditEventKind, usize> = HashMap::new();
        let mut by_severity: HashMap<Severity, usize> = HashMap::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for event in &filtered {
            *by_type.entry(event.event_type).or_insert(0) += 1;
            *by_severity.entry(event.severity).or_insert(0) += 1;
            *by_key.entry(event.key.clone()).or_insert(0) += 1;
        }

        // `filtered` is newest-first: the span runs from the last
        // element (oldest) to the first (newest).
        let now = self.clock.now_ms();
        let time_range = TimeRange {
            start: filtered.last().map_or(now, |e| e.timestamp),
            end: filtered.first().map_or(now, |e| e.timestamp),
        };

        AuditStats {
            total_events: filtered.len(),
            events_by_type: by_type,
            events_by_severity: by_severity,
            events_by_key: by_key,
            time_range,
        }
    }

    /// Bundle filtered events and stats for external consumption.
    #[must_use]
    pub fn export(&self, filter: &AuditFilter) -> AuditExport {
        let events = self.events(filter);
        let stats = self.stats(filter);
        info!(count = events.len(), "Exported audit events");

        AuditExport {
            events,
            stats,
            exported_at: self.clock.now_ms(),
        }
    }

    /// Drop all events (memory and store).
    pub fn clear(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.events.clear();
        self.persist(&inner.events);
        info!("Audit trail cleared");
    }

    /// Current session descriptor.
    #[must_use]
    pub fn session_info(&self) -> SessionInfo {
        let Ok(inner) = self.inner.lock() else {
            return SessionInfo {
                session_id: String::new(),
                start: 0,
                event_count: 0,
            };
        };
        SessionInfo {
            session_id: inner.session_id.clone(),
            start: inner.session_start,
            event_count: inner.events.len(),
        }
    }

    /// Start a new session; already-logged events keep their ids.
    pub fn reset_session(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.session_id = Self::generate_session_id();
        inner.session_start = self.clock.now_ms();
        info!(session = %inner.session_id, "Audit session reset");
    }

    fn prune(events: &mut Vec<AuditEvent>) {
        if events.len() > MAX_EVENTS {
            let removed = events.len() - MAX_EVENTS;
            events.drain(0..removed);
            warn!(removed, limit = MAX_EVENTS, "Pruned oldest audit events");
        }
    }

    fn persist(&self, events: &[AuditEvent]) {
        if let Err(e) = self.store.put_json(STORAGE_KEY, &events) {
            warn!(error = %e, "Failed to persist audit trail");
        }
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}
