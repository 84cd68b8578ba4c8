//! # Event Routing
//!
//! Routes notable bus traffic into the audit trail, which is broader
//! than state mutations: publish failures, plan status changes, and
//! recovery requests all leave a queryable record.

use shared_bus::{BusEvent, BusSubscription, MessageBus, MessageKind, PlanItemStatus};
use shared_types::Severity;
use sl_03_audit_trail::{AuditEventDraft, AuditEventKind, AuditMetadata, AuditTrail};
use std::sync::Arc;

/// Subscribe the audit trail to the bus. The returned subscriptions
/// must be held for as long as the routing should stay active.
#[must_use]
pub fn wire_audit(bus: &MessageBus, audit: &Arc<AuditTrail>) -> Vec<BusSubscription> {
    let mut subscriptions = Vec::new();

    let sink = audit.clone();
    subscriptions.push(bus.subscribe(MessageKind::PlanItemUpdated, move |m| {
        if let BusEvent::PlanItemUpdated {
            item_id,
            status,
            error,
            ..
        } = &m.event
        {
            let severity = if *status == PlanItemStatus::Failed {
                Severity::Error
            } else {
                Severity::Info
            };
            let mut draft = AuditEventDraft::new(AuditEventKind::Update, "plan", severity)
                .with_metadata(AuditMetadata {
                    reason: error.clone(),
                    ..AuditMetadata::default()
                });
            draft.new_value = Some(serde_json::json!({
                "itemId": item_id,
                "status": status,
            }));
            sink.log_event(draft);
        }
        Ok(())
    }));

    let sink = audit.clone();
    subscriptions.push(bus.subscribe(MessageKind::PublishFailed, move |m| {
        if let BusEvent::PublishFailed { item_id, error, .. } = &m.event {
            let key = item_id.as_deref().unwrap_or("plan");
            sink.log_event(
                AuditEventDraft::new(AuditEventKind::ValidationFailed, key, Severity::Error)
                    .with_metadata(AuditMetadata {
                        reason: Some(error.clone()),
                        ..AuditMetadata::default()
                    }),
            );
        }
        Ok(())
    }));

    let sink = audit.clone();
    subscriptions.push(bus.subscribe(MessageKind::RetryRequested, move |m| {
        if let BusEvent::RetryRequested {
            state_key, attempt, ..
        } = &m.event
        {
            sink.log_event(
                AuditEventDraft::new(AuditEventKind::Retry, state_key.clone(), Severity::Info)
                    .with_metadata(AuditMetadata {
                        reason: Some(format!("retry attempt {attempt}")),
                        ..AuditMetadata::default()
                    }),
            );
        }
        Ok(())
    }));

    let sink = audit.clone();
    subscriptions.push(bus.subscribe(MessageKind::MergeRequested, move |m| {
        if let BusEvent::MergeRequested { state_key, .. } = &m.event {
            sink.log_event(AuditEventDraft::new(
                AuditEventKind::Merge,
                state_key.clone(),
                Severity::Info,
            ));
        }
        Ok(())
    }));

    subscriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::BusConfig;
    use shared_store::StoreHandle;
    use shared_types::SystemClock;
    use sl_03_audit_trail::AuditFilter;
    use uuid::Uuid;

    #[test]
    fn test_publish_failure_reaches_audit() {
        let bus = MessageBus::new(BusConfig {
            enable_persistence: false,
            ..BusConfig::default()
        });
        let audit = Arc::new(AuditTrail::new(
            StoreHandle::in_memory(),
            Arc::new(SystemClock),
        ));
        let _wiring = wire_audit(&bus, &audit);

        bus.broadcast(BusEvent::PublishFailed {
            item_id: None,
            error: "backing store offline".to_string(),
            timestamp: 1,
        });

        let events = audit.events(&AuditFilter {
            severity: Some(Severity::Error),
            ..AuditFilter::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventKind::ValidationFailed);
    }

    #[test]
    fn test_plan_update_and_retry_reach_audit() {
        let bus = MessageBus::new(BusConfig {
            enable_persistence: false,
            ..BusConfig::default()
        });
        let audit = Arc::new(AuditTrail::new(
            StoreHandle::in_memory(),
            Arc::new(SystemClock),
        ));
        let _wiring = wire_audit(&bus, &audit);

        bus.broadcast(BusEvent::PlanItemUpdated {
            item_id: "v1".to_string(),
            status: PlanItemStatus::Published,
            error: None,
            timestamp: 1,
        });
        bus.broadcast(BusEvent::RetryRequested {
            correlation_id: Uuid::new_v4(),
            state_key: "plan".to_string(),
            attempt: 2,
        });

        let events = audit.events(&AuditFilter::default());
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.event_type == AuditEventKind::Update));
        assert!(events.iter().any(|e| e.event_type == AuditEventKind::Retry
            && e.metadata.reason.as_deref() == Some("retry attempt 2")));
    }
}
