//! # Closed-Loop Integration Flows
//!
//! State manager, recovery service, audit trail, and message bus wired
//! together over one shared store, exercised the way the runtime wires
//! them.

use serde_json::json;
use shared_bus::{BusConfig, BusEvent, MessageBus, MessageKind, PublishOptions};
use shared_store::StoreHandle;
use shared_types::{ConflictStrategy, ManualClock, Severity};
use sl_01_state_manager::{SetOptions, StateConfig, StateManager};
use sl_02_recovery::{RecoveryPolicy, RecoveryRequest, RecoveryService};
use sl_03_audit_trail::{AuditEventKind, AuditFilter, AuditTrail};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Loop {
    store: StoreHandle,
    audit: Arc<AuditTrail>,
    bus: Arc<MessageBus>,
    state: Arc<StateManager>,
    recovery: Arc<RecoveryService>,
    clock: Arc<ManualClock>,
}

fn build_loop(strategy: ConflictStrategy) -> Loop {
    let store = StoreHandle::in_memory();
    let clock = ManualClock::at(1_000_000);
    let audit = Arc::new(AuditTrail::new(store.clone(), clock.clone()));
    let bus = Arc::new(MessageBus::with_clock(
        BusConfig::default(),
        Some(store.clone()),
        clock.clone(),
    ));
    let state = Arc::new(StateManager::new(
        HashMap::new(),
        StateConfig {
            strategy,
            legacy_keys: vec![],
            ..StateConfig::default()
        },
        store.clone(),
        Some(audit.clone()),
        clock.clone(),
    ));
    let recovery = Arc::new(RecoveryService::new(
        RecoveryPolicy {
            initial_backoff_ms: 1,
            auto_retry_delay_ms: 1,
            ack_timeout_ms: 200,
            ..RecoveryPolicy::default()
        },
        state.clone(),
        bus.clone(),
        store.clone(),
        clock.clone(),
    ));
    Loop {
        store,
        audit,
        bus,
        state,
        recovery,
        clock,
    }
}

#[tokio::test]
async fn test_recovery_rollback_restores_state_and_audits() {
    let sys = build_loop(ConflictStrategy::LastWriteWins);

    sys.state.set_state("plan", json!({"rev": 1}), SetOptions::default());
    sys.clock.advance(10);
    sys.state.set_state("plan", json!({"rev": 2}), SetOptions::default());
    sys.clock.advance(10);

    let ok = sys
        .recovery
        .execute_recovery(RecoveryRequest::rollback(
            "plan",
            None,
            "rev 2 rejected upstream",
        ))
        .await;
    assert!(ok);
    assert_eq!(sys.state.get_state("plan"), Some(json!({"rev": 1})));

    // The state manager mirrored the rollback into the audit trail.
    let rollbacks = sys.audit.events(&AuditFilter {
        event_types: Some(vec![AuditEventKind::Rollback]),
        ..AuditFilter::default()
    });
    assert_eq!(rollbacks.len(), 1);
    assert_eq!(rollbacks[0].key, "plan");
    assert_eq!(rollbacks[0].severity, Severity::Warning);
}

#[tokio::test]
async fn test_retry_flow_with_external_collaborator() {
    let sys = build_loop(ConflictStrategy::LastWriteWins);

    // The external collaborator: acknowledges retries on the bus.
    let responder_bus = sys.bus.clone();
    let _responder = sys.bus.subscribe(MessageKind::RetryRequested, move |m| {
        if let BusEvent::RetryRequested {
            correlation_id,
            state_key,
            attempt,
        } = &m.event
        {
            responder_bus.publish(
                BusEvent::RetryResolved {
                    correlation_id: *correlation_id,
                    state_key: state_key.clone(),
                    success: true,
                    detail: Some(format!("attempt {attempt} accepted")),
                },
                PublishOptions::from_source("collaborator"),
            );
        }
        Ok(())
    });

    let ok = sys
        .recovery
        .execute_recovery(RecoveryRequest::retry("plan", "retry attempt 1"))
        .await;
    assert!(ok);

    let stats = sys.recovery.stats();
    assert_eq!(stats.successful_recoveries, 1);
    assert_eq!(stats.failed_recoveries, 0);

    // The request and its response both went through the bus history.
    let history = sys.bus.message_history(&Default::default());
    assert!(history
        .iter()
        .any(|m| m.event.kind() == MessageKind::RetryRequested));
    assert!(history
        .iter()
        .any(|m| m.event.kind() == MessageKind::RetryResolved));
}

#[tokio::test]
async fn test_unanswered_requests_leave_no_subscriptions_behind() {
    let sys = build_loop(ConflictStrategy::LastWriteWins);

    for i in 0..5 {
        let ok = sys
            .recovery
            .execute_recovery(RecoveryRequest::retry("plan", format!("retry attempt {i}")))
            .await;
        assert!(!ok);
    }

    // Every one-shot response subscription was dropped after settling.
    assert_eq!(sys.bus.subscription_count(), 0);
    assert_eq!(sys.recovery.stats().failed_recoveries, 5);
}

#[tokio::test]
async fn test_conflicting_remote_write_is_resolved_and_flagged() {
    let sys = build_loop(ConflictStrategy::ManualMerge);

    sys.state
        .set_state("plan", json!({"a": 1, "b": {"x": 1}}), SetOptions::default());
    sys.clock.advance(10);
    let merged = sys
        .state
        .set_state("plan", json!({"b": {"y": 2}, "c": 3}), SetOptions::remote());

    assert_eq!(merged.data, json!({"a": 1, "b": {"x": 1, "y": 2}, "c": 3}));

    let warnings = sys.audit.events(&AuditFilter {
        severity: Some(Severity::Warning),
        ..AuditFilter::default()
    });
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].metadata.conflict_strategy,
        Some(ConflictStrategy::ManualMerge)
    );
}

#[tokio::test]
async fn test_state_survives_component_restart() {
    let store = StoreHandle::in_memory();
    let clock = ManualClock::at(1_000_000);

    {
        let state = StateManager::new(
            HashMap::new(),
            StateConfig {
                legacy_keys: vec![],
                ..StateConfig::default()
            },
            store.clone(),
            None,
            clock.clone(),
        );
        state.set_state("plan", json!({"rev": 1}), SetOptions::default());
        state.set_state("plan", json!({"rev": 2}), SetOptions::default());
        state.flush();
    }

    let reborn = StateManager::new(
        HashMap::new(),
        StateConfig {
            legacy_keys: vec!["plan".to_string()],
            ..StateConfig::default()
        },
        store,
        None,
        clock,
    );
    // The persisted snapshot is found through the legacy scan and kept
    // snapshot-shaped.
    assert_eq!(reborn.get_state("plan"), Some(json!({"rev": 2})));
    let rolled = reborn.rollback("plan", None).unwrap();
    assert_eq!(rolled.data, json!({"rev": 1}));
}

#[tokio::test]
async fn test_history_caps_hold_under_sustained_writes() {
    let sys = build_loop(ConflictStrategy::LastWriteWins);

    for i in 0..250u32 {
        sys.clock.advance(1);
        sys.state
            .set_state(&format!("k{}", i % 7), json!(i), SetOptions::default());
    }

    // State manager history capped at its default.
    assert_eq!(sys.state.state_events(None).len(), 100);
    // Audit trail holds every event up to its own (larger) cap.
    assert_eq!(sys.audit.events(&AuditFilter::default()).len(), 250);
    // All current snapshots readable, bounded backups in the store.
    for i in 0..7 {
        assert!(sys.state.get_state(&format!("k{i}")).is_some());
        let backups = sys
            .store
            .scan_prefix(&format!("state_k{i}_v"))
            .unwrap();
        assert!(backups.len() <= 5);
    }
}

#[tokio::test]
async fn test_request_race_settles_exactly_once() {
    let sys = build_loop(ConflictStrategy::LastWriteWins);

    // A responder that answers immediately: the response must win the
    // race against a generous timeout, and nothing fires afterwards.
    let responder_bus = sys.bus.clone();
    let _responder = sys.bus.subscribe(MessageKind::MergeRequested, move |m| {
        if let BusEvent::MergeRequested {
            correlation_id,
            state_key,
        } = &m.event
        {
            responder_bus.broadcast(BusEvent::MergeResolved {
                correlation_id: *correlation_id,
                state_key: state_key.clone(),
                success: true,
            });
        }
        Ok(())
    });

    let started = std::time::Instant::now();
    let response = sys
        .bus
        .request(
            BusEvent::MergeRequested {
                correlation_id: uuid::Uuid::new_v4(),
                state_key: "plan".to_string(),
            },
            Duration::from_secs(5),
        )
        .await
        .expect("response must win the race");
    assert_eq!(response.is_success(), Some(true));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(sys.bus.subscription_count(), 1); // only the responder
}
