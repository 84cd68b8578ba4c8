//! # End-to-End Scheduler Flow
//!
//! The full loop through the runtime container: a due plan item is
//! swept, triggers a publish request on the bus, an external
//! collaborator acknowledges it, and the plan plus audit trail reflect
//! the outcome.

use chrono::{Duration as ChronoDuration, Utc};
use loop_runtime::{CoreContainer, RuntimeConfig, StorageBackend};
use serde_json::json;
use shared_bus::{BusEvent, MessageKind};
use shared_store::StoreHandle;
use shared_types::{Severity, SystemClock};
use sl_01_state_manager::SetOptions;
use sl_03_audit_trail::{AuditEventKind, AuditFilter};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.scheduler.publish_timeout = Duration::from_millis(500);
    config.scheduler.check_interval = Duration::from_millis(50);
    config
}

fn due_plan_value(item_id: &str) -> serde_json::Value {
    json!({
        "schedule": [{
            "id": item_id,
            "status": "scheduled",
            "publishTimeLocal": (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339(),
        }]
    })
}

/// Acknowledge publish requests like the external automation would.
fn acknowledge_publishes(container: &CoreContainer) -> shared_bus::BusSubscription {
    let bus = container.bus.clone();
    container
        .bus
        .subscribe(MessageKind::PublishRequested, move |m| {
            if let BusEvent::PublishRequested {
                correlation_id,
                item_id,
            } = &m.event
            {
                bus.broadcast(BusEvent::PublishResolved {
                    correlation_id: *correlation_id,
                    item_id: item_id.clone(),
                    success: true,
                    error: None,
                });
            }
            Ok(())
        })
}

#[tokio::test]
async fn test_due_item_is_published_and_audited() {
    let container = CoreContainer::build_with(
        test_config(),
        StoreHandle::in_memory(),
        Arc::new(SystemClock),
    );
    let _responder = acknowledge_publishes(&container);

    container
        .state
        .set_state("plan", due_plan_value("v1"), SetOptions::default());

    container.scheduler.sweep().await;

    // The plan item reached `published` through the state manager.
    let plan = container.state.get_state("plan").unwrap();
    assert_eq!(plan["schedule"][0]["status"], "published");

    // An UPDATE audit event for the plan key exists at info severity.
    let updates = container.audit.events(&AuditFilter {
        event_types: Some(vec![AuditEventKind::Update]),
        keys: Some(vec!["plan".to_string()]),
        severity: Some(Severity::Info),
        ..AuditFilter::default()
    });
    assert!(!updates.is_empty());

    let stats = container.scheduler.stats();
    assert_eq!(stats.successful_publishes, 1);
    assert_eq!(stats.failed_publishes, 0);
}

#[tokio::test]
async fn test_unacknowledged_item_is_marked_failed() {
    let container = CoreContainer::build_with(
        test_config(),
        StoreHandle::in_memory(),
        Arc::new(SystemClock),
    );
    // No responder: the request must time out.

    container
        .state
        .set_state("plan", due_plan_value("v1"), SetOptions::default());

    container.scheduler.sweep().await;

    let plan = container.state.get_state("plan").unwrap();
    assert_eq!(plan["schedule"][0]["status"], "failed");
    assert!(plan["schedule"][0]["error"]
        .as_str()
        .unwrap()
        .contains("timed out"));

    // The failure was routed into the audit trail at error severity.
    let errors = container.audit.events(&AuditFilter {
        severity: Some(Severity::Error),
        ..AuditFilter::default()
    });
    assert!(!errors.is_empty());
}

#[tokio::test]
async fn test_scheduler_loop_publishes_due_items() {
    let container = CoreContainer::build_with(
        test_config(),
        StoreHandle::in_memory(),
        Arc::new(SystemClock),
    );
    let _responder = acknowledge_publishes(&container);

    container
        .state
        .set_state("plan", due_plan_value("v1"), SetOptions::default());

    container.scheduler.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    container.shutdown();

    let plan = container.state.get_state("plan").unwrap();
    assert_eq!(plan["schedule"][0]["status"], "published");
    assert!(container.scheduler.stats().total_checks >= 1);
}

#[tokio::test]
async fn test_loop_state_survives_runtime_restart() {
    let store = StoreHandle::in_memory();

    {
        let container =
            CoreContainer::build_with(test_config(), store.clone(), Arc::new(SystemClock));
        let _responder = acknowledge_publishes(&container);
        container
            .state
            .set_state("plan", due_plan_value("v1"), SetOptions::default());
        container.scheduler.sweep().await;
        container.shutdown();
    }

    let reborn = CoreContainer::build_with(test_config(), store, Arc::new(SystemClock));
    let plan = reborn.state.get_state("plan").unwrap();
    assert_eq!(plan["schedule"][0]["status"], "published");

    // Audit history survived too.
    assert!(!reborn.audit.events(&AuditFilter::default()).is_empty());
}
