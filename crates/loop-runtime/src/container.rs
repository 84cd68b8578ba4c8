//! # Core Container
//!
//! Builds every component once, in dependency order, and hands out
//! shared handles. This replaces the original system's module-level
//! singletons with explicit construction.

use crate::config::{RuntimeConfig, StorageBackend};
use crate::wiring::wire_audit;
use shared_bus::{BusEvent, BusSubscription, MessageBus};
use shared_store::{FileStore, StoreHandle};
use shared_types::{SystemClock, TimeSource};
use sl_01_state_manager::{StateManager, StateSubscription};
use sl_02_recovery::RecoveryService;
use sl_03_audit_trail::AuditTrail;
use sl_04_scheduler::{Scheduler, StatePlanSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// The assembled closed loop.
pub struct CoreContainer {
    pub store: StoreHandle,
    pub audit: Arc<AuditTrail>,
    pub bus: Arc<MessageBus>,
    pub state: Arc<StateManager>,
    pub recovery: Arc<RecoveryService>,
    pub scheduler: Arc<Scheduler>,
    /// Audit-routing subscriptions; dropped with the container.
    _wiring: Vec<BusSubscription>,
    /// Bridges plan-state changes onto the bus as `StateChanged`.
    _state_bridge: StateSubscription,
}

impl CoreContainer {
    /// Build from configuration with the wall clock.
    #[must_use]
    pub fn build(config: RuntimeConfig) -> Self {
        let store = match config.storage.backend {
            StorageBackend::Memory => StoreHandle::in_memory(),
            StorageBackend::File => {
                StoreHandle::new(Box::new(FileStore::open(&config.storage.path)))
            }
        };
        Self::build_with(config, store, Arc::new(SystemClock))
    }

    /// Build over an explicit store and clock (tests, embedders).
    #[must_use]
    pub fn build_with(
        config: RuntimeConfig,
        store: StoreHandle,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let audit = Arc::new(AuditTrail::new(store.clone(), clock.clone()));
        let bus = Arc::new(MessageBus::with_clock(
            config.bus,
            Some(store.clone()),
            clock.clone(),
        ));
        let state = Arc::new(StateManager::new(
            HashMap::new(),
            config.state,
            store.clone(),
            Some(audit.clone()),
            clock.clone(),
        ));
        let recovery = Arc::new(RecoveryService::new(
            config.recovery,
            state.clone(),
            bus.clone(),
            store.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler,
            Arc::new(StatePlanSource::new(state.clone())),
            Some(bus.clone()),
            clock,
        ));

        let wiring = wire_audit(&bus, &audit);

        // Components that cannot (or should not) hold a state-manager
        // handle observe plan changes over the bus instead.
        let bridge_bus = bus.clone();
        let bridge_state = Arc::downgrade(&state);
        let state_bridge = state.subscribe("plan", move |_| {
            let Some(state) = bridge_state.upgrade() else {
                return;
            };
            if let Some(snapshot) = state.get_snapshot("plan") {
                bridge_bus.broadcast(BusEvent::StateChanged {
                    key: "plan".to_string(),
                    snapshot,
                });
            }
        });

        info!("Core container assembled");
        Self {
            store,
            audit,
            bus,
            state,
            recovery,
            scheduler,
            _wiring: wiring,
            _state_bridge: state_bridge,
        }
    }

    /// Stop the scheduler and flush state to storage.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.state.flush();
        info!("Core container shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use serde_json::json;
    use shared_types::ManualClock;
    use sl_01_state_manager::SetOptions;

    fn memory_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.state.legacy_keys = vec![];
        config
    }

    #[test]
    fn test_container_builds_and_shuts_down() {
        let container = CoreContainer::build(memory_config());
        assert!(!container.scheduler.is_active());
        container.shutdown();
    }

    #[test]
    fn test_components_share_one_store() {
        let store = StoreHandle::in_memory();
        let clock = ManualClock::at(1_000);
        let container = CoreContainer::build_with(memory_config(), store.clone(), clock);

        container
            .state
            .set_state("plan", json!({"schedule": []}), SetOptions::default());

        // The state manager's write landed in the shared store under
        // its namespace.
        assert!(store.exists("state_plan").unwrap());
        // And the audit trail recorded it in its own namespace.
        assert!(store.exists("audit_trail").unwrap());
    }

    #[test]
    fn test_plan_changes_are_broadcast_on_the_bus() {
        let container = CoreContainer::build(memory_config());

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = container
            .bus
            .subscribe(shared_bus::MessageKind::StateChanged, move |m| {
                seen_clone.lock().unwrap().push(m.event.clone());
                Ok(())
            });

        container
            .state
            .set_state("plan", json!({"schedule": []}), SetOptions::default());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            BusEvent::StateChanged { key, snapshot } => {
                assert_eq!(key, "plan");
                assert_eq!(snapshot.data, json!({"schedule": []}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
