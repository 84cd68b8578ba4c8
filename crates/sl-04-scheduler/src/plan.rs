//! # Plan Model and Source Port
//!
//! The plan is an externally-owned resource: a collection of items,
//! each with an id, a due time, and a status. The scheduler reads and
//! writes it through the [`PlanSource`] port; the production adapter
//! stores it under the state manager's `plan` key, so every status
//! change is versioned, persisted, and audited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_bus::PlanItemStatus;
use sl_01_state_manager::{SetOptions, StateManager};
use std::sync::Arc;
use thiserror::Error;

/// Errors from plan access.
#[derive(Debug, Clone, Error)]
pub enum PlanError {
    /// The plan could not be read.
    #[error("Plan not available: {message}")]
    NotAvailable { message: String },

    /// The stored plan is not plan-shaped.
    #[error("Plan is malformed: {message}")]
    Malformed { message: String },

    /// A status update could not be applied.
    #[error("Plan update failed for {item_id}: {message}")]
    UpdateFailed { item_id: String, message: String },
}

/// One schedulable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: PlanItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time_local: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanItem {
    /// A scheduled item due at `publish_time_local`.
    #[must_use]
    pub fn scheduled(id: impl Into<String>, publish_time_local: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: None,
            status: PlanItemStatus::Scheduled,
            publish_time_local: Some(publish_time_local),
            error: None,
        }
    }

    /// True when the item should be published at `now_ms`.
    #[must_use]
    pub fn is_due(&self, now_ms: u64) -> bool {
        if self.status != PlanItemStatus::Scheduled {
            return false;
        }
        let Some(publish_time) = self.publish_time_local else {
            return false;
        };
        let due_ms = publish_time.timestamp_millis().max(0) as u64;
        due_ms <= now_ms
    }
}

/// The externally-owned plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub schedule: Vec<PlanItem>,
}

/// Port through which the scheduler reads and updates the plan.
pub trait PlanSource: Send + Sync {
    /// Load the current plan; `None` when no plan exists yet.
    fn load_plan(&self) -> Result<Option<Plan>, PlanError>;

    /// Update one item's status (and error text).
    fn update_item(
        &self,
        item_id: &str,
        status: PlanItemStatus,
        error: Option<String>,
    ) -> Result<(), PlanError>;
}

/// Production adapter: the plan lives under a state-manager key.
pub struct StatePlanSource {
    state: Arc<StateManager>,
    key: String,
}

impl StatePlanSource {
    /// Adapter over the conventional `plan` key.
    #[must_use]
    pub fn new(state: Arc<StateManager>) -> Self {
        Self::with_key(state, "plan")
    }

    /// Adapter over an explicit key.
    #[must_use]
    pub fn with_key(state: Arc<StateManager>, key: impl Into<String>) -> Self {
        Self {
            state,
            key: key.into(),
        }
    }
}

impl PlanSource for StatePlanSource {
    fn load_plan(&self) -> Result<Option<Plan>, PlanError> {
        let Some(value) = self.state.get_state(&self.key) else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| PlanError::Malformed {
                message: e.to_string(),
            })
    }

    fn update_item(
        &self,
        item_id: &str,
        status: PlanItemStatus,
        error: Option<String>,
    ) -> Result<(), PlanError> {
        let mut plan = self.load_plan()?.ok_or_else(|| PlanError::UpdateFailed {
            item_id: item_id.to_string(),
            message: "no plan stored".to_string(),
        })?;

        let item = plan
            .schedule
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| PlanError::UpdateFailed {
                item_id: item_id.to_string(),
                message: "item not found".to_string(),
            })?;
        item.status = status;
        item.error = error;

        let value = serde_json::to_value(&plan).map_err(|e| PlanError::UpdateFailed {
            item_id: item_id.to_string(),
            message: e.to_string(),
        })?;

        self.state.set_state(
            &self.key,
            value,
            SetOptions::default().with_reason(format!("Publish status update for {item_id}")),
        );
        Ok(())
    }
}
