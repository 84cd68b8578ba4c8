//! # Scheduler Service
//!
//! Timer-driven due-check loop: loads the plan, triggers publication
//! for due items over the bus, and records the outcome back through
//! the plan source.

use crate::plan::{PlanItem, PlanSource};
use shared_bus::{BusEvent, MessageBus, PlanItemStatus, PublishStage};
use shared_types::TimeSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the due-check loop runs.
    pub check_interval: Duration,
    /// How long to wait for a publish acknowledgment.
    pub publish_timeout: Duration,
    /// Attempts after which progress estimates bottom out.
    pub max_publish_attempts: u32,
    /// Delay before assuming success when no bus is attached.
    pub fallback_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(30),
            max_publish_attempts: 3,
            fallback_delay: Duration::from_secs(10),
        }
    }
}

/// Publish statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub total_checks: u64,
    pub triggered_items: u64,
    pub successful_publishes: u64,
    pub failed_publishes: u64,
    pub avg_publish_duration_ms: Option<f64>,
}

/// Point-in-time view of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub running: bool,
    pub check_interval_ms: u64,
    pub last_check_at: Option<u64>,
}

/// Progress estimate for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub item_id: String,
    pub stage: PublishStage,
    pub percent: u8,
    pub error: Option<String>,
}

struct TriggerRecord {
    stage: PublishStage,
}

struct Inner {
    running: bool,
    last_check_at: Option<u64>,
    triggered: HashMap<String, TriggerRecord>,
    attempts: HashMap<String, u32>,
    stats: SchedulerStats,
}

/// The scheduler. Shared via `Arc`; the loop task holds a clone.
pub struct Scheduler {
    config: Mutex<SchedulerConfig>,
    plan: Arc<dyn PlanSource>,
    bus: Option<Arc<MessageBus>>,
    clock: Arc<dyn TimeSource>,
    inner: Mutex<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. `bus: None` selects the degraded
    /// success-after-delay mode.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        plan: Arc<dyn PlanSource>,
        bus: Option<Arc<MessageBus>>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        info!(
            check_interval_ms = config.check_interval.as_millis() as u64,
            has_bus = bus.is_some(),
            "Scheduler initialized"
        );
        Self {
            config: Mutex::new(config),
            plan,
            bus,
            clock,
            inner: Mutex::new(Inner {
                running: false,
                last_check_at: None,
                triggered: HashMap::new(),
                attempts: HashMap::new(),
                stats: SchedulerStats::default(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the due-check loop: one sweep immediately, then every
    /// `check_interval`. Idempotent with a warning when already
    /// running.
    pub fn start(self: &Arc<Self>) {
        {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.running {
                warn!("Scheduler already running");
                return;
            }
            inner.running = true;
        }

        let interval = self.check_interval();
        self.broadcast(BusEvent::SchedulerStarted {
            check_interval_ms: interval.as_millis() as u64,
        });
        info!(check_interval_ms = interval.as_millis() as u64, "Scheduler started");

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                scheduler.sweep().await;
                tokio::time::sleep(scheduler.check_interval()).await;
                if !scheduler.is_active() {
                    break;
                }
            }
        });

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Stop the loop.
    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        let was_running = self
            .inner
            .lock()
            .map(|mut inner| std::mem::replace(&mut inner.running, false))
            .unwrap_or(false);
        if was_running {
            self.broadcast(BusEvent::SchedulerStopped);
            info!("Scheduler stopped");
        }
    }

    /// One due-check pass over the plan. Load failures are reported on
    /// the bus, never panic.
    pub async fn sweep(&self) {
        let now = self.clock.now_ms();

        let plan = match self.plan.load_plan() {
            Ok(Some(plan)) => plan,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to load plan");
                self.broadcast(BusEvent::PublishFailed {
                    item_id: None,
                    error: e.to_string(),
                    timestamp: now,
                });
                return;
            }
        };
        if plan.schedule.is_empty() {
            return;
        }

        let mut triggered = 0;
        for item in &plan.schedule {
            if item.is_due(now) {
                info!(item = %item.id, "Triggering publish for due item");
                self.trigger_publish(item).await;
                triggered += 1;
            }
        }

        if let Ok(mut inner) = self.inner.lock() {
            inner.last_check_at = Some(now);
            inner.stats.total_checks += 1;
        }
        if triggered > 0 {
            info!(triggered, "Due-check sweep triggered items");
        }

        self.broadcast(BusEvent::SchedulerSwept {
            checked_at: now,
            triggered,
            total_items: plan.schedule.len(),
        });
    }

    async fn trigger_publish(&self, item: &PlanItem) {
        let started = self.clock.now_ms();

        if let Ok(mut inner) = self.inner.lock() {
            *inner.attempts.entry(item.id.clone()).or_insert(0) += 1;
            inner.triggered.insert(
                item.id.clone(),
                TriggerRecord {
                    stage: PublishStage::Publishing,
                },
            );
            inner.stats.triggered_items += 1;
        }

        self.broadcast(BusEvent::PublishProgress {
            item_id: item.id.clone(),
            stage: PublishStage::Queued,
            percent: 0,
            error: None,
        });

        match &self.bus {
            Some(bus) => {
                let timeout = self
                    .config
                    .lock()
                    .map(|c| c.publish_timeout)
                    .unwrap_or(Duration::from_secs(30));
                let event = BusEvent::PublishRequested {
                    correlation_id: Uuid::new_v4(),
                    item_id: item.id.clone(),
                };
                match bus.request(event, timeout).await {
                    Ok(response) if response.is_success() == Some(true) => {
                        self.complete_success(&item.id, started);
                    }
                    Ok(response) => {
                        let error = match response {
                            BusEvent::PublishResolved { error: Some(e), .. } => e,
                            _ => "Publish was not acknowledged as successful".to_string(),
                        };
                        self.complete_failure(&item.id, started, error);
                    }
                    Err(e) => self.complete_failure(&item.id, started, e.to_string()),
                }
            }
            None => {
                // Degraded mode: nothing can confirm the publish, so
                // success is assumed after a fixed delay. A weaker
                // guarantee than the acknowledged path.
                tokio::time::sleep(self.fallback_delay()).await;
                self.complete_success(&item.id, started);
            }
        }
    }

    fn complete_success(&self, item_id: &str, started: u64) {
        let now = self.clock.now_ms();
        let duration = now.saturating_sub(started);

        if let Ok(mut inner) = self.inner.lock() {
            inner.stats.successful_publishes += 1;
            Self::fold_duration(&mut inner.stats, duration);
            if let Some(record) = inner.triggered.get_mut(item_id) {
                record.stage = PublishStage::Completed;
            }
        }

        if let Err(e) = self
            .plan
            .update_item(item_id, PlanItemStatus::Published, None)
        {
            warn!(item = %item_id, error = %e, "Failed to record published status");
        }

        self.broadcast(BusEvent::PlanItemUpdated {
            item_id: item_id.to_string(),
            status: PlanItemStatus::Published,
            error: None,
            timestamp: now,
        });
        self.broadcast(BusEvent::PublishProgress {
            item_id: item_id.to_string(),
            stage: PublishStage::Completed,
            percent: 100,
            error: None,
        });

        info!(item = %item_id, duration_ms = duration, "Publish completed");
    }

    fn complete_failure(&self, item_id: &str, started: u64, error: String) {
        let now = self.clock.now_ms();
        let duration = now.saturating_sub(started);

        if let Ok(mut inner) = self.inner.lock() {
            inner.stats.failed_publishes += 1;
            Self::fold_duration(&mut inner.stats, duration);
            if let Some(record) = inner.triggered.get_mut(item_id) {
                record.stage = PublishStage::Failed;
            }
        }

        if let Err(e) = self.plan.update_item(
            item_id,
            PlanItemStatus::Failed,
            Some(error.clone()),
        ) {
            warn!(item = %item_id, error = %e, "Failed to record failed status");
        }

        self.broadcast(BusEvent::PlanItemUpdated {
            item_id: item_id.to_string(),
            status: PlanItemStatus::Failed,
            error: Some(error.clone()),
            timestamp: now,
        });
        self.broadcast(BusEvent::PublishProgress {
            item_id: item_id.to_string(),
            stage: PublishStage::Failed,
            percent: 0,
            error: Some(error.clone()),
        });

        warn!(item = %item_id, error = %error, "Publish failed");
    }

    /// Weighted running average over all finished publishes.
    fn fold_duration(stats: &mut SchedulerStats, duration: u64) {
        let finished = stats.successful_publishes + stats.failed_publishes;
        let previous = stats.avg_publish_duration_ms.unwrap_or(0.0);
        let total = previous * (finished.saturating_sub(1)) as f64 + duration as f64;
        stats.avg_publish_duration_ms = Some(total / finished.max(1) as f64);
    }

    /// Progress estimate for one triggered item.
    #[must_use]
    pub fn publish_progress(&self, item_id: &str) -> Option<ProgressReport> {
        let Ok(inner) = self.inner.lock() else {
            return None;
        };
        let record = inner.triggered.get(item_id)?;
        let attempts = inner.attempts.get(item_id).copied().unwrap_or(0);
        let max_attempts = self
            .config
            .lock()
            .map(|c| c.max_publish_attempts)
            .unwrap_or(3);

        let percent = if attempts >= max_attempts {
            0
        } else {
            100u32.saturating_sub(attempts * 33) as u8
        };
        let error = (record.stage == PublishStage::Failed)
            .then(|| format!("Failed after {attempts} attempts"));

        Some(ProgressReport {
            item_id: item_id.to_string(),
            stage: record.stage,
            percent,
            error,
        })
    }

    /// Change the check interval; restarts the loop when running.
    pub fn set_check_interval(self: &Arc<Self>, interval: Duration) {
        if let Ok(mut config) = self.config.lock() {
            config.check_interval = interval;
        }
        if self.is_active() {
            self.stop();
            self.start();
        }
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().map(|inner| inner.running).unwrap_or(false)
    }

    /// Point-in-time view of the loop.
    #[must_use]
    pub fn scheduler_state(&self) -> SchedulerState {
        let (running, last_check_at) = self
            .inner
            .lock()
            .map(|inner| (inner.running, inner.last_check_at))
            .unwrap_or((false, None));
        SchedulerState {
            running,
            check_interval_ms: self.check_interval().as_millis() as u64,
            last_check_at,
        }
    }

    /// Publish statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }

    /// Reset statistics and trigger bookkeeping.
    pub fn reset_stats(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.stats = SchedulerStats::default();
        inner.triggered.clear();
        inner.attempts.clear();
        debug!("Scheduler stats reset");
    }

    fn check_interval(&self) -> Duration {
        self.config
            .lock()
            .map(|c| c.check_interval)
            .unwrap_or(Duration::from_secs(60))
    }

    fn fallback_delay(&self) -> Duration {
        self.config
            .lock()
            .map(|c| c.fallback_delay)
            .unwrap_or(Duration::from_secs(10))
    }

    fn broadcast(&self, event: BusEvent) {
        if let Some(bus) = &self.bus {
            bus.broadcast(event);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_active())
            .finish_non_exhaustive()
    }
}
