use crate::jobs::ImportQueue;
use crate::models::{ImportConfiguration, ImportJob};
use crate::store::ImportStore;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::{
    str::FromStr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Enqueued { job_id: Uuid },
    Disabled,
    AlreadyRunning,
    ConfigUnavailable,
    QueueUnavailable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub schedule: Option<String>,
}

/// Periodic import trigger. At most one import cycle is active at a time;
/// the guard is held from enqueue until the job finishes.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: ImportStore,
    queue: ImportQueue,
    running: AtomicBool,
    timer: Mutex<Option<Timer>>,
}

struct Timer {
    expression: String,
    schedule: Schedule,
    handle: JoinHandle<()>,
}

/// Accepts the classic 5-field form (minute precision) as well as the 6/7
/// field form with seconds.
pub fn parse_cron(expression: &str) -> Result<Schedule, SchedulerError> {
    let trimmed = expression.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(SchedulerError::InvalidCron {
                expression: trimmed.to_string(),
                reason: format!("expected 5, 6 or 7 fields, got {n}"),
            });
        }
    };
    Schedule::from_str(&normalized).map_err(|err| SchedulerError::InvalidCron {
        expression: trimmed.to_string(),
        reason: err.to_string(),
    })
}

impl Scheduler {
    pub fn new(store: ImportStore, queue: ImportQueue) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                running: AtomicBool::new(false),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Starts the timer when the stored configuration is enabled.
    pub async fn initialize(&self) {
        match self.inner.store.load_config().await {
            Ok(Some(config)) if config.enabled => {
                if let Err(err) = self.start(config.schedule_or_default()).await {
                    warn!(target = "woopl.scheduler", error = %err, "scheduler_not_started");
                }
            }
            Ok(_) => info!(target = "woopl.scheduler", "scheduler_idle_config_disabled"),
            Err(err) => warn!(target = "woopl.scheduler", error = %err, "config_unavailable"),
        }
    }

    /// (Re)starts the timer. An invalid expression leaves the current timer
    /// untouched.
    pub async fn start(&self, expression: &str) -> Result<(), SchedulerError> {
        let schedule = parse_cron(expression)?;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(tick_loop(weak, schedule.clone()));
        let previous = self.inner.timer.lock().await.replace(Timer {
            expression: expression.trim().to_string(),
            schedule,
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        info!(target = "woopl.scheduler", schedule = expression.trim(), "scheduler_started");
        Ok(())
    }

    /// Stops the timer only; an in-flight job runs to completion.
    pub async fn stop(&self) {
        if let Some(timer) = self.inner.timer.lock().await.take() {
            timer.handle.abort();
            info!(target = "woopl.scheduler", "scheduler_stopped");
        }
    }

    pub async fn pause(&self) -> ImportConfiguration {
        self.stop().await;
        self.inner.store.set_enabled(false).await
    }

    pub async fn resume(&self) -> Result<ImportConfiguration, SchedulerError> {
        let current = self
            .inner
            .store
            .load_config()
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        parse_cron(current.schedule_or_default())?;
        let config = self.inner.store.set_enabled(true).await;
        self.start(config.schedule_or_default()).await?;
        Ok(config)
    }

    /// Follows a saved configuration: enabled runs on its schedule, disabled
    /// stops the timer.
    pub async fn apply(&self, config: &ImportConfiguration) -> Result<(), SchedulerError> {
        if config.enabled {
            self.start(config.schedule_or_default()).await
        } else {
            self.stop().await;
            Ok(())
        }
    }

    /// One import cycle. Never fails; the outcome says what happened.
    pub async fn run_import(&self) -> TriggerOutcome {
        run_cycle(&self.inner).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let timer = self.inner.timer.lock().await;
        SchedulerStatus {
            is_running: self.inner.running.load(Ordering::Acquire),
            is_paused: timer.is_none(),
            next_run: timer
                .as_ref()
                .and_then(|t| t.schedule.upcoming(Utc).next()),
            schedule: timer.as_ref().map(|t| t.expression.clone()),
        }
    }
}

async fn tick_loop(inner: Weak<Inner>, schedule: Schedule) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(target = "woopl.scheduler", "schedule_has_no_upcoming_runs");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        // detached from the timer task: stop() aborts the timer, not the cycle
        match tokio::spawn(async move { run_cycle(&inner).await }).await {
            Ok(outcome) => info!(target = "woopl.scheduler", ?outcome, "tick"),
            Err(err) => warn!(target = "woopl.scheduler", error = %err, "tick_failed"),
        }
    }
}

/// Holds the single-cycle flag; dropping it clears the flag.
struct CycleGuard(Arc<Inner>);

impl CycleGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(inner.clone()))
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

async fn run_cycle(inner: &Arc<Inner>) -> TriggerOutcome {
    let Some(guard) = CycleGuard::acquire(inner) else {
        info!(target = "woopl.scheduler", "import_skipped_already_running");
        return TriggerOutcome::AlreadyRunning;
    };

    let config = match inner.store.load_config().await {
        Ok(Some(config)) if config.enabled => config,
        Ok(_) => {
            info!(target = "woopl.scheduler", "import_skipped_disabled");
            return TriggerOutcome::Disabled;
        }
        Err(err) => {
            warn!(target = "woopl.scheduler", error = %err, "import_skipped_config_unavailable");
            return TriggerOutcome::ConfigUnavailable;
        }
    };

    let job = ImportJob::from_config(&config);
    match inner.queue.enqueue(job).await {
        Ok(ticket) => {
            let job_id = ticket.id;
            tokio::spawn(async move {
                ticket.finished().await;
                drop(guard);
                info!(target = "woopl.scheduler", job = %job_id, "import_cycle_finished");
            });
            TriggerOutcome::Enqueued { job_id }
        }
        Err(err) => {
            warn!(target = "woopl.scheduler", error = %err, "import_not_enqueued");
            TriggerOutcome::QueueUnavailable {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::pipeline::testing::{ScriptedAdapter, pipeline_with};
    use crate::platforms::PlatformId;
    use tokio::sync::Notify;

    fn scheduler_with(adapter: Arc<ScriptedAdapter>, store: ImportStore) -> Scheduler {
        let pipeline = pipeline_with(vec![adapter], store.clone(), Arc::new(InMemoryCatalog::new()));
        let (queue, _worker) = ImportQueue::spawn(pipeline, 8);
        Scheduler::new(store, queue)
    }

    async fn enabled_store() -> ImportStore {
        let store = ImportStore::in_memory();
        store
            .save_config(ImportConfiguration {
                keywords: vec!["electronics".into()],
                platforms: vec![PlatformId::AliExpress],
                enabled: true,
                ..ImportConfiguration::default()
            })
            .await;
        store
    }

    async fn wait_idle(scheduler: &Scheduler) {
        for _ in 0..200 {
            if !scheduler.status().await.is_running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("import cycle never finished");
    }

    #[test]
    fn cron_accepts_five_and_six_field_forms() {
        assert!(parse_cron("0 0 * * *").is_ok());
        assert!(parse_cron("*/30 * * * * *").is_ok());
        assert!(parse_cron(" 0 6 * * 1-5 ").is_ok());
    }

    #[test]
    fn cron_rejects_garbage() {
        assert!(matches!(
            parse_cron("every day"),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(parse_cron("99 * * * *").is_err());
        assert!(parse_cron("").is_err());
    }

    #[tokio::test]
    async fn missing_or_disabled_config_is_a_no_op() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Lamp"]));
        let store = ImportStore::in_memory();
        let scheduler = scheduler_with(adapter.clone(), store.clone());
        assert_eq!(scheduler.run_import().await, TriggerOutcome::Disabled);
        store.set_enabled(false).await;
        assert_eq!(scheduler.run_import().await, TriggerOutcome::Disabled);
        assert!(!scheduler.status().await.is_running);
        assert_eq!(adapter.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn at_most_one_cycle_runs_at_a_time() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Lamp"]));
        let gate = Arc::new(Notify::new());
        *adapter
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(gate.clone());
        let scheduler = scheduler_with(adapter.clone(), enabled_store().await);

        let first = scheduler.run_import().await;
        assert!(matches!(first, TriggerOutcome::Enqueued { .. }));
        assert_eq!(scheduler.run_import().await, TriggerOutcome::AlreadyRunning);
        assert!(scheduler.status().await.is_running);

        gate.notify_one();
        wait_idle(&scheduler).await;
        assert_eq!(adapter.searches.load(Ordering::SeqCst), 1);

        gate.notify_one();
        assert!(matches!(
            scheduler.run_import().await,
            TriggerOutcome::Enqueued { .. }
        ));
        wait_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn start_rejects_invalid_cron_and_keeps_timer() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Lamp"]));
        let scheduler = scheduler_with(adapter, ImportStore::in_memory());
        scheduler.start("0 3 * * *").await.expect("valid");
        assert!(scheduler.start("not a cron").await.is_err());
        let status = scheduler.status().await;
        assert_eq!(status.schedule.as_deref(), Some("0 3 * * *"));
        assert!(status.next_run.is_some());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stopping_mid_tick_leaves_the_scheduler_usable() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Lamp"]));
        let store = enabled_store().await;
        let scheduler = scheduler_with(adapter.clone(), store.clone());

        let held = store.hold_state().await;
        scheduler.start("* * * * * *").await.expect("start");
        for _ in 0..300 {
            if scheduler.status().await.is_running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(scheduler.status().await.is_running, "timer never ticked");

        scheduler.stop().await;
        drop(held);
        wait_idle(&scheduler).await;
        assert_eq!(adapter.searches.load(Ordering::SeqCst), 1);

        assert!(matches!(
            scheduler.run_import().await,
            TriggerOutcome::Enqueued { .. }
        ));
        wait_idle(&scheduler).await;
    }

    #[tokio::test]
    async fn pause_and_resume_persist_the_enabled_flag() {
        let adapter = Arc::new(ScriptedAdapter::new(PlatformId::AliExpress, &["Lamp"]));
        let store = enabled_store().await;
        let scheduler = scheduler_with(adapter, store.clone());
        scheduler.initialize().await;
        assert!(!scheduler.status().await.is_paused);

        let paused = scheduler.pause().await;
        assert!(!paused.enabled);
        let status = scheduler.status().await;
        assert!(status.is_paused);
        assert!(status.next_run.is_none());
        assert_eq!(scheduler.run_import().await, TriggerOutcome::Disabled);

        let resumed = scheduler.resume().await.expect("resume");
        assert!(resumed.enabled);
        assert!(store.load_config().await.expect("config").is_some_and(|c| c.enabled));
        assert!(scheduler.status().await.next_run.is_some());
        scheduler.stop().await;
    }
}
