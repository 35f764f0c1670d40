//! One independent task per active monitor.
//!
//! Each task ticks at the monitor's interval and runs the probe in its own
//! spawned task. A tick that comes due while the previous one is still
//! running is skipped and counted; the monitor keeps its status and gets a
//! note instead. Cancelling a schedule stops the timer and any in-flight
//! probe, but an evaluation that already started is allowed to finish so no
//! alert mutation is cut in half.

use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::db::entities::monitor;
use crate::db::services::monitor_service;
use crate::monitoring::executor::CheckExecutor;
use crate::monitoring::history::CheckHistory;
use crate::monitoring::pipeline::CheckPipeline;
use crate::monitoring::validation::{ProbeSettings, probe_settings};

pub const SKIPPED_TICK_NOTE: &str = "check skipped: previous check still running";

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    executed_ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    failed_evaluations: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub scheduled_monitors: usize,
    pub executed_ticks: u64,
    pub skipped_ticks: u64,
    pub failed_evaluations: u64,
}

struct ScheduledMonitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    db: DatabaseConnection,
    executor: Arc<dyn CheckExecutor>,
    pipeline: Arc<CheckPipeline>,
    tasks: DashMap<i32, ScheduledMonitor>,
    histories: DashMap<i32, Arc<Mutex<CheckHistory>>>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    pub fn new(
        db: DatabaseConnection,
        executor: Arc<dyn CheckExecutor>,
        pipeline: Arc<CheckPipeline>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            executor,
            pipeline,
            tasks: DashMap::new(),
            histories: DashMap::new(),
            metrics: SchedulerMetrics::default(),
        })
    }

    pub async fn start_all_active(self: &Arc<Self>) -> Result<usize, DbErr> {
        let monitors = monitor_service::list_active_monitors(&self.db).await?;
        let mut started = 0;
        for monitor in monitors {
            if self.schedule(monitor) {
                started += 1;
            }
        }
        info!(monitors = started, "Scheduler started.");
        Ok(started)
    }

    /// (Re)starts the schedule of `monitor`. Inactive monitors are only unscheduled.
    /// Returns whether a schedule is now running.
    pub fn schedule(self: &Arc<Self>, monitor: monitor::Model) -> bool {
        self.unschedule(monitor.id);
        if !monitor.is_active {
            return false;
        }
        let settings = match probe_settings(&monitor) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(monitor_id = monitor.id, error = %e, "Monitor has invalid settings; not scheduling.");
                return false;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor_id = monitor.id;
        let handle = tokio::spawn(self.clone().run_monitor(monitor, settings, shutdown_rx));
        self.tasks.insert(
            monitor_id,
            ScheduledMonitor {
                shutdown: shutdown_tx,
                handle,
            },
        );
        true
    }

    /// Stops the timer and any in-flight probe of the monitor. History is kept.
    pub fn unschedule(&self, monitor_id: i32) {
        if let Some((_, scheduled)) = self.tasks.remove(&monitor_id) {
            let _ = scheduled.shutdown.send(true);
            debug!(monitor_id, "Monitor unscheduled.");
        }
    }

    /// Unschedules the monitor and returns once an evaluation that already
    /// started has been applied. History is kept.
    pub async fn drain(&self, monitor_id: i32) {
        if let Some((_, scheduled)) = self.tasks.remove(&monitor_id) {
            let _ = scheduled.shutdown.send(true);
            if let Err(e) = scheduled.handle.await {
                error!(monitor_id, error = %e, "Monitor task ended abnormally.");
            }
            debug!(monitor_id, "Monitor drained.");
        }
    }

    /// Drains the monitor and drops all in-memory state of it.
    pub async fn remove(&self, monitor_id: i32) {
        self.drain(monitor_id).await;
        self.histories.remove(&monitor_id);
    }

    pub fn is_scheduled(&self, monitor_id: i32) -> bool {
        self.tasks
            .get(&monitor_id)
            .is_some_and(|scheduled| !scheduled.handle.is_finished())
    }

    pub async fn shutdown(&self) {
        let ids: Vec<i32> = self.tasks.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, scheduled)) = self.tasks.remove(&id) {
                let _ = scheduled.shutdown.send(true);
                handles.push(scheduled.handle);
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped.");
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            scheduled_monitors: self.tasks.len(),
            executed_ticks: self.metrics.executed_ticks.load(Ordering::Relaxed),
            skipped_ticks: self.metrics.skipped_ticks.load(Ordering::Relaxed),
            failed_evaluations: self.metrics.failed_evaluations.load(Ordering::Relaxed),
        }
    }

    fn history_for(&self, monitor: &monitor::Model) -> Arc<Mutex<CheckHistory>> {
        let capacity = self.pipeline.policy().history_capacity;
        self.histories
            .entry(monitor.id)
            .or_insert_with(|| Arc::new(Mutex::new(CheckHistory::new(capacity, monitor.status))))
            .clone()
    }

    async fn run_monitor(
        self: Arc<Self>,
        monitor: monitor::Model,
        settings: ProbeSettings,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs(monitor.interval_seconds.max(1) as u64);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let monitor = Arc::new(monitor);
        let settings = Arc::new(settings);
        let mut in_flight: Option<JoinHandle<()>> = None;

        debug!(monitor_id = monitor.id, interval_seconds = monitor.interval_seconds, "Monitor scheduled.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                        self.metrics.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                        warn!(monitor_id = monitor.id, "Previous check still running; tick skipped.");
                        if let Err(e) = monitor_service::set_status_note(&self.db, monitor.id, SKIPPED_TICK_NOTE).await {
                            error!(monitor_id = monitor.id, error = %e, "Failed to record skipped tick.");
                        }
                        continue;
                    }
                    in_flight = Some(tokio::spawn(self.clone().run_tick(
                        monitor.clone(),
                        settings.clone(),
                        shutdown.clone(),
                    )));
                }
            }
        }
        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
        debug!(monitor_id = monitor.id, "Monitor schedule stopped.");
    }

    async fn run_tick(
        self: Arc<Self>,
        monitor: Arc<monitor::Model>,
        settings: Arc<ProbeSettings>,
        mut cancel: watch::Receiver<bool>,
    ) {
        if *cancel.borrow() {
            return;
        }
        let result = tokio::select! {
            biased;
            _ = cancel.changed() => {
                debug!(monitor_id = monitor.id, "In-flight probe cancelled.");
                return;
            }
            result = self.executor.execute(&monitor, &settings) => result,
        };
        self.metrics.executed_ticks.fetch_add(1, Ordering::Relaxed);

        // Past this point the tick runs to completion even if cancelled.
        let history = self.history_for(&monitor);
        if let Err(e) = self.pipeline.process(&monitor, &settings, result, &history).await {
            self.metrics.failed_evaluations.fetch_add(1, Ordering::Relaxed);
            error!(monitor_id = monitor.id, error = %e, "Failed to apply check result.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertManager;
    use crate::db::enums::{MonitorStatus, MonitorType};
    use crate::db::services::{alert_service, check_service};
    use crate::db::test_support::{insert_monitor, memory_db};
    use crate::monitoring::evaluator::EvaluationPolicy;
    use crate::monitoring::models::{CheckResult, ProbePayload};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Answers `status_code` after `delay`, counting calls.
    struct StubExecutor {
        delay: Duration,
        status_code: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CheckExecutor for StubExecutor {
        async fn execute(&self, monitor: &monitor::Model, _settings: &ProbeSettings) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            CheckResult::new(
                monitor.id,
                Utc::now(),
                Some(self.delay),
                Ok(ProbePayload::Http {
                    status_code: self.status_code,
                    body_matched: true,
                }),
            )
        }
    }

    async fn scheduler_with(delay: Duration) -> (DatabaseConnection, Arc<Scheduler>, Arc<StubExecutor>) {
        let (db, scheduler, executor, _) =
            build_scheduler(delay, 200, EvaluationPolicy::default()).await;
        (db, scheduler, executor)
    }

    async fn build_scheduler(
        delay: Duration,
        status_code: u16,
        policy: EvaluationPolicy,
    ) -> (DatabaseConnection, Arc<Scheduler>, Arc<StubExecutor>, Arc<AlertManager>) {
        let db = memory_db().await;
        let alerts = Arc::new(AlertManager::new(db.clone()));
        let pipeline = Arc::new(CheckPipeline::new(db.clone(), alerts.clone(), policy));
        let executor = Arc::new(StubExecutor {
            delay,
            status_code,
            calls: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(db.clone(), executor.clone(), pipeline);
        (db, scheduler, executor, alerts)
    }

    async fn fast_monitor(db: &DatabaseConnection) -> monitor::Model {
        let mut monitor = insert_monitor(db, "api", MonitorType::Http).await;
        // Below the registry minimum; the scheduler takes whatever it is given.
        monitor.interval_seconds = 1;
        monitor
    }

    #[tokio::test]
    async fn test_ticks_at_interval() {
        let (db, scheduler, executor) = scheduler_with(Duration::from_millis(10)).await;
        let monitor = fast_monitor(&db).await;
        assert!(scheduler.schedule(monitor.clone()));

        // Ticks at 0s, 1s and 2s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await;
        let calls = executor.calls.load(Ordering::SeqCst);
        assert!((2..=3).contains(&calls), "unexpected call count {calls}");

        let checks = check_service::list_recent_checks(&db, monitor.id).await.unwrap();
        assert_eq!(checks.len(), calls);
        let stored = monitor_service::get_monitor_by_id(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MonitorStatus::Up);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        // The probe outlives the 1s interval.
        let (db, scheduler, executor) = scheduler_with(Duration::from_millis(1500)).await;
        let monitor = fast_monitor(&db).await;
        scheduler.schedule(monitor.clone());

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.snapshot().skipped_ticks, 1);

        let stored = monitor_service::get_monitor_by_id(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MonitorStatus::Unknown);
        assert_eq!(stored.status_note.as_deref(), Some(SKIPPED_TICK_NOTE));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unschedule_cancels_in_flight_probe() {
        let (db, scheduler, executor) = scheduler_with(Duration::from_secs(30)).await;
        let monitor = fast_monitor(&db).await;
        scheduler.schedule(monitor.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        scheduler.unschedule(monitor.id);
        assert!(!scheduler.is_scheduled(monitor.id));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.snapshot().executed_ticks, 0);
        assert!(check_service::list_recent_checks(&db, monitor.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_waits_for_running_evaluation() {
        let policy = EvaluationPolicy {
            failure_threshold: 1,
            ..Default::default()
        };
        let (db, scheduler, executor, alerts) =
            build_scheduler(Duration::from_millis(50), 500, policy).await;
        let monitor = fast_monitor(&db).await;

        // Holding the history lock parks the tick after its probe returned.
        let history = scheduler.history_for(&monitor);
        let guard = history.lock().await;
        scheduler.schedule(monitor.clone());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let removing = tokio::spawn({
            let scheduler = scheduler.clone();
            let monitor_id = monitor.id;
            async move { scheduler.remove(monitor_id).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!removing.is_finished());

        drop(guard);
        removing.await.unwrap();
        assert!(!scheduler.is_scheduled(monitor.id));

        // The late alert is already stored, so the delete cascade catches it.
        let open = alert_service::list_open_alerts_for_monitor(&db, monitor.id)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(alerts.resolve_all_for_monitor(monitor.id).await.unwrap().len(), 1);
        assert!(alert_service::list_open_alerts_for_monitor(&db, monitor.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_inactive_monitor_is_not_scheduled() {
        let (db, scheduler, _) = scheduler_with(Duration::from_millis(1)).await;
        let mut monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        monitor.is_active = false;
        assert!(!scheduler.schedule(monitor.clone()));
        assert!(!scheduler.is_scheduled(monitor.id));
    }
}
