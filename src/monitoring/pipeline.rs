use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::alerting::{AlertError, AlertManager};
use crate::db::entities::monitor;
use crate::db::enums::MonitorStatus;
use crate::db::services::{check_service, monitor_service};
use crate::monitoring::evaluator::{Evaluation, EvaluationPolicy, evaluate};
use crate::monitoring::history::{CheckHistory, HistoryEntry};
use crate::monitoring::models::CheckResult;
use crate::monitoring::validation::ProbeSettings;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),
}

/// Applies one probe result: evaluation, check log, monitor status, then alert changes.
pub struct CheckPipeline {
    db: DatabaseConnection,
    alerts: Arc<AlertManager>,
    policy: EvaluationPolicy,
}

impl CheckPipeline {
    pub fn new(db: DatabaseConnection, alerts: Arc<AlertManager>, policy: EvaluationPolicy) -> Self {
        Self { db, alerts, policy }
    }

    pub fn policy(&self) -> &EvaluationPolicy {
        &self.policy
    }

    /// The history lock is held for the whole call, so results of one monitor
    /// are applied one at a time in completion order.
    pub async fn process(
        &self,
        monitor: &monitor::Model,
        settings: &ProbeSettings,
        result: CheckResult,
        history: &Mutex<CheckHistory>,
    ) -> Result<Evaluation, PipelineError> {
        let mut history = history.lock().await;
        let evaluation = evaluate(&monitor.name, settings, &result, &history, &self.policy);
        let previous = history.last_status();
        history.record(HistoryEntry {
            checked_at: result.checked_at,
            status: evaluation.status,
            failure: evaluation.failure,
        });

        check_service::record_check(&self.db, &result, evaluation.status, evaluation.success)
            .await?;
        monitor_service::record_monitor_status(&self.db, monitor.id, evaluation.status, result.checked_at)
            .await?;

        if previous != evaluation.status {
            debug!(
                monitor_id = monitor.id,
                from = %previous,
                to = %evaluation.status,
                "Monitor status changed."
            );
        }

        if previous != MonitorStatus::Up {
            for alert_type in &evaluation.recovered {
                if let Some(resolved) = self.alerts.auto_resolve(monitor.id, *alert_type).await? {
                    debug!(
                        monitor_id = monitor.id,
                        alert_id = resolved.id,
                        "Alert auto-resolved on recovery."
                    );
                }
            }
        }

        if let Some(trigger) = &evaluation.trigger {
            if let Err(e) = self.alerts.trigger(monitor, trigger).await {
                warn!(monitor_id = monitor.id, error = %e, "Failed to apply alert trigger.");
                return Err(e.into());
            }
        }
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::{alert, prelude::*};
    use crate::db::enums::{AlertSeverity, AlertStatus, AlertType, MonitorType};
    use crate::db::services::alert_service;
    use crate::db::test_support::{insert_monitor, memory_db};
    use crate::monitoring::models::ProbePayload;
    use crate::monitoring::validation::probe_settings;
    use chrono::{Duration, Utc};
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    fn http(monitor_id: i32, code: u16, minutes_ago: i64) -> CheckResult {
        CheckResult::new(
            monitor_id,
            Utc::now() - Duration::minutes(minutes_ago),
            Some(std::time::Duration::from_millis(50)),
            Ok(ProbePayload::Http {
                status_code: code,
                body_matched: true,
            }),
        )
    }

    async fn all_alerts(db: &DatabaseConnection, monitor_id: i32) -> Vec<alert::Model> {
        Alert::find()
            .filter(alert::Column::MonitorId.eq(monitor_id))
            .all(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_outage_escalates_and_recovers() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let settings = probe_settings(&monitor).unwrap();
        let manager = Arc::new(AlertManager::new(db.clone()));
        let pipeline = CheckPipeline::new(db.clone(), manager.clone(), EvaluationPolicy::default());
        let history = Mutex::new(CheckHistory::new(20, MonitorStatus::Unknown));

        let first = pipeline
            .process(&monitor, &settings, http(monitor.id, 500, 4), &history)
            .await
            .unwrap();
        assert_eq!(first.status, MonitorStatus::Warning);
        assert!(all_alerts(&db, monitor.id).await.is_empty());

        pipeline
            .process(&monitor, &settings, http(monitor.id, 500, 3), &history)
            .await
            .unwrap();
        let alerts = all_alerts(&db, monitor.id).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Down);
        assert_eq!(alerts[0].severity, AlertSeverity::High);

        pipeline
            .process(&monitor, &settings, http(monitor.id, 500, 2), &history)
            .await
            .unwrap();
        let alerts = all_alerts(&db, monitor.id).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);

        manager.acknowledge(alerts[0].id, 1, "oncall").await.unwrap();

        let recovered = pipeline
            .process(&monitor, &settings, http(monitor.id, 200, 1), &history)
            .await
            .unwrap();
        assert_eq!(recovered.status, MonitorStatus::Up);
        let alerts = all_alerts(&db, monitor.id).await;
        assert_eq!(alerts[0].status, AlertStatus::Resolved);
        assert!(alerts[0].acknowledged_at.is_some());
        assert!(alert_service::list_open_alerts(&db, 1).await.unwrap().is_empty());

        let stored = Monitor::find_by_id(monitor.id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.status, MonitorStatus::Up);
        assert!(stored.last_checked_at.is_some());
        assert_eq!(check_service::list_recent_checks(&db, monitor.id).await.unwrap().len(), 4);
    }
}
