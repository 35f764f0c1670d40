use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info};

use crate::db::services::check_service;

const RETENTION_INTERVAL_SECONDS: u64 = 60 * 60;

/// Deletes check-log rows older than `retention_days`.
pub async fn prune_expired_checks(db: &DatabaseConnection, retention_days: i64) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    check_service::prune_checks_before(db, cutoff).await
}

pub fn spawn_check_retention(db: DatabaseConnection, retention_days: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(RETENTION_INTERVAL_SECONDS));
        info!(
            interval_seconds = RETENTION_INTERVAL_SECONDS,
            retention_days, "Check retention task started."
        );
        loop {
            interval.tick().await;
            match prune_expired_checks(&db, retention_days).await {
                Ok(0) => debug!("No expired checks to prune."),
                Ok(count) => info!(count, "Pruned expired checks."),
                Err(e) => error!(error = %e, "Failed to prune expired checks."),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{MonitorStatus, MonitorType};
    use crate::db::test_support::{insert_monitor, memory_db};
    use crate::monitoring::models::{CheckResult, ProbeError};

    #[tokio::test]
    async fn test_prunes_only_old_rows() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        for age_days in [40, 31, 2] {
            let result = CheckResult::new(
                monitor.id,
                Utc::now() - chrono::Duration::days(age_days),
                None,
                Err(ProbeError::Timeout(10)),
            );
            check_service::record_check(&db, &result, MonitorStatus::Warning, false)
                .await
                .unwrap();
        }

        assert_eq!(prune_expired_checks(&db, 30).await.unwrap(), 2);
        let remaining = check_service::list_recent_checks(&db, monitor.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
