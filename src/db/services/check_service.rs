use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;

use crate::db::entities::{monitor_check, prelude::*};
use crate::db::enums::MonitorStatus;
use crate::monitoring::models::CheckResult;

pub const RECENT_CHECKS_LIMIT: u64 = 100;

/// Appends one evaluated probe to the check log. `success` is what uptime counts.
pub async fn record_check(
    db: &DatabaseConnection,
    result: &CheckResult,
    status: MonitorStatus,
    success: bool,
) -> Result<monitor_check::Model, DbErr> {
    let (error_kind, error_message) = match result.probe_error() {
        Some(e) => (Some(e.kind().to_string()), Some(e.to_string())),
        None => (None, None),
    };
    monitor_check::ActiveModel {
        monitor_id: Set(result.monitor_id),
        checked_at: Set(result.checked_at),
        success: Set(success),
        status: Set(status),
        latency_ms: Set(result.latency_ms()),
        status_code: Set(result.status_code().map(i32::from)),
        error_kind: Set(error_kind),
        error_message: Set(error_message),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn list_recent_checks(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<monitor_check::Model>, DbErr> {
    MonitorCheck::find()
        .filter(monitor_check::Column::MonitorId.eq(monitor_id))
        .order_by_desc(monitor_check::Column::CheckedAt)
        .order_by_desc(monitor_check::Column::Id)
        .limit(RECENT_CHECKS_LIMIT)
        .all(db)
        .await
}

/// Deletes check rows older than `cutoff`, returning how many were removed.
pub async fn prune_checks_before(
    db: &DatabaseConnection,
    cutoff: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = MonitorCheck::delete_many()
        .filter(monitor_check::Column::CheckedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[derive(FromQueryResult, Debug, Clone, PartialEq, Serialize)]
pub struct CheckCounts {
    pub monitor_id: i32,
    pub total_checks: i64,
    pub successful_checks: Option<i64>,
}

/// Per-monitor check counts since `since`. Monitors without checks are absent.
pub async fn check_counts_since(
    db: &DatabaseConnection,
    since: DateTime<Utc>,
) -> Result<Vec<CheckCounts>, DbErr> {
    MonitorCheck::find()
        .select_only()
        .column(monitor_check::Column::MonitorId)
        .column_as(Expr::col(monitor_check::Column::Id).count(), "total_checks")
        .column_as(
            Expr::cust("SUM(CASE WHEN success THEN 1 ELSE 0 END)"),
            "successful_checks",
        )
        .filter(monitor_check::Column::CheckedAt.gte(since))
        .group_by(monitor_check::Column::MonitorId)
        .into_model::<CheckCounts>()
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorType;
    use crate::db::test_support::{insert_monitor, memory_db};
    use crate::monitoring::models::{ProbeError, ProbePayload};
    use chrono::Duration;

    fn http_result(monitor_id: i32, checked_at: DateTime<Utc>, code: u16) -> CheckResult {
        CheckResult::new(
            monitor_id,
            checked_at,
            Some(std::time::Duration::from_millis(120)),
            Ok(ProbePayload::Http {
                status_code: code,
                body_matched: true,
            }),
        )
    }

    #[tokio::test]
    async fn test_record_check_captures_error() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let failed = CheckResult::new(
            monitor.id,
            Utc::now(),
            None,
            Err(ProbeError::Timeout(10)),
        );
        let row = record_check(&db, &failed, MonitorStatus::Warning, false).await.unwrap();
        assert!(!row.success);
        assert_eq!(row.error_kind.as_deref(), Some("timeout"));
        assert_eq!(row.status_code, None);

        let ok = record_check(&db, &http_result(monitor.id, Utc::now(), 200), MonitorStatus::Up, true)
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.latency_ms, Some(120));
        assert_eq!(ok.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_counts_and_prune() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let now = Utc::now();

        record_check(&db, &http_result(monitor.id, now - Duration::days(40), 200), MonitorStatus::Up, true)
            .await
            .unwrap();
        record_check(&db, &http_result(monitor.id, now - Duration::hours(2), 200), MonitorStatus::Up, true)
            .await
            .unwrap();
        record_check(&db, &http_result(monitor.id, now - Duration::hours(1), 500), MonitorStatus::Warning, false)
            .await
            .unwrap();

        let counts = check_counts_since(&db, now - Duration::days(7)).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].total_checks, 2);
        assert_eq!(counts[0].successful_checks, Some(1));

        let removed = prune_checks_before(&db, now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(list_recent_checks(&db, monitor.id).await.unwrap().len(), 2);
    }
}
