use chrono::{Duration, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use std::collections::HashMap;

use crate::db::entities::monitor;
use crate::db::enums::MonitorStatus;
use crate::db::services::{alert_service, check_service, monitor_service};

/// Report windows offered by the uptime endpoint.
pub const UPTIME_WINDOWS_DAYS: [u32; 3] = [1, 7, 30];
pub const DEFAULT_UPTIME_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_monitors: u64,
    pub active_monitors: u64,
    pub down_monitors: u64,
    /// Percentage over the rolling window, weighted by check count.
    pub overall_uptime: f64,
    pub total_alerts: u64,
    /// Alerts that are not resolved.
    pub pending_alerts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorUptime {
    pub monitor_id: i32,
    pub monitor_name: String,
    pub status: MonitorStatus,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub uptime_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeReport {
    pub days: u32,
    pub monitors: Vec<MonitorUptime>,
}

/// Unsupported windows fall back to seven days.
pub fn normalize_days(days: Option<u32>) -> u32 {
    days.filter(|d| UPTIME_WINDOWS_DAYS.contains(d))
        .unwrap_or(DEFAULT_UPTIME_DAYS)
}

fn percentage(successful: i64, total: i64) -> f64 {
    if total <= 0 {
        return 100.0;
    }
    let raw = successful as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

async fn uptime_rows(
    db: &DatabaseConnection,
    monitors: &[monitor::Model],
    window: Duration,
) -> Result<Vec<MonitorUptime>, DbErr> {
    let counts: HashMap<i32, check_service::CheckCounts> =
        check_service::check_counts_since(db, Utc::now() - window)
            .await?
            .into_iter()
            .map(|c| (c.monitor_id, c))
            .collect();

    Ok(monitors
        .iter()
        .map(|m| {
            let (total, successful) = counts
                .get(&m.id)
                .map(|c| (c.total_checks, c.successful_checks.unwrap_or(0)))
                .unwrap_or((0, 0));
            MonitorUptime {
                monitor_id: m.id,
                monitor_name: m.name.clone(),
                status: m.status,
                total_checks: total,
                successful_checks: successful,
                uptime_percentage: percentage(successful, total),
            }
        })
        .collect())
}

/// Recomputed on every call; nothing is cached.
pub async fn dashboard_stats(
    db: &DatabaseConnection,
    organization_id: i32,
    uptime_window: Duration,
) -> Result<DashboardStats, DbErr> {
    let monitors = monitor_service::list_monitors(db, organization_id, None).await?;
    let uptime = uptime_rows(db, &monitors, uptime_window).await?;
    let (successful, total) = uptime.iter().fold((0i64, 0i64), |(s, t), row| {
        (s + row.successful_checks, t + row.total_checks)
    });

    Ok(DashboardStats {
        total_monitors: monitors.len() as u64,
        active_monitors: monitors.iter().filter(|m| m.is_active).count() as u64,
        down_monitors: monitors
            .iter()
            .filter(|m| m.status == MonitorStatus::Down)
            .count() as u64,
        overall_uptime: percentage(successful, total),
        total_alerts: alert_service::count_alerts(db, organization_id).await?,
        pending_alerts: alert_service::count_open_alerts(db, organization_id).await?,
    })
}

pub async fn uptime_report(
    db: &DatabaseConnection,
    organization_id: i32,
    days: Option<u32>,
) -> Result<UptimeReport, DbErr> {
    let days = normalize_days(days);
    let monitors = monitor_service::list_monitors(db, organization_id, None).await?;
    let rows = uptime_rows(db, &monitors, Duration::days(days as i64)).await?;
    Ok(UptimeReport {
        days,
        monitors: rows,
    })
}
