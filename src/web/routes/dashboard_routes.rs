use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::services::{alert_service, monitor_service};
use crate::monitoring::SchedulerSnapshot;
use crate::services::stats_service::{self, DashboardStats, UptimeReport};
use crate::web::models::AuthenticatedUser;
use crate::web::models::alert_models::AlertResponse;
use crate::web::models::monitor_models::MonitorResponse;
use crate::web::{AppError, AppState};

pub fn create_dashboard_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/uptime", get(get_uptime))
        .route("/monitors", get(get_monitors))
        .route("/alerts", get(get_open_alerts))
        .route("/scheduler", get(get_scheduler))
}

#[derive(Deserialize, Debug, Default)]
struct UptimeQuery {
    days: Option<String>,
}

async fn get_stats(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<DashboardStats>, AppError> {
    let stats = stats_service::dashboard_stats(
        &app_state.db_pool,
        authenticated_user.organization_id,
        app_state.config.uptime_window(),
    )
    .await?;
    Ok(Json(stats))
}

async fn get_uptime(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<UptimeQuery>,
) -> Result<Json<UptimeReport>, AppError> {
    let days = query.days.and_then(|d| d.trim().parse::<u32>().ok());
    let report =
        stats_service::uptime_report(&app_state.db_pool, authenticated_user.organization_id, days)
            .await?;
    Ok(Json(report))
}

async fn get_monitors(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<MonitorResponse>>, AppError> {
    let monitors = monitor_service::list_monitors(
        &app_state.db_pool,
        authenticated_user.organization_id,
        None,
    )
    .await?;
    Ok(Json(monitors.into_iter().map(MonitorResponse::from).collect()))
}

async fn get_open_alerts(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<AlertResponse>>, AppError> {
    let alerts =
        alert_service::list_open_alerts(&app_state.db_pool, authenticated_user.organization_id)
            .await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}

async fn get_scheduler(State(app_state): State<Arc<AppState>>) -> Json<SchedulerSnapshot> {
    Json(app_state.scheduler.snapshot())
}
