use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::entities::monitor;
use crate::db::enums::{DeliveryStatus, MonitorStatus};
use crate::db::services::{check_service, delivery_service, monitor_service};
use crate::monitoring::validation::{ProbeSettings, delivery_window_start, probe_settings};
use crate::web::models::monitor_models::{
    CheckResponse, CreateMonitorRequest, DeliveryReport, DeliveryResponse, MonitorListQuery,
    MonitorResponse, UpdateMonitorRequest,
};
use crate::web::models::{AuthenticatedUser, parse_filter};
use crate::web::{AppError, AppState};

pub fn create_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_monitors).post(create_monitor))
        .route(
            "/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/{id}/checks", get(list_checks))
        .route(
            "/{id}/deliveries",
            get(list_deliveries).post(report_delivery),
        )
}

async fn load_monitor(
    app_state: &AppState,
    user: &AuthenticatedUser,
    id: i32,
) -> Result<monitor::Model, AppError> {
    monitor_service::get_monitor(&app_state.db_pool, user.organization_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Monitor {id} not found")))
}

async fn list_monitors(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<MonitorListQuery>,
) -> Result<Json<Vec<MonitorResponse>>, AppError> {
    let status: Option<MonitorStatus> = parse_filter("status", query.status.as_deref())?;
    let monitors = monitor_service::list_monitors(
        &app_state.db_pool,
        authenticated_user.organization_id,
        status,
    )
    .await?;
    Ok(Json(monitors.into_iter().map(MonitorResponse::from).collect()))
}

async fn create_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateMonitorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let monitor = monitor_service::create_monitor(
        &app_state.db_pool,
        authenticated_user.organization_id,
        payload.into(),
    )
    .await?;
    app_state.scheduler.schedule(monitor.clone());
    info!(monitor_id = monitor.id, "Monitor created.");
    Ok((StatusCode::CREATED, Json(MonitorResponse::from(monitor))))
}

async fn get_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorResponse>, AppError> {
    let monitor = load_monitor(&app_state, &authenticated_user, id).await?;
    Ok(Json(monitor.into()))
}

async fn update_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateMonitorRequest>,
) -> Result<Json<MonitorResponse>, AppError> {
    let previous = load_monitor(&app_state, &authenticated_user, id).await?;
    let monitor = monitor_service::update_monitor(
        &app_state.db_pool,
        authenticated_user.organization_id,
        id,
        payload.into(),
    )
    .await?;
    if monitor.monitor_type != previous.monitor_type {
        // A tick of the old type must not raise alerts after the cleanup.
        app_state.scheduler.drain(monitor.id).await;
        let resolved = app_state.alert_manager.resolve_inapplicable(&monitor).await?;
        info!(
            monitor_id = monitor.id,
            from = %previous.monitor_type,
            to = %monitor.monitor_type,
            resolved_alerts = resolved.len(),
            "Monitor type changed."
        );
    }
    // Restarts the timer with the new settings, or stops it when deactivated.
    app_state.scheduler.schedule(monitor.clone());
    Ok(Json(monitor.into()))
}

async fn delete_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let monitor = load_monitor(&app_state, &authenticated_user, id).await?;
    // Waits for a running evaluation so its alerts are covered by the cascade below.
    app_state.scheduler.remove(monitor.id).await;
    if !monitor_service::delete_monitor(&app_state.db_pool, authenticated_user.organization_id, id)
        .await?
    {
        return Err(AppError::NotFound(format!("Monitor {id} not found")));
    }

    let resolved = app_state.alert_manager.resolve_all_for_monitor(id).await?;
    app_state.alert_manager.forget_monitor(id);
    info!(monitor_id = id, resolved_alerts = resolved.len(), "Monitor deleted.");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_checks(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<CheckResponse>>, AppError> {
    let monitor = load_monitor(&app_state, &authenticated_user, id).await?;
    let checks = check_service::list_recent_checks(&app_state.db_pool, monitor.id).await?;
    Ok(Json(checks.into_iter().map(CheckResponse::from).collect()))
}

fn delivery_window(monitor: &monitor::Model) -> Result<i64, AppError> {
    match probe_settings(monitor) {
        Ok(ProbeSettings::Webhook {
            delivery_window_seconds,
        }) => Ok(delivery_window_seconds),
        Ok(_) => Err(AppError::InvalidInput(format!(
            "Monitor {} is not a webhook monitor",
            monitor.id
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn list_deliveries(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<DeliveryResponse>>, AppError> {
    let monitor = load_monitor(&app_state, &authenticated_user, id).await?;
    let window = delivery_window(&monitor)?;
    let since = delivery_window_start(Utc::now(), window).ok_or_else(|| {
        AppError::InvalidInput(format!("Delivery window of {window}s is out of range"))
    })?;
    let deliveries = delivery_service::deliveries_since(&app_state.db_pool, monitor.id, since).await?;
    Ok(Json(deliveries.into_iter().map(DeliveryResponse::from).collect()))
}

async fn report_delivery(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(report): Json<DeliveryReport>,
) -> Result<impl IntoResponse, AppError> {
    let monitor = load_monitor(&app_state, &authenticated_user, id).await?;
    delivery_window(&monitor)?;
    let attempt_count = report.attempt_count.unwrap_or(1);
    if attempt_count < 1 {
        return Err(AppError::InvalidInput(
            "attemptCount must be at least 1".to_string(),
        ));
    }
    let delivery = delivery_service::record_delivery(
        &app_state.db_pool,
        monitor.id,
        report.status,
        report.response_code,
        attempt_count,
        report.delivered_at.unwrap_or_else(Utc::now),
    )
    .await?;
    if report.status == DeliveryStatus::Failed {
        warn!(monitor_id = monitor.id, response_code = ?report.response_code, "Webhook delivery failure reported.");
    }
    Ok((StatusCode::CREATED, Json(DeliveryResponse::from(delivery))))
}
