use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use std::sync::Arc;

use crate::db::enums::{AlertSeverity, AlertStatus};
use crate::db::services::alert_service::{self, AlertFilter};
use crate::db::services::channel_service;
use crate::web::models::alert_models::{AlertListQuery, AlertNotificationResponse, AlertResponse};
use crate::web::models::{AuthenticatedUser, parse_filter};
use crate::web::{AppError, AppState};

pub fn create_alert_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/{id}", get(get_alert))
        .route("/{id}/acknowledge", post(acknowledge_alert))
        .route("/{id}/resolve", post(resolve_alert))
        .route("/{id}/notifications", get(list_alert_notifications))
}

async fn list_alerts(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<AlertListQuery>,
) -> Result<Json<Vec<AlertResponse>>, AppError> {
    let filter = AlertFilter {
        status: parse_filter::<AlertStatus>("status", query.status.as_deref())?,
        severity: parse_filter::<AlertSeverity>("severity", query.severity.as_deref())?,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let alerts =
        alert_service::list_alerts(&app_state.db_pool, authenticated_user.organization_id, &filter)
            .await?;
    Ok(Json(alerts.into_iter().map(AlertResponse::from).collect()))
}

async fn get_alert(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<AlertResponse>, AppError> {
    let alert = alert_service::get_alert(&app_state.db_pool, authenticated_user.organization_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert {id} not found")))?;
    Ok(Json(alert.into()))
}

async fn acknowledge_alert(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<AlertResponse>, AppError> {
    let alert = app_state
        .alert_manager
        .acknowledge(
            id,
            authenticated_user.organization_id,
            &authenticated_user.username,
        )
        .await?;
    Ok(Json(alert.into()))
}

async fn resolve_alert(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<AlertResponse>, AppError> {
    let alert = app_state
        .alert_manager
        .resolve(id, authenticated_user.organization_id)
        .await?;
    Ok(Json(alert.into()))
}

async fn list_alert_notifications(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<AlertNotificationResponse>>, AppError> {
    alert_service::get_alert(&app_state.db_pool, authenticated_user.organization_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Alert {id} not found")))?;
    let log = channel_service::list_alert_notifications(&app_state.db_pool, id).await?;
    Ok(Json(log.into_iter().map(AlertNotificationResponse::from).collect()))
}
