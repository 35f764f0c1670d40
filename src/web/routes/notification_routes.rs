use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;

use crate::notifications::models::{
    ChannelResponse, CreateChannelRequest, TestChannelRequest, UpdateChannelRequest,
};
use crate::web::{AppError, AppState, models::AuthenticatedUser};

pub fn create_notification_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/channels", get(get_all_channels).post(create_channel))
        .route(
            "/channels/{id}",
            get(get_channel_by_id)
                .put(update_channel)
                .delete(delete_channel),
        )
        .route("/channels/{id}/test", post(test_channel))
}

async fn create_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, AppError> {
    let channel = app_state
        .notification_service
        .create_channel(authenticated_user.organization_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn get_all_channels(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ChannelResponse>>, AppError> {
    let channels = app_state
        .notification_service
        .get_all_channels(authenticated_user.organization_id)
        .await?;
    Ok(Json(channels))
}

async fn get_channel_by_id(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel = app_state
        .notification_service
        .get_channel_by_id(authenticated_user.organization_id, id)
        .await?;
    Ok(Json(channel))
}

async fn update_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateChannelRequest>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel = app_state
        .notification_service
        .update_channel(authenticated_user.organization_id, id, payload)
        .await?;
    Ok(Json(channel))
}

async fn delete_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    app_state
        .notification_service
        .delete_channel(authenticated_user.organization_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    payload: Option<Json<TestChannelRequest>>,
) -> Result<StatusCode, AppError> {
    let message = payload.and_then(|Json(req)| req.message);
    app_state
        .notification_service
        .test_channel(authenticated_user.organization_id, id, message)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
