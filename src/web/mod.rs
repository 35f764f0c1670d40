use axum::{
    Router,
    http::Method,
    middleware as axum_middleware,
    routing::get,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::alerting::AlertManager;
use crate::monitoring::Scheduler;
use crate::notifications::NotificationService;
use crate::server::config::ServerConfig;
use crate::web::{middleware::auth, routes::*};

pub use error::AppError;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabaseConnection,
    pub config: Arc<ServerConfig>,
    pub alert_manager: Arc<AlertManager>,
    pub scheduler: Arc<Scheduler>,
    pub notification_service: Arc<NotificationService>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    db_pool: DatabaseConnection,
    config: Arc<ServerConfig>,
    alert_manager: Arc<AlertManager>,
    scheduler: Arc<Scheduler>,
    notification_service: Arc<NotificationService>,
) -> Router {
    let app_state = Arc::new(AppState {
        db_pool,
        config,
        alert_manager,
        scheduler,
        notification_service,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let auth_layer = || axum_middleware::from_fn_with_state(app_state.clone(), auth::auth);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest(
            "/api/monitors",
            monitor_routes::create_monitor_router().route_layer(auth_layer()),
        )
        .nest(
            "/api/alerts",
            alert_routes::create_alert_router().route_layer(auth_layer()),
        )
        .nest(
            "/api/dashboard",
            dashboard_routes::create_dashboard_router().route_layer(auth_layer()),
        )
        .nest(
            "/api/notifications",
            notification_routes::create_notification_router().route_layer(auth_layer()),
        )
        .layer(cors)
        .with_state(app_state)
}
