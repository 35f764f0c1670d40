use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vigil::alerting::{AlertEvent, AlertManager};
use vigil::db;
use vigil::monitoring::{CheckPipeline, DbDeliveryTracker, ProbeExecutor, Scheduler};
use vigil::notifications::encryption::EncryptionService;
use vigil::notifications::senders::email::EmailSender;
use vigil::notifications::{NotificationDispatcher, NotificationService, SenderSet};
use vigil::server::config::ServerConfig;
use vigil::server::tasks::spawn_check_retention;
use vigil::version::VERSION;

const ALERT_EVENT_QUEUE: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting vigil server, version: {}", VERSION);

    // --- Database ---
    let db_pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::ensure_schema(&db_pool).await?;

    // --- Notifications ---
    let encryption_service = Arc::new(EncryptionService::from_hex_key(
        &config.notification_encryption_key,
    )?);
    let http_client = reqwest::Client::builder()
        .user_agent(format!("vigil-notifier/{VERSION}"))
        .build()?;
    let email_sender = EmailSender::new(config.smtp_settings().as_ref())?;
    let notification_service = Arc::new(NotificationService::new(
        db_pool.clone(),
        encryption_service,
        SenderSet::new(http_client, email_sender),
    ));

    let (event_tx, event_rx) = mpsc::channel::<AlertEvent>(ALERT_EVENT_QUEUE);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        db_pool.clone(),
        notification_service.clone(),
        config.dispatch_policy(),
    ));
    let dispatcher_task = tokio::spawn(dispatcher.run(event_rx));

    // --- Monitoring ---
    let alert_manager = Arc::new(AlertManager::new(db_pool.clone()).with_events(event_tx));
    let pipeline = Arc::new(CheckPipeline::new(
        db_pool.clone(),
        alert_manager.clone(),
        config.evaluation_policy(),
    ));
    let executor = Arc::new(ProbeExecutor::new(Arc::new(DbDeliveryTracker::new(
        db_pool.clone(),
    )))?);
    let scheduler = Scheduler::new(db_pool.clone(), executor, pipeline);
    let scheduled = scheduler.start_all_active().await?;
    info!(count = scheduled, "Active monitors scheduled.");

    let retention_task = spawn_check_retention(db_pool.clone(), config.check_retention_days);

    // --- HTTP API ---
    let app = vigil::web::create_axum_router(
        db_pool.clone(),
        config.clone(),
        alert_manager.clone(),
        scheduler.clone(),
        notification_service.clone(),
    );
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(address = %config.listen_addr, "HTTP server listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    retention_task.abort();
    dispatcher_task.abort();
    info!("Server stopped.");
    Ok(())
}
