use futures::future::join_all;
use rand::Rng;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::senders::SenderError;
use super::service::{NotificationError, NotificationService};
use crate::alerting::AlertEvent;
use crate::db::entities::notification_channel;
use crate::db::enums::NotificationStatus;
use crate::db::services::channel_service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
    /// Also notify on acknowledge and resolve.
    pub notify_on_transitions: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(10),
            notify_on_transitions: false,
        }
    }
}

impl DispatchPolicy {
    /// `initial * 2^(attempt-1)` plus up to 25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = (base.as_millis() / 4) as u64;
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Delivery attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl DispatchError {
    /// Bad configuration will not fix itself between attempts.
    fn is_retriable(&self) -> bool {
        match self {
            DispatchError::Timeout(_) => true,
            DispatchError::Notification(NotificationError::SenderError(e)) => matches!(
                e,
                SenderError::SendFailed(_) | SenderError::NetworkError(_)
            ),
            DispatchError::Notification(NotificationError::DatabaseError(_)) => true,
            DispatchError::Notification(_) => false,
        }
    }
}

/// Final result of delivering one event to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub channel_id: i32,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Consumes alert events and fans each one out to the organization's active channels.
pub struct NotificationDispatcher {
    db: DatabaseConnection,
    service: Arc<NotificationService>,
    policy: DispatchPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        db: DatabaseConnection,
        service: Arc<NotificationService>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            db,
            service,
            policy,
        }
    }

    /// Runs until every event sender is dropped. Each event is delivered on its own task
    /// so a slow channel never holds up the queue.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<AlertEvent>) {
        info!("Notification dispatcher started.");
        while let Some(event) = events.recv().await {
            if !self.should_notify(&event) {
                debug!(alert_id = event.alert().id, "Event does not notify; skipped.");
                continue;
            }
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(&event).await;
            });
        }
        info!("Alert event channel closed; notification dispatcher stopped.");
    }

    pub fn should_notify(&self, event: &AlertEvent) -> bool {
        match event {
            AlertEvent::Created(_) | AlertEvent::Escalated { .. } => true,
            AlertEvent::Acknowledged(_) | AlertEvent::Resolved(_) => {
                self.policy.notify_on_transitions
            }
        }
    }

    pub async fn dispatch(&self, event: &AlertEvent) -> Vec<DeliveryOutcome> {
        let alert = event.alert();
        let channels = match channel_service::get_active_channels_for_organization(
            &self.db,
            alert.organization_id,
        )
        .await
        {
            Ok(channels) => channels,
            Err(e) => {
                warn!(alert_id = alert.id, error = %e, "Failed to load notification channels.");
                return Vec::new();
            }
        };
        if channels.is_empty() {
            debug!(alert_id = alert.id, "No active notification channels.");
            return Vec::new();
        }

        let message = format_message(event);
        let context = build_context(event);
        let outcomes = join_all(
            channels
                .iter()
                .map(|channel| self.deliver(channel, &message, &context)),
        )
        .await;

        for outcome in &outcomes {
            if let Err(e) = channel_service::record_alert_notification(
                &self.db,
                alert.id,
                outcome.channel_id,
                outcome.status,
                outcome.attempts as i32,
                outcome.error.clone(),
            )
            .await
            {
                warn!(alert_id = alert.id, channel_id = outcome.channel_id, error = %e, "Failed to record notification outcome.");
            }
        }
        outcomes
    }

    async fn deliver(
        &self,
        channel: &notification_channel::Model,
        message: &str,
        context: &HashMap<String, String>,
    ) -> DeliveryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(channel, message, context).await {
                Ok(()) => {
                    if let Err(e) =
                        channel_service::mark_channel_used(&self.db, channel.id, chrono::Utc::now())
                            .await
                    {
                        warn!(channel_id = channel.id, error = %e, "Failed to update channel last-used time.");
                    }
                    info!(channel_id = channel.id, attempt, "Notification delivered.");
                    return DeliveryOutcome {
                        channel_id: channel.id,
                        status: NotificationStatus::Sent,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) if attempt < max_attempts && e.is_retriable() => {
                    let delay = self.policy.backoff(attempt);
                    debug!(channel_id = channel.id, attempt, ?delay, error = %e, "Delivery failed; retrying.");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(channel_id = channel.id, attempts = attempt, error = %e, "Notification dropped.");
                    return DeliveryOutcome {
                        channel_id: channel.id,
                        status: NotificationStatus::Failed,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }

    async fn attempt(
        &self,
        channel: &notification_channel::Model,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), DispatchError> {
        tokio::time::timeout(
            self.policy.attempt_timeout,
            self.service.send_to_channel(channel, message, context),
        )
        .await
        .map_err(|_| DispatchError::Timeout(self.policy.attempt_timeout))??;
        Ok(())
    }
}

pub fn format_message(event: &AlertEvent) -> String {
    let alert = event.alert();
    let head = format!(
        "[{}] {}",
        alert.severity.to_string().to_uppercase(),
        alert.monitor_name
    );
    match event {
        AlertEvent::Created(_) => format!("{head}: {}", alert.message),
        AlertEvent::Escalated { previous, .. } => format!(
            "{head}: severity raised from {previous} to {}. {}",
            alert.severity, alert.message
        ),
        AlertEvent::Acknowledged(_) => format!(
            "{head}: alert acknowledged by {}.",
            alert.acknowledged_by.as_deref().unwrap_or("unknown")
        ),
        AlertEvent::Resolved(_) => format!(
            "{head}: alert resolved ({}).",
            alert.resolution_reason.as_deref().unwrap_or("resolved")
        ),
    }
}

/// Template variables handed to senders.
pub fn build_context(event: &AlertEvent) -> HashMap<String, String> {
    let alert = event.alert();
    let mut context = HashMap::from([
        ("alert_id".to_string(), alert.id.to_string()),
        ("monitor_id".to_string(), alert.monitor_id.to_string()),
        ("monitor_name".to_string(), alert.monitor_name.clone()),
        ("alert_type".to_string(), alert.alert_type.to_string()),
        ("severity".to_string(), alert.severity.to_string()),
        ("status".to_string(), alert.status.to_string()),
        ("message".to_string(), alert.message.clone()),
        ("event".to_string(), event.kind().to_string()),
        ("created_at".to_string(), alert.created_at.to_rfc3339()),
    ]);
    if let AlertEvent::Escalated { previous, .. } = event {
        context.insert("previous_severity".to_string(), previous.to_string());
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertManager;
    use crate::db::enums::{AlertSeverity, AlertType, ChannelType, MonitorType};
    use crate::db::test_support::{insert_monitor, memory_db};
    use crate::monitoring::AlertTrigger;
    use crate::notifications::encryption::EncryptionService;
    use crate::notifications::models::CreateChannelRequest;
    use crate::notifications::senders::email::EmailSender;
    use crate::notifications::service::SenderSet;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> DispatchPolicy {
        DispatchPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
            notify_on_transitions: false,
        }
    }

    async fn setup(policy: DispatchPolicy) -> (DatabaseConnection, NotificationDispatcher, AlertEvent) {
        let db = memory_db().await;
        let service = Arc::new(NotificationService::new(
            db.clone(),
            Arc::new(EncryptionService::new(&[9u8; 32]).unwrap()),
            SenderSet::new(reqwest::Client::new(), EmailSender::new(None).unwrap()),
        ));
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let alert = AlertManager::new(db.clone())
            .trigger(
                &monitor,
                &AlertTrigger {
                    alert_type: AlertType::Down,
                    severity: AlertSeverity::High,
                    message: "api is down".to_string(),
                },
            )
            .await
            .unwrap()
            .alert()
            .clone();
        let dispatcher = NotificationDispatcher::new(db.clone(), service, policy);
        (db, dispatcher, AlertEvent::Created(alert))
    }

    async fn add_webhook(dispatcher: &NotificationDispatcher, url: String, active: bool) -> i32 {
        dispatcher
            .service
            .create_channel(
                1,
                CreateChannelRequest {
                    name: "hook".to_string(),
                    channel_type: ChannelType::Webhook,
                    config: json!({ "url": url, "method": "POST" }),
                    is_active: Some(active),
                },
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_delivers_to_active_channels_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (db, dispatcher, event) = setup(fast_policy()).await;
        let active = add_webhook(&dispatcher, format!("{}/ok", server.uri()), true).await;
        add_webhook(&dispatcher, format!("{}/ok", server.uri()), false).await;

        let outcomes = dispatcher.dispatch(&event).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].channel_id, active);
        assert_eq!(outcomes[0].status, NotificationStatus::Sent);
        assert_eq!(outcomes[0].attempts, 1);

        let channel = channel_service::get_channel(&db, 1, active).await.unwrap().unwrap();
        assert!(channel.last_used_at.is_some());
        let log = channel_service::list_alert_notifications(&db, event.alert().id)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn test_retries_then_gives_up_without_blocking_other_channels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (db, dispatcher, event) = setup(fast_policy()).await;
        let broken = add_webhook(&dispatcher, format!("{}/broken", server.uri()), true).await;
        let ok = add_webhook(&dispatcher, format!("{}/ok", server.uri()), true).await;

        let outcomes = dispatcher.dispatch(&event).await;
        let failed = outcomes.iter().find(|o| o.channel_id == broken).unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.error.is_some());
        let sent = outcomes.iter().find(|o| o.channel_id == ok).unwrap();
        assert_eq!(sent.status, NotificationStatus::Sent);

        let broken_row = channel_service::get_channel(&db, 1, broken).await.unwrap().unwrap();
        assert!(broken_row.last_used_at.is_none());
    }

    #[tokio::test]
    async fn test_transitions_notify_only_when_configured() {
        let (_db, dispatcher, event) = setup(fast_policy()).await;
        let resolved = AlertEvent::Resolved(event.alert().clone());
        assert!(dispatcher.should_notify(&event));
        assert!(!dispatcher.should_notify(&resolved));

        let (_db, dispatcher, _) = setup(DispatchPolicy {
            notify_on_transitions: true,
            ..fast_policy()
        })
        .await;
        assert!(dispatcher.should_notify(&resolved));
    }

    #[test]
    fn test_message_and_context() {
        let now = chrono::Utc::now();
        let alert = crate::db::entities::alert::Model {
            id: 7,
            organization_id: 1,
            monitor_id: 3,
            monitor_name: "api".to_string(),
            alert_type: AlertType::Down,
            severity: AlertSeverity::Critical,
            message: "api is down".to_string(),
            status: crate::db::enums::AlertStatus::Active,
            open_key: Some("3:down".to_string()),
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolution_reason: None,
        };
        let event = AlertEvent::Escalated {
            alert,
            previous: AlertSeverity::High,
        };
        assert_eq!(
            format_message(&event),
            "[CRITICAL] api: severity raised from high to critical. api is down"
        );
        let context = build_context(&event);
        assert_eq!(context["event"], "escalated");
        assert_eq!(context["previous_severity"], "high");
        assert_eq!(context["alert_type"], "down");
    }

    #[test]
    fn test_backoff_grows() {
        let policy = DispatchPolicy {
            initial_backoff: Duration::from_millis(100),
            ..Default::default()
        };
        let first = policy.backoff(1);
        let third = policy.backoff(3);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
    }
}
