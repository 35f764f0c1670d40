use sea_orm::{DatabaseConnection, DbErr};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::encryption::{EncryptionError, EncryptionService};
use super::models::{
    ChannelConfig, ChannelResponse, CreateChannelRequest, UpdateChannelRequest,
};
use super::senders::{
    NotificationSender, SenderError, discord::DiscordSender, email::EmailSender,
    slack::SlackSender, webhook::WebhookSender,
};
use crate::db::entities::notification_channel;
use crate::db::enums::ChannelType;
use crate::db::services::channel_service;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),
    #[error("Encryption error: {0}")]
    EncryptionError(#[from] EncryptionError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Channel not found: {0}")]
    NotFound(i32),
    #[error("Invalid channel config: {0}")]
    InvalidConfig(String),
    #[error("Sender error: {0}")]
    SenderError(#[from] SenderError),
}

/// One sender per channel type.
pub struct SenderSet {
    pub email: Arc<dyn NotificationSender>,
    pub slack: Arc<dyn NotificationSender>,
    pub discord: Arc<dyn NotificationSender>,
    pub webhook: Arc<dyn NotificationSender>,
}

impl SenderSet {
    pub fn new(client: reqwest::Client, email: EmailSender) -> Self {
        Self {
            email: Arc::new(email),
            slack: Arc::new(SlackSender::new(client.clone())),
            discord: Arc::new(DiscordSender::new(client.clone())),
            webhook: Arc::new(WebhookSender::new(client)),
        }
    }

    fn for_type(&self, channel_type: ChannelType) -> &Arc<dyn NotificationSender> {
        match channel_type {
            ChannelType::Email => &self.email,
            ChannelType::Slack => &self.slack,
            ChannelType::Discord => &self.discord,
            ChannelType::Webhook => &self.webhook,
        }
    }
}

/// Channel registry with encrypted configs, and delivery to a single channel.
pub struct NotificationService {
    db: DatabaseConnection,
    encryption_service: Arc<EncryptionService>,
    senders: SenderSet,
}

impl NotificationService {
    pub fn new(
        db: DatabaseConnection,
        encryption_service: Arc<EncryptionService>,
        senders: SenderSet,
    ) -> Self {
        Self {
            db,
            encryption_service,
            senders,
        }
    }

    pub fn decrypt_config(
        &self,
        channel: &notification_channel::Model,
    ) -> Result<ChannelConfig, NotificationError> {
        let decrypted = self.encryption_service.decrypt(&channel.config)?;
        Ok(serde_json::from_slice(&decrypted)?)
    }

    /// Delivers one message to one channel. No retries.
    pub async fn send_to_channel(
        &self,
        channel: &notification_channel::Model,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), NotificationError> {
        let config = self.decrypt_config(channel)?;
        self.senders
            .for_type(config.channel_type())
            .send(&config, message, context)
            .await?;
        Ok(())
    }

    fn parse_config(
        &self,
        channel_type: ChannelType,
        raw: serde_json::Value,
    ) -> Result<Vec<u8>, NotificationError> {
        let mut raw = raw;
        // The tag may be omitted when the channel type is already known.
        if let serde_json::Value::Object(map) = &mut raw {
            map.entry("type")
                .or_insert_with(|| serde_json::Value::String(channel_type.to_string()));
        }
        let config: ChannelConfig = serde_json::from_value(raw)
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;
        if config.channel_type() != channel_type {
            return Err(NotificationError::InvalidConfig(format!(
                "config is for '{}', channel is '{channel_type}'",
                config.channel_type()
            )));
        }
        config.validate().map_err(NotificationError::InvalidConfig)?;
        Ok(self.encryption_service.encrypt(&serde_json::to_vec(&config)?)?)
    }

    fn to_response(
        &self,
        channel: notification_channel::Model,
    ) -> Result<ChannelResponse, NotificationError> {
        let config_params = serde_json::to_value(self.decrypt_config(&channel)?)?;
        Ok(ChannelResponse {
            id: channel.id,
            name: channel.name,
            channel_type: channel.channel_type,
            is_active: channel.is_active,
            last_used_at: channel.last_used_at,
            created_at: channel.created_at,
            config_params: Some(config_params),
        })
    }

    pub async fn create_channel(
        &self,
        organization_id: i32,
        payload: CreateChannelRequest,
    ) -> Result<ChannelResponse, NotificationError> {
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(NotificationError::InvalidConfig(
                "channel name must not be empty".to_string(),
            ));
        }
        let encrypted = self.parse_config(payload.channel_type, payload.config)?;
        let channel = channel_service::insert_channel(
            &self.db,
            organization_id,
            name,
            payload.channel_type,
            encrypted,
            payload.is_active.unwrap_or(true),
        )
        .await?;
        self.to_response(channel)
    }

    pub async fn get_all_channels(
        &self,
        organization_id: i32,
    ) -> Result<Vec<ChannelResponse>, NotificationError> {
        channel_service::list_channels(&self.db, organization_id)
            .await?
            .into_iter()
            .map(|channel| self.to_response(channel))
            .collect()
    }

    pub async fn get_channel_by_id(
        &self,
        organization_id: i32,
        channel_id: i32,
    ) -> Result<ChannelResponse, NotificationError> {
        let channel = self.load(organization_id, channel_id).await?;
        self.to_response(channel)
    }

    pub async fn update_channel(
        &self,
        organization_id: i32,
        channel_id: i32,
        payload: UpdateChannelRequest,
    ) -> Result<ChannelResponse, NotificationError> {
        let channel = self.load(organization_id, channel_id).await?;
        let config = match payload.config {
            Some(raw) => Some(self.parse_config(channel.channel_type, raw)?),
            None => None,
        };
        let name = payload.name.map(|name| name.trim().to_string());
        if name.as_deref().is_some_and(str::is_empty) {
            return Err(NotificationError::InvalidConfig(
                "channel name must not be empty".to_string(),
            ));
        }
        let updated =
            channel_service::update_channel_row(&self.db, channel, name, config, payload.is_active)
                .await?;
        self.to_response(updated)
    }

    pub async fn delete_channel(
        &self,
        organization_id: i32,
        channel_id: i32,
    ) -> Result<(), NotificationError> {
        if !channel_service::delete_channel_row(&self.db, organization_id, channel_id).await? {
            return Err(NotificationError::NotFound(channel_id));
        }
        Ok(())
    }

    pub async fn test_channel(
        &self,
        organization_id: i32,
        channel_id: i32,
        message: Option<String>,
    ) -> Result<(), NotificationError> {
        let channel = self.load(organization_id, channel_id).await?;
        let message = message
            .unwrap_or_else(|| format!("This is a test message from channel '{}'.", channel.name));
        self.send_to_channel(&channel, &message, &HashMap::new()).await?;
        channel_service::mark_channel_used(&self.db, channel.id, chrono::Utc::now()).await?;
        Ok(())
    }

    async fn load(
        &self,
        organization_id: i32,
        channel_id: i32,
    ) -> Result<notification_channel::Model, NotificationError> {
        channel_service::get_channel(&self.db, organization_id, channel_id)
            .await?
            .ok_or(NotificationError::NotFound(channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_db;
    use serde_json::json;

    fn service(db: DatabaseConnection) -> NotificationService {
        let encryption = Arc::new(EncryptionService::new(&[3u8; 32]).unwrap());
        let senders = SenderSet::new(reqwest::Client::new(), EmailSender::new(None).unwrap());
        NotificationService::new(db, encryption, senders)
    }

    #[tokio::test]
    async fn test_config_is_stored_encrypted() {
        let db = memory_db().await;
        let service = service(db.clone());
        let created = service
            .create_channel(
                1,
                CreateChannelRequest {
                    name: "ops".to_string(),
                    channel_type: ChannelType::Slack,
                    config: json!({ "webhook_url": "https://hooks.slack.com/services/x" }),
                    is_active: None,
                },
            )
            .await
            .unwrap();
        assert!(created.is_active);
        assert_eq!(
            created.config_params.unwrap()["webhook_url"],
            "https://hooks.slack.com/services/x"
        );

        let row = channel_service::get_channel(&db, 1, created.id).await.unwrap().unwrap();
        let raw = String::from_utf8_lossy(&row.config);
        assert!(!raw.contains("hooks.slack.com"));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_or_invalid_config() {
        let db = memory_db().await;
        let service = service(db);
        let mismatched = service
            .create_channel(
                1,
                CreateChannelRequest {
                    name: "ops".to_string(),
                    channel_type: ChannelType::Email,
                    config: json!({ "type": "slack", "webhook_url": "https://x.example" }),
                    is_active: None,
                },
            )
            .await;
        assert!(matches!(mismatched, Err(NotificationError::InvalidConfig(_))));

        let invalid = service
            .create_channel(
                1,
                CreateChannelRequest {
                    name: "ops".to_string(),
                    channel_type: ChannelType::Email,
                    config: json!({ "recipients": [] }),
                    is_active: None,
                },
            )
            .await;
        assert!(matches!(invalid, Err(NotificationError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_update_and_delete_are_org_scoped() {
        let db = memory_db().await;
        let service = service(db);
        let created = service
            .create_channel(
                1,
                CreateChannelRequest {
                    name: "mail".to_string(),
                    channel_type: ChannelType::Email,
                    config: json!({ "recipients": ["ops@example.com"] }),
                    is_active: Some(true),
                },
            )
            .await
            .unwrap();

        let err = service
            .update_channel(2, created.id, UpdateChannelRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::NotFound(_)));

        let updated = service
            .update_channel(
                1,
                created.id,
                UpdateChannelRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);

        assert!(service.delete_channel(2, created.id).await.is_err());
        service.delete_channel(1, created.id).await.unwrap();
        assert!(service.get_all_channels(1).await.unwrap().is_empty());
    }
}
