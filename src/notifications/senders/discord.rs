use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notifications::models::ChannelConfig;

// Discord rejects message content longer than this.
const MAX_CONTENT_CHARS: usize = 2000;

/// Posts to a Discord channel webhook.
pub struct DiscordSender {
    client: Client,
}

impl DiscordSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
struct DiscordMessage<'a> {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[async_trait]
impl NotificationSender for DiscordSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        _context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Discord {
            webhook_url,
            username,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Discord config, but found a different type.".to_string(),
            ));
        };

        let payload = DiscordMessage {
            content: message.chars().take(MAX_CONTENT_CHARS).collect(),
            username: username.as_deref(),
        };
        let response = self.client.post(webhook_url).json(&payload).send().await?;
        ensure_success("Discord", response).await
    }
}
