use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notifications::models::ChannelConfig;

/// Posts to a Slack incoming webhook.
pub struct SlackSender {
    client: Client,
}

impl SlackSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[async_trait]
impl NotificationSender for SlackSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        _context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Slack {
            webhook_url,
            channel,
            username,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Slack config, but found a different type.".to_string(),
            ));
        };

        let payload = SlackMessage {
            text: message,
            channel: channel.as_deref(),
            username: username.as_deref(),
        };
        let response = self.client.post(webhook_url).json(&payload).send().await?;
        ensure_success("Slack", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_text_and_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({ "text": "api is down", "channel": "#ops" })))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let config = ChannelConfig::Slack {
            webhook_url: server.uri(),
            channel: Some("#ops".to_string()),
            username: None,
        };
        SlackSender::new(Client::new())
            .send(&config, "api is down", &HashMap::new())
            .await
            .unwrap();
    }
}
