use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use super::models::ChannelConfig;

pub mod discord;
pub mod email;
pub mod slack;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
}

/// Delivers one message to one channel. Implemented once per channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// * `config` - The decrypted configuration for this channel.
    /// * `message` - Rendered, human-readable text.
    /// * `context` - Alert fields (`monitor_name`, `severity`, ...) for templating.
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), SenderError>;
}

/// Turns a non-2xx response into `SendFailed`.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{provider} returned non-success status: {status}. Body: {body}"
    )))
}
