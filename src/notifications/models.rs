use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::enums::ChannelType;

/// Provider-specific channel configuration.
/// Serialized to JSON and encrypted before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelConfig {
    Email {
        recipients: Vec<String>,
    },
    Slack {
        webhook_url: String,
        channel: Option<String>,
        username: Option<String>,
    },
    Discord {
        webhook_url: String,
        username: Option<String>,
    },
    Webhook {
        url: String,
        method: String, // "GET" or "POST"
        headers: Option<HashMap<String, String>>,
        body_template: Option<String>, // Tera template for POST bodies
    },
}

impl ChannelConfig {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelConfig::Email { .. } => ChannelType::Email,
            ChannelConfig::Slack { .. } => ChannelType::Slack,
            ChannelConfig::Discord { .. } => ChannelType::Discord,
            ChannelConfig::Webhook { .. } => ChannelType::Webhook,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ChannelConfig::Email { recipients } => {
                if recipients.is_empty() {
                    return Err("at least one recipient is required".to_string());
                }
                if let Some(bad) = recipients.iter().find(|r| !r.contains('@')) {
                    return Err(format!("invalid recipient '{bad}'"));
                }
                Ok(())
            }
            ChannelConfig::Slack { webhook_url, .. } | ChannelConfig::Discord { webhook_url, .. } => {
                check_url(webhook_url)
            }
            ChannelConfig::Webhook {
                url,
                method,
                headers,
                ..
            } => {
                check_url(url)?;
                if !matches!(method.to_uppercase().as_str(), "GET" | "POST") {
                    return Err(format!("unsupported HTTP method '{method}'"));
                }
                for (name, value) in headers.iter().flatten() {
                    if HeaderName::from_bytes(name.as_bytes()).is_err()
                        || HeaderValue::from_str(value).is_err()
                    {
                        return Err(format!("invalid header '{name}'"));
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_url(url: &str) -> Result<(), String> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!("unsupported scheme '{}'", parsed.scheme())),
        Err(e) => Err(format!("invalid url '{url}': {e}")),
    }
}

/// API request body for creating a new notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    pub channel_type: ChannelType,
    pub config: serde_json::Value,
    pub is_active: Option<bool>,
}

/// API request body for updating an existing notification channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub config: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    pub id: i32,
    pub name: String,
    pub channel_type: ChannelType,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub config_params: Option<serde_json::Value>,
}

/// API request for sending a test notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestChannelRequest {
    pub message: Option<String>,
}
