//! Validation of monitor configuration and its typed, per-type settings.
//!
//! Every create/update goes through [`MonitorDraft::validate`] before anything
//! is written, so a rejected change is never partially applied. The stored row
//! is turned back into a [`ProbeSettings`] tagged union when a probe runs.

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::entities::monitor;
use crate::db::enums::MonitorType;

pub const MIN_INTERVAL_SECONDS: i32 = 10;
pub const DEFAULT_EXPECTED_STATUS: i32 = 200;
pub const DEFAULT_DELIVERY_WINDOW_SECONDS: i64 = 3600;
pub const MAX_DELIVERY_WINDOW_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Monitor name must not be empty")]
    EmptyName,
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Interval must be at least {MIN_INTERVAL_SECONDS} seconds, got {0}")]
    IntervalTooShort(i32),
    #[error("Timeout must be positive and shorter than the interval ({interval}s), got {timeout}s")]
    InvalidTimeout { timeout: i32, interval: i32 },
    #[error("Expected status must be between 100 and 599, got {0}")]
    InvalidExpectedStatus(i32),
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
    #[error("Invalid monitor config: {0}")]
    InvalidConfig(String),
}

/// What an http probe expects the response body to look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyMatch {
    Json,
    Contains { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HttpExtras {
    #[serde(default)]
    body_match: Option<BodyMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WebhookExtras {
    #[serde(default = "default_delivery_window")]
    delivery_window_seconds: i64,
}

fn default_delivery_window() -> i64 {
    DEFAULT_DELIVERY_WINDOW_SECONDS
}

/// Per-type probe settings derived from a monitor row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSettings {
    Http {
        url: Url,
        expected_status: u16,
        headers: BTreeMap<String, String>,
        body_match: Option<BodyMatch>,
    },
    Ssl {
        host: String,
        port: u16,
    },
    Webhook {
        delivery_window_seconds: i64,
    },
}

/// A complete monitor configuration, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorDraft {
    pub name: String,
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub expected_status: Option<i32>,
    pub custom_headers: Option<BTreeMap<String, String>>,
    pub monitor_config: Option<Value>,
    pub is_active: bool,
}

impl MonitorDraft {
    pub fn validate(&self) -> Result<ProbeSettings, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(ValidationError::IntervalTooShort(self.interval_seconds));
        }
        if self.timeout_seconds <= 0 || self.timeout_seconds >= self.interval_seconds {
            return Err(ValidationError::InvalidTimeout {
                timeout: self.timeout_seconds,
                interval: self.interval_seconds,
            });
        }
        build_settings(
            self.monitor_type,
            &self.url,
            self.expected_status,
            self.custom_headers.as_ref(),
            self.monitor_config.as_ref(),
        )
    }

    /// The draft as it currently stands in storage.
    pub fn from_model(model: &monitor::Model) -> Self {
        Self {
            name: model.name.clone(),
            monitor_type: model.monitor_type,
            url: model.url.clone(),
            interval_seconds: model.interval_seconds,
            timeout_seconds: model.timeout_seconds,
            expected_status: model.expected_status,
            custom_headers: model
                .custom_headers
                .as_ref()
                .and_then(|headers| serde_json::from_value(headers.clone()).ok()),
            monitor_config: model.monitor_config.clone(),
            is_active: model.is_active,
        }
    }
}

/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorPatch {
    pub name: Option<String>,
    pub monitor_type: Option<MonitorType>,
    pub url: Option<String>,
    pub interval_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub expected_status: Option<i32>,
    pub custom_headers: Option<BTreeMap<String, String>>,
    pub monitor_config: Option<Value>,
    pub is_active: Option<bool>,
}

impl MonitorPatch {
    pub fn apply_to(self, draft: MonitorDraft) -> MonitorDraft {
        MonitorDraft {
            name: self.name.unwrap_or(draft.name),
            monitor_type: self.monitor_type.unwrap_or(draft.monitor_type),
            url: self.url.unwrap_or(draft.url),
            interval_seconds: self.interval_seconds.unwrap_or(draft.interval_seconds),
            timeout_seconds: self.timeout_seconds.unwrap_or(draft.timeout_seconds),
            expected_status: self.expected_status.or(draft.expected_status),
            custom_headers: self.custom_headers.or(draft.custom_headers),
            monitor_config: self.monitor_config.or(draft.monitor_config),
            is_active: self.is_active.unwrap_or(draft.is_active),
        }
    }
}

/// Rebuilds the typed settings of a stored monitor.
pub fn probe_settings(model: &monitor::Model) -> Result<ProbeSettings, ValidationError> {
    let headers: Option<BTreeMap<String, String>> = match &model.custom_headers {
        Some(value) => Some(
            serde_json::from_value(value.clone())
                .map_err(|e| ValidationError::InvalidConfig(format!("custom headers: {e}")))?,
        ),
        None => None,
    };
    build_settings(
        model.monitor_type,
        &model.url,
        model.expected_status,
        headers.as_ref(),
        model.monitor_config.as_ref(),
    )
}

fn build_settings(
    monitor_type: MonitorType,
    url: &str,
    expected_status: Option<i32>,
    headers: Option<&BTreeMap<String, String>>,
    config: Option<&Value>,
) -> Result<ProbeSettings, ValidationError> {
    match monitor_type {
        MonitorType::Http => {
            let parsed = parse_http_url(url)?;
            let expected = expected_status.unwrap_or(DEFAULT_EXPECTED_STATUS);
            if !(100..=599).contains(&expected) {
                return Err(ValidationError::InvalidExpectedStatus(expected));
            }
            let headers = headers.cloned().unwrap_or_default();
            for (name, value) in &headers {
                if HeaderName::from_bytes(name.as_bytes()).is_err()
                    || HeaderValue::from_str(value).is_err()
                {
                    return Err(ValidationError::InvalidHeader(name.clone()));
                }
            }
            let extras: HttpExtras = parse_extras(config)?;
            Ok(ProbeSettings::Http {
                url: parsed,
                expected_status: expected as u16,
                headers,
                body_match: extras.body_match,
            })
        }
        MonitorType::Ssl => {
            let (host, port) = parse_tls_target(url)?;
            Ok(ProbeSettings::Ssl { host, port })
        }
        MonitorType::Webhook => {
            parse_http_url(url)?;
            let extras: WebhookExtras = match config {
                Some(value) if !is_empty_object(value) => serde_json::from_value(value.clone())
                    .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?,
                _ => WebhookExtras {
                    delivery_window_seconds: DEFAULT_DELIVERY_WINDOW_SECONDS,
                },
            };
            if extras.delivery_window_seconds <= 0 {
                return Err(ValidationError::InvalidConfig(
                    "deliveryWindowSeconds must be positive".to_string(),
                ));
            }
            if extras.delivery_window_seconds > MAX_DELIVERY_WINDOW_SECONDS {
                return Err(ValidationError::InvalidConfig(format!(
                    "deliveryWindowSeconds must be at most {MAX_DELIVERY_WINDOW_SECONDS}"
                )));
            }
            Ok(ProbeSettings::Webhook {
                delivery_window_seconds: extras.delivery_window_seconds,
            })
        }
    }
}

/// Start of a delivery window ending at `now`, or `None` if it is out of range.
pub fn delivery_window_start(now: DateTime<Utc>, window_seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(window_seconds).and_then(|window| now.checked_sub_signed(window))
}

fn parse_extras<T>(config: Option<&Value>) -> Result<T, ValidationError>
where
    T: Default + serde::de::DeserializeOwned,
{
    match config {
        Some(value) if !is_empty_object(value) => serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::InvalidConfig(e.to_string())),
        _ => Ok(T::default()),
    }
}

fn is_empty_object(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn parse_http_url(url: &str) -> Result<Url, ValidationError> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        }),
        other => Err(ValidationError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Accepts `host`, `host:port` or an `https://` URL.
fn parse_tls_target(target: &str) -> Result<(String, u16), ValidationError> {
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };
    let parsed = Url::parse(&candidate).map_err(|e| ValidationError::InvalidUrl {
        url: target.to_string(),
        reason: e.to_string(),
    })?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ValidationError::InvalidUrl {
            url: target.to_string(),
            reason: "missing host".to_string(),
        })?;
    Ok((host.to_string(), parsed.port_or_known_default().unwrap_or(443)))
}
