use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::db::entities::{monitor, monitor_check, webhook_delivery};
use crate::db::enums::{DeliveryStatus, MonitorStatus, MonitorType};
use crate::monitoring::validation::{MonitorDraft, MonitorPatch};

const DEFAULT_INTERVAL_SECONDS: i32 = 60;
const DEFAULT_TIMEOUT_SECONDS: i32 = 10;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    pub name: String,
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub expected_status: Option<i32>,
    pub custom_headers: Option<BTreeMap<String, String>>,
    pub monitor_config: Option<Value>,
    pub is_active: Option<bool>,
}

impl From<CreateMonitorRequest> for MonitorDraft {
    fn from(req: CreateMonitorRequest) -> Self {
        MonitorDraft {
            name: req.name,
            monitor_type: req.monitor_type,
            url: req.url,
            interval_seconds: req.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS),
            timeout_seconds: req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            expected_status: req.expected_status,
            custom_headers: req.custom_headers,
            monitor_config: req.monitor_config,
            is_active: req.is_active.unwrap_or(true),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMonitorRequest {
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

impl From<UpdateMonitorRequest> for MonitorPatch {
    fn from(req: UpdateMonitorRequest) -> Self {
        MonitorPatch {
            name: req.name,
            monitor_type: req.monitor_type,
            url: req.url,
            interval_seconds: req.interval_seconds,
            timeout_seconds: req.timeout_seconds,
            expected_status: req.expected_status,
            custom_headers: req.custom_headers,
            monitor_config: req.monitor_config,
            is_active: req.is_active,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct MonitorListQuery {
    pub status: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    pub id: i32,
    pub name: String,
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub expected_status: Option<i32>,
    pub custom_headers: Option<Value>,
    pub monitor_config: Option<Value>,
    pub is_active: bool,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<monitor::Model> for MonitorResponse {
    fn from(m: monitor::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            monitor_type: m.monitor_type,
            url: m.url,
            interval_seconds: m.interval_seconds,
            timeout_seconds: m.timeout_seconds,
            expected_status: m.expected_status,
            custom_headers: m.custom_headers,
            monitor_config: m.monitor_config,
            is_active: m.is_active,
            status: m.status,
            status_note: m.status_note,
            last_checked_at: m.last_checked_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub id: i32,
    pub checked_at: DateTime<Utc>,
    pub success: bool,
    pub status: MonitorStatus,
    pub latency_ms: Option<i32>,
    pub status_code: Option<i32>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl From<monitor_check::Model> for CheckResponse {
    fn from(c: monitor_check::Model) -> Self {
        Self {
            id: c.id,
            checked_at: c.checked_at,
            success: c.success,
            status: c.status,
            latency_ms: c.latency_ms,
            status_code: c.status_code,
            error_kind: c.error_kind,
            error_message: c.error_message,
        }
    }
}

/// One delivery attempt reported by the delivery-tracking collaborator.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub status: DeliveryStatus,
    pub response_code: Option<i32>,
    pub attempt_count: Option<i32>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub id: i32,
    pub status: DeliveryStatus,
    pub response_code: Option<i32>,
    pub attempt_count: i32,
    pub delivered_at: DateTime<Utc>,
}

impl From<webhook_delivery::Model> for DeliveryResponse {
    fn from(d: webhook_delivery::Model) -> Self {
        Self {
            id: d.id,
            status: d.status,
            response_code: d.response_code,
            attempt_count: d.attempt_count,
            delivered_at: d.delivered_at,
        }
    }
}
