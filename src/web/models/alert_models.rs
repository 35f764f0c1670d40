use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{alert, alert_notification};
use crate::db::enums::{AlertSeverity, AlertStatus, AlertType, NotificationStatus};

#[derive(Deserialize, Debug, Default)]
pub struct AlertListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub search: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub id: i32,
    pub monitor_id: i32,
    pub monitor_name: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_reason: Option<String>,
}

impl From<alert::Model> for AlertResponse {
    fn from(a: alert::Model) -> Self {
        Self {
            id: a.id,
            monitor_id: a.monitor_id,
            monitor_name: a.monitor_name,
            alert_type: a.alert_type,
            severity: a.severity,
            message: a.message,
            status: a.status,
            created_at: a.created_at,
            updated_at: a.updated_at,
            acknowledged_at: a.acknowledged_at,
            acknowledged_by: a.acknowledged_by,
            resolved_at: a.resolved_at,
            resolution_reason: a.resolution_reason,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotificationResponse {
    pub channel_id: i32,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<alert_notification::Model> for AlertNotificationResponse {
    fn from(n: alert_notification::Model) -> Self {
        Self {
            channel_id: n.channel_id,
            status: n.status,
            attempts: n.attempts,
            error_message: n.error_message,
            created_at: n.created_at,
            sent_at: n.sent_at,
        }
    }
}
