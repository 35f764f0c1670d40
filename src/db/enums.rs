use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_type_enum")]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    #[sea_orm(string_value = "http")]
    Http,
    #[sea_orm(string_value = "ssl")]
    Ssl,
    #[sea_orm(string_value = "webhook")]
    Webhook,
}

impl MonitorType {
    /// Alert types a monitor of this type can raise and later clear on recovery.
    pub fn alert_types(self) -> &'static [AlertType] {
        match self {
            MonitorType::Http => &[AlertType::Down, AlertType::Timeout, AlertType::StatusMismatch],
            MonitorType::Ssl => &[AlertType::Down, AlertType::SslExpiring],
            MonitorType::Webhook => &[AlertType::WebhookFailed],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    #[sea_orm(string_value = "up")]
    Up,
    #[sea_orm(string_value = "down")]
    Down,
    #[sea_orm(string_value = "warning")]
    Warning,
    /// No check has been evaluated yet.
    #[sea_orm(string_value = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "alert_type_enum")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    #[sea_orm(string_value = "down")]
    Down,
    #[sea_orm(string_value = "ssl_expiring")]
    SslExpiring,
    #[sea_orm(string_value = "webhook_failed")]
    WebhookFailed,
    #[sea_orm(string_value = "timeout")]
    Timeout,
    #[sea_orm(string_value = "status_mismatch")]
    StatusMismatch,
}

/// Variant order is the escalation order: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "alert_severity_enum")]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
    #[sea_orm(string_value = "critical")]
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "alert_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "acknowledged")]
    Acknowledged,
    #[sea_orm(string_value = "resolved")]
    Resolved,
}

impl AlertStatus {
    /// Active and acknowledged alerts are "open".
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "channel_type_enum")]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "slack")]
    Slack,
    #[sea_orm(string_value = "discord")]
    Discord,
    #[sea_orm(string_value = "webhook")]
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "notification_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "delivery_status_enum")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "pending")]
    Pending,
}

macro_rules! display_as_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.to_value())
                }
            }
        )*
    };
}

display_as_value!(
    MonitorType,
    MonitorStatus,
    AlertType,
    AlertSeverity,
    AlertStatus,
    ChannelType,
    NotificationStatus,
    DeliveryStatus,
);
