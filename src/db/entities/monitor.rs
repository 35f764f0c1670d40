use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{MonitorStatus, MonitorType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub organization_id: i32,
    pub name: String,
    pub monitor_type: MonitorType,
    pub url: String,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    /// Only meaningful for `http` monitors.
    pub expected_status: Option<i32>,
    /// JSON object of header name -> value sent with every http probe.
    pub custom_headers: Option<Json>,
    /// Type-specific extras (body expectation, delivery window).
    pub monitor_config: Option<Json>,
    pub is_active: bool,
    pub status: MonitorStatus,
    pub status_note: Option<String>,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_check::Entity")]
    MonitorChecks,
    #[sea_orm(has_many = "super::webhook_delivery::Entity")]
    WebhookDeliveries,
}

impl Related<super::monitor_check::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorChecks.def()
    }
}

impl Related<super::webhook_delivery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WebhookDeliveries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
