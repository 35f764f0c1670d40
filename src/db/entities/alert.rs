use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{AlertSeverity, AlertStatus, AlertType};

/// Alerts outlive their monitor, so there is no foreign key on `monitor_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub organization_id: i32,
    #[sea_orm(indexed)]
    pub monitor_id: i32,
    /// Monitor name at creation time.
    pub monitor_name: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub status: AlertStatus,
    /// `"<monitor_id>:<alert_type>"` while open, NULL once resolved.
    #[sea_orm(unique, nullable)]
    pub open_key: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    pub acknowledged_at: Option<ChronoDateTimeUtc>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<ChronoDateTimeUtc>,
    pub resolution_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::alert_notification::Entity")]
    AlertNotifications,
}

impl Related<super::alert_notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlertNotifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub fn open_key(monitor_id: i32, alert_type: AlertType) -> String {
    format!("{monitor_id}:{alert_type}")
}
