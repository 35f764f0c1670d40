use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::ChannelType;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub organization_id: i32,
    pub name: String,
    pub channel_type: ChannelType,
    pub config: Vec<u8>, // Encrypted JSON blob
    pub is_active: bool,
    pub last_used_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
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
