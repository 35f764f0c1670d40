use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::{alert_notification, notification_channel, prelude::*};
use crate::db::enums::{ChannelType, NotificationStatus};

pub async fn insert_channel(
    db: &DatabaseConnection,
    organization_id: i32,
    name: &str,
    channel_type: ChannelType,
    encrypted_config: Vec<u8>,
    is_active: bool,
) -> Result<notification_channel::Model, DbErr> {
    let now = Utc::now();
    notification_channel::ActiveModel {
        organization_id: Set(organization_id),
        name: Set(name.to_string()),
        channel_type: Set(channel_type),
        config: Set(encrypted_config),
        is_active: Set(is_active),
        last_used_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn update_channel_row(
    db: &DatabaseConnection,
    channel: notification_channel::Model,
    name: Option<String>,
    encrypted_config: Option<Vec<u8>>,
    is_active: Option<bool>,
) -> Result<notification_channel::Model, DbErr> {
    let mut active: notification_channel::ActiveModel = channel.into();
    if let Some(name) = name {
        active.name = Set(name);
    }
    if let Some(config) = encrypted_config {
        active.config = Set(config);
    }
    if let Some(is_active) = is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn delete_channel_row(
    db: &DatabaseConnection,
    organization_id: i32,
    channel_id: i32,
) -> Result<bool, DbErr> {
    let result = NotificationChannel::delete_many()
        .filter(notification_channel::Column::Id.eq(channel_id))
        .filter(notification_channel::Column::OrganizationId.eq(organization_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

pub async fn get_channel(
    db: &DatabaseConnection,
    organization_id: i32,
    channel_id: i32,
) -> Result<Option<notification_channel::Model>, DbErr> {
    NotificationChannel::find_by_id(channel_id)
        .filter(notification_channel::Column::OrganizationId.eq(organization_id))
        .one(db)
        .await
}

pub async fn list_channels(
    db: &DatabaseConnection,
    organization_id: i32,
) -> Result<Vec<notification_channel::Model>, DbErr> {
    NotificationChannel::find()
        .filter(notification_channel::Column::OrganizationId.eq(organization_id))
        .order_by_asc(notification_channel::Column::Name)
        .all(db)
        .await
}

/// The channels the dispatcher fans out to.
pub async fn get_active_channels_for_organization(
    db: &DatabaseConnection,
    organization_id: i32,
) -> Result<Vec<notification_channel::Model>, DbErr> {
    NotificationChannel::find()
        .filter(notification_channel::Column::OrganizationId.eq(organization_id))
        .filter(notification_channel::Column::IsActive.eq(true))
        .order_by_asc(notification_channel::Column::Id)
        .all(db)
        .await
}

/// Only called after a successful delivery.
pub async fn mark_channel_used(
    db: &DatabaseConnection,
    channel_id: i32,
    used_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    let active = notification_channel::ActiveModel {
        id: Set(channel_id),
        last_used_at: Set(Some(used_at)),
        ..Default::default()
    };
    NotificationChannel::update(active).exec(db).await?;
    Ok(())
}

pub async fn record_alert_notification(
    db: &DatabaseConnection,
    alert_id: i32,
    channel_id: i32,
    status: NotificationStatus,
    attempts: i32,
    error_message: Option<String>,
) -> Result<alert_notification::Model, DbErr> {
    let now = Utc::now();
    alert_notification::ActiveModel {
        alert_id: Set(alert_id),
        channel_id: Set(channel_id),
        status: Set(status),
        attempts: Set(attempts),
        error_message: Set(error_message),
        created_at: Set(now),
        sent_at: Set((status == NotificationStatus::Sent).then_some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn list_alert_notifications(
    db: &DatabaseConnection,
    alert_id: i32,
) -> Result<Vec<alert_notification::Model>, DbErr> {
    AlertNotification::find()
        .filter(alert_notification::Column::AlertId.eq(alert_id))
        .order_by_asc(alert_notification::Column::Id)
        .all(db)
        .await
}
