use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::{prelude::*, webhook_delivery};
use crate::db::enums::DeliveryStatus;

pub async fn record_delivery(
    db: &DatabaseConnection,
    monitor_id: i32,
    status: DeliveryStatus,
    response_code: Option<i32>,
    attempt_count: i32,
    delivered_at: DateTime<Utc>,
) -> Result<webhook_delivery::Model, DbErr> {
    webhook_delivery::ActiveModel {
        monitor_id: Set(monitor_id),
        status: Set(status),
        response_code: Set(response_code),
        attempt_count: Set(attempt_count),
        delivered_at: Set(delivered_at),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Deliveries at or after `since`, newest first.
pub async fn deliveries_since(
    db: &DatabaseConnection,
    monitor_id: i32,
    since: DateTime<Utc>,
) -> Result<Vec<webhook_delivery::Model>, DbErr> {
    WebhookDelivery::find()
        .filter(webhook_delivery::Column::MonitorId.eq(monitor_id))
        .filter(webhook_delivery::Column::DeliveredAt.gte(since))
        .order_by_desc(webhook_delivery::Column::DeliveredAt)
        .order_by_desc(webhook_delivery::Column::Id)
        .all(db)
        .await
}
