//! Read-side queries over alerts. Every state change goes through
//! `crate::alerting::AlertManager`, never through this module.

use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder,
};

use crate::db::entities::{alert, prelude::*};
use crate::db::enums::{AlertSeverity, AlertStatus, AlertType};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    /// Case-insensitive match against the monitor name and the message.
    /// `%` and `_` match literally.
    pub search: Option<String>,
}

const LIKE_ESCAPE: char = '\\';

fn contains_pattern(search: &str) -> LikeExpr {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    LikeExpr::new(pattern).escape(LIKE_ESCAPE)
}

pub async fn list_alerts(
    db: &DatabaseConnection,
    organization_id: i32,
    filter: &AlertFilter,
) -> Result<Vec<alert::Model>, DbErr> {
    let mut query = Alert::find().filter(alert::Column::OrganizationId.eq(organization_id));
    if let Some(status) = filter.status {
        query = query.filter(alert::Column::Status.eq(status));
    }
    if let Some(severity) = filter.severity {
        query = query.filter(alert::Column::Severity.eq(severity));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(alert::Column::MonitorName))).like(contains_pattern(search)))
                .add(Expr::expr(Func::lower(Expr::col(alert::Column::Message))).like(contains_pattern(search))),
        );
    }
    query
        .order_by_desc(alert::Column::CreatedAt)
        .order_by_desc(alert::Column::Id)
        .all(db)
        .await
}

pub async fn get_alert(
    db: &DatabaseConnection,
    organization_id: i32,
    alert_id: i32,
) -> Result<Option<alert::Model>, DbErr> {
    Alert::find_by_id(alert_id)
        .filter(alert::Column::OrganizationId.eq(organization_id))
        .one(db)
        .await
}

/// The open (active or acknowledged) alert for a (monitor, type) pair, if any.
pub async fn find_open_alert<C>(
    db: &C,
    monitor_id: i32,
    alert_type: AlertType,
) -> Result<Option<alert::Model>, DbErr>
where
    C: ConnectionTrait,
{
    Alert::find()
        .filter(alert::Column::OpenKey.eq(alert::open_key(monitor_id, alert_type)))
        .one(db)
        .await
}

pub async fn list_open_alerts_for_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<alert::Model>, DbErr> {
    Alert::find()
        .filter(alert::Column::MonitorId.eq(monitor_id))
        .filter(alert::Column::Status.ne(AlertStatus::Resolved))
        .all(db)
        .await
}

pub async fn list_open_alerts(
    db: &DatabaseConnection,
    organization_id: i32,
) -> Result<Vec<alert::Model>, DbErr> {
    Alert::find()
        .filter(alert::Column::OrganizationId.eq(organization_id))
        .filter(alert::Column::Status.ne(AlertStatus::Resolved))
        .order_by_desc(alert::Column::CreatedAt)
        .order_by_desc(alert::Column::Id)
        .all(db)
        .await
}

pub async fn count_alerts(db: &DatabaseConnection, organization_id: i32) -> Result<u64, DbErr> {
    Alert::find()
        .filter(alert::Column::OrganizationId.eq(organization_id))
        .count(db)
        .await
}

pub async fn count_open_alerts(
    db: &DatabaseConnection,
    organization_id: i32,
) -> Result<u64, DbErr> {
    Alert::find()
        .filter(alert::Column::OrganizationId.eq(organization_id))
        .filter(alert::Column::Status.ne(AlertStatus::Resolved))
        .count(db)
        .await
}
