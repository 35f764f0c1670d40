//! Monitor registry storage: validated CRUD and the status columns the
//! scheduler writes back after every evaluated probe.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use thiserror::Error;

use crate::db::entities::{monitor, prelude::*};
use crate::db::enums::MonitorStatus;
use crate::monitoring::validation::{MonitorDraft, MonitorPatch, ValidationError};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Monitor {0} not found")]
    NotFound(i32),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

fn headers_json(draft: &MonitorDraft) -> Option<serde_json::Value> {
    draft
        .custom_headers
        .as_ref()
        .filter(|headers| !headers.is_empty())
        .map(|headers| serde_json::json!(headers))
}

/// Validates and stores a new monitor. Nothing is written when validation fails.
pub async fn create_monitor(
    db: &DatabaseConnection,
    organization_id: i32,
    draft: MonitorDraft,
) -> Result<monitor::Model, RegistryError> {
    draft.validate()?;
    let now = Utc::now();
    let new_monitor = monitor::ActiveModel {
        organization_id: Set(organization_id),
        name: Set(draft.name.trim().to_string()),
        monitor_type: Set(draft.monitor_type),
        url: Set(draft.url.clone()),
        interval_seconds: Set(draft.interval_seconds),
        timeout_seconds: Set(draft.timeout_seconds),
        expected_status: Set(draft.expected_status),
        custom_headers: Set(headers_json(&draft)),
        monitor_config: Set(draft.monitor_config.clone()),
        is_active: Set(draft.is_active),
        status: Set(MonitorStatus::Unknown),
        status_note: Set(None),
        last_checked_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(new_monitor.insert(db).await?)
}

/// Merges `patch` into the stored monitor, validates the merged result, then persists it.
pub async fn update_monitor(
    db: &DatabaseConnection,
    organization_id: i32,
    monitor_id: i32,
    patch: MonitorPatch,
) -> Result<monitor::Model, RegistryError> {
    let existing = get_monitor(db, organization_id, monitor_id)
        .await?
        .ok_or(RegistryError::NotFound(monitor_id))?;

    let merged = patch.apply_to(MonitorDraft::from_model(&existing));
    merged.validate()?;

    let mut active = existing.into_active_model();
    active.name = Set(merged.name.trim().to_string());
    active.monitor_type = Set(merged.monitor_type);
    active.url = Set(merged.url.clone());
    active.interval_seconds = Set(merged.interval_seconds);
    active.timeout_seconds = Set(merged.timeout_seconds);
    active.expected_status = Set(merged.expected_status);
    active.custom_headers = Set(headers_json(&merged));
    active.monitor_config = Set(merged.monitor_config.clone());
    active.is_active = Set(merged.is_active);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// Returns `false` when no monitor with this id belongs to the organization.
pub async fn delete_monitor(
    db: &DatabaseConnection,
    organization_id: i32,
    monitor_id: i32,
) -> Result<bool, DbErr> {
    let result = Monitor::delete_many()
        .filter(monitor::Column::Id.eq(monitor_id))
        .filter(monitor::Column::OrganizationId.eq(organization_id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

pub async fn get_monitor(
    db: &DatabaseConnection,
    organization_id: i32,
    monitor_id: i32,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(monitor_id)
        .filter(monitor::Column::OrganizationId.eq(organization_id))
        .one(db)
        .await
}

pub async fn get_monitor_by_id(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(monitor_id).one(db).await
}

pub async fn list_monitors(
    db: &DatabaseConnection,
    organization_id: i32,
    status: Option<MonitorStatus>,
) -> Result<Vec<monitor::Model>, DbErr> {
    let mut query = Monitor::find().filter(monitor::Column::OrganizationId.eq(organization_id));
    if let Some(status) = status {
        query = query.filter(monitor::Column::Status.eq(status));
    }
    query.order_by_asc(monitor::Column::Id).all(db).await
}

/// Every active monitor across organizations, for the scheduler.
pub async fn list_active_monitors(db: &DatabaseConnection) -> Result<Vec<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::IsActive.eq(true))
        .order_by_asc(monitor::Column::Id)
        .all(db)
        .await
}

/// Stores the evaluated status and clears any scheduler note.
pub async fn record_monitor_status(
    db: &DatabaseConnection,
    monitor_id: i32,
    status: MonitorStatus,
    checked_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    let active = monitor::ActiveModel {
        id: Set(monitor_id),
        status: Set(status),
        status_note: Set(None),
        last_checked_at: Set(Some(checked_at)),
        ..Default::default()
    };
    Monitor::update(active).exec(db).await?;
    Ok(())
}

/// Leaves `status` untouched.
pub async fn set_status_note(
    db: &DatabaseConnection,
    monitor_id: i32,
    note: &str,
) -> Result<(), DbErr> {
    let active = monitor::ActiveModel {
        id: Set(monitor_id),
        status_note: Set(Some(note.to_string())),
        ..Default::default()
    };
    Monitor::update(active).exec(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorType;
    use crate::db::test_support::memory_db;

    fn draft() -> MonitorDraft {
        MonitorDraft {
            name: "API".to_string(),
            monitor_type: MonitorType::Http,
            url: "https://example.com/health".to_string(),
            interval_seconds: 60,
            timeout_seconds: 10,
            expected_status: Some(200),
            custom_headers: None,
            monitor_config: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_by_status() {
        let db = memory_db().await;
        let created = create_monitor(&db, 1, draft()).await.unwrap();
        assert_eq!(created.status, MonitorStatus::Unknown);

        record_monitor_status(&db, created.id, MonitorStatus::Down, Utc::now())
            .await
            .unwrap();

        let down = list_monitors(&db, 1, Some(MonitorStatus::Down)).await.unwrap();
        assert_eq!(down.len(), 1);
        let up = list_monitors(&db, 1, Some(MonitorStatus::Up)).await.unwrap();
        assert!(up.is_empty());
        let other_org = list_monitors(&db, 2, None).await.unwrap();
        assert!(other_org.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_create_writes_nothing() {
        let db = memory_db().await;
        let mut bad = draft();
        bad.interval_seconds = 5;
        let err = create_monitor(&db, 1, bad).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::IntervalTooShort(5))
        ));
        assert!(list_monitors(&db, 1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_update_is_not_partially_applied() {
        let db = memory_db().await;
        let created = create_monitor(&db, 1, draft()).await.unwrap();

        let patch = MonitorPatch {
            name: Some("Renamed".to_string()),
            timeout_seconds: Some(90),
            ..Default::default()
        };
        let err = update_monitor(&db, 1, created.id, patch).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        let stored = get_monitor(&db, 1, created.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "API");
        assert_eq!(stored.timeout_seconds, 10);
    }

    #[tokio::test]
    async fn test_update_missing_monitor() {
        let db = memory_db().await;
        let err = update_monitor(&db, 1, 42, MonitorPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_status_note_keeps_status() {
        let db = memory_db().await;
        let created = create_monitor(&db, 1, draft()).await.unwrap();
        record_monitor_status(&db, created.id, MonitorStatus::Up, Utc::now())
            .await
            .unwrap();
        set_status_note(&db, created.id, "tick skipped").await.unwrap();

        let stored = get_monitor_by_id(&db, created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MonitorStatus::Up);
        assert_eq!(stored.status_note.as_deref(), Some("tick skipped"));
    }

    #[tokio::test]
    async fn test_delete_is_org_scoped() {
        let db = memory_db().await;
        let created = create_monitor(&db, 1, draft()).await.unwrap();
        assert!(!delete_monitor(&db, 2, created.id).await.unwrap());
        assert!(delete_monitor(&db, 1, created.id).await.unwrap());
        assert!(get_monitor_by_id(&db, created.id).await.unwrap().is_none());
    }
}
