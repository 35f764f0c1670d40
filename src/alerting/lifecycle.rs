//! Alert lifecycle: `none -> active -> {acknowledged -> resolved, resolved}`.
//!
//! Every mutation for a (monitor, type) key runs under that key's async mutex,
//! so concurrent triggers, acknowledgements and resolutions are linearized.
//! The unique `open_key` column backs this up at the storage layer: a second
//! open row for the same key cannot be inserted even from another process.
//!
//! `resolved` is terminal. A trigger that arrives after resolution starts a
//! new alert with a new id.

use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, Set, SqlErr,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, error, info};

use crate::db::entities::{alert, monitor, prelude::*};
use crate::db::enums::{AlertSeverity, AlertStatus, AlertType};
use crate::db::services::alert_service;
use crate::monitoring::evaluator::AlertTrigger;

pub const REASON_RECOVERED: &str = "recovered";
pub const REASON_MONITOR_REMOVED: &str = "monitor removed";
pub const REASON_MANUAL: &str = "manual";
pub const REASON_TYPE_CHANGED: &str = "monitor type changed";

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert {id} cannot be {action} while {from}")]
    InvalidTransition {
        id: i32,
        from: AlertStatus,
        action: &'static str,
    },
    #[error("Alert {0} not found")]
    NotFound(i32),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Created(alert::Model),
    Escalated {
        alert: alert::Model,
        previous: AlertSeverity,
    },
    /// The open alert was updated in place without raising its severity.
    Refreshed(alert::Model),
}

impl TriggerOutcome {
    pub fn alert(&self) -> &alert::Model {
        match self {
            TriggerOutcome::Created(alert)
            | TriggerOutcome::Escalated { alert, .. }
            | TriggerOutcome::Refreshed(alert) => alert,
        }
    }
}

/// Emitted after a transition commits. Consumed by the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Created(alert::Model),
    Escalated {
        alert: alert::Model,
        previous: AlertSeverity,
    },
    Acknowledged(alert::Model),
    Resolved(alert::Model),
}

impl AlertEvent {
    pub fn alert(&self) -> &alert::Model {
        match self {
            AlertEvent::Created(alert)
            | AlertEvent::Escalated { alert, .. }
            | AlertEvent::Acknowledged(alert)
            | AlertEvent::Resolved(alert) => alert,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::Created(_) => "created",
            AlertEvent::Escalated { .. } => "escalated",
            AlertEvent::Acknowledged(_) => "acknowledged",
            AlertEvent::Resolved(_) => "resolved",
        }
    }
}

type AlertKey = (i32, AlertType);

pub struct AlertManager {
    db: DatabaseConnection,
    locks: DashMap<AlertKey, Arc<Mutex<()>>>,
    events: Option<mpsc::Sender<AlertEvent>>,
}

impl AlertManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            locks: DashMap::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<AlertEvent>) -> Self {
        self.events = Some(events);
        self
    }

    async fn lock(&self, key: AlertKey) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// Queues `event` without blocking the caller, which holds a key lock.
    /// Returns whether the event was queued.
    fn emit(&self, event: AlertEvent) -> bool {
        let Some(events) = &self.events else {
            return false;
        };
        match events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) | Err(TrySendError::Closed(event)) => {
                let alert = event.alert();
                error!(
                    alert_id = alert.id,
                    monitor_id = alert.monitor_id,
                    event = event.kind(),
                    severity = %alert.severity,
                    queue_closed = events.is_closed(),
                    "Alert event dropped; no notification will be sent for it."
                );
                false
            }
        }
    }

    /// Opens an alert for the (monitor, type) pair, or updates the open one in place.
    pub async fn trigger(
        &self,
        monitor: &monitor::Model,
        trigger: &AlertTrigger,
    ) -> Result<TriggerOutcome, AlertError> {
        let key = (monitor.id, trigger.alert_type);
        let _guard = self.lock(key).await;

        if let Some(existing) =
            alert_service::find_open_alert(&self.db, monitor.id, trigger.alert_type).await?
        {
            return self.refresh(existing, trigger).await;
        }

        let now = Utc::now();
        let new_alert = alert::ActiveModel {
            organization_id: Set(monitor.organization_id),
            monitor_id: Set(monitor.id),
            monitor_name: Set(monitor.name.clone()),
            alert_type: Set(trigger.alert_type),
            severity: Set(trigger.severity),
            message: Set(trigger.message.clone()),
            status: Set(AlertStatus::Active),
            open_key: Set(Some(alert::open_key(monitor.id, trigger.alert_type))),
            created_at: Set(now),
            updated_at: Set(now),
            acknowledged_at: Set(None),
            acknowledged_by: Set(None),
            resolved_at: Set(None),
            resolution_reason: Set(None),
            ..Default::default()
        };

        match new_alert.insert(&self.db).await {
            Ok(created) => {
                info!(
                    alert_id = created.id,
                    monitor_id = monitor.id,
                    alert_type = %created.alert_type,
                    severity = %created.severity,
                    "Alert opened."
                );
                self.emit(AlertEvent::Created(created.clone()));
                Ok(TriggerOutcome::Created(created))
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                // Opened concurrently outside this process.
                let existing =
                    alert_service::find_open_alert(&self.db, monitor.id, trigger.alert_type)
                        .await?
                        .ok_or(AlertError::Database(e))?;
                self.refresh(existing, trigger).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(
        &self,
        existing: alert::Model,
        trigger: &AlertTrigger,
    ) -> Result<TriggerOutcome, AlertError> {
        let previous = existing.severity;
        let mut active = existing.into_active_model();
        active.severity = Set(trigger.severity);
        active.message = Set(trigger.message.clone());
        active.updated_at = Set(Utc::now());
        let updated = active.update(&self.db).await?;

        if trigger.severity > previous {
            info!(
                alert_id = updated.id,
                from = %previous,
                to = %updated.severity,
                "Alert escalated."
            );
            self.emit(AlertEvent::Escalated {
                alert: updated.clone(),
                previous,
            });
            Ok(TriggerOutcome::Escalated {
                alert: updated,
                previous,
            })
        } else {
            debug!(alert_id = updated.id, "Open alert refreshed.");
            Ok(TriggerOutcome::Refreshed(updated))
        }
    }

    async fn load(&self, alert_id: i32, organization_id: i32) -> Result<alert::Model, AlertError> {
        alert_service::get_alert(&self.db, organization_id, alert_id)
            .await?
            .ok_or(AlertError::NotFound(alert_id))
    }

    /// Legal only from `active`.
    pub async fn acknowledge(
        &self,
        alert_id: i32,
        organization_id: i32,
        actor: &str,
    ) -> Result<alert::Model, AlertError> {
        let snapshot = self.load(alert_id, organization_id).await?;
        let _guard = self.lock((snapshot.monitor_id, snapshot.alert_type)).await;
        let current = self.load(alert_id, organization_id).await?;

        if current.status != AlertStatus::Active {
            return Err(AlertError::InvalidTransition {
                id: alert_id,
                from: current.status,
                action: "acknowledged",
            });
        }

        let now = Utc::now();
        let mut active = current.into_active_model();
        active.status = Set(AlertStatus::Acknowledged);
        active.acknowledged_at = Set(Some(now));
        active.acknowledged_by = Set(Some(actor.to_string()));
        active.updated_at = Set(now);
        let updated = active.update(&self.db).await?;

        info!(alert_id, actor, "Alert acknowledged.");
        self.emit(AlertEvent::Acknowledged(updated.clone()));
        Ok(updated)
    }

    /// Resolving an already resolved alert is a successful no-op.
    pub async fn resolve(
        &self,
        alert_id: i32,
        organization_id: i32,
    ) -> Result<alert::Model, AlertError> {
        let snapshot = self.load(alert_id, organization_id).await?;
        let _guard = self.lock((snapshot.monitor_id, snapshot.alert_type)).await;
        let current = self.load(alert_id, organization_id).await?;
        self.close(current, REASON_MANUAL).await
    }

    /// System-initiated resolve on recovery. Returns `None` when nothing was open.
    pub async fn auto_resolve(
        &self,
        monitor_id: i32,
        alert_type: AlertType,
    ) -> Result<Option<alert::Model>, AlertError> {
        self.resolve_open(monitor_id, alert_type, REASON_RECOVERED)
            .await
    }

    /// Resolves every open alert of a monitor that is being deleted.
    pub async fn resolve_all_for_monitor(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<alert::Model>, AlertError> {
        let open = alert_service::list_open_alerts_for_monitor(&self.db, monitor_id).await?;
        let mut resolved = Vec::with_capacity(open.len());
        for alert in open {
            if let Some(closed) = self
                .resolve_open(monitor_id, alert.alert_type, REASON_MONITOR_REMOVED)
                .await?
            {
                resolved.push(closed);
            }
        }
        Ok(resolved)
    }

    /// Resolves open alerts that the monitor's current type can no longer clear.
    pub async fn resolve_inapplicable(
        &self,
        monitor: &monitor::Model,
    ) -> Result<Vec<alert::Model>, AlertError> {
        let applicable = monitor.monitor_type.alert_types();
        let open = alert_service::list_open_alerts_for_monitor(&self.db, monitor.id).await?;
        let mut resolved = Vec::new();
        for alert in open.into_iter().filter(|alert| !applicable.contains(&alert.alert_type)) {
            if let Some(closed) = self
                .resolve_open(monitor.id, alert.alert_type, REASON_TYPE_CHANGED)
                .await?
            {
                resolved.push(closed);
            }
        }
        Ok(resolved)
    }

    async fn resolve_open(
        &self,
        monitor_id: i32,
        alert_type: AlertType,
        reason: &str,
    ) -> Result<Option<alert::Model>, AlertError> {
        let _guard = self.lock((monitor_id, alert_type)).await;
        match alert_service::find_open_alert(&self.db, monitor_id, alert_type).await? {
            Some(open) => Ok(Some(self.close(open, reason).await?)),
            None => Ok(None),
        }
    }

    /// Caller holds the key lock.
    async fn close(&self, current: alert::Model, reason: &str) -> Result<alert::Model, AlertError> {
        if current.status == AlertStatus::Resolved {
            debug!(alert_id = current.id, "Alert already resolved.");
            return Ok(current);
        }

        let now = Utc::now();
        let mut active = current.into_active_model();
        active.status = Set(AlertStatus::Resolved);
        active.open_key = Set(None);
        active.resolved_at = Set(Some(now));
        active.resolution_reason = Set(Some(reason.to_string()));
        active.updated_at = Set(now);
        let updated = active.update(&self.db).await?;

        info!(alert_id = updated.id, reason, "Alert resolved.");
        self.emit(AlertEvent::Resolved(updated.clone()));
        Ok(updated)
    }

    /// Drops the per-key locks of a removed monitor.
    pub fn forget_monitor(&self, monitor_id: i32) {
        self.locks.retain(|(id, _), _| *id != monitor_id);
    }

    pub async fn find(&self, alert_id: i32) -> Result<Option<alert::Model>, DbErr> {
        Alert::find_by_id(alert_id).one(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::MonitorType;
    use crate::db::test_support::{insert_monitor, memory_db};
    use sea_orm::{ColumnTrait, PaginatorTrait, QueryFilter};

    fn down(severity: AlertSeverity) -> AlertTrigger {
        AlertTrigger {
            alert_type: AlertType::Down,
            severity,
            message: format!("api is down ({severity})"),
        }
    }

    async fn open_count(db: &DatabaseConnection, monitor_id: i32, alert_type: AlertType) -> u64 {
        Alert::find()
            .filter(alert::Column::MonitorId.eq(monitor_id))
            .filter(alert::Column::AlertType.eq(alert_type))
            .filter(alert::Column::Status.ne(AlertStatus::Resolved))
            .count(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_repeated_trigger_updates_in_place() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());

        let first = manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        let created = match first {
            TriggerOutcome::Created(alert) => alert,
            other => panic!("expected creation, got {other:?}"),
        };
        assert_eq!(created.status, AlertStatus::Active);
        assert_eq!(created.monitor_name, "api");

        let again = manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        assert!(matches!(again, TriggerOutcome::Refreshed(ref alert) if alert.id == created.id));

        let escalated = manager
            .trigger(&monitor, &down(AlertSeverity::Critical))
            .await
            .unwrap();
        match escalated {
            TriggerOutcome::Escalated { alert, previous } => {
                assert_eq!(alert.id, created.id);
                assert_eq!(alert.severity, AlertSeverity::Critical);
                assert_eq!(previous, AlertSeverity::High);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(open_count(&db, monitor.id, AlertType::Down).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_open_one_alert() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = Arc::new(AlertManager::new(db.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let monitor = monitor.clone();
            handles.push(tokio::spawn(async move {
                manager.trigger(&monitor, &down(AlertSeverity::High)).await
            }));
        }
        let mut created = 0;
        for handle in handles {
            if let TriggerOutcome::Created(_) = handle.await.unwrap().unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(open_count(&db, monitor.id, AlertType::Down).await, 1);
    }

    #[tokio::test]
    async fn test_storage_rejects_second_open_alert() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        let opened = manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();

        let mut duplicate = opened.alert().clone().into_active_model().reset_all();
        duplicate.id = sea_orm::ActiveValue::NotSet;
        let err = duplicate.insert(&db).await.unwrap_err();
        assert!(matches!(
            err.sql_err(),
            Some(SqlErr::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        let opened = manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        let id = opened.alert().id;

        let first = manager.resolve(id, 1).await.unwrap();
        assert_eq!(first.status, AlertStatus::Resolved);
        assert_eq!(first.open_key, None);
        assert_eq!(first.resolution_reason.as_deref(), Some(REASON_MANUAL));

        let second = manager.resolve(id, 1).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_acknowledge_transitions() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        let id = manager
            .trigger(&monitor, &down(AlertSeverity::High))
            .await
            .unwrap()
            .alert()
            .id;

        let acked = manager.acknowledge(id, 1, "alice").await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("alice"));
        assert!(acked.acknowledged_at.is_some());

        let twice = manager.acknowledge(id, 1, "bob").await.unwrap_err();
        assert!(matches!(
            twice,
            AlertError::InvalidTransition {
                from: AlertStatus::Acknowledged,
                ..
            }
        ));

        let resolved = manager.resolve(id, 1).await.unwrap();
        let err = manager.acknowledge(id, 1, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            AlertError::InvalidTransition {
                from: AlertStatus::Resolved,
                ..
            }
        ));
        let unchanged = manager.find(id).await.unwrap().unwrap();
        assert_eq!(unchanged, resolved);

        assert!(matches!(
            manager.acknowledge(id, 2, "mallory").await,
            Err(AlertError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_resolve_keeps_acknowledgement() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        let id = manager
            .trigger(&monitor, &down(AlertSeverity::High))
            .await
            .unwrap()
            .alert()
            .id;
        let acked = manager.acknowledge(id, 1, "alice").await.unwrap();

        let resolved = manager
            .auto_resolve(monitor.id, AlertType::Down)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, id);
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.acknowledged_at, acked.acknowledged_at);
        assert_eq!(resolved.acknowledged_by.as_deref(), Some("alice"));
        assert_eq!(resolved.resolution_reason.as_deref(), Some(REASON_RECOVERED));

        assert!(
            manager
                .auto_resolve(monitor.id, AlertType::Down)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_trigger_after_resolution_is_a_new_alert() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        let first = manager
            .trigger(&monitor, &down(AlertSeverity::High))
            .await
            .unwrap()
            .alert()
            .id;
        manager.resolve(first, 1).await.unwrap();

        let second = manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        assert!(matches!(second, TriggerOutcome::Created(ref alert) if alert.id != first));
        let old = manager.find(first).await.unwrap().unwrap();
        assert_eq!(old.status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn test_monitor_removal_resolves_everything() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let manager = AlertManager::new(db.clone());
        manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        manager
            .trigger(
                &monitor,
                &AlertTrigger {
                    alert_type: AlertType::StatusMismatch,
                    severity: AlertSeverity::Medium,
                    message: "unexpected body".to_string(),
                },
            )
            .await
            .unwrap();

        let resolved = manager.resolve_all_for_monitor(monitor.id).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|alert| {
            alert.resolution_reason.as_deref() == Some(REASON_MONITOR_REMOVED)
        }));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let db = memory_db().await;
        let monitor = insert_monitor(&db, "api", MonitorType::Http).await;
        let (tx, mut rx) = mpsc::channel(16);
        let manager = AlertManager::new(db.clone()).with_events(tx);

        manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();
        manager.trigger(&monitor, &down(AlertSeverity::Critical)).await.unwrap();
        manager.auto_resolve(monitor.id, AlertType::Down).await.unwrap();

        assert!(matches!(rx.recv().await, Some(AlertEvent::Created(_))));
        assert!(matches!(rx.recv().await, Some(AlertEvent::Escalated { .. })));
        assert!(matches!(rx.recv().await, Some(AlertEvent::Resolved(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_event_queue_does_not_fail_the_transition() {
        let db = memory_db().await;
        let api = insert_monitor(&db, "api", MonitorType::Http).await;
        let web = insert_monitor(&db, "web", MonitorType::Http).await;
        let (tx, mut rx) = mpsc::channel(1);
        let manager = AlertManager::new(db.clone()).with_events(tx);

        manager.trigger(&api, &down(AlertSeverity::High)).await.unwrap();
        let second = manager.trigger(&web, &down(AlertSeverity::High)).await.unwrap();
        assert!(matches!(second, TriggerOutcome::Created(_)));
        assert_eq!(open_count(&db, web.id, AlertType::Down).await, 1);

        assert!(!manager.emit(AlertEvent::Created(second.alert().clone())));
        match rx.recv().await {
            Some(AlertEvent::Created(alert)) => assert_eq!(alert.monitor_id, api.id),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert!(manager.emit(AlertEvent::Created(second.alert().clone())));
    }

    #[tokio::test]
    async fn test_type_change_resolves_alerts_the_new_type_cannot_clear() {
        let db = memory_db().await;
        let mut monitor = insert_monitor(&db, "cert", MonitorType::Ssl).await;
        let manager = AlertManager::new(db.clone());
        let expiring = AlertTrigger {
            alert_type: AlertType::SslExpiring,
            severity: AlertSeverity::Medium,
            message: "cert expires in 10 days".to_string(),
        };
        manager.trigger(&monitor, &expiring).await.unwrap();
        manager.trigger(&monitor, &down(AlertSeverity::High)).await.unwrap();

        assert!(manager.resolve_inapplicable(&monitor).await.unwrap().is_empty());

        monitor.monitor_type = MonitorType::Http;
        let resolved = manager.resolve_inapplicable(&monitor).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].alert_type, AlertType::SslExpiring);
        assert_eq!(resolved[0].resolution_reason.as_deref(), Some(REASON_TYPE_CHANGED));
        assert_eq!(open_count(&db, monitor.id, AlertType::SslExpiring).await, 0);
        assert_eq!(open_count(&db, monitor.id, AlertType::Down).await, 1);
    }
}
