//! SeaORM entities, one module per table.

pub mod alert;
pub mod alert_notification;
pub mod monitor;
pub mod monitor_check;
pub mod notification_channel;
pub mod webhook_delivery;

pub mod prelude {
    pub use super::alert::Entity as Alert;
    pub use super::alert_notification::Entity as AlertNotification;
    pub use super::monitor::Entity as Monitor;
    pub use super::monitor_check::Entity as MonitorCheck;
    pub use super::notification_channel::Entity as NotificationChannel;
    pub use super::webhook_delivery::Entity as WebhookDelivery;
}
