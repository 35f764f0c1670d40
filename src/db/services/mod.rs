//! Data access for every table, one sub-module per entity.
//!
//! Handlers, the scheduler and the alert manager go through these functions
//! instead of building queries themselves. Public items are re-exported under
//! `crate::db::services::`.

pub mod alert_service;
pub mod channel_service;
pub mod check_service;
pub mod delivery_service;
pub mod monitor_service;

pub use alert_service::*;
pub use channel_service::*;
pub use check_service::*;
pub use delivery_service::*;
pub use monitor_service::*;
