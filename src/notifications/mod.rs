pub mod dispatcher;
pub mod encryption;
pub mod models;
pub mod senders;
pub mod service;

pub use dispatcher::{DispatchError, DispatchPolicy, NotificationDispatcher};
pub use service::{NotificationError, NotificationService, SenderSet};
