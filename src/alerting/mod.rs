pub mod lifecycle;

pub use lifecycle::{AlertError, AlertEvent, AlertManager, TriggerOutcome};
