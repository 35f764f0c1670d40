//! Probing monitors and turning the results into status and alert decisions.
//!
//! Flow per tick: [`scheduler`] -> [`executor`] -> [`evaluator`] (through
//! [`pipeline`]) -> `crate::alerting`.

pub mod evaluator;
pub mod executor;
pub mod history;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod validation;

pub use evaluator::{AlertTrigger, Evaluation, EvaluationPolicy};
pub use executor::{CheckExecutor, DbDeliveryTracker, DeliveryTracker, ProbeExecutor};
pub use models::{CheckResult, ProbeError, ProbePayload};
pub use pipeline::CheckPipeline;
pub use scheduler::{Scheduler, SchedulerSnapshot};
