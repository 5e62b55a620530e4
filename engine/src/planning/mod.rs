//! Plan generation and intent recovery
//!
//! Both are one-shot helper requests to the same model backend used for
//! action turns, at a lower temperature.

pub mod intent;
pub mod plan;

pub use intent::{IntentRecovery, TaskIntent};
pub use plan::{plan_from_reply, PlanGenerator};
