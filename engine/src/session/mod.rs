//! Session state and the facts derived from tool output

pub mod facts;
pub mod registry;
pub mod scan;
pub mod state;

pub use registry::{SessionRegistry, SharedSession, DEFAULT_SESSION};
pub use state::{CompletedStep, PlanStatus, SessionState, TaskPlan, TaskPlanItem};
