//! Agent Turn Orchestration
//!
//! One turn turns a task and the session's ground truth into a single
//! validated step. Streaming turns report reasoning and wait status as they
//! happen.

pub mod context;
pub mod core;
pub mod status;

pub use context::{render_context, system_prompt};
pub use core::{AgentCore, TurnEvent};
pub use status::{run_status_loop, status_message};
