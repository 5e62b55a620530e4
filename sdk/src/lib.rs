//! Pilot SDK
//!
//! The contract between the control core and the host executor: the `Step`
//! value the core emits, the tool vocabulary it draws from, and the shared
//! error type.

/// Machine-matchable error codes
pub mod codes;

/// Error types and handling
pub mod errors;

/// Agent action value
pub mod step;

/// Tool vocabulary
pub mod tools;

// Re-export commonly used types
pub use errors::{EngineError, PilotErrorExt};
pub use step::Step;
pub use tools::{Tool, UNKNOWN_TOOL};
