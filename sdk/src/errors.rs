//! Error types and handling
//!
//! Errors shared between the control core and its collaborators. Policy
//! vetoes and parse failures are not errors at this level: they become
//! terminal `Step`s. What remains here are the failures that stop the
//! engine from starting or talking to its backend at all.

use thiserror::Error;

/// Trait for Pilot error extensions
///
/// Provides a user-facing hint and whether retrying can help.
pub trait PilotErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, PilotErrorExt};
///
/// let error = EngineError::Config("bad log level".to_string());
/// assert!(error.to_string().contains("bad log level"));
/// assert!(!error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Model backend errors
    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Model call timed out")]
    BackendTimeout,

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PilotErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",
            Self::Backend(_) => "Model backend unavailable. Is it running?",
            Self::BackendTimeout => "The model took too long to respond. Try again",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::PathCanonicalization(_, _) => false,
            _ => true,
        }
    }
}
