//! Pilot Engine Library
//!
//! The control core of an autonomous coding agent: it turns a task and the
//! session's ground truth into one validated tool call per turn. It is used
//! by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Shared regex classification tables
pub mod patterns;

/// Reasoning tag and reply parsing
pub mod interpreter;

/// Per-session ground truth
pub mod session;

/// Ordered policy checks over proposed steps
pub mod guardrails;

/// Plan generation and intent recovery
pub mod planning;

/// Model backend abstraction layer
pub mod llm;

/// Turn orchestration
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
