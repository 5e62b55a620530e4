//! Configuration management
//!
//! This module handles loading, validation, and management of the Pilot configuration.
//! Configuration is stored in TOML format at ~/.pilot/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path and log level
//! - **llm**: Model backend endpoint, sampling and residency settings
//! - **agent**: Streaming, planning and reasoning marker settings
//! - **guardrails**: Thresholds and windows used by the guardrail checks
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.
//!
//! # Examples
//!
//! ```no_run
//! use pilot_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Model: {} at {}", config.llm.model, config.llm.base_url);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Model backend settings
    #[serde(default)]
    pub llm: LLMConfig,

    /// Turn orchestration settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Guardrail thresholds
    #[serde(default)]
    pub guardrails: GuardrailConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL of the Ollama-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds. Cold model loads can take minutes.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long the backend keeps the model resident after a call
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,

    /// Sampling temperature for action turns
    #[serde(default)]
    pub temperature: f64,

    /// Sampling seed
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Context window size, backend default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    /// Temperature for plan and intent helper requests
    #[serde(default = "default_helper_temperature")]
    pub helper_temperature: f64,
}

/// Turn orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stream reasoning while the model replies
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Generate a plan at the start of a task
    #[serde(default = "default_true")]
    pub plan_enabled: bool,

    /// Residency poll interval for the status activity
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    /// Marker opening the reasoning block
    #[serde(default = "default_reasoning_start")]
    pub reasoning_start: String,

    /// Marker closing the reasoning block
    #[serde(default = "default_reasoning_end")]
    pub reasoning_end: String,
}

/// Guardrail thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Recent steps inspected by the loop breaker
    #[serde(default = "default_loop_window")]
    pub loop_window: usize,

    /// Attempts of the same action (including the new one) that count as a loop
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    /// Steps after discovery during which local-only tools are redirected
    #[serde(default = "default_redirect_window")]
    pub redirect_window: usize,

    /// Failed replace edits on one path before switching to insert
    #[serde(default = "default_replace_failure_threshold")]
    pub replace_failure_threshold: usize,

    /// Completed steps after which the task is forced to finish
    #[serde(default = "default_step_ceiling")]
    pub step_ceiling: usize,

    /// Recent steps checked for edits before the ceiling applies
    #[serde(default = "default_ceiling_edit_window")]
    pub ceiling_edit_window: usize,

    /// Replans allowed per session
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_helper_temperature() -> f64 {
    0.1
}

fn default_status_poll_interval_ms() -> u64 {
    500
}

fn default_reasoning_start() -> String {
    "<think>".to_string()
}

fn default_reasoning_end() -> String {
    "</think>".to_string()
}

fn default_loop_window() -> usize {
    6
}

fn default_loop_threshold() -> usize {
    3
}

fn default_redirect_window() -> usize {
    3
}

fn default_replace_failure_threshold() -> usize {
    2
}

fn default_step_ceiling() -> usize {
    40
}

fn default_ceiling_edit_window() -> usize {
    5
}

fn default_max_replans() -> u32 {
    3
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            keep_alive: default_keep_alive(),
            temperature: 0.0,
            seed: default_seed(),
            num_ctx: None,
            helper_temperature: default_helper_temperature(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stream: true,
            plan_enabled: true,
            status_poll_interval_ms: default_status_poll_interval_ms(),
            reasoning_start: default_reasoning_start(),
            reasoning_end: default_reasoning_end(),
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            loop_window: default_loop_window(),
            loop_threshold: default_loop_threshold(),
            redirect_window: default_redirect_window(),
            replace_failure_threshold: default_replace_failure_threshold(),
            step_ceiling: default_step_ceiling(),
            ceiling_edit_window: default_ceiling_edit_window(),
            max_replans: default_max_replans(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.pilot/config.toml)
    ///
    /// If the configuration file doesn't exist, writes and returns the
    /// default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or written
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    pub fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.pilot/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".pilot").join("config.toml"))
    }

    /// Validate and process configuration
    ///
    /// Checks the log level, URL and every threshold, then expands and
    /// canonicalizes the workspace path.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            return Err(EngineError::Config(format!(
                "llm.base_url must start with http:// or https://, got '{}'",
                self.llm.base_url
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(EngineError::Config("llm.model must not be empty".to_string()));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("temperature", self.llm.temperature),
            ("helper_temperature", self.llm.helper_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "llm.{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if self.agent.status_poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "agent.status_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.agent.reasoning_start.is_empty() || self.agent.reasoning_end.is_empty() {
            return Err(EngineError::Config(
                "agent reasoning markers must not be empty".to_string(),
            ));
        }

        self.guardrails.validate()?;

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        Ok(())
    }
}

impl GuardrailConfig {
    /// Reject thresholds that would disable or invert a check.
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("loop_window", self.loop_window),
            ("redirect_window", self.redirect_window),
            ("replace_failure_threshold", self.replace_failure_threshold),
            ("step_ceiling", self.step_ceiling),
            ("ceiling_edit_window", self.ceiling_edit_window),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::Config(format!(
                    "guardrails.{} must be greater than 0",
                    name
                )));
            }
        }
        if self.loop_threshold < 2 || self.loop_threshold > self.loop_window + 1 {
            return Err(EngineError::Config(format!(
                "guardrails.loop_threshold must be between 2 and loop_window + 1 ({})",
                self.loop_window + 1
            )));
        }
        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }
    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}
