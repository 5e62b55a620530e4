//! Model Backend Abstraction
//!
//! The control core talks to one language-model backend through the
//! [`ModelBackend`] trait: a single-shot chat call, a streaming chat call, a
//! residency probe and a warm-up call that loads the model ahead of real
//! work. [`ollama::OllamaBackend`] is the HTTP implementation.
//!
//! No call here retries. A failure surfaces as an [`LLMError`] and the turn
//! pipeline turns it into a terminal step.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sdk::{codes, EngineError, Step};

use crate::config::LLMConfig;

pub mod ollama;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Incremental reply content, one chunk per item
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Errors that can occur while calling the model backend
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Backend unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// The terminal step reporting this failure to the caller.
    pub fn to_step(&self) -> Step {
        Step::complete_error(codes::format(codes::MODEL_ERROR, self.to_string()))
            .with_note("model backend call failed")
    }
}

impl From<LLMError> for EngineError {
    fn from(e: LLMError) -> Self {
        match e {
            LLMError::Timeout => EngineError::BackendTimeout,
            other => EngineError::Backend(other.to_string()),
        }
    }
}

/// Sampling options sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl SamplingOptions {
    /// Deterministic options for action turns.
    pub fn from_config(config: &LLMConfig) -> Self {
        Self {
            temperature: config.temperature,
            seed: Some(config.seed),
            num_ctx: config.num_ctx,
        }
    }

    /// Options for plan and intent helper requests.
    pub fn helper(config: &LLMConfig) -> Self {
        Self {
            temperature: config.helper_temperature,
            ..Self::from_config(config)
        }
    }
}

/// One chat request: a system prompt and a single user message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub options: SamplingOptions,

    /// Output-shape constraint (`"json"` or a JSON schema)
    pub format: Option<Value>,

    /// How long the backend should keep the model resident
    pub keep_alive: Option<String>,
}

impl ChatRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_message: impl Into<String>,
        options: SamplingOptions,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            options,
            format: None,
            keep_alive: None,
        }
    }

    pub fn with_format(mut self, format: Value) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }
}

/// Whether the model is loaded and how much of it sits in GPU memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResidency {
    pub resident: bool,
    pub size: u64,
    pub size_vram: u64,
}

impl ModelResidency {
    /// Percentage of the model held in GPU memory, if the size is known
    pub fn vram_percent(&self) -> Option<u8> {
        if !self.resident || self.size == 0 {
            return None;
        }
        let pct = (self.size_vram.min(self.size) as f64 / self.size as f64 * 100.0).round();
        Some(pct as u8)
    }
}

/// Model backend contract
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Model the backend serves
    fn model(&self) -> &str;

    /// Single-shot chat call returning the full reply.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Streaming chat call yielding reply content as it is generated.
    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream>;

    /// Current residency of the model.
    async fn residency(&self) -> Result<ModelResidency>;

    /// Load the model ahead of real work.
    async fn warm_up(&self) -> Result<()>;
}
