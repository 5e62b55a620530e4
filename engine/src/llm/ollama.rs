//! Ollama Backend
//!
//! Implements [`ModelBackend`] over the Ollama HTTP API, typically at
//! http://localhost:11434:
//!
//! - `POST /api/chat` for single-shot and NDJSON streaming replies
//! - `GET /api/ps` for model residency
//! - `POST /api/generate` with a one-token budget to warm the model up
//!
//! One `reqwest::Client` is built per backend and reused for every call.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ChatRequest, LLMError, ModelBackend, ModelResidency, Result, SamplingOptions, TokenStream};
use crate::config::LLMConfig;

/// Ollama backend
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    /// Base URL for the Ollama API
    base_url: String,

    /// Model name (e.g. "qwen2.5-coder:7b")
    model: String,

    /// Keep-alive hint sent with warm-up calls
    keep_alive: String,

    client: Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            keep_alive: "30m".to_string(),
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
        }
    }

    pub fn from_config(config: &LLMConfig) -> Self {
        let mut backend = Self::new(
            config.base_url.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );
        backend.keep_alive = config.keep_alive.clone();
        backend
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn chat_body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: request.user_message.clone(),
                },
            ],
            stream,
            options: &request.options,
            format: request.format.as_ref(),
            keep_alive: request.keep_alive.as_deref(),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LLMError {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.base_url
            ))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        check_status(response).await
    }

    /// Whether a model listed by `/api/ps` is the one this backend serves
    fn is_our_model(&self, entry: &PsModel) -> bool {
        let wanted = self.model.as_str();
        let names = [entry.name.as_str(), entry.model.as_str()];
        names.iter().any(|n| {
            *n == wanted || (!wanted.contains(':') && n.strip_suffix(":latest") == Some(wanted))
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(LLMError::Rejected { status, body })
}

/// Decode one NDJSON line of a streaming chat reply.
///
/// Returns the content carried by the line (possibly empty) and whether the
/// backend marked the reply as done.
fn decode_line(line: &[u8]) -> Result<(String, bool)> {
    let chunk: OllamaChatChunk = serde_json::from_slice(line)
        .map_err(|e| LLMError::ParseError(format!("Invalid stream chunk: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(LLMError::ProviderUnavailable(error));
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok((content, chunk.done))
}

/// Split buffered bytes into complete lines, leaving any partial line.
fn take_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            lines.push(line);
        }
    }
    lines
}

fn map_read_error(e: reqwest::Error) -> LLMError {
    if e.is_timeout() {
        LLMError::Timeout
    } else {
        LLMError::NetworkError(format!("Stream read failed: {}", e))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct StreamState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    eof: bool,
    finished: bool,
}

impl StreamState {
    fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            eof: false,
            finished: false,
        }
    }
}

/// Next non-empty content chunk of a streamed reply.
async fn next_token(mut state: StreamState) -> Option<(Result<String>, StreamState)> {
    loop {
        if state.finished {
            return None;
        }
        if let Some(line) = state.pending.pop_front() {
            match decode_line(&line) {
                Ok((content, done)) => {
                    state.finished = done;
                    if !content.is_empty() {
                        return Some((Ok(content), state));
                    }
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
            continue;
        }
        if state.eof {
            return None;
        }
        match state.bytes.next().await {
            Some(Ok(chunk)) => {
                state.buffer.extend_from_slice(&chunk);
                let lines = take_lines(&mut state.buffer);
                state.pending.extend(lines);
            }
            Some(Err(e)) => {
                state.finished = true;
                return Some((Err(map_read_error(e)), state));
            }
            None => {
                state.eof = true;
                let rest = std::mem::take(&mut state.buffer);
                if !rest.iter().all(u8::is_ascii_whitespace) {
                    state.pending.push_back(rest);
                }
            }
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        debug!(
            "Ollama chat: model={}, prompt_chars={}",
            self.model,
            request.system_prompt.len() + request.user_message.len()
        );
        let start = Instant::now();
        let response = self.post("/api/chat", &self.chat_body(request, false)).await?;
        let reply: OllamaChatChunk = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;
        if let Some(error) = reply.error {
            return Err(LLMError::ProviderUnavailable(error));
        }
        info!("Ollama reply received in {:.1}s", start.elapsed().as_secs_f64());
        Ok(reply.message.map(|m| m.content).unwrap_or_default())
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream> {
        debug!("Ollama streaming chat: model={}", self.model);
        let response = self.post("/api/chat", &self.chat_body(request, true)).await?;
        let bytes: ByteStream = Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec())));
        Ok(Box::pin(stream::unfold(StreamState::new(bytes), next_token)))
    }

    async fn residency(&self) -> Result<ModelResidency> {
        let response = self
            .client
            .get(self.url("/api/ps"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let ps: PsResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse /api/ps: {}", e)))?;

        let residency = ps
            .models
            .iter()
            .find(|m| self.is_our_model(m))
            .map(|m| ModelResidency {
                resident: true,
                size: m.size,
                size_vram: m.size_vram,
            })
            .unwrap_or_default();
        Ok(residency)
    }

    async fn warm_up(&self) -> Result<()> {
        let start = Instant::now();
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: "",
            stream: false,
            keep_alive: &self.keep_alive,
            options: GenerateOptions { num_predict: 1 },
        };
        self.post("/api/generate", &body).await?;
        info!(
            "Model {} resident after {:.1}s",
            self.model,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: &'a SamplingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// A chat reply, or one line of a streamed reply
#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsModel>,
}

#[derive(Debug, Deserialize)]
struct PsModel {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    size_vram: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_lines_keeps_partial_tail() {
        let mut buffer = b"{\"done\":false}\r\n\n{\"done\":tr".to_vec();
        let lines = take_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"done\":false}".to_vec()]);
        assert_eq!(buffer, b"{\"done\":tr".to_vec());
    }

    #[test]
    fn test_decode_line() {
        let (content, done) =
            decode_line(br#"{"message":{"role":"assistant","content":"<think>"},"done":false}"#).unwrap();
        assert_eq!(content, "<think>");
        assert!(!done);

        let (content, done) = decode_line(br#"{"done":true,"total_duration":12}"#).unwrap();
        assert!(content.is_empty());
        assert!(done);

        assert!(matches!(
            decode_line(br#"{"error":"model 'x' not found"}"#),
            Err(LLMError::ProviderUnavailable(_))
        ));
        assert!(matches!(decode_line(b"not json"), Err(LLMError::ParseError(_))));
    }

    #[test]
    fn test_model_matching() {
        let backend = OllamaBackend::new("http://localhost:11434/", "llama3", Duration::from_secs(5));
        assert_eq!(backend.url("/api/ps"), "http://localhost:11434/api/ps");

        let entry = |name: &str| PsModel {
            name: name.to_string(),
            model: name.to_string(),
            size: 0,
            size_vram: 0,
        };
        assert!(backend.is_our_model(&entry("llama3:latest")));
        assert!(backend.is_our_model(&entry("llama3")));
        assert!(!backend.is_our_model(&entry("llama3:70b")));
    }
}
