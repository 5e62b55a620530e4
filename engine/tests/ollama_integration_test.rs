//! Integration tests for the Ollama backend
//!
//! These tests run against a wiremock server and do NOT require a running
//! Ollama instance.

use std::time::Duration;

use futures::StreamExt;
use pilot_engine::config::LLMConfig;
use pilot_engine::llm::ollama::OllamaBackend;
use pilot_engine::llm::{ChatRequest, LLMError, ModelBackend, SamplingOptions};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OllamaBackend {
    OllamaBackend::new(server.uri(), "qwen2.5-coder:7b", Duration::from_secs(5))
}

fn request() -> ChatRequest {
    ChatRequest::new(
        "system",
        "list the files",
        SamplingOptions::from_config(&LLMConfig::default()),
    )
    .with_keep_alive("30m")
}

#[tokio::test]
async fn test_complete_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "qwen2.5-coder:7b",
            "stream": false,
            "keep_alive": "30m",
            "options": {"temperature": 0.0, "seed": 42}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5-coder:7b",
            "message": {"role": "assistant", "content": "{\"tool\": \"noop\", \"params\": {}}"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = backend(&server).complete(&request()).await.unwrap();
    assert_eq!(reply, r#"{"tool": "noop", "params": {}}"#);
}

#[tokio::test]
async fn test_stream_yields_ndjson_content() {
    let server = MockServer::start().await;
    let body = [
        json!({"message": {"role": "assistant", "content": "<think>"}, "done": false}),
        json!({"message": {"role": "assistant", "content": "scan"}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": false}),
        json!({"message": {"role": "assistant", "content": "</think>{}"}, "done": false}),
        json!({"done": true, "total_duration": 1200}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let stream = backend(&server).stream(&request()).await.unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks, vec!["<think>", "scan", "</think>{}"]);
}

#[tokio::test]
async fn test_stream_error_line_ends_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "{}\n{}\n",
        json!({"message": {"role": "assistant", "content": "partial"}, "done": false}),
        json!({"error": "out of memory"})
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let mut stream = backend(&server).stream(&request()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
    assert!(matches!(
        stream.next().await,
        Some(Err(LLMError::ProviderUnavailable(msg))) if msg == "out of memory"
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_rejected_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    match backend(&server).complete(&request()).await {
        Err(LLMError::Rejected { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "model not found");
        }
        other => panic!("Expected Rejected, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_residency_matches_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3:latest", "model": "llama3:latest", "size": 100, "size_vram": 100},
                {"name": "qwen2.5-coder:7b", "model": "qwen2.5-coder:7b", "size": 4000, "size_vram": 1000}
            ]
        })))
        .mount(&server)
        .await;

    let residency = backend(&server).residency().await.unwrap();
    assert!(residency.resident);
    assert_eq!(residency.vram_percent(), Some(25));

    let other = OllamaBackend::new(server.uri(), "mistral", Duration::from_secs(5));
    assert!(!other.residency().await.unwrap().resident);

    let untagged = OllamaBackend::new(server.uri(), "llama3", Duration::from_secs(5));
    assert!(untagged.residency().await.unwrap().resident);
}

#[tokio::test]
async fn test_warm_up_posts_empty_generate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "qwen2.5-coder:7b",
            "prompt": "",
            "stream": false,
            "options": {"num_predict": 1}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
        .expect(1)
        .mount(&server)
        .await;

    let config = LLMConfig {
        base_url: server.uri(),
        ..LLMConfig::default()
    };
    OllamaBackend::from_config(&config).warm_up().await.unwrap();
}

#[tokio::test]
async fn test_connection_error() {
    // Nothing listens on this port
    let backend = OllamaBackend::new("http://127.0.0.1:9", "llama3", Duration::from_secs(2));
    match backend.complete(&request()).await {
        Err(LLMError::ProviderUnavailable(msg)) => assert!(msg.contains("Cannot connect to Ollama")),
        Err(LLMError::NetworkError(_)) | Err(LLMError::Timeout) => {}
        other => panic!("Expected a connection failure, got: {:?}", other),
    }
}
