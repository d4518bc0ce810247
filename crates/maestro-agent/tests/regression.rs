//! Regression tests for maestro-agent: ModelConfig, LlmProvider, and the
//! HTTP completion backends against a mock server.

use maestro_agent::{
    collect_stream, AgentDescriptor, AgentProvider, CompletionChunk, CompletionClient,
    CompletionRequest, LlmClient, LlmProvider, ModelConfig, RetryPolicy,
};
use maestro_core::MaestroError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reviewer() -> AgentDescriptor {
    AgentDescriptor::new("qa-agent", AgentProvider::ClaudeSonnet, "QA")
        .with_tools(2)
        .with_sampling(0.3, 4096)
        .with_system_prompt("You are a meticulous reviewer.")
}

fn config_for(provider: LlmProvider, server: &MockServer) -> ModelConfig {
    config_at(provider, server.uri())
}

fn config_at(provider: LlmProvider, base_url: String) -> ModelConfig {
    let mut config = ModelConfig::new(provider);
    config.api_key = "test-key".to_string();
    config.api_base_url = Some(base_url);
    config
}

/// Read one HTTP request (head plus `content-length` body) off the socket.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }
}

/// Serve a single request with a chunked `text/event-stream` body, one HTTP
/// chunk per frame and `gap` between frames. The handle resolves to the
/// number of frames written before the client went away.
async fn start_sse_server(frames: Vec<Vec<u8>>, gap: Duration) -> (String, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return 0;
        }
        let mut written = 0;
        for frame in frames {
            let mut chunk = format!("{:x}\r\n", frame.len()).into_bytes();
            chunk.extend_from_slice(&frame);
            chunk.extend_from_slice(b"\r\n");
            if socket.write_all(&chunk).await.is_err() || socket.flush().await.is_err() {
                return written;
            }
            written += 1;
            tokio::time::sleep(gap).await;
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        written
    });

    (uri, handle)
}

/// Split `body` right after the first byte of its first multi-byte character.
fn split_inside_char(body: &str) -> Vec<Vec<u8>> {
    let bytes = body.as_bytes();
    let at = bytes.iter().position(|b| *b >= 0xC0).unwrap() + 1;
    vec![bytes[..at].to_vec(), bytes[at..].to_vec()]
}

fn claude_delta(text: &str) -> Vec<u8> {
    format!(
        "data: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{text}\"}}}}\n\n"
    )
    .into_bytes()
}

fn openai_delta(text: &str) -> Vec<u8> {
    format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{text}\"}}}}]}}\n\n").into_bytes()
}

// --- ModelConfig & LlmProvider ---

#[test]
fn test_llm_provider_serialization() {
    for (provider, wire) in [
        (LlmProvider::Claude, "\"claude\""),
        (LlmProvider::OpenAi, "\"openai\""),
        (LlmProvider::OpenRouter, "\"openrouter\""),
        (LlmProvider::Groq, "\"groq\""),
        (LlmProvider::Echo, "\"echo\""),
    ] {
        let json = serde_json::to_string(&provider).unwrap();
        assert_eq!(json, wire);
        let back: LlmProvider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, provider);
    }
}

#[test]
fn test_model_config_base_url_defaults() {
    assert_eq!(
        ModelConfig::new(LlmProvider::Claude).base_url(),
        "https://api.anthropic.com"
    );
    assert_eq!(
        ModelConfig::new(LlmProvider::OpenAi).base_url(),
        "https://api.openai.com"
    );
    assert_eq!(
        ModelConfig::new(LlmProvider::OpenRouter).base_url(),
        "https://openrouter.ai/api"
    );
}

#[test]
fn test_model_config_base_url_custom_override() {
    let mut config = ModelConfig::new(LlmProvider::Claude);
    config.api_base_url = Some("http://localhost:8080".to_string());
    assert_eq!(config.base_url(), "http://localhost:8080");
}

#[test]
fn test_model_config_deserialization_with_defaults() {
    let toml_str = r#"
        provider = "claude"
        api_key = "test-key"
    "#;

    let config: ModelConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.provider, LlmProvider::Claude);
    assert!(config.model_id.is_none());
    assert!(config.temperature.is_none());
    assert!(config.fallback_models.is_empty());
    assert!(config.retry_policy.is_none());
}

#[test]
fn test_model_config_with_fallbacks_from_toml() {
    let toml_str = r#"
        provider = "claude"
        api_key = "primary"

        [retry_policy]
        max_retries = 1

        [[fallback_models]]
        provider = "openrouter"
        api_key = "backup"
        model_id = "anthropic/claude-3-5-sonnet"
    "#;

    let config: ModelConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, LlmProvider::OpenRouter);
    assert_eq!(
        config.retry_policy,
        Some(RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        })
    );
}

// --- Claude backend ---

#[tokio::test]
async fn test_claude_complete_sends_agent_settings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-3-5-sonnet-latest",
            "max_tokens": 4096,
            "system": "You are a meticulous reviewer.",
            "messages": [{"role": "user", "content": "Review the cache layer"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "claude-3-5-sonnet-latest",
            "content": [{"type": "text", "text": "No blocking issues."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 20, "output_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::Claude, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("Review the cache layer", &agent, Duration::from_secs(5));
    let completion = client.complete(&request).await.unwrap();

    assert_eq!(completion.text, "No blocking issues.");
    assert_eq!(completion.usage.unwrap().input_tokens, 20);
}

#[tokio::test]
async fn test_claude_error_status_is_completion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::Claude, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("x", &agent, Duration::from_secs(5));
    let err = client.complete(&request).await.unwrap_err();

    match err {
        MaestroError::Completion(msg) => assert!(msg.contains("400"), "got: {msg}"),
        other => panic!("expected Completion error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_claude_stream_aggregates_deltas() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"type":"message_start","message":{"model":"claude-3-5-sonnet-latest","usage":{"input_tokens":7}}}"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" world"}}"#,
        r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
        r#"data: {"type":"message_stop"}"#,
    ]
    .join("\n\n")
        + "\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::Claude, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("Say hello", &agent, Duration::from_secs(5));
    let completion = collect_stream(client.complete_stream(&request).await.unwrap())
        .await
        .unwrap();

    assert_eq!(completion.text, "Hello world");
    assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
    let usage = completion.usage.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens), (7, 2));
}

#[tokio::test]
async fn test_claude_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(serde_json::json!({"content": []})),
        )
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::Claude, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("x", &agent, Duration::from_millis(100));
    let err = client.complete(&request).await.unwrap_err();

    assert!(matches!(err, MaestroError::Timeout(100)), "got {err:?}");
}

// --- OpenAI-compatible backend ---

#[tokio::test]
async fn test_openai_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": "You are a meticulous reviewer."},
                {"role": "user", "content": "Review it"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Done."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 11, "completion_tokens": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::OpenAi, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("Review it", &agent, Duration::from_secs(5));
    let completion = client.complete(&request).await.unwrap();

    assert_eq!(completion.text, "Done.");
    assert_eq!(completion.model, "gpt-4o-mini");
}

#[tokio::test]
async fn test_openai_stream_aggregates_deltas() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"Step "}}]}"#,
        r#"data: {"choices":[{"delta":{"content":"one"},"finish_reason":"stop"}]}"#,
        r#"data: {"choices":[],"usage":{"prompt_tokens":4,"completion_tokens":2}}"#,
        "data: [DONE]",
    ]
    .join("\n\n")
        + "\n\n";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let client = LlmClient::new(config_for(LlmProvider::Groq, &server));
    let agent = reviewer();
    let request = CompletionRequest::new("Plan", &agent, Duration::from_secs(5));
    let completion = collect_stream(client.complete_stream(&request).await.unwrap())
        .await
        .unwrap();

    assert_eq!(completion.text, "Step one");
    assert_eq!(completion.model, "llama-3.3-70b-versatile");
    assert_eq!(completion.usage.unwrap().output_tokens, 2);
}

// --- Streaming over a live socket ---

#[tokio::test]
async fn test_claude_stream_reassembles_split_utf8() {
    let mut frames = split_inside_char(&String::from_utf8(claude_delta("café")).unwrap());
    frames.push(b"data: {\"type\":\"message_stop\"}\n\n".to_vec());
    let (uri, server) = start_sse_server(frames, Duration::from_millis(10)).await;

    let client = LlmClient::new(config_at(LlmProvider::Claude, uri));
    let agent = reviewer();
    let request = CompletionRequest::new("Name a place", &agent, Duration::from_secs(5));
    let completion = collect_stream(client.complete_stream(&request).await.unwrap())
        .await
        .unwrap();

    assert_eq!(completion.text, "café");
    assert_eq!(server.await.unwrap(), 3);
}

#[tokio::test]
async fn test_openai_stream_reassembles_split_utf8() {
    let mut frames = split_inside_char(&String::from_utf8(openai_delta("naïve résumé")).unwrap());
    frames.push(b"data: [DONE]\n\n".to_vec());
    let (uri, _server) = start_sse_server(frames, Duration::from_millis(10)).await;

    let client = LlmClient::new(config_at(LlmProvider::OpenAi, uri));
    let agent = reviewer();
    let request = CompletionRequest::new("Describe", &agent, Duration::from_secs(5));
    let completion = collect_stream(client.complete_stream(&request).await.unwrap())
        .await
        .unwrap();

    assert_eq!(completion.text, "naïve résumé");
}

#[tokio::test]
async fn test_claude_stream_closes_connection_when_abandoned() {
    let frames = (0..200).map(|_| claude_delta("tick ")).collect();
    let (uri, server) = start_sse_server(frames, Duration::from_millis(20)).await;

    let client = LlmClient::new(config_at(LlmProvider::Claude, uri));
    let agent = reviewer();
    let request = CompletionRequest::new("Count", &agent, Duration::from_secs(30));
    let stream = client.complete_stream(&request).await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(300), collect_stream(stream)).await;
    assert!(abandoned.is_err());

    // The server notices the closed connection long before its 4s script ends.
    let written = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert!(written < 100, "server kept writing: {written} frames");
}

#[tokio::test]
async fn test_openai_stream_task_stops_when_receiver_dropped() {
    let frames = (0..200).map(|_| openai_delta("tick ")).collect();
    let (uri, server) = start_sse_server(frames, Duration::from_millis(20)).await;

    let client = LlmClient::new(config_at(LlmProvider::OpenAi, uri));
    let agent = reviewer();
    let request = CompletionRequest::new("Count", &agent, Duration::from_secs(30));
    let (mut rx, handle) = client.complete_stream(&request).await.unwrap();

    assert!(matches!(
        rx.recv().await,
        Some(CompletionChunk::TextDelta { .. })
    ));
    drop(rx);

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(MaestroError::Cancelled)), "got {outcome:?}");

    let written = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert!(written < 100, "server kept writing: {written} frames");
}

// --- Failover ---

#[tokio::test]
async fn test_failover_to_fallback_model() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&primary)
        .await;

    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "anthropic/claude-3-5-sonnet",
            "choices": [{"message": {"content": "from backup"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&backup)
        .await;

    let mut config = config_for(LlmProvider::Claude, &primary);
    config.retry_policy = Some(RetryPolicy {
        max_retries: 1,
        backoff_base_ms: 1,
        backoff_max_ms: 1,
    });
    config
        .fallback_models
        .push(config_for(LlmProvider::OpenRouter, &backup));

    let client = LlmClient::new(config);
    let agent = reviewer();
    let request = CompletionRequest::new("x", &agent, Duration::from_secs(5));
    let completion = client.complete(&request).await.unwrap();

    assert_eq!(completion.text, "from backup");
}
