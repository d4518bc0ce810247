use super::{drain_sse_data, forward};
use crate::client::{
    map_transport_error, Completion, CompletionClient, CompletionRequest, CompletionStream,
    TokenUsage,
};
use crate::config::ModelConfig;
use crate::stream::CompletionChunk;
use async_trait::async_trait;
use futures_util::StreamExt;
use maestro_core::{MaestroError, MaestroResult};
use serde::Serialize;
use tokio::sync::mpsc;

/// Claude (Anthropic Messages API) backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &CompletionRequest<'_>, stream: bool) -> serde_json::Value {
        let agent = request.agent;
        let messages = vec![ClaudeMessage {
            role: "user",
            content: request.prompt,
        }];

        let mut body = serde_json::json!({
            "model": self.config.resolve_model(agent),
            "max_tokens": self.config.resolve_max_tokens(agent),
            "temperature": self.config.resolve_temperature(agent),
            "messages": messages,
        });

        if !agent.system_prompt.is_empty() {
            body["system"] = serde_json::json!(agent.system_prompt);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    async fn send(
        &self,
        request: &CompletionRequest<'_>,
        stream: bool,
    ) -> MaestroResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let resp = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.build_body(request, stream))
            .send()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(MaestroError::Completion(format!(
                "Claude API error {status}: {error_body}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionClient for ClaudeBackend {
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion> {
        let resp = self.send(request, false).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;
        parse_claude_response(&body)
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> MaestroResult<CompletionStream> {
        let resp = self.send(request, true).await?;
        let model = self.config.resolve_model(request.agent);
        let timeout = request.timeout;

        let (tx, rx) = mpsc::channel::<CompletionChunk>(256);
        let mut byte_stream = resp.bytes_stream();

        let handle = tokio::spawn(async move {
            let mut buffer = Vec::new();
            let mut completion = Completion::new(String::new(), model);
            let mut usage = TokenUsage::default();

            loop {
                let chunk_result = tokio::select! {
                    _ = tx.closed() => return Err(MaestroError::Cancelled),
                    next = byte_stream.next() => match next {
                        Some(result) => result,
                        None => break,
                    },
                };
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let err = map_transport_error(e, timeout);
                        let _ = tx
                            .send(CompletionChunk::Error {
                                message: err.to_string(),
                            })
                            .await;
                        return Err(err);
                    }
                };

                buffer.extend_from_slice(&chunk);

                for data in drain_sse_data(&mut buffer) {
                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    match event["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            let message = &event["message"];
                            if let Some(m) = message["model"].as_str() {
                                completion.model = m.to_string();
                            }
                            usage.input_tokens =
                                message["usage"]["input_tokens"].as_u64().unwrap_or(0);
                        }
                        "content_block_delta" => {
                            let delta = &event["delta"];
                            if delta["type"].as_str() == Some("text_delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    completion.text.push_str(text);
                                    forward(
                                        &tx,
                                        CompletionChunk::TextDelta {
                                            text: text.to_string(),
                                        },
                                    )
                                    .await?;
                                }
                            }
                        }
                        "message_delta" => {
                            if let Some(sr) = event["delta"]["stop_reason"].as_str() {
                                completion.stop_reason = Some(sr.to_string());
                            }
                            if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = out;
                            }
                        }
                        "message_stop" => {
                            forward(&tx, CompletionChunk::Done).await?;
                        }
                        "error" => {
                            let message = event["error"]["message"]
                                .as_str()
                                .unwrap_or("unknown stream error")
                                .to_string();
                            let _ = tx
                                .send(CompletionChunk::Error {
                                    message: message.clone(),
                                })
                                .await;
                            return Err(MaestroError::Completion(message));
                        }
                        _ => {}
                    }
                }
            }

            completion.usage = Some(usage);
            Ok(completion)
        });

        Ok((rx, handle))
    }
}

// -- Claude wire types --

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

pub fn parse_claude_response(body: &serde_json::Value) -> MaestroResult<Completion> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| MaestroError::Completion("Missing content in Claude response".into()))?;

    let text_parts: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();

    let usage = match (
        body["usage"]["input_tokens"].as_u64(),
        body["usage"]["output_tokens"].as_u64(),
    ) {
        (None, None) => None,
        (input, output) => Some(TokenUsage {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
        }),
    };

    Ok(Completion {
        text: text_parts.join("\n"),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        stop_reason: body["stop_reason"].as_str().map(str::to_string),
        usage,
    })
}
