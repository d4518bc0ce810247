use super::{drain_sse_data, forward};
use crate::client::{
    map_transport_error, Completion, CompletionClient, CompletionRequest, CompletionStream,
    TokenUsage,
};
use crate::config::{LlmProvider, ModelConfig};
use crate::stream::CompletionChunk;
use async_trait::async_trait;
use futures_util::StreamExt;
use maestro_core::{MaestroError, MaestroResult};
use tokio::sync::mpsc;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, and any other provider that
/// implements the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &CompletionRequest<'_>, stream: bool) -> serde_json::Value {
        let agent = request.agent;
        let mut messages: Vec<serde_json::Value> = Vec::new();

        if !agent.system_prompt.is_empty() {
            messages.push(serde_json::json!({
                "role": "system",
                "content": agent.system_prompt
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt
        }));

        let mut body = serde_json::json!({
            "model": self.config.resolve_model(agent),
            "max_tokens": self.config.resolve_max_tokens(agent),
            "temperature": self.config.resolve_temperature(agent),
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/ai-architect-academy/maestro")
                .header("X-Title", "Maestro")
        } else {
            request
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest<'_>,
        stream: bool,
    ) -> MaestroResult<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let resp = self
            .add_provider_headers(self.http.post(&url))
            .timeout(request.timeout)
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
                "{} API error {status}: {error_body}",
                self.config.provider
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionClient for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion> {
        let resp = self.send(request, false).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| map_transport_error(e, request.timeout))?;
        parse_openai_response(&body)
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
                    if data == "[DONE]" {
                        forward(&tx, CompletionChunk::Done).await?;
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(message) = event["error"]["message"].as_str() {
                        let _ = tx
                            .send(CompletionChunk::Error {
                                message: message.to_string(),
                            })
                            .await;
                        return Err(MaestroError::Completion(message.to_string()));
                    }

                    if let Some(usage) = parse_usage(&event["usage"]) {
                        completion.usage = Some(usage);
                    }

                    let choice = &event["choices"][0];
                    if let Some(text) = choice["delta"]["content"].as_str() {
                        if !text.is_empty() {
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
                    if let Some(reason) = choice["finish_reason"].as_str() {
                        completion.stop_reason = Some(reason.to_string());
                    }
                }
            }

            Ok(completion)
        });

        Ok((rx, handle))
    }
}

fn parse_usage(usage: &serde_json::Value) -> Option<TokenUsage> {
    let input = usage["prompt_tokens"].as_u64()?;
    Some(TokenUsage {
        input_tokens: input,
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

pub fn parse_openai_response(body: &serde_json::Value) -> MaestroResult<Completion> {
    let choice = body["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| MaestroError::Completion("No choices in response".into()))?;

    Ok(Completion {
        text: choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        stop_reason: choice["finish_reason"].as_str().map(str::to_string),
        usage: parse_usage(&body["usage"]),
    })
}
