use crate::backends::claude::ClaudeBackend;
use crate::backends::echo::EchoBackend;
use crate::backends::openai::OpenAiBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::failover::FailoverClient;
use crate::registry::AgentDescriptor;
use crate::stream::CompletionChunk;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;

/// One language-model call: a rendered prompt for a given agent.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub agent: &'a AgentDescriptor,
    /// Upper bound the backend should apply to the whole call.
    pub timeout: Duration,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(prompt: &'a str, agent: &'a AgentDescriptor, timeout: Duration) -> Self {
        Self {
            prompt,
            agent,
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Final text of a completion plus provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            stop_reason: None,
            usage: None,
        }
    }
}

/// Chunk receiver plus a handle resolving to the aggregated completion.
pub type CompletionStream = (
    mpsc::Receiver<CompletionChunk>,
    JoinHandle<MaestroResult<Completion>>,
);

/// The language-model completion capability.
///
/// Every provider implements this trait; callers never branch on provider
/// identity. Implementations must honour `request.timeout` and return
/// promptly when the surrounding future is dropped.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `CompletionClient` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in `backend_for()` below
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Non-streaming completion.
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion>;

    /// Streaming completion.
    async fn complete_stream(&self, request: &CompletionRequest<'_>)
        -> MaestroResult<CompletionStream>;
}

/// Drain a [`CompletionStream`] and return its aggregated completion.
///
/// Dropping the returned future aborts the stream task, which closes the
/// provider connection.
pub async fn collect_stream(stream: CompletionStream) -> MaestroResult<Completion> {
    let (mut rx, handle) = stream;
    let handle = AbortOnDropHandle::new(handle);
    let mut streamed_error = None;
    while let Some(chunk) = rx.recv().await {
        if let CompletionChunk::Error { message } = chunk {
            streamed_error = Some(message);
        }
    }
    match handle.await {
        Ok(Ok(completion)) => match streamed_error {
            Some(message) => Err(MaestroError::Completion(message)),
            None => Ok(completion),
        },
        Ok(Err(e)) => Err(e),
        Err(e) => Err(MaestroError::Completion(format!("stream task failed: {e}"))),
    }
}

/// Completion client configured from a [`ModelConfig`].
///
/// Wraps the provider backend in a [`FailoverClient`] when the config
/// declares a retry policy or fallback models.
pub struct LlmClient {
    backend: Box<dyn CompletionClient>,
    provider: LlmProvider,
}

impl LlmClient {
    pub fn new(config: ModelConfig) -> Self {
        let provider = config.provider;
        let mut primary = config;
        let fallbacks = std::mem::take(&mut primary.fallback_models);
        let policy = primary.retry_policy.take();

        let backend: Box<dyn CompletionClient> = if fallbacks.is_empty() && policy.is_none() {
            backend_for(primary)
        } else {
            Box::new(FailoverClient::new(
                backend_for(primary),
                fallbacks.into_iter().map(backend_for).collect(),
                policy.unwrap_or_default(),
            ))
        };
        Self { backend, provider }
    }

    /// Create from a pre-built backend (for custom/external providers).
    pub fn from_backend(backend: Box<dyn CompletionClient>, provider: LlmProvider) -> Self {
        Self { backend, provider }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }
}

fn backend_for(config: ModelConfig) -> Box<dyn CompletionClient> {
    match config.provider {
        LlmProvider::Claude => Box::new(ClaudeBackend::new(config)),
        LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
            Box::new(OpenAiBackend::new(config))
        }
        LlmProvider::Echo => Box::new(EchoBackend::new(config)),
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion> {
        self.backend.complete(request).await
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> MaestroResult<CompletionStream> {
        self.backend.complete_stream(request).await
    }
}

/// Map a transport failure to the error taxonomy.
pub(crate) fn map_transport_error(err: reqwest::Error, timeout: Duration) -> MaestroError {
    if err.is_timeout() {
        MaestroError::Timeout(timeout.as_millis() as u64)
    } else {
        MaestroError::Http(err.to_string())
    }
}
