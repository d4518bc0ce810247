use super::forward;
use crate::client::{Completion, CompletionClient, CompletionRequest, CompletionStream};
use crate::config::ModelConfig;
use crate::stream::CompletionChunk;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use tokio::sync::mpsc;

/// Offline backend: answers every prompt with the prompt itself, tagged with
/// the agent name. Lets the binary and gateway run without credentials.
pub struct EchoBackend {
    config: ModelConfig,
}

impl EchoBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    fn respond(&self, request: &CompletionRequest<'_>) -> Completion {
        let mut completion = Completion::new(
            format!("[{}] {}", request.agent.name, request.prompt),
            self.config.resolve_model(request.agent),
        );
        completion.stop_reason = Some("end_turn".to_string());
        completion
    }
}

#[async_trait]
impl CompletionClient for EchoBackend {
    async fn complete(&self, request: &CompletionRequest<'_>) -> MaestroResult<Completion> {
        Ok(self.respond(request))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> MaestroResult<CompletionStream> {
        let completion = self.respond(request);
        let words: Vec<String> = completion
            .text
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();

        let (tx, rx) = mpsc::channel(words.len() + 1);
        let handle = tokio::spawn(async move {
            for text in words {
                forward(&tx, CompletionChunk::TextDelta { text }).await?;
            }
            forward(&tx, CompletionChunk::Done).await?;
            Ok::<_, MaestroError>(completion)
        });
        Ok((rx, handle))
    }
}
