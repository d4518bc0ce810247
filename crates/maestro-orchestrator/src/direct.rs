use crate::executor::TaskExecutor;
use crate::types::TaskResult;
use chrono::{DateTime, Utc};
use maestro_agent::{AgentDescriptor, Completion, CompletionChunk, CompletionRequest, TokenUsage};
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

/// A one-off call to a single agent, outside any workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCall {
    pub agent_name: String,
    pub prompt: String,
    /// Free-form JSON shown to the model ahead of the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl AgentCall {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// The text sent to the model. A non-empty context is pretty-printed
    /// ahead of the task.
    pub fn compose_prompt(&self) -> String {
        match &self.context {
            Some(context) if !is_blank(context) => {
                let rendered =
                    serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
                format!("Context: {rendered}\n\nTask: {}", self.prompt)
            }
            _ => self.prompt.clone(),
        }
    }
}

fn is_blank(context: &Value) -> bool {
    match context {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Result of an [`AgentCall`] plus the provider's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    #[serde(flatten)]
    pub result: TaskResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Events of a streamed agent call: one `start`, any number of `content`
/// deltas, then exactly one `end` carrying the outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    Start { agent_name: String, prompt: String },
    Content { text: String },
    End { outcome: AgentOutcome },
}

/// Blocking call, bounded by the executor's task timeout.
pub(crate) async fn call(
    executor: &TaskExecutor,
    agent: &AgentDescriptor,
    call: &AgentCall,
) -> AgentOutcome {
    let task_id = call_id(agent);
    let prompt = call.compose_prompt();
    let started_at = Utc::now();
    let start = Instant::now();

    let timeout = executor.task_timeout();
    let request = CompletionRequest::new(&prompt, agent, timeout);
    let completion = tokio::time::timeout(timeout, executor.client().complete(&request))
        .await
        .unwrap_or(Err(MaestroError::Timeout(timeout.as_millis() as u64)));

    finish(task_id, agent, completion, started_at, start)
}

/// Streaming call on its own task. Dropping the receiver stops the
/// provider stream.
pub(crate) fn spawn_stream(
    executor: Arc<TaskExecutor>,
    agent: AgentDescriptor,
    call: AgentCall,
    buffer: usize,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let start_event = AgentEvent::Start {
            agent_name: agent.name.clone(),
            prompt: call.prompt.clone(),
        };
        if tx.send(start_event).await.is_err() {
            return;
        }

        let task_id = call_id(&agent);
        let prompt = call.compose_prompt();
        let started_at = Utc::now();
        let start = Instant::now();

        let timeout = executor.task_timeout();
        let completion = tokio::time::timeout(timeout, relay(&executor, &agent, &prompt, &tx))
            .await
            .unwrap_or(Err(MaestroError::Timeout(timeout.as_millis() as u64)));

        let outcome = finish(task_id, &agent, completion, started_at, start);
        let _ = tx.send(AgentEvent::End { outcome }).await;
    });

    rx
}

/// Forward text deltas to `tx` and return the aggregated completion.
async fn relay(
    executor: &TaskExecutor,
    agent: &AgentDescriptor,
    prompt: &str,
    tx: &mpsc::Sender<AgentEvent>,
) -> MaestroResult<Completion> {
    let request = CompletionRequest::new(prompt, agent, executor.task_timeout());
    let (mut chunks, handle) = executor.client().complete_stream(&request).await?;
    let handle = AbortOnDropHandle::new(handle);

    let mut streamed_error = None;
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return Err(MaestroError::Cancelled),
            chunk = chunks.recv() => chunk,
        };
        match chunk {
            Some(CompletionChunk::TextDelta { text }) => {
                tx.send(AgentEvent::Content { text })
                    .await
                    .map_err(|_| MaestroError::Cancelled)?;
            }
            Some(CompletionChunk::Error { message }) => streamed_error = Some(message),
            Some(CompletionChunk::Done) => {}
            None => break,
        }
    }

    let completion = handle
        .await
        .map_err(|e| MaestroError::Completion(format!("stream task failed: {e}")))??;
    match streamed_error {
        Some(message) => Err(MaestroError::Completion(message)),
        None => Ok(completion),
    }
}

fn call_id(agent: &AgentDescriptor) -> String {
    format!("{}-{}", agent.name, Utc::now().timestamp_millis())
}

fn finish(
    task_id: String,
    agent: &AgentDescriptor,
    completion: MaestroResult<Completion>,
    started_at: DateTime<Utc>,
    start: Instant,
) -> AgentOutcome {
    let duration_ms = start.elapsed().as_millis() as u64;
    let mut result = TaskResult {
        task_id,
        agent_name: agent.name.clone(),
        success: false,
        output: String::new(),
        duration_ms,
        error_kind: None,
        error: None,
        started_at,
        ended_at: Utc::now(),
    };

    match completion {
        Ok(completion) => {
            debug!(agent = %agent.name, duration_ms, "Agent call completed");
            result.success = true;
            result.output = completion.text;
            AgentOutcome {
                result,
                model: Some(completion.model),
                stop_reason: completion.stop_reason,
                usage: completion.usage,
            }
        }
        Err(e) => {
            warn!(agent = %agent.name, duration_ms, error = %e, "Agent call failed");
            result.error_kind = Some(e.kind());
            result.error = Some(e.to_string());
            AgentOutcome {
                result,
                model: None,
                stop_reason: None,
                usage: None,
            }
        }
    }
}
