use crate::template;
use crate::types::{TaskResult, TaskSpec, Variables};
use chrono::{DateTime, Utc};
use maestro_agent::{collect_stream, AgentDescriptor, CompletionClient, CompletionRequest};
use maestro_core::{MaestroError, MaestroResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs a single workflow task against the completion client.
///
/// The executor never touches the run's variable bag; it reads a snapshot
/// and hands back a [`TaskResult`] for the runner to merge.
pub struct TaskExecutor {
    client: Arc<dyn CompletionClient>,
    task_timeout: Duration,
    stream_completions: bool,
}

impl TaskExecutor {
    pub fn new(client: Arc<dyn CompletionClient>, task_timeout: Duration) -> Self {
        Self {
            client,
            task_timeout,
            stream_completions: false,
        }
    }

    /// Consume the client's chunk stream instead of a blocking completion.
    /// Only the aggregated text reaches the task result either way.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_completions = enabled;
        self
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub(crate) fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    /// Render, call, and wrap the outcome. Never fails: every error is
    /// captured into the returned result.
    pub async fn execute(
        &self,
        task: &TaskSpec,
        variables: &Variables,
        agent: &AgentDescriptor,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = self.run(task, variables, agent, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(
                    task_id = %task.task_id,
                    agent = %agent.name,
                    duration_ms,
                    "Task completed"
                );
                TaskResult {
                    task_id: task.task_id.clone(),
                    agent_name: task.agent_name.clone(),
                    success: true,
                    output,
                    duration_ms,
                    error_kind: None,
                    error: None,
                    started_at,
                    ended_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task.task_id,
                    agent = %agent.name,
                    duration_ms,
                    error = %e,
                    "Task failed"
                );
                failed_result(task, &e, started_at, duration_ms)
            }
        }
    }

    async fn run(
        &self,
        task: &TaskSpec,
        variables: &Variables,
        agent: &AgentDescriptor,
        cancel: &CancellationToken,
    ) -> MaestroResult<String> {
        let prompt = template::render(&task.prompt_template, variables)?;
        let request = CompletionRequest::new(&prompt, agent, self.task_timeout);

        let call = async {
            if self.stream_completions {
                collect_stream(self.client.complete_stream(&request).await?).await
            } else {
                self.client.complete(&request).await
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MaestroError::Cancelled),
            res = tokio::time::timeout(self.task_timeout, call) => match res {
                Ok(completion) => completion.map(|c| c.text),
                Err(_) => Err(MaestroError::Timeout(self.task_timeout.as_millis() as u64)),
            },
        }
    }
}

/// Result for a task that failed with `err` after `duration_ms`.
pub(crate) fn failed_result(
    task: &TaskSpec,
    err: &MaestroError,
    started_at: DateTime<Utc>,
    duration_ms: u64,
) -> TaskResult {
    TaskResult {
        task_id: task.task_id.clone(),
        agent_name: task.agent_name.clone(),
        success: false,
        output: String::new(),
        duration_ms,
        error_kind: Some(err.kind()),
        error: Some(err.to_string()),
        started_at,
        ended_at: Utc::now(),
    }
}
