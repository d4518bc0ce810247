use crate::catalog::{RegisteredWorkflow, WorkflowCatalog};
use crate::direct::{self, AgentCall, AgentEvent, AgentOutcome};
use crate::executor::{failed_result, TaskExecutor};
use crate::monitor::WorkflowMetrics;
use crate::types::{
    RunState, TaskResult, TaskSpec, Variables, WorkflowEvent, WorkflowRun, WorkflowSummary,
};
use chrono::Utc;
use maestro_agent::{AgentDescriptor, CompletionClient};
use maestro_core::{MaestroError, MaestroResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timeouts and buffering for the workflow runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Bounds a single completion call.
    pub task_timeout: Duration,
    /// Bounds a whole run. Once elapsed no further wave starts.
    pub workflow_timeout: Duration,
    /// Use the streaming completion path for every task.
    pub stream_completions: bool,
    /// Capacity of each run's event channel.
    pub event_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(120),
            workflow_timeout: Duration::from_secs(900),
            stream_completions: false,
            event_buffer: 64,
        }
    }
}

impl RunnerConfig {
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }
}

/// Caller's side of a started run: its event stream plus a cancel switch.
pub struct RunHandle {
    run_id: Uuid,
    events: mpsc::Receiver<WorkflowEvent>,
    cancel: CancellationToken,
    join: JoinHandle<MaestroResult<WorkflowRun>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next progress event; `None` once the terminal event has been read.
    pub async fn next_event(&mut self) -> Option<WorkflowEvent> {
        self.events.recv().await
    }

    /// Ask the run to stop. In-flight tasks are signalled and the run ends
    /// as `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Detach the event stream. The run keeps executing in the background.
    pub fn into_events(self) -> (mpsc::Receiver<WorkflowEvent>, CancellationToken) {
        (self.events, self.cancel)
    }

    /// Ignore progress events and wait for the final run.
    pub async fn wait(self) -> MaestroResult<WorkflowRun> {
        let RunHandle { events, join, .. } = self;
        drop(events);
        settle_run(join.await)
    }

    /// Drain every event, then return them with the final run.
    pub async fn collect(mut self) -> (Vec<WorkflowEvent>, MaestroResult<WorkflowRun>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, settle_run(self.join.await))
    }
}

fn settle_run(
    joined: Result<MaestroResult<WorkflowRun>, JoinError>,
) -> MaestroResult<WorkflowRun> {
    match joined {
        Ok(run) => run,
        Err(e) => Err(MaestroError::Completion(format!("workflow run task failed: {e}"))),
    }
}

/// Executes registered workflows wave by wave.
///
/// Each run gets its own tokio task, its own variable bag, and its own
/// cancellation token. The only state shared between runs is the catalog
/// (read-only) and the metrics aggregator.
pub struct WorkflowRunner {
    catalog: Arc<WorkflowCatalog>,
    executor: Arc<TaskExecutor>,
    metrics: Arc<WorkflowMetrics>,
    config: RunnerConfig,
}

impl WorkflowRunner {
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        client: Arc<dyn CompletionClient>,
        config: RunnerConfig,
    ) -> Self {
        let executor = TaskExecutor::new(client, config.task_timeout)
            .with_streaming(config.stream_completions);
        Self {
            catalog,
            executor: Arc::new(executor),
            metrics: Arc::new(WorkflowMetrics::new()),
            config,
        }
    }

    /// Share an existing metrics aggregator instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<WorkflowMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn catalog(&self) -> &Arc<WorkflowCatalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<WorkflowMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        self.catalog.list()
    }

    pub fn list_agents(&self) -> &[AgentDescriptor] {
        self.catalog.list_agents()
    }

    /// Run one agent directly, bounded by the task timeout. Only an unknown
    /// agent is an error; call failures land in the outcome.
    pub async fn run_agent(&self, call: &AgentCall) -> MaestroResult<AgentOutcome> {
        let agent = self.agent(&call.agent_name)?;
        Ok(direct::call(&self.executor, agent, call).await)
    }

    /// Streaming variant of [`run_agent`](Self::run_agent). Dropping the
    /// receiver stops the provider stream.
    pub fn stream_agent(&self, call: AgentCall) -> MaestroResult<mpsc::Receiver<AgentEvent>> {
        let agent = self.agent(&call.agent_name)?.clone();
        Ok(direct::spawn_stream(
            Arc::clone(&self.executor),
            agent,
            call,
            self.config.event_buffer,
        ))
    }

    fn agent(&self, name: &str) -> MaestroResult<&AgentDescriptor> {
        self.catalog
            .agents()
            .get(name)
            .ok_or_else(|| MaestroError::UnknownAgent(name.to_string()))
    }

    /// Check that `workflow_type` exists and `variables` covers its required
    /// inputs, without starting anything.
    pub fn validate(
        &self,
        workflow_type: &str,
        variables: &Variables,
    ) -> MaestroResult<Arc<RegisteredWorkflow>> {
        let workflow = self
            .catalog
            .get(workflow_type)
            .ok_or_else(|| MaestroError::UnknownWorkflow(workflow_type.to_string()))?;

        if let Some(missing) = workflow
            .definition
            .required_variables
            .iter()
            .find(|name| !variables.contains_key(*name))
        {
            return Err(MaestroError::MissingRequiredVariable {
                workflow: workflow_type.to_string(),
                variable: missing.clone(),
            });
        }
        Ok(workflow)
    }

    /// Start a run in the background and return its handle.
    ///
    /// An unknown workflow type is an immediate error. Missing required
    /// variables yield a handle whose stream is a single `error` event; that
    /// run never enters `Running` and is not counted in metrics.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, workflow_type: &str, variables: Variables) -> MaestroResult<RunHandle> {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = CancellationToken::new();

        let workflow = match self.validate(workflow_type, &variables) {
            Ok(workflow) => workflow,
            Err(err @ MaestroError::UnknownWorkflow(_)) => return Err(err),
            Err(err) => {
                let run_id = Uuid::new_v4();
                warn!(
                    run_id = %run_id,
                    workflow = %workflow_type,
                    error = %err,
                    "Rejected workflow run"
                );
                let _ = tx.try_send(WorkflowEvent::Error {
                    message: err.to_string(),
                });
                return Ok(RunHandle {
                    run_id,
                    events: rx,
                    cancel,
                    join: tokio::spawn(async move { Err(err) }),
                });
            }
        };

        let run = WorkflowRun::new(&workflow.definition, variables);
        let run_id = run.run_id;
        let driver = RunDriver {
            workflow,
            catalog: Arc::clone(&self.catalog),
            executor: Arc::clone(&self.executor),
            metrics: Arc::clone(&self.metrics),
            workflow_timeout: self.config.workflow_timeout,
            events: tx,
            cancel: cancel.clone(),
        };

        Ok(RunHandle {
            run_id,
            events: rx,
            cancel,
            join: tokio::spawn(driver.drive(run)),
        })
    }

    /// Start a run and wait for it to finish.
    pub async fn execute(
        &self,
        workflow_type: &str,
        variables: Variables,
    ) -> MaestroResult<WorkflowRun> {
        self.start(workflow_type, variables)?.wait().await
    }
}

/// Everything one run needs, moved onto its own task.
struct RunDriver {
    workflow: Arc<RegisteredWorkflow>,
    catalog: Arc<WorkflowCatalog>,
    executor: Arc<TaskExecutor>,
    metrics: Arc<WorkflowMetrics>,
    workflow_timeout: Duration,
    events: mpsc::Sender<WorkflowEvent>,
    cancel: CancellationToken,
}

impl RunDriver {
    async fn drive(self, mut run: WorkflowRun) -> MaestroResult<WorkflowRun> {
        run.state = RunState::Running;
        run.start_time = Utc::now();
        info!(
            run_id = %run.run_id,
            workflow = %run.workflow_type,
            waves = self.workflow.plan.wave_count(),
            "Workflow run started"
        );
        self.emit(WorkflowEvent::Start {
            run_id: run.run_id,
            workflow_type: run.workflow_type.clone(),
            timestamp: run.start_time,
        })
        .await;

        let deadline = tokio::time::sleep(self.workflow_timeout);
        tokio::pin!(deadline);
        let mut failed = false;
        let mut timed_out = false;
        let mut cancelled = false;

        for (wave_index, wave) in self.workflow.plan.waves().iter().enumerate() {
            if failed || timed_out || cancelled {
                break;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if deadline.is_elapsed() {
                timed_out = true;
                break;
            }

            debug!(
                run_id = %run.run_id,
                wave = wave_index,
                tasks = wave.len(),
                "Dispatching wave"
            );

            let snapshot = Arc::new(run.variables.clone());
            let mut in_flight: JoinSet<(String, TaskResult)> = JoinSet::new();
            let mut dispatched: HashMap<Id, &TaskSpec> = HashMap::new();

            for task in wave
                .iter()
                .filter_map(|id| self.workflow.definition.task(id))
            {
                let spec = task.clone();
                let catalog = Arc::clone(&self.catalog);
                let executor = Arc::clone(&self.executor);
                let variables = Arc::clone(&snapshot);
                let token = self.cancel.child_token();

                let handle = in_flight.spawn(async move {
                    let result = match catalog.agents().get(&spec.agent_name) {
                        Some(agent) => executor.execute(&spec, &variables, agent, &token).await,
                        None => failed_result(
                            &spec,
                            &MaestroError::UnknownAgent(spec.agent_name.clone()),
                            Utc::now(),
                            0,
                        ),
                    };
                    (spec.variable_key, result)
                });
                dispatched.insert(handle.id(), task);
            }

            loop {
                tokio::select! {
                    joined = in_flight.join_next_with_id() => match joined {
                        None => break,
                        Some(joined) => {
                            let Some((key, result)) = settle_task(joined, &dispatched) else {
                                continue;
                            };
                            if result.success {
                                run.variables.insert(key, result.output.clone());
                            } else {
                                failed = true;
                            }
                            self.emit(WorkflowEvent::task(&result)).await;
                            run.task_results.push(result);
                        }
                    },
                    _ = &mut deadline, if !timed_out => {
                        timed_out = true;
                        warn!(
                            run_id = %run.run_id,
                            workflow = %run.workflow_type,
                            "Workflow timeout elapsed, draining in-flight tasks"
                        );
                    },
                    _ = self.cancel.cancelled(), if !cancelled => {
                        cancelled = true;
                        warn!(
                            run_id = %run.run_id,
                            workflow = %run.workflow_type,
                            "Workflow run cancelled"
                        );
                    },
                }
            }
        }

        run.state = if cancelled {
            RunState::Cancelled
        } else if timed_out {
            RunState::TimedOut
        } else if failed {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        run.end_time = Some(Utc::now());
        self.metrics.record(&run);

        info!(
            run_id = %run.run_id,
            workflow = %run.workflow_type,
            state = %run.state,
            tasks = run.task_results.len(),
            duration_ms = run.duration_ms(),
            "Workflow run finished"
        );
        self.emit(WorkflowEvent::complete(&run)).await;
        Ok(run)
    }

    async fn emit(&self, event: WorkflowEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped; run continues");
        }
    }
}

/// Turn one joined task into its `(variable_key, result)`. A task that
/// panicked still gets a failed result so it is never silently dropped.
fn settle_task(
    joined: Result<(Id, (String, TaskResult)), JoinError>,
    dispatched: &HashMap<Id, &TaskSpec>,
) -> Option<(String, TaskResult)> {
    match joined {
        Ok((_, outcome)) => Some(outcome),
        Err(join_err) => {
            let task = dispatched.get(&join_err.id())?;
            error!(task_id = %task.task_id, error = %join_err, "Task aborted");
            let err = MaestroError::Completion(format!("task aborted: {join_err}"));
            Some((
                task.variable_key.clone(),
                failed_result(task, &err, Utc::now(), 0),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maestro_agent::{LlmClient, LlmProvider, ModelConfig};

    fn runner() -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::new(WorkflowCatalog::builtin().unwrap()),
            Arc::new(LlmClient::new(ModelConfig::new(LlmProvider::Echo))),
            RunnerConfig::default(),
        )
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_synchronous_error() {
        let err = runner().start("NOPE", Variables::new()).err().unwrap();
        assert!(matches!(err, MaestroError::UnknownWorkflow(t) if t == "NOPE"));
    }

    #[tokio::test]
    async fn test_echo_run_threads_outputs_downstream() {
        let run = runner()
            .execute("OSS_CONTRIBUTION", vars(&[("pattern_code", "fn rag() {}")]))
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(run.task_results.len(), 3);
        let pr = run.result("prepare-pr").unwrap();
        assert!(pr.output.contains("[documentation-agent]"));
        assert!(run.variables.contains_key("dependencies.validate-pattern"));
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle_order() {
        let handle = runner()
            .start("LEARNING_PATH", vars(&[
                ("topic", "RAG"),
                ("audience_level", "beginner"),
                ("duration_weeks", "4"),
            ]))
            .unwrap();
        let (events, run) = handle.collect().await;
        let run = run.unwrap();

        assert!(matches!(events.first(), Some(WorkflowEvent::Start { .. })));
        assert!(matches!(events.last(), Some(WorkflowEvent::Complete { success: true, .. })));
        let task_events = events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::Task { .. }))
            .count();
        assert_eq!(task_events, run.task_results.len());
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_metrics_recorded_before_complete() {
        let runner = runner();
        let mut handle = runner
            .start("OSS_CONTRIBUTION", vars(&[("pattern_code", "x")]))
            .unwrap();
        while let Some(event) = handle.next_event().await {
            if let WorkflowEvent::Complete { .. } = event {
                assert_eq!(runner.metrics().snapshot().total_workflows, 1);
            }
        }
    }
}
