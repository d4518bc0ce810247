use chrono::{DateTime, Utc};
use maestro_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Per-run key/value store seeding prompts and collecting task outputs.
pub type Variables = BTreeMap<String, String>;

/// One agent task inside a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Unique within the workflow.
    pub task_id: String,
    pub agent_name: String,
    pub prompt_template: String,
    /// Upstream task ids. Must reference tasks declared earlier.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Where this task's output lands in the variable bag.
    pub variable_key: String,
}

impl TaskSpec {
    /// A task with no dependencies whose output is stored under its own id.
    pub fn new(
        task_id: impl Into<String>,
        agent_name: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            variable_key: task_id.clone(),
            task_id,
            agent_name: agent_name.into(),
            prompt_template: prompt_template.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_variable_key(mut self, key: impl Into<String>) -> Self {
        self.variable_key = key.into();
        self
    }
}

/// A named, statically defined graph of agent tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<TaskSpec>,
    /// Inputs a caller must supply. Derived from the templates at
    /// registration when left empty.
    #[serde(default)]
    pub required_variables: BTreeSet<String>,
}

impl WorkflowDefinition {
    pub fn new(
        workflow_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        tasks: Vec<TaskSpec>,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            name: name.into(),
            description: description.into(),
            tasks,
            required_variables: BTreeSet::new(),
        }
    }

    pub fn with_required_variables<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_variables = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Every placeholder referenced by a task template, minus the keys the
    /// workflow's own tasks produce.
    pub fn derive_required_variables(&self) -> BTreeSet<String> {
        let produced: BTreeSet<&str> = self
            .tasks
            .iter()
            .map(|t| t.variable_key.as_str())
            .collect();
        self.tasks
            .iter()
            .flat_map(|t| crate::template::placeholders(&t.prompt_template))
            .filter(|name| !produced.contains(name.as_str()))
            .collect()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            workflow_type: self.workflow_type.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            task_count: self.tasks.len(),
            required_variables: self.required_variables.iter().cloned().collect(),
        }
    }
}

/// Listing entry returned by workflow introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub name: String,
    pub description: String,
    pub task_count: usize,
    pub required_variables: Vec<String>,
}

/// Outcome of one task in one run. Written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub agent_name: String,
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Lifecycle of a run. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::TimedOut | RunState::Cancelled
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
            RunState::TimedOut => write!(f, "timed_out"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One invocation of a workflow. Owns its variable bag exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub workflow_type: String,
    pub workflow_name: String,
    pub variables: Variables,
    /// In completion order.
    pub task_results: Vec<TaskResult>,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(definition: &WorkflowDefinition, variables: Variables) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow_type: definition.workflow_type.clone(),
            workflow_name: definition.name.clone(),
            variables,
            task_results: Vec::new(),
            state: RunState::Pending,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.task_results.iter().find(|r| r.task_id == task_id)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.task_results.iter().filter(|r| !r.success)
    }

    /// Wall-clock duration; zero until the run has ended.
    pub fn duration_ms(&self) -> u64 {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Progress event emitted while a run executes.
///
/// A run that starts emits `start`, one `task` per finished task, then
/// exactly one `complete`. A run rejected before starting emits a single
/// `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    Start {
        run_id: Uuid,
        workflow_type: String,
        timestamp: DateTime<Utc>,
    },
    Task {
        task_id: String,
        agent_name: String,
        success: bool,
        duration_ms: u64,
    },
    Complete {
        run_id: Uuid,
        workflow_name: String,
        results: Vec<TaskResult>,
        total_duration_ms: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        state: RunState,
        success: bool,
    },
    Error {
        message: String,
    },
}

impl WorkflowEvent {
    pub(crate) fn task(result: &TaskResult) -> Self {
        WorkflowEvent::Task {
            task_id: result.task_id.clone(),
            agent_name: result.agent_name.clone(),
            success: result.success,
            duration_ms: result.duration_ms,
        }
    }

    pub(crate) fn complete(run: &WorkflowRun) -> Self {
        let end_time = run.end_time.unwrap_or_else(Utc::now);
        WorkflowEvent::Complete {
            run_id: run.run_id,
            workflow_name: run.workflow_name.clone(),
            results: run.task_results.clone(),
            total_duration_ms: run.duration_ms(),
            start_time: run.start_time,
            end_time,
            state: run.state,
            success: run.state == RunState::Succeeded,
        }
    }

    /// `complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::Complete { .. } | WorkflowEvent::Error { .. }
        )
    }
}
