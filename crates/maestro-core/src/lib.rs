//! Core types and error definitions for the Maestro workflow engine.
//!
//! This crate provides the foundational types shared across all Maestro crates.
//!
//! # Main types
//!
//! - [`MaestroError`]: Unified error enum for every Maestro subsystem.
//! - [`MaestroResult`]: Convenience alias for `Result<T, MaestroError>`.
//! - [`ErrorKind`]: Serializable failure category recorded on task results.

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the Maestro workflow engine.
///
/// Validation variants are raised before a run enters `Running` (or when a
/// workflow is registered) and are never retried. Task-level variants
/// (`MissingVariable`, `Completion`, `Timeout`, `Cancelled`) are captured into
/// the failing task's result instead of propagating to sibling tasks.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// A workflow was started without one of its required input variables.
    #[error("Missing required variable '{variable}' for workflow '{workflow}'")]
    MissingRequiredVariable {
        /// Workflow type that was requested.
        workflow: String,
        /// Name of the absent variable.
        variable: String,
    },

    /// No workflow is registered under the requested type.
    #[error("Workflow '{0}' not found")]
    UnknownWorkflow(String),

    /// A task references an agent that is not in the registry.
    #[error("Agent '{0}' not found")]
    UnknownAgent(String),

    /// A task depends on a task id that does not exist in the workflow.
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// Task declaring the dependency.
        task: String,
        /// The dangling task id.
        dependency: String,
    },

    /// The dependency graph contains a cycle; `tasks` lists every task left
    /// unscheduled when the cycle was detected.
    #[error("Dependency cycle detected among tasks: {}", tasks.join(", "))]
    CyclicDependency {
        /// Tasks that could not be placed in any wave.
        tasks: Vec<String>,
    },

    /// A task depends on a task declared after it.
    #[error("Task '{task}' depends on '{dependency}', which is declared after it")]
    ForwardDependency {
        /// Task declaring the dependency.
        task: String,
        /// The later-declared task id.
        dependency: String,
    },

    /// Two tasks in one workflow share an id.
    #[error("Duplicate task id '{0}'")]
    DuplicateTask(String),

    /// A workflow type was registered twice.
    #[error("Workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// An agent name was registered twice.
    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// Any other structural problem with a workflow definition.
    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow {
        /// Workflow type being validated.
        workflow: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// A prompt template referenced a variable that is not set.
    #[error("Prompt references unset variable '{0}'")]
    MissingVariable(String),

    /// The language-model call failed; carries the provider's reason.
    #[error("Completion error: {0}")]
    Completion(String),

    /// A per-task or per-workflow deadline was exceeded.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The caller cancelled the run.
    #[error("Cancelled")]
    Cancelled,

    /// An outbound HTTP request failed before a provider response was read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// Returns `true` for errors detected before a run starts executing.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MaestroError::MissingRequiredVariable { .. }
                | MaestroError::UnknownWorkflow(_)
                | MaestroError::UnknownAgent(_)
                | MaestroError::UnknownDependency { .. }
                | MaestroError::CyclicDependency { .. }
                | MaestroError::ForwardDependency { .. }
                | MaestroError::DuplicateTask(_)
                | MaestroError::DuplicateWorkflow(_)
                | MaestroError::DuplicateAgent(_)
                | MaestroError::InvalidWorkflow { .. }
        )
    }

    /// Category recorded on a failed task result.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaestroError::MissingVariable(_) => ErrorKind::MissingVariable,
            MaestroError::UnknownAgent(_) => ErrorKind::UnknownAgent,
            MaestroError::Timeout(_) => ErrorKind::Timeout,
            MaestroError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Completion,
        }
    }
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The prompt template referenced an unset variable.
    MissingVariable,
    /// The task's agent could not be resolved.
    UnknownAgent,
    /// The completion call failed.
    Completion,
    /// The per-task deadline elapsed.
    Timeout,
    /// The run was cancelled while the task was in flight.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MissingVariable => write!(f, "missing_variable"),
            ErrorKind::UnknownAgent => write!(f, "unknown_agent"),
            ErrorKind::Completion => write!(f, "completion"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}
