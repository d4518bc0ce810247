//! Workflow engine for Maestro: dependency resolution, wave execution, and
//! run metrics.
//!
//! A workflow is a static graph of agent tasks. At registration the
//! [`WorkflowCatalog`] validates each definition and caches its wave plan;
//! at run time the [`WorkflowRunner`] executes the waves in order, running
//! every task of a wave concurrently and threading outputs into later
//! prompts through the run's variable bag.
//!
//! # Main types
//!
//! - [`WorkflowRunner`]: Starts runs and streams their [`WorkflowEvent`]s.
//! - [`WorkflowCatalog`]: Registered workflows and the agents they use.
//! - [`ExecutionPlan`]: Topological waves computed by [`resolver::plan`].
//! - [`WorkflowMetrics`]: Process-wide success and duration counters.
//! - [`AgentCall`]: A single agent invoked directly, blocking or streamed.

/// Workflow registration and lookup.
pub mod catalog;
/// One-off agent calls outside any workflow.
pub mod direct;
/// Run driver and caller-facing run handles.
pub mod engine;
/// Single-task execution with timeout and cancellation.
pub mod executor;
/// Built-in workflow definitions.
pub mod library;
/// Aggregate run metrics.
pub mod monitor;
/// Dependency graph layering.
pub mod resolver;
/// `{{name}}` prompt substitution.
pub mod template;
/// Definitions, runs, results, and events.
pub mod types;

pub use catalog::{RegisteredWorkflow, WorkflowCatalog};
pub use direct::{AgentCall, AgentEvent, AgentOutcome};
pub use engine::{RunHandle, RunnerConfig, WorkflowRunner};
pub use executor::TaskExecutor;
pub use library::builtin_workflows;
pub use monitor::{AgentStats, MetricsSnapshot, WorkflowMetrics};
pub use resolver::ExecutionPlan;
pub use types::{
    RunState, TaskResult, TaskSpec, Variables, WorkflowDefinition, WorkflowEvent, WorkflowRun,
    WorkflowSummary,
};
