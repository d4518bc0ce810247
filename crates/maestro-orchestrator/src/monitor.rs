use crate::types::{RunState, WorkflowRun};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-agent counters accumulated across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub tasks_run: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_workflows: u64,
    succeeded_workflows: u64,
    total_tasks: u64,
    cumulative_duration_ms: u64,
    by_state: BTreeMap<RunState, u64>,
    agents: BTreeMap<String, AgentStats>,
}

/// Point-in-time view of [`WorkflowMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_workflows: u64,
    pub succeeded_workflows: u64,
    pub total_tasks: u64,
    pub cumulative_duration_ms: u64,
    /// Fraction in `[0, 1]`.
    pub success_rate: f64,
    /// `success_rate` as a percentage with two decimals, e.g. `"66.67%"`.
    pub success_rate_percentage: String,
    /// Mean run duration in seconds with two decimals, e.g. `"1.50"`.
    pub average_duration_seconds: String,
    pub average_tasks_per_workflow: f64,
    pub runs_by_state: BTreeMap<RunState, u64>,
    pub agents: BTreeMap<String, AgentStats>,
}

/// Process-wide run counters. Starts empty, only grows.
///
/// A single mutex guards every counter so a snapshot never observes a
/// half-recorded run.
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    counters: Mutex<Counters>,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished run into the counters.
    pub fn record(&self, run: &WorkflowRun) {
        let mut c = self.counters.lock();
        c.total_workflows += 1;
        if run.state == RunState::Succeeded {
            c.succeeded_workflows += 1;
        }
        c.total_tasks += run.task_results.len() as u64;
        c.cumulative_duration_ms += run.duration_ms();
        *c.by_state.entry(run.state).or_default() += 1;

        for result in &run.task_results {
            let stats = c.agents.entry(result.agent_name.clone()).or_default();
            stats.tasks_run += 1;
            stats.total_duration_ms += result.duration_ms;
            if !result.success {
                stats.failures += 1;
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.lock();
        let (success_rate, average_ms, average_tasks) = if c.total_workflows == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = c.total_workflows as f64;
            (
                c.succeeded_workflows as f64 / n,
                c.cumulative_duration_ms as f64 / n,
                c.total_tasks as f64 / n,
            )
        };

        MetricsSnapshot {
            total_workflows: c.total_workflows,
            succeeded_workflows: c.succeeded_workflows,
            total_tasks: c.total_tasks,
            cumulative_duration_ms: c.cumulative_duration_ms,
            success_rate,
            success_rate_percentage: format!("{:.2}%", success_rate * 100.0),
            average_duration_seconds: format!("{:.2}", average_ms / 1000.0),
            average_tasks_per_workflow: average_tasks,
            runs_by_state: c.by_state.clone(),
            agents: c.agents.clone(),
        }
    }

    /// Serialize the current snapshot as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}
