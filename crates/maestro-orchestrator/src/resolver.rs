use crate::types::TaskSpec;
use maestro_core::{MaestroError, MaestroResult};
use serde::Serialize;
use std::collections::HashMap;

/// Ordered waves of task ids. Tasks inside a wave are independent of each
/// other; every dependency of a task lives in an earlier wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Task ids per wave, in dispatch order.
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Number of waves a run walks through.
    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Total tasks across all waves.
    pub fn task_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Index of the wave containing `task_id`.
    pub fn wave_of(&self, task_id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|t| t == task_id))
    }
}

/// Topologically layer `tasks` into waves (Kahn's algorithm).
///
/// Each wave holds every task whose dependencies are all in earlier waves,
/// listed in declaration order. Fails on duplicate ids, on dependencies that
/// name no task, and on cycles (a task depending on itself included).
pub fn plan(tasks: &[TaskSpec]) -> MaestroResult<ExecutionPlan> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if index.insert(task.task_id.as_str(), i).is_some() {
            return Err(MaestroError::DuplicateTask(task.task_id.clone()));
        }
    }

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        let mut seen: Vec<usize> = Vec::with_capacity(task.depends_on.len());
        for dep in &task.depends_on {
            let &d = index
                .get(dep.as_str())
                .ok_or_else(|| MaestroError::UnknownDependency {
                    task: task.task_id.clone(),
                    dependency: dep.clone(),
                })?;
            // Repeated entries count once.
            if seen.contains(&d) {
                continue;
            }
            seen.push(d);
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next: Vec<usize> = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        placed += current.len();
        waves.push(current.iter().map(|&i| tasks[i].task_id.clone()).collect());
        next.sort_unstable();
        current = next;
    }

    if placed < tasks.len() {
        let stuck = tasks
            .iter()
            .enumerate()
            .filter(|&(i, _)| in_degree[i] > 0)
            .map(|(_, t)| t.task_id.clone())
            .collect();
        return Err(MaestroError::CyclicDependency { tasks: stuck });
    }

    Ok(ExecutionPlan { waves })
}
