use crate::library::builtin_workflows;
use crate::resolver::{self, ExecutionPlan};
use crate::template;
use crate::types::{WorkflowDefinition, WorkflowSummary};
use maestro_agent::{AgentDescriptor, AgentRegistry};
use maestro_core::{MaestroError, MaestroResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// A validated workflow together with the wave plan computed for it at
/// registration. The plan is reused by every run.
#[derive(Debug)]
pub struct RegisteredWorkflow {
    pub definition: WorkflowDefinition,
    pub plan: ExecutionPlan,
}

/// Static catalog of workflows and the agents they run on.
///
/// Every structural check happens in [`WorkflowCatalog::register`], so a
/// definition that made it into the catalog cannot fail validation at run
/// time.
#[derive(Debug)]
pub struct WorkflowCatalog {
    agents: AgentRegistry,
    workflows: Vec<Arc<RegisteredWorkflow>>,
    index: HashMap<String, usize>,
}

impl WorkflowCatalog {
    pub fn new(agents: AgentRegistry) -> Self {
        Self {
            agents,
            workflows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Built-in agents plus the built-in workflow library.
    pub fn builtin() -> MaestroResult<Self> {
        let mut catalog = Self::new(AgentRegistry::builtin());
        for definition in builtin_workflows() {
            catalog.register(definition)?;
        }
        Ok(catalog)
    }

    /// Validate `definition` and add it to the catalog.
    pub fn register(&mut self, mut definition: WorkflowDefinition) -> MaestroResult<()> {
        let workflow = definition.workflow_type.clone();
        if self.index.contains_key(&workflow) {
            return Err(MaestroError::DuplicateWorkflow(workflow));
        }
        if definition.tasks.is_empty() {
            return Err(MaestroError::InvalidWorkflow {
                workflow,
                reason: "workflow has no tasks".into(),
            });
        }

        for task in &definition.tasks {
            if !self.agents.contains(&task.agent_name) {
                return Err(MaestroError::UnknownAgent(task.agent_name.clone()));
            }
        }

        let plan = resolver::plan(&definition.tasks)?;
        check_declaration_order(&definition)?;
        check_variable_keys(&definition)?;
        check_output_references(&definition)?;

        if definition.required_variables.is_empty() {
            definition.required_variables = definition.derive_required_variables();
        }

        info!(
            workflow = %workflow,
            tasks = definition.tasks.len(),
            waves = plan.wave_count(),
            "Registered workflow"
        );

        self.index.insert(workflow, self.workflows.len());
        self.workflows
            .push(Arc::new(RegisteredWorkflow { definition, plan }));
        Ok(())
    }

    pub fn get(&self, workflow_type: &str) -> Option<Arc<RegisteredWorkflow>> {
        self.index
            .get(workflow_type)
            .map(|&i| Arc::clone(&self.workflows[i]))
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.index.contains_key(workflow_type)
    }

    /// Summaries in registration order.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        self.workflows
            .iter()
            .map(|w| w.definition.summary())
            .collect()
    }

    pub fn workflow_types(&self) -> Vec<String> {
        self.workflows
            .iter()
            .map(|w| w.definition.workflow_type.clone())
            .collect()
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn list_agents(&self) -> &[AgentDescriptor] {
        self.agents.list()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

/// Dependencies may only point at tasks declared earlier. Runs after the
/// resolver so that genuine cycles are reported as cycles.
fn check_declaration_order(definition: &WorkflowDefinition) -> MaestroResult<()> {
    let mut declared: HashSet<&str> = HashSet::new();
    for task in &definition.tasks {
        if let Some(dep) = task
            .depends_on
            .iter()
            .find(|dep| !declared.contains(dep.as_str()))
        {
            return Err(MaestroError::ForwardDependency {
                task: task.task_id.clone(),
                dependency: dep.clone(),
            });
        }
        declared.insert(task.task_id.as_str());
    }
    Ok(())
}

fn check_variable_keys(definition: &WorkflowDefinition) -> MaestroResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in &definition.tasks {
        if task.variable_key.is_empty() {
            return Err(MaestroError::InvalidWorkflow {
                workflow: definition.workflow_type.clone(),
                reason: format!("task '{}' has an empty variable key", task.task_id),
            });
        }
        if !seen.insert(task.variable_key.as_str()) {
            return Err(MaestroError::InvalidWorkflow {
                workflow: definition.workflow_type.clone(),
                reason: format!(
                    "variable key '{}' is written by more than one task",
                    task.variable_key
                ),
            });
        }
    }
    Ok(())
}

/// A placeholder naming another task's output key must name a task in the
/// reader's upstream closure, otherwise the value would not exist yet when
/// the prompt is rendered.
fn check_output_references(definition: &WorkflowDefinition) -> MaestroResult<()> {
    let producers: HashMap<&str, &str> = definition
        .tasks
        .iter()
        .map(|task| (task.variable_key.as_str(), task.task_id.as_str()))
        .collect();

    // Dependencies are declared before their dependents, so one pass in
    // declaration order sees every ancestor set it needs.
    let mut upstream: HashMap<&str, HashSet<&str>> = HashMap::new();
    for task in &definition.tasks {
        let mut ancestors = HashSet::new();
        for dep in &task.depends_on {
            ancestors.insert(dep.as_str());
            if let Some(transitive) = upstream.get(dep.as_str()) {
                ancestors.extend(transitive.iter().copied());
            }
        }

        for key in template::placeholders(&task.prompt_template) {
            let Some(&producer) = producers.get(key.as_str()) else {
                continue;
            };
            if !ancestors.contains(producer) {
                return Err(MaestroError::InvalidWorkflow {
                    workflow: definition.workflow_type.clone(),
                    reason: format!(
                        "task '{}' reads '{key}' from task '{producer}' without depending on it",
                        task.task_id
                    ),
                });
            }
        }

        upstream.insert(task.task_id.as_str(), ancestors);
    }
    Ok(())
}
