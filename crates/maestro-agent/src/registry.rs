use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model tier an agent is tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentProvider {
    #[serde(rename = "claude-3-5-sonnet")]
    ClaudeSonnet,
    #[serde(rename = "claude-3-5-haiku")]
    ClaudeHaiku,
    #[serde(rename = "claude-3-opus")]
    ClaudeOpus,
}

impl AgentProvider {
    /// Anthropic model alias for this tier.
    pub fn model_id(&self) -> &'static str {
        match self {
            AgentProvider::ClaudeSonnet => "claude-3-5-sonnet-latest",
            AgentProvider::ClaudeHaiku => "claude-3-5-haiku-latest",
            AgentProvider::ClaudeOpus => "claude-3-opus-latest",
        }
    }
}

impl std::fmt::Display for AgentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentProvider::ClaudeSonnet => write!(f, "claude-3-5-sonnet"),
            AgentProvider::ClaudeHaiku => write!(f, "claude-3-5-haiku"),
            AgentProvider::ClaudeOpus => write!(f, "claude-3-opus"),
        }
    }
}

/// Immutable capability descriptor for a named agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub name: String,
    pub provider: AgentProvider,
    pub has_tools: bool,
    pub tool_count: u32,
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl AgentDescriptor {
    pub fn new(
        name: impl Into<String>,
        provider: AgentProvider,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            has_tools: false,
            tool_count: 0,
            description: description.into(),
            system_prompt: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_tools(mut self, tool_count: u32) -> Self {
        self.tool_count = tool_count;
        self.has_tools = tool_count > 0;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// Read-only catalog of agents, keyed by name.
///
/// Populated once at process start; lookups preserve registration order.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with [`builtin_agents`].
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for agent in builtin_agents() {
            // Built-in names are unique.
            let _ = registry.register(agent);
        }
        registry
    }

    pub fn register(&mut self, agent: AgentDescriptor) -> MaestroResult<()> {
        if self.index.contains_key(&agent.name) {
            return Err(MaestroError::DuplicateAgent(agent.name));
        }
        self.index.insert(agent.name.clone(), self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.index.get(name).map(|&i| &self.agents[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn list(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn by_provider(&self, provider: AgentProvider) -> Vec<&AgentDescriptor> {
        self.agents.iter().filter(|a| a.provider == provider).collect()
    }

    pub fn with_tools(&self) -> Vec<&AgentDescriptor> {
        self.agents.iter().filter(|a| a.has_tools).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// The academy's standard agent library.
pub fn builtin_agents() -> Vec<AgentDescriptor> {
    use AgentProvider::{ClaudeHaiku, ClaudeOpus, ClaudeSonnet};

    vec![
        AgentDescriptor::new(
            "pattern-builder",
            ClaudeSonnet,
            "Builds production-ready AI pattern implementations",
        )
        .with_tools(2)
        .with_sampling(0.7, 8192)
        .with_system_prompt("You are an expert AI architect who builds production-ready AI patterns."),
        AgentDescriptor::new(
            "qa-agent",
            ClaudeSonnet,
            "Reviews AI systems for bugs, security issues and compliance",
        )
        .with_tools(2)
        .with_sampling(0.3, 4096)
        .with_system_prompt("You are a meticulous quality assurance specialist for AI systems."),
        AgentDescriptor::new(
            "documentation-agent",
            ClaudeHaiku,
            "Writes tutorials, guides and reference documentation",
        )
        .with_tools(1)
        .with_sampling(0.5, 4096)
        .with_system_prompt("You are a technical writer specializing in AI/ML documentation."),
        AgentDescriptor::new(
            "architecture-reviewer",
            ClaudeSonnet,
            "Conducts architecture reviews of AI systems",
        )
        .with_tools(2)
        .with_sampling(0.4, 8192)
        .with_system_prompt("You are a senior AI architect conducting architecture reviews."),
        AgentDescriptor::new(
            "learning-assistant",
            ClaudeHaiku,
            "Guides students through personalized learning paths",
        )
        .with_sampling(0.7, 4096)
        .with_system_prompt("You are an AI learning assistant for the AI Architect Academy."),
        AgentDescriptor::new(
            "pattern-optimizer",
            ClaudeSonnet,
            "Optimizes patterns for latency, cost and reliability",
        )
        .with_tools(2)
        .with_sampling(0.5, 8192)
        .with_system_prompt("You optimize AI patterns for performance, cost and scalability."),
        AgentDescriptor::new(
            "github-integration",
            ClaudeSonnet,
            "Prepares open-source contributions and pull requests",
        )
        .with_sampling(0.6, 4096)
        .with_system_prompt("You prepare high-quality GitHub contributions and pull requests."),
        AgentDescriptor::new(
            "compliance-checker",
            ClaudeSonnet,
            "Checks patterns against GDPR, HIPAA, SOC 2 and the EU AI Act",
        )
        .with_sampling(0.2, 4096)
        .with_system_prompt("You are a compliance specialist for AI systems."),
        AgentDescriptor::new(
            "agi-researcher",
            ClaudeOpus,
            "Analyzes AGI architectures and capability trajectories",
        )
        .with_tools(2)
        .with_sampling(0.6, 16384)
        .with_system_prompt("You are an AGI research scientist with rigorous scientific standards."),
        AgentDescriptor::new(
            "alignment-checker",
            ClaudeOpus,
            "Evaluates alignment properties and value-learning risks",
        )
        .with_tools(2)
        .with_sampling(0.3, 12288)
        .with_system_prompt("You evaluate the alignment properties of advanced AI systems."),
        AgentDescriptor::new(
            "world-model-builder",
            ClaudeSonnet,
            "Constructs causal world models for complex domains",
        )
        .with_tools(2)
        .with_sampling(0.5, 12288)
        .with_system_prompt("You construct structured world models and causal maps."),
        AgentDescriptor::new(
            "safety-auditor",
            ClaudeOpus,
            "Audits AI systems for safety, robustness and governance gaps",
        )
        .with_tools(3)
        .with_sampling(0.2, 16384)
        .with_system_prompt("You conduct conservative safety audits of AI systems."),
    ]
}
