use crate::failover::RetryPolicy;
use crate::registry::AgentDescriptor;
use serde::{Deserialize, Serialize};

/// Which completion backend serves every agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Claude,
    OpenAi,
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// Offline backend that answers with the rendered prompt. No API key needed.
    Echo,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Claude => write!(f, "claude"),
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::OpenRouter => write!(f, "openrouter"),
            LlmProvider::Groq => write!(f, "groq"),
            LlmProvider::Echo => write!(f, "echo"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    /// Forces one model for every agent. When unset, Claude uses the agent's
    /// provider tier and OpenAI-compatible providers use their default model.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Overrides each agent's own temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Caps each agent's own max-token budget.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Claude,
            model_id: None,
            api_key: String::new(),
            api_base_url: None,
            temperature: None,
            max_tokens: None,
            fallback_models: Vec::new(),
            retry_policy: None,
        }
    }
}

impl ModelConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Echo => "local://echo",
            }
        }
    }

    /// Model id sent to the provider for `agent`.
    pub fn resolve_model(&self, agent: &AgentDescriptor) -> String {
        if let Some(model) = &self.model_id {
            return model.clone();
        }
        match self.provider {
            LlmProvider::Claude => agent.provider.model_id().to_string(),
            LlmProvider::OpenAi => "gpt-4o-mini".to_string(),
            LlmProvider::OpenRouter => format!("anthropic/{}", agent.provider),
            LlmProvider::Groq => "llama-3.3-70b-versatile".to_string(),
            LlmProvider::Echo => "echo".to_string(),
        }
    }

    pub fn resolve_temperature(&self, agent: &AgentDescriptor) -> f32 {
        self.temperature.unwrap_or(agent.temperature)
    }

    pub fn resolve_max_tokens(&self, agent: &AgentDescriptor) -> u32 {
        match self.max_tokens {
            Some(cap) => cap.min(agent.max_tokens),
            None => agent.max_tokens,
        }
    }

    /// Conventional environment variable holding this provider's API key.
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self.provider {
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::OpenRouter => Some("OPENROUTER_API_KEY"),
            LlmProvider::Groq => Some("GROQ_API_KEY"),
            LlmProvider::Echo => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.provider != LlmProvider::Echo
    }
}
