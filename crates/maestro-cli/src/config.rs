use anyhow::{bail, Context};
use maestro_agent::{LlmProvider, ModelConfig};
use maestro_orchestrator::{RunnerConfig, WorkflowCatalog, WorkflowDefinition};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Contents of `maestro.toml`.
#[derive(Debug, Deserialize)]
pub struct MaestroConfig {
    #[serde(default = "default_model")]
    pub model: ModelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Registered after the built-in library, with the same validation.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            server: ServerConfig::default(),
            runner: RunnerSettings::default(),
            workflows: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keys accepted on `/api`. Empty leaves the API open.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunnerSettings {
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,
    #[serde(default)]
    pub stream_completions: bool,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            stream_completions: false,
            event_buffer: default_event_buffer(),
        }
    }
}

impl RunnerSettings {
    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            workflow_timeout: Duration::from_secs(self.workflow_timeout_secs),
            stream_completions: self.stream_completions,
            event_buffer: self.event_buffer,
        }
    }
}

fn default_model() -> ModelConfig {
    ModelConfig::new(LlmProvider::Echo)
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_task_timeout_secs() -> u64 {
    120
}
fn default_workflow_timeout_secs() -> u64 {
    900
}
fn default_event_buffer() -> usize {
    64
}

impl MaestroConfig {
    /// Read and parse `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config file '{}'", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file '{}'", path.display())),
        }
    }

    /// Fill empty API keys from `MAESTRO_API_KEY`, then the provider's own
    /// variable. Fallback models are filled the same way.
    pub fn resolve_api_keys<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fill_api_key(&mut self.model, &env);
    }

    /// Fail early when a remote provider has no key.
    pub fn check_credentials(&self) -> anyhow::Result<()> {
        check_model(&self.model)?;
        for fallback in &self.model.fallback_models {
            check_model(fallback)?;
        }
        Ok(())
    }

    /// Built-in workflows plus the ones declared in the file.
    pub fn catalog(&self) -> anyhow::Result<WorkflowCatalog> {
        let mut catalog = WorkflowCatalog::builtin()?;
        for workflow in &self.workflows {
            let workflow_type = workflow.workflow_type.clone();
            catalog
                .register(workflow.clone())
                .with_context(|| format!("Invalid workflow '{workflow_type}' in config"))?;
        }
        if !self.workflows.is_empty() {
            info!(count = self.workflows.len(), "Workflows loaded from config");
        }
        Ok(catalog)
    }
}

fn fill_api_key<F>(model: &mut ModelConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if model.api_key.is_empty() && model.requires_api_key() {
        let key = env("MAESTRO_API_KEY")
            .filter(|k| !k.is_empty())
            .or_else(|| model.api_key_env_var().and_then(env))
            .filter(|k| !k.is_empty());
        if let Some(key) = key {
            model.api_key = key;
        }
    }
    for fallback in &mut model.fallback_models {
        fill_api_key(fallback, env);
    }
}

fn check_model(model: &ModelConfig) -> anyhow::Result<()> {
    if model.requires_api_key() && model.api_key.is_empty() {
        let hint = model.api_key_env_var().unwrap_or("MAESTRO_API_KEY");
        bail!(
            "No API key for provider '{}': set model.api_key, MAESTRO_API_KEY or {hint}",
            model.provider
        );
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: MaestroConfig = toml::from_str("").unwrap();
        assert_eq!(config.model.provider, LlmProvider::Echo);
        assert_eq!(config.server.port, 3000);
        let runner = config.runner.to_runner_config();
        assert_eq!(runner.task_timeout, Duration::from_secs(120));
        assert_eq!(runner.workflow_timeout, Duration::from_secs(900));
        assert!(config.check_credentials().is_ok());
    }

    #[test]
    fn test_full_file() {
        let raw = r#"
            [model]
            provider = "claude"
            temperature = 0.2

            [model.retry_policy]
            max_retries = 2

            [[model.fallback_models]]
            provider = "groq"

            [server]
            host = "127.0.0.1"
            port = 8080
            api_keys = ["k1"]

            [runner]
            task_timeout_secs = 30
            stream_completions = true

            [[workflows]]
            type = "QUICK_REVIEW"
            name = "Quick review"

            [[workflows.tasks]]
            taskId = "review"
            agentName = "qa-agent"
            promptTemplate = "Review {{code}}"
            variableKey = "review"
        "#;
        let config: MaestroConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.model.provider, LlmProvider::Claude);
        assert_eq!(config.model.retry_policy.as_ref().unwrap().max_retries, 2);
        assert_eq!(config.model.fallback_models[0].provider, LlmProvider::Groq);
        assert_eq!(config.server.api_keys, vec!["k1"]);
        assert_eq!(config.runner.workflow_timeout_secs, 900);
        assert!(config.runner.to_runner_config().stream_completions);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 8);
        let quick = catalog.get("QUICK_REVIEW").unwrap();
        assert_eq!(
            quick.definition.required_variables.iter().collect::<Vec<_>>(),
            vec!["code"]
        );
    }

    #[test]
    fn test_invalid_config_workflow_is_rejected() {
        let raw = r#"
            [[workflows]]
            type = "BROKEN"
            name = "Broken"

            [[workflows.tasks]]
            taskId = "a"
            agentName = "nobody"
            promptTemplate = "x"
            variableKey = "a"
        "#;
        let config: MaestroConfig = toml::from_str(raw).unwrap();
        let err = config.catalog().unwrap_err();
        assert!(format!("{err:#}").contains("nobody"));
    }

    #[test]
    fn test_api_key_resolution_order() {
        let mut config = MaestroConfig {
            model: ModelConfig::new(LlmProvider::OpenAi),
            ..MaestroConfig::default()
        };
        assert!(config.check_credentials().is_err());

        config.resolve_api_keys(env_from(&[("OPENAI_API_KEY", "sk-openai")]));
        assert_eq!(config.model.api_key, "sk-openai");

        let mut config = MaestroConfig {
            model: ModelConfig::new(LlmProvider::Claude),
            ..MaestroConfig::default()
        };
        config.resolve_api_keys(env_from(&[
            ("MAESTRO_API_KEY", "shared"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]));
        assert_eq!(config.model.api_key, "shared");
        assert!(config.check_credentials().is_ok());
    }

    #[test]
    fn test_explicit_key_not_overwritten() {
        let mut model = ModelConfig::new(LlmProvider::Groq);
        model.api_key = "from-file".into();
        let mut config = MaestroConfig {
            model,
            ..MaestroConfig::default()
        };
        config.resolve_api_keys(env_from(&[("GROQ_API_KEY", "from-env")]));
        assert_eq!(config.model.api_key, "from-file");
    }

    #[tokio::test]
    async fn test_load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = MaestroConfig::load(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.model.provider, LlmProvider::Echo);
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maestro.toml");
        std::fs::write(&path, "[server]\nport = \"not a number\"\n").unwrap();
        let err = MaestroConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
