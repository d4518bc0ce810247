mod config;

use crate::config::MaestroConfig;
use clap::{Parser, Subcommand};
use maestro_agent::LlmClient;
use maestro_gateway::{AuthConfig, GatewayServer};
use maestro_orchestrator::{
    AgentCall, AgentEvent, RunState, Variables, WorkflowEvent, WorkflowRunner,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "maestro",
    version,
    about = "Maestro: multi-agent workflow orchestration"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one workflow and print its events
    Run {
        /// Workflow type, e.g. OSS_CONTRIBUTION
        workflow_type: String,
        /// Input variable as key=value; repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Print each event as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Inspect registered workflows
    Workflows {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Inspect or call registered agents
    Agents {
        #[command(subcommand)]
        action: AgentAction,
    },
}

#[derive(Subcommand)]
enum ListAction {
    /// List everything registered
    List,
}

#[derive(Subcommand)]
enum AgentAction {
    /// List registered agents
    List,
    /// Call one agent directly
    Run {
        /// Agent name, e.g. qa-agent
        agent_name: String,
        /// Task for the agent
        prompt: String,
        /// JSON object shown to the agent ahead of the prompt
        #[arg(long, value_parser = parse_context)]
        context: Option<serde_json::Value>,
        /// Print text as it streams in
        #[arg(long)]
        stream: bool,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_context(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON context: {e}"))
}

fn init_logging(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn build_runner(config: &MaestroConfig) -> anyhow::Result<WorkflowRunner> {
    let catalog = Arc::new(config.catalog()?);
    let client = Arc::new(LlmClient::new(config.model.clone()));
    info!(
        provider = %config.model.provider,
        workflows = catalog.len(),
        agents = catalog.list_agents().len(),
        "Runner ready"
    );
    Ok(WorkflowRunner::new(
        catalog,
        client,
        config.runner.to_runner_config(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.pretty);

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env");
        }
    }

    let mut config = MaestroConfig::load(&cli.config).await?;
    config.resolve_api_keys(|name| std::env::var(name).ok());

    match cli.command {
        Commands::Serve { host, port } => {
            config.check_credentials()?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let auth = AuthConfig::new(config.server.api_keys.clone());
            if auth.is_enabled() {
                info!(keys = auth.api_keys.len(), "API key auth enabled");
            }

            let runner = Arc::new(build_runner(&config)?);
            let app = GatewayServer::build_with_auth(runner, auth);

            let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
            GatewayServer::serve(listener, app, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            workflow_type,
            vars,
            json,
        } => {
            config.check_credentials()?;
            let runner = build_runner(&config)?;
            let succeeded =
                run_workflow(&runner, &workflow_type, vars.into_iter().collect(), json).await?;
            Ok(if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Workflows {
            action: ListAction::List,
        } => {
            let catalog = config.catalog()?;
            println!("Registered workflows:");
            for workflow in catalog.list() {
                println!(
                    "  {} ({}): {} task(s)",
                    workflow.workflow_type, workflow.name, workflow.task_count
                );
                if !workflow.description.is_empty() {
                    println!("    {}", workflow.description);
                }
                println!("    requires: {}", workflow.required_variables.join(", "));
            }
            println!("\nTotal: {} workflow(s)", catalog.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Agents {
            action:
                AgentAction::Run {
                    agent_name,
                    prompt,
                    context,
                    stream,
                },
        } => {
            config.check_credentials()?;
            let runner = build_runner(&config)?;
            let call = AgentCall {
                agent_name,
                prompt,
                context,
            };
            let succeeded = run_agent(&runner, call, stream).await?;
            Ok(if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Agents {
            action: AgentAction::List,
        } => {
            let catalog = config.catalog()?;
            println!("Registered agents:");
            for agent in catalog.list_agents() {
                println!("  {} [{}]: {}", agent.name, agent.provider, agent.description);
                if agent.has_tools {
                    println!("    tools: {}", agent.tool_count);
                }
            }
            println!("\nTotal: {} agent(s)", catalog.list_agents().len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Stream a run to stdout and report whether it succeeded. Ctrl-C cancels
/// the run.
async fn run_workflow(
    runner: &WorkflowRunner,
    workflow_type: &str,
    variables: Variables,
    json: bool,
) -> anyhow::Result<bool> {
    let mut handle = runner.start(workflow_type, variables)?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }

    match handle.wait().await {
        Ok(run) => Ok(run.state == RunState::Succeeded),
        Err(e) => {
            if !json {
                eprintln!("Run rejected: {e}");
            }
            Ok(false)
        }
    }
}

/// Call one agent and print its output. Reports whether the call succeeded.
async fn run_agent(
    runner: &WorkflowRunner,
    call: AgentCall,
    stream: bool,
) -> anyhow::Result<bool> {
    let outcome = if stream {
        let mut events = runner.stream_agent(call)?;
        let mut outcome = None;
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Start { .. } => {}
                AgentEvent::Content { text } => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                AgentEvent::End { outcome: end } => {
                    println!();
                    outcome = Some(end);
                }
            }
        }
        outcome.ok_or_else(|| anyhow::anyhow!("agent stream ended without an outcome"))?
    } else {
        let outcome = runner.run_agent(&call).await?;
        if outcome.result.success {
            println!("{}", outcome.result.output);
        }
        outcome
    };

    if let Some(error) = &outcome.result.error {
        eprintln!("Agent call failed: {error}");
    }
    Ok(outcome.result.success)
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::Start {
            run_id,
            workflow_type,
            ..
        } => println!("Started {workflow_type} (run {run_id})"),
        WorkflowEvent::Task {
            task_id,
            agent_name,
            success,
            duration_ms,
        } => {
            let status = if *success { "ok" } else { "FAILED" };
            println!("  [{status}] {task_id} ({agent_name}) {duration_ms}ms");
        }
        WorkflowEvent::Complete {
            workflow_name,
            results,
            total_duration_ms,
            state,
            ..
        } => {
            println!("\n{workflow_name} finished: {state} in {total_duration_ms}ms");
            for result in results {
                println!("\n--- {} ---", result.task_id);
                match &result.error {
                    Some(error) => println!("error: {error}"),
                    None => println!("{}", result.output),
                }
            }
        }
        WorkflowEvent::Error { message } => println!("error: {message}"),
    }
}
