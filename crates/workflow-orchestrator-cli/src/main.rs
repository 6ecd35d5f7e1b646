// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Workflow Orchestrator CLI: validate a workflow definition, run it
//! synchronously against real or mock agent clients, or serve the HTTP/SSE
//! surface (§6) for remote callers.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workflow_orchestrator_core::approval::ApprovalStore;
use workflow_orchestrator_core::checkpoint::{Checkpointer, InMemoryCheckpointer};
use workflow_orchestrator_core::dag::WorkflowGraph;
use workflow_orchestrator_core::event::{EventBus, LocalEventBus};
use workflow_orchestrator_core::orchestrator::Orchestrator;
use workflow_orchestrator_core::providers::AgentClient;
use workflow_orchestrator_core::registry::{InMemoryWorkflowRegistry, Monitor, WorkflowRegistry};
use workflow_orchestrator_core::workflow::{validate_steps, InvokeOptions, InvokeRequest, WorkflowStep};
use workflow_orchestrator_core::OrchestratorConfig;
use workflow_orchestrator_providers::{AnthropicProvider, MockAgentClient, OpenAIProvider};

#[derive(Parser)]
#[command(name = "workflow-orchestrator")]
#[command(version, about = "Multi-step agent workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition: parses steps, checks invariants
    /// (§3), and compiles the DAG to catch cycles (§4.7).
    Validate {
        /// Path to a JSON or YAML workflow file (a step or an array of steps).
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a workflow synchronously against a real or mock agent client
    /// and print the `InvokeResponse` (§6).
    Run {
        /// Path to a JSON or YAML workflow file.
        #[arg(value_name = "FILE")]
        file: String,

        /// Resume an existing thread instead of starting a new one.
        #[arg(long)]
        thread_id: Option<String>,

        /// Namespace the run under a project id (§1).
        #[arg(long)]
        project_id: Option<String>,

        /// Force the Mock executor cluster-wide, overriding `USE_MOCK_AI`.
        #[arg(long)]
        mock: bool,
    },

    /// Serve the HTTP/SSE/WebSocket surface (§6) on the given address.
    Serve {
        /// Bind host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Use the durable SQLx-backed checkpointer instead of the
        /// in-process default. Accepts `sqlite://...` or `postgres://...`.
        #[arg(long)]
        checkpoint_db: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("workflow_orchestrator={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Run {
            file,
            thread_id,
            project_id,
            mock,
        } => run_workflow(&file, thread_id, project_id, mock).await,
        Commands::Serve {
            host,
            port,
            checkpoint_db,
        } => serve(&host, port, checkpoint_db.as_deref()).await,
    };

    if let Err(err) = result {
        error!("{err:#}");
        eprintln!("{} {err:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}

/// Reads a workflow file as JSON or YAML into a step list. A single step
/// object, an array of steps, and either shape re-encoded as YAML are all
/// accepted, mirroring `InvokeRequest.workflow`'s leniency over HTTP (§6).
fn read_steps(file_path: &str) -> Result<Vec<WorkflowStep>> {
    let content =
        fs::read_to_string(file_path).with_context(|| format!("failed to read workflow file: {file_path}"))?;

    let steps: Vec<WorkflowStep> = if let Ok(single) = serde_json::from_str::<WorkflowStep>(&content) {
        vec![single]
    } else if let Ok(many) = serde_json::from_str::<Vec<WorkflowStep>>(&content) {
        many
    } else {
        serde_yaml::from_str::<Vec<WorkflowStep>>(&content)
            .with_context(|| format!("failed to parse workflow file as JSON or YAML: {file_path}"))?
    };
    Ok(steps)
}

fn validate_workflow(file_path: &str) -> Result<()> {
    println!("{} {}", "Validating workflow:".cyan().bold(), file_path);

    let steps = read_steps(file_path)?;
    validate_steps(&steps).with_context(|| "workflow validation failed")?;
    let graph = WorkflowGraph::build(steps.clone()).with_context(|| "failed to compile workflow DAG")?;

    println!("{}", "Workflow is valid".green().bold());
    println!("  Steps: {}", steps.len());
    println!("  Graph nodes: {}", graph.len());
    Ok(())
}

/// Assembles an `AgentClient` from the environment: `USE_MOCK_AI`/`--mock`
/// force the deterministic mock; otherwise an Anthropic client is
/// preferred (honoring `CLAUDE_STUDIO_API` as a base URL override), then
/// OpenAI, with a final fallback to mock so the CLI is usable with no
/// provider credentials configured at all (§6).
fn build_agent_client(config: &OrchestratorConfig, force_mock: bool) -> Arc<dyn AgentClient> {
    if force_mock || config.use_mock_ai {
        info!("using mock agent client");
        return Arc::new(MockAgentClient::new());
    }

    if let Ok(anthropic) = AnthropicProvider::from_env() {
        info!("using Anthropic agent client");
        let anthropic = match &config.claude_studio_api {
            Some(base_url) => AnthropicProvider::with_base_url(
                std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                base_url.clone(),
                "2023-06-01".to_string(),
            ),
            None => anthropic,
        };
        return Arc::new(anthropic);
    }

    if let Ok(openai) = OpenAIProvider::from_env() {
        info!("using OpenAI agent client");
        return Arc::new(openai);
    }

    info!("no provider credentials found (ANTHROPIC_API_KEY/OPENAI_API_KEY unset); falling back to mock");
    Arc::new(MockAgentClient::new())
}

async fn run_workflow(file_path: &str, thread_id: Option<String>, project_id: Option<String>, mock: bool) -> Result<()> {
    println!("{} {}", "Running workflow:".cyan().bold(), file_path);

    let steps = read_steps(file_path)?;
    let config = OrchestratorConfig::from_env();
    let agent_client = build_agent_client(&config, mock);
    let status_client = agent_client.clone();

    let approvals = Arc::new(ApprovalStore::new());
    let checkpointer: Arc<dyn Checkpointer> = Arc::new(InMemoryCheckpointer::new());
    let events: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
    let registry: Arc<dyn WorkflowRegistry> = Arc::new(InMemoryWorkflowRegistry::new());

    let orchestrator = Orchestrator::bootstrap(agent_client, status_client, approvals, checkpointer, events, registry);

    let request = InvokeRequest {
        workflow: steps,
        options: InvokeOptions {
            thread_id,
            start_new_conversation: false,
            project_id,
            saved_workflow_id: None,
        },
        format: Default::default(),
    };

    let response = orchestrator.invoke(request).await.with_context(|| "workflow execution failed")?;

    println!("{}", "Workflow finished".green().bold());
    println!("  Thread: {}", response.thread_id);
    println!("  Status: {:?}", response.status);
    println!("\n{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

async fn serve(host: &str, port: u16, checkpoint_db: Option<&str>) -> Result<()> {
    let config = OrchestratorConfig::from_env();
    let agent_client = build_agent_client(&config, false);
    let status_client = agent_client.clone();

    let approvals = Arc::new(ApprovalStore::new());
    let events: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
    let registry: Arc<dyn WorkflowRegistry> = Arc::new(InMemoryWorkflowRegistry::new());

    let checkpointer: Arc<dyn Checkpointer> = match checkpoint_db {
        Some(url) => {
            #[cfg(feature = "state-persistence")]
            {
                let sql = workflow_orchestrator_state::SqlCheckpointer::connect(url)
                    .await
                    .with_context(|| format!("failed to connect to checkpoint database '{url}'"))?;
                Arc::new(sql)
            }
            #[cfg(not(feature = "state-persistence"))]
            {
                anyhow::bail!("--checkpoint-db requires the 'state-persistence' feature");
            }
        }
        None => Arc::new(InMemoryCheckpointer::new()),
    };

    let monitor = Arc::new(Monitor::new(registry.clone(), checkpointer.clone(), events.clone()));
    monitor.recover_orphans().await;
    tokio::spawn(monitor.clone().run());

    let orchestrator = Orchestrator::bootstrap(
        agent_client,
        status_client,
        approvals.clone(),
        checkpointer,
        events.clone(),
        registry.clone(),
    );

    let state = workflow_orchestrator_api::AppState {
        orchestrator,
        approvals,
        registry,
        events,
    };
    let router = workflow_orchestrator_api::build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!(
        "{} Workflow orchestrator API listening on {}",
        "*".green().bold(),
        format!("http://{addr}").cyan()
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "server error")?;

    println!("\nServer stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
