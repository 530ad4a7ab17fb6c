use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::WeftConfig;
use weft_core::error::WeftError;
use weft_core::event::PipelineEvent;
use weft_core::traits::ApprovalDecision;
use weft_core::types::{Pipeline, RunStatus};

use weft_engine::{
    topological_sort, validate, ApprovalBroker, ExecutorContext, HttpGateway, MainSessionQueue,
    PipelineRunner,
};

const DEFAULT_CONFIG: &str = "weft.toml";

#[derive(Parser)]
#[command(name = "weft", version, about = "Pipeline DAG execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pipeline's structure
    Validate {
        /// Pipeline definition (JSON)
        pipeline: PathBuf,
    },
    /// Print the execution order of a pipeline
    Order {
        /// Pipeline definition (JSON)
        pipeline: PathBuf,
    },
    /// Execute a pipeline once
    Run {
        /// Pipeline definition (JSON)
        pipeline: PathBuf,
        /// Print events and the final run as JSON lines
        #[arg(long)]
        json: bool,
        /// Approve every approval node without prompting
        #[arg(long)]
        auto_approve: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    let (config, defaulted) = load_config(&cli.config)?;

    let fallback = config.log.filter.as_deref().unwrap_or("weft=info,warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if defaulted {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Validate { pipeline } => {
            let pipeline = read_pipeline(&pipeline)?;
            let result = validate(&pipeline.nodes, &pipeline.edges);
            if result.valid {
                println!("valid");
            } else {
                for error in &result.errors {
                    println!("error: {}", error);
                }
                std::process::exit(1);
            }
        }
        Commands::Order { pipeline } => {
            let pipeline = read_pipeline(&pipeline)?;
            let order = topological_sort(&pipeline.nodes, &pipeline.edges)?;
            for (i, node) in order.iter().enumerate() {
                if node.label.is_empty() {
                    println!("{:>3}. {} ({})", i + 1, node.id, node.node_type);
                } else {
                    println!("{:>3}. {} ({}) {}", i + 1, node.id, node.node_type, node.label);
                }
            }
        }
        Commands::Run {
            pipeline,
            json,
            auto_approve,
        } => {
            let pipeline = read_pipeline(&pipeline)?;
            let status = run_pipeline(&config, &pipeline, json, auto_approve).await?;
            if status != RunStatus::Success {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Load the config file. A missing file at the default path falls back to
/// defaults; any other failure is an error.
fn load_config(path: &Path) -> anyhow::Result<(WeftConfig, bool)> {
    match WeftConfig::load(path) {
        Ok(config) => Ok((config, false)),
        Err(WeftError::ConfigNotFound(_)) if path == Path::new(DEFAULT_CONFIG) => {
            Ok((WeftConfig::default(), true))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline {}", path.display()))
}

async fn run_pipeline(
    config: &WeftConfig,
    pipeline: &Pipeline,
    json: bool,
    auto_approve: bool,
) -> anyhow::Result<RunStatus> {
    let check = validate(&pipeline.nodes, &pipeline.edges);
    if !check.valid {
        for error in &check.errors {
            eprintln!("error: {}", error);
        }
        anyhow::bail!("pipeline '{}' is invalid", pipeline.id);
    }

    let main_session = Arc::new(MainSessionQueue::default());
    let broker = Arc::new(ApprovalBroker::new());

    let mut ctx = ExecutorContext::new(config.engine.clone())
        .with_system_events(main_session.clone())
        .with_heartbeat(main_session.clone())
        .with_approvals(broker.clone());

    if let Some(ref gateway_config) = config.gateway {
        let gateway = Arc::new(HttpGateway::new(gateway_config, config.engine.clone())?);
        ctx = ctx
            .with_gateway(gateway.clone())
            .with_isolated_runner(gateway.clone())
            .with_notifier(gateway);
        info!(url = %gateway_config.url, "Gateway configured");
    }

    let prompter = spawn_approval_prompter(broker, auto_approve);

    let sink = move |event: PipelineEvent| {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else {
            print_event(&event);
        }
    };

    let run = PipelineRunner::with_builtins()
        .execute(pipeline, &ctx, &sink)
        .await;
    prompter.abort();

    let queued = main_session.drain("main");
    if json {
        println!("{}", serde_json::to_string(&run)?);
    } else {
        if !queued.is_empty() {
            eprintln!("\n{} event(s) queued for the main session:", queued.len());
            for event in &queued {
                eprintln!("  [{}] {}", event.context_key, truncate(&event.text, 120));
            }
        }
        match &run.error {
            Some(error) => eprintln!("\nRun {} {}: {}", run.id, status_label(run.status), error),
            None => eprintln!("\nRun {} {}", run.id, status_label(run.status)),
        }
    }

    Ok(run.status)
}

/// Answer approval requests as they are announced, either automatically or
/// with an interactive confirm.
fn spawn_approval_prompter(
    broker: Arc<ApprovalBroker>,
    auto_approve: bool,
) -> tokio::task::JoinHandle<()> {
    let mut rx = broker.subscribe();
    tokio::spawn(async move {
        loop {
            let request = match rx.recv().await {
                Ok(request) => request,
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Approval prompts lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if !broker.is_pending(&request.id).await {
                continue;
            }
            eprintln!("\n[APPROVAL] {}: \"{}\"", request.node_id, request.message);
            let decision = if auto_approve {
                ApprovalDecision::Approved
            } else {
                let approved = tokio::task::spawn_blocking(|| {
                    dialoguer::Confirm::new()
                        .with_prompt("Approve?")
                        .default(false)
                        .interact()
                        .unwrap_or(false)
                })
                .await
                .unwrap_or(false);
                if approved {
                    ApprovalDecision::Approved
                } else {
                    ApprovalDecision::Denied {
                        reason: "denied by user".into(),
                    }
                }
            };

            if !broker.respond(&request.id, decision).await {
                warn!(request_id = %request.id, "Approval request no longer pending");
            }
        }
    })
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::NodeStarted {
            node_id, node_type, ..
        } => eprintln!("[start] {} ({})", node_id, node_type),
        PipelineEvent::NodeCompleted {
            node_id,
            output,
            duration_ms,
            session_key,
            ..
        } => {
            let session = session_key
                .as_deref()
                .map(|s| format!(" session={}", s))
                .unwrap_or_default();
            eprintln!("[ok] {} {}ms{}", node_id, duration_ms, session);
            if let Some(output) = output {
                println!("{}", truncate(&output.to_string(), 200));
            }
        }
        PipelineEvent::NodeFailed {
            node_id, error, ..
        } => eprintln!("[failed] {}: {}", node_id, error),
        PipelineEvent::NodeSkipped {
            node_id, reason, ..
        } => eprintln!("[skipped] {}: {}", node_id, reason),
        PipelineEvent::AgentOutput { text, .. } => print!("{}", text),
        PipelineEvent::RunCompleted {
            status,
            duration_ms,
            ..
        } => eprintln!("[done: {} in {}ms]", status_label(*status), duration_ms),
    }
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Success => "succeeded",
        RunStatus::Failed => "failed",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
