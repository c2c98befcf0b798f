//! `promptflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: resolve a workflow's execution order and report problems.
//! - `run`: execute a workflow locally or on the remote executor.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{
    AsyncExecutionBridge, ExecutionMode, ExecutorConfig, ProviderConfig, RunStatus, TaskExecutor,
    Workflow, WorkflowRunner,
};
use remote::{HttpRemote, InMemoryPromptLibrary, PushChannel, RemoteExecutor, StoredPrompt, Unconfigured};

/// Reattach attempts after the push channel drops mid-run.
const MAX_REATTACH: u32 = 3;

#[derive(Parser)]
#[command(name = "promptflow", about = "Dependency-ordered AI workflow runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow and print the final state as JSON.
    Run(RunArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Local,
    Remote,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the workflow JSON file.
    path: PathBuf,

    /// Staged input as inline JSON.
    #[arg(long, conflicts_with = "input_file")]
    input: Option<String>,

    /// Staged input read from a JSON file.
    #[arg(long)]
    input_file: Option<PathBuf>,

    #[arg(long, value_enum, env = "PROMPTFLOW_MODE", default_value = "local")]
    mode: Mode,

    /// Base URL of the remote executor.
    #[arg(long, env = "PROMPTFLOW_REMOTE_URL")]
    remote_url: Option<String>,

    /// Provider settings as JSON, forwarded untouched.
    #[arg(long, env = "PROMPTFLOW_PROVIDER", default_value = "{}")]
    provider: String,

    /// JSON array of stored prompts available to AI tasks.
    #[arg(long)]
    prompts: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Remote request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// How often remote job events are polled, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run(args) => run(args).await,
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn validate(path: &Path) -> anyhow::Result<ExitCode> {
    let workflow: Workflow = read_json(path)?;
    let resolution = engine::resolve_order(&workflow.tasks);

    for feedback in &resolution.feedback {
        eprintln!("{feedback}");
    }
    if resolution.is_fatal() {
        eprintln!("Validation failed");
        return Ok(ExitCode::FAILURE);
    }
    println!("Workflow is valid. Execution order: {:?}", resolution.order);
    Ok(ExitCode::SUCCESS)
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let workflow: Workflow = read_json(&args.path)?;
    let input: Value = match (&args.input, &args.input_file) {
        (Some(inline), _) => serde_json::from_str(inline).context("--input is not valid JSON")?,
        (None, Some(path)) => read_json(path)?,
        (None, None) => json!({}),
    };
    let provider: Value =
        serde_json::from_str(&args.provider).context("--provider is not valid JSON")?;
    let prompts: Vec<StoredPrompt> = match &args.prompts {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let (remote, channel): (Arc<dyn RemoteExecutor>, Arc<dyn PushChannel>) = match &args.remote_url {
        Some(url) => {
            let http = HttpRemote::new(url.as_str(), Duration::from_secs(args.timeout_secs))?
                .with_poll_interval(Duration::from_millis(args.poll_interval_ms));
            let http = Arc::new(http);
            let remote: Arc<dyn RemoteExecutor> = http.clone();
            let channel: Arc<dyn PushChannel> = http;
            (remote, channel)
        }
        None => {
            if matches!(args.mode, Mode::Remote) {
                bail!("remote mode needs --remote-url or PROMPTFLOW_REMOTE_URL");
            }
            let remote: Arc<dyn RemoteExecutor> = Arc::new(Unconfigured);
            let channel: Arc<dyn PushChannel> = Arc::new(Unconfigured);
            (remote, channel)
        }
    };

    let executor = TaskExecutor::new(
        remote.clone(),
        Arc::new(InMemoryPromptLibrary::new(prompts)),
        ProviderConfig(provider),
        ExecutorConfig { max_retries: args.max_retries, ..ExecutorConfig::default() },
    );
    let mut runner = WorkflowRunner::new(workflow, executor)
        .with_bridge(AsyncExecutionBridge::new(remote, channel));
    runner.set_mode(match args.mode {
        Mode::Local => ExecutionMode::Local,
        Mode::Remote => ExecutionMode::Remote,
    });

    let handle = runner.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping workflow");
            handle.stop();
        }
    });

    let status = runner.run(input).await?;
    let status = follow_to_end(&mut runner, status).await;
    interrupt.abort();

    println!("{}", serde_json::to_string_pretty(&report(&runner, status))?);

    Ok(match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Reattach to a run whose push channel dropped; stop the job once attempts run out.
///
/// Failures are logged so the caller can still report the final state.
async fn follow_to_end(runner: &mut WorkflowRunner, mut status: RunStatus) -> RunStatus {
    let mut attempts = 0;
    while status == RunStatus::Running && attempts < MAX_REATTACH {
        attempts += 1;
        warn!(attempt = attempts, "push channel dropped, reattaching");
        tokio::time::sleep(Duration::from_secs(1)).await;
        match runner.reattach().await {
            Ok(next) => status = next,
            Err(e) => {
                warn!("reattach failed: {e}");
                break;
            }
        }
    }
    if status == RunStatus::Running {
        if let Err(e) = runner.stop().await {
            warn!("could not stop the remote job: {e}");
        }
        status = runner.status();
    }
    status
}

fn report(runner: &WorkflowRunner, status: RunStatus) -> Value {
    json!({
        "status": status,
        "tasks": runner.state().tasks(),
        "dataStore": runner.data_store(),
        "feedback": runner.feedback(),
    })
}
