//! Baton CLI entry point.
//!
//! This binary is the composition root for the workspace:
//!
//! 1. **Load configuration** from defaults, `baton.toml` and `BATON_*`
//!    variables ([`config`]).
//! 2. **Wire observability** with `tracing-subscriber` and, when an endpoint
//!    is configured, an OpenTelemetry OTLP exporter ([`telemetry`]).
//! 3. **Construct infrastructure**: one [`llm::GeminiProvider`] shared by
//!    every step of the selected pipeline ([`catalogue`]).
//! 4. **Run** the command, printing each step's output as soon as the step
//!    completes ([`render`]).

mod catalogue;
mod config;
mod render;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use llm::GeminiProvider;
use nodes::{consume, RunOptions, Runner};
use pipeline::{LlmProvider, Message, OwnerId};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalogue::{build_runner, refine_message, Catalogue, EDITOR_PIPELINE};
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "baton", version, about = "Run multi-step LLM pipelines")]
struct Cli {
    /// Config file (default: ./baton.toml when present)
    #[arg(long, global = true, env = "BATON_CONFIG")]
    config: Option<PathBuf>,

    /// Owner recorded on the sessions this invocation creates
    #[arg(long, global = true, default_value = "cli")]
    owner: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available pipelines
    List,

    /// Run a pipeline on a message
    Run {
        /// Pipeline name (see `baton list`)
        pipeline: String,

        /// Message text; read from stdin when omitted
        #[arg(long, short)]
        message: Option<String>,

        /// Overall deadline for the run, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Refine an existing output with the editor pipeline
    Refine {
        /// The current output, or a path to a file containing it
        #[arg(long)]
        current: String,

        /// What to change
        #[arg(long)]
        instruction: String,

        /// Overall deadline for the run, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let telemetry = telemetry::init(&config.telemetry)?;
    let catalogue = Catalogue::from_config(&config);
    let owner = OwnerId::new(cli.owner).context("--owner must not be blank")?;

    let result = match cli.command {
        Command::List => {
            list(&catalogue);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            pipeline,
            message,
            timeout,
        } => {
            let text = match message {
                Some(text) => text,
                None => read_stdin().await?,
            };
            execute(&config, &catalogue, &pipeline, owner, text, timeout).await
        }
        Command::Refine {
            current,
            instruction,
            timeout,
        } => {
            let current = read_text_or_file(&current)?;
            if current.trim().is_empty() || instruction.trim().is_empty() {
                bail!("both --current and --instruction must be non-empty");
            }
            let text = refine_message(&current, &instruction);
            execute(&config, &catalogue, EDITOR_PIPELINE, owner, text, timeout).await
        }
    };

    telemetry.shutdown();
    result
}

fn list(catalogue: &Catalogue) {
    for spec in catalogue.iter() {
        let steps: Vec<&str> = spec.steps.iter().map(|s| s.name.as_str()).collect();
        println!("{:<18} {}", spec.name, spec.description);
        println!("{:<18} {}", "", steps.join(" -> "));
    }
}

async fn execute(
    config: &Config,
    catalogue: &Catalogue,
    pipeline: &str,
    owner: OwnerId,
    text: String,
    timeout: Option<u64>,
) -> anyhow::Result<ExitCode> {
    if text.trim().is_empty() {
        bail!("message must not be empty");
    }
    let spec = catalogue
        .get(pipeline)
        .with_context(|| format!("unknown pipeline '{pipeline}' (see `baton list`)"))?;

    let provider: Arc<dyn LlmProvider> = Arc::new(
        GeminiProvider::new(config.gemini())
            .context("LLM provider is not configured; set GOOGLE_API_KEY or llm.api_key")?,
    );
    let runner = build_runner(spec, &provider, config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let outcome = stream_run(&runner, owner, text, timeout, cancel).await;

    ctrl_c.abort();
    runner.shutdown(config.runner.shutdown_grace()).await;
    outcome
}

async fn stream_run(
    runner: &Runner,
    owner: OwnerId,
    text: String,
    timeout: Option<u64>,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let session = runner.create_session(owner)?;
    info!(pipeline = %runner.pipeline().name(), session_id = %session.id, "starting run");

    let events = runner.run_with(
        &session,
        Message::user_text(text),
        RunOptions {
            timeout: timeout.map(Duration::from_secs),
            cancel: Some(cancel),
        },
    );

    let mut stdout = std::io::stdout().lock();
    let report = consume(events, |event| render::render_event(&mut stdout, event))
        .await
        .context("failed to write run output")?;

    match report.error {
        None => Ok(ExitCode::SUCCESS),
        Some(err) => {
            eprintln!("run failed: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received; cancelling run");
        cancel.cancel();
    }
}

async fn read_stdin() -> anyhow::Result<String> {
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("failed to read message from stdin")?;
    Ok(text)
}

fn read_text_or_file(value: &str) -> anyhow::Result<String> {
    let path = Path::new(value);
    if path.is_file() {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    } else {
        Ok(value.to_owned())
    }
}
