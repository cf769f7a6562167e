#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// streamloom-cli/src/main.rs
// ============================================================================
// Module: Streamloom CLI Entry Point
// Description: Command dispatcher for the trigger/ready/completed scheduler
//              roles and the errors/stream inspection commands.
// Purpose: Drive a Pipeline from a config-ref without standing up a server.
// Dependencies: clap, streamloom-config, streamloom-core, thiserror,
//               tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! Each invocation resolves a config-ref into a [`streamloom_config::PipelineConfig`],
//! opens its configured store, and either runs one scheduler pass, loops
//! forever in `--daemon` mode, or renders an inspection report.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use streamloom_config::PipelineConfig;
use streamloom_core::{Pipeline, Role, Scheduler, StoreError, StreamId, StreamState};
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "streamloom", disable_help_subcommand = true, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the trigger-check scheduler role.
    Trigger(RoleCommand),
    /// Runs the ready-processor scheduler role.
    Ready(RoleCommand),
    /// Runs the completed-purge scheduler role.
    Completed(RoleCommand),
    /// Lists streams currently in `Error` or `CommitError` state.
    Errors(ErrorsCommand),
    /// Dumps one stream as pretty-printed JSON.
    Stream(StreamCommand),
}

/// Shared arguments for the three periodic scheduler roles.
#[derive(Args, Debug)]
struct RoleCommand {
    /// Path to a config file, or a value resolved via `STREAMLOOM_CONFIG`.
    config: PathBuf,
    /// Loop forever instead of running a single pass.
    #[arg(long)]
    daemon: bool,
    /// Sleep interval between passes in `--daemon` mode, in seconds.
    #[arg(long, value_name = "SECONDS")]
    polling_rate: Option<u64>,
}

/// Arguments for the `errors` inspection command.
#[derive(Args, Debug)]
struct ErrorsCommand {
    /// Path to a config file, or a value resolved via `STREAMLOOM_CONFIG`.
    config: PathBuf,
    /// Only list streams in `CommitError` state.
    #[arg(long, conflicts_with = "trigger_only")]
    commit_only: bool,
    /// Only list streams in `Error` state.
    #[arg(long, conflicts_with = "commit_only")]
    trigger_only: bool,
}

/// Arguments for the `stream` inspection command.
#[derive(Args, Debug)]
struct StreamCommand {
    /// Path to a config file, or a value resolved via `STREAMLOOM_CONFIG`.
    config: PathBuf,
    /// The stream to dump.
    stream_id: String,
    /// Replay and include the stream's events.
    #[arg(long)]
    with_events: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Top-level CLI error, mapped to a non-zero exit code in `main`.
#[derive(Debug, Error)]
enum CliError {
    /// The config-ref could not be resolved into a `PipelineConfig`.
    #[error("config error: {0}")]
    Config(#[from] streamloom_config::ConfigError),
    /// A scheduler pass or pipeline operation failed.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] streamloom_core::PipelineError),
    /// The requested stream does not exist.
    #[error("unknown stream: {0}")]
    UnknownStream(String),
    /// Writing a report to stdout or stderr failed.
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CliError {
    /// The process exit code this error maps to.
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(2),
            Self::Pipeline(_) => ExitCode::from(3),
            Self::UnknownStream(_) => ExitCode::from(4),
            Self::Io(_) => ExitCode::from(1),
            Self::Store(_) => ExitCode::from(3),
        }
    }
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    install_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "streamloom command failed");
            let _ = write_stderr_line(&err.to_string());
            err.exit_code()
        }
    }
}

/// Installs the ambient `tracing-subscriber` fmt layer, env-filter driven.
fn install_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Executes the CLI command dispatcher.
fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Trigger(command) => command_role(Role::TriggerCheck, &command, |c| c.ready_chunk_size()),
        Commands::Ready(command) => command_role(Role::ReadyProcessor, &command, |c| c.expiry_chunk_size()),
        Commands::Completed(command) => {
            command_role(Role::Completed, &command, |c| c.completed_chunk_size())
        }
        Commands::Errors(command) => command_errors(&command),
        Commands::Stream(command) => command_stream(&command),
    }
}

// ============================================================================
// SECTION: Scheduler Role Commands
// ============================================================================

/// Runs one of the three periodic scheduler roles, one pass or forever.
fn command_role(
    role: Role,
    command: &RoleCommand,
    chunk_of: impl Fn(&PipelineConfig) -> i64,
) -> Result<ExitCode, CliError> {
    let config = streamloom_config::load(Some(&command.config))?;
    let chunk = chunk_of(&config);
    let polling_rate = command
        .polling_rate
        .map_or_else(|| config.polling_rate(), Duration::from_secs);

    let store = config.store()?;
    let mut pipeline = Pipeline::new(store, Vec::new());
    let scheduler = Scheduler::new(role, chunk, polling_rate);

    if command.daemon {
        scheduler.run_daemon(&mut pipeline)?;
    } else {
        let outcome = scheduler.run_once(&mut pipeline)?;
        tracing::info!(
            scanned = outcome.scanned,
            transitioned = outcome.transitioned,
            locked = outcome.locked,
            "pass complete"
        );
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Inspection Commands
// ============================================================================

/// Lists streams in `Error` or `CommitError` state as a plain table.
fn command_errors(command: &ErrorsCommand) -> Result<ExitCode, CliError> {
    let config = streamloom_config::load(Some(&command.config))?;
    let store = config.store()?;

    let mut rows = Vec::new();
    if !command.commit_only {
        rows.extend(store.find_streams(StreamState::Error, None)?);
    }
    if !command.trigger_only {
        rows.extend(store.find_streams(StreamState::CommitError, None)?);
    }

    write_stdout_line(&format!("{:<36}  {:<24}  LAST_ERROR", "STREAM_ID", "TRIGGER_NAME"))?;
    for stream in &rows {
        write_stdout_line(&format!(
            "{:<36}  {:<24}  {}",
            stream.stream_id(),
            stream.trigger_name(),
            stream.last_error()
        ))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Dumps one stream as pretty-printed JSON, optionally with its events.
fn command_stream(command: &StreamCommand) -> Result<ExitCode, CliError> {
    let config = streamloom_config::load(Some(&command.config))?;
    let store = config.store()?;
    let stream_id = StreamId::from(command.stream_id.as_str());

    let stream = store
        .get_stream(&stream_id, command.with_events)?
        .ok_or_else(|| CliError::UnknownStream(command.stream_id.clone()))?;

    let rendered = render_stream(&stream);
    let output = serde_json::to_string_pretty(&rendered)
        .unwrap_or_else(|_| "null".to_string());
    write_stdout_line(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Builds a JSON view of a stream for the `stream` command.
fn render_stream(stream: &streamloom_core::Stream) -> serde_json::Value {
    let events = stream.events().map(|events| {
        events
            .iter()
            .map(|event| event.fields().clone())
            .collect::<Vec<_>>()
    });
    serde_json::json!({
        "stream_id": stream.stream_id().to_string(),
        "trigger_name": stream.trigger_name().to_string(),
        "identifying_traits": stream.identifying_traits(),
        "state": state_label(stream.state()),
        "state_version": stream.state_version(),
        "commit_errors": stream.commit_errors(),
        "last_error": stream.last_error(),
        "events": events,
    })
}

/// Renders a stream state as its stable name, for JSON output.
const fn state_label(state: StreamState) -> &'static str {
    match state {
        StreamState::Collecting => "collecting",
        StreamState::Ready => "ready",
        StreamState::Triggered => "triggered",
        StreamState::Processed => "processed",
        StreamState::Error => "error",
        StreamState::CommitError => "commit_error",
    }
}
