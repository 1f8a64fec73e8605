// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Command-line interface for the contrib-ingest binary.
//!
//! `ingest` runs one time-boxed invocation per repository and prints the
//! results as JSON on stdout; `checkpoint` inspects and edits the stored
//! resume positions. Logs go to stderr.

use std::{
    io,
    path::{Path, PathBuf},
    process,
};

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use contrib_ingest::{
    ApiClient, CheckpointStore, Clock, Error, IngestConfig, Ingestor, JsonFileCheckpointStore, Mode,
    OctocrabTransport, RepositoryRef, Status, SystemClock, Trigger, load_config, write_records,
    write_results,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_STATE_PATH: &str = ".contrib-ingest/checkpoints.json";

/// Resumable ingestion of GitHub repository activity.
#[derive(Debug, Parser,)]
#[command(name = "contrib-ingest", version, about = "Ingest GitHub repository activity in time-boxed passes")]
struct Cli
{
    /// Format of the log lines written to stderr.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum,)]
enum LogFormat
{
    Text,
    Json,
}

#[derive(Debug, Subcommand,)]
/// Supported commands exposed by the CLI.
enum Command
{
    /// Run one ingestion invocation for the selected repositories.
    Ingest(IngestArgs,),
    /// Inspect or edit stored checkpoints.
    Checkpoint(CheckpointArgs,),
}

#[derive(Debug, Args,)]
/// Arguments accepted by the `ingest` subcommand.
struct IngestArgs
{
    /// YAML document listing repositories and settings.
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf,>,

    /// Ingest a single repository instead of the configured list.
    #[arg(long = "repo", value_name = "OWNER/REPO", value_parser = parse_repository)]
    repo: Option<RepositoryRef,>,

    /// Walk strategy.
    #[arg(long = "mode", value_enum)]
    mode: Mode,

    /// Lower update bound of an incremental walk (RFC 3339).
    #[arg(long = "since", value_name = "TIMESTAMP", value_parser = parse_timestamp)]
    since: Option<DateTime<Utc,>,>,

    /// Checkpoint document.
    #[arg(long = "state", value_name = "PATH", default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,

    /// Directory receiving one JSON record per repository.
    #[arg(long = "output", value_name = "DIR")]
    output: Option<PathBuf,>,

    /// Overrides `settings.time_budget_secs`.
    #[arg(long = "budget-secs", value_name = "SECONDS")]
    budget_secs: Option<u64,>,

    /// Output formatted JSON for easier inspection.
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pretty: bool,

    /// API token; anonymous access has a much smaller quota.
    #[arg(long = "token", env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String,>,
}

#[derive(Debug, Args,)]
struct CheckpointArgs
{
    #[command(subcommand)]
    command: CheckpointCommand,
}

#[derive(Debug, Subcommand,)]
enum CheckpointCommand
{
    /// Print the stored checkpoint of a repository.
    Check(CheckpointTarget,),
    /// Store an explicit resume position.
    Set(CheckpointSetArgs,),
    /// Restart the next full pass from the newest item.
    Reset(CheckpointTarget,),
}

#[derive(Debug, Args,)]
struct CheckpointTarget
{
    /// Repository whose checkpoint is addressed.
    #[arg(long = "repo", value_name = "OWNER/REPO", value_parser = parse_repository)]
    repo: RepositoryRef,

    /// Checkpoint document.
    #[arg(long = "state", value_name = "PATH", default_value = DEFAULT_STATE_PATH)]
    state: PathBuf,
}

#[derive(Debug, Args,)]
struct CheckpointSetArgs
{
    #[command(flatten)]
    target: CheckpointTarget,

    /// Number of the last fully processed item; `0` restarts from the
    /// newest item.
    #[arg(long = "position", value_name = "N")]
    position: u64,
}

fn parse_repository(value: &str,) -> Result<RepositoryRef, String,>
{
    value.parse::<RepositoryRef>().map_err(|error| error.to_display_string(),)
}

fn parse_timestamp(value: &str,) -> Result<DateTime<Utc,>, String,>
{
    DateTime::parse_from_rfc3339(value,)
        .map(|timestamp| timestamp.with_timezone(&Utc,),)
        .map_err(|error| format!("expected an RFC 3339 timestamp: {error}"),)
}

/// Installs the stderr subscriber; `RUST_LOG` overrides the `info` default.
fn init_tracing(format: LogFormat,)
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info",),);
    let builder = tracing_subscriber::fmt().with_env_filter(filter,).with_writer(io::stderr,);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Entry point that reports errors and sets the appropriate exit status.
#[tokio::main]
async fn main()
{
    let cli = Cli::parse();
    init_tracing(cli.log_format,);

    match run(cli,).await {
        Ok(true,) => {}
        Ok(false,) => process::exit(1,),
        Err(error,) => {
            eprintln!("{}", error.to_display_string());
            process::exit(1,);
        }
    }
}

/// Executes the parsed command. `Ok(false)` reports a failed repository.
///
/// # Errors
///
/// Propagates configuration, checkpoint and output errors.
async fn run(cli: Cli,) -> Result<bool, Error,>
{
    match cli.command {
        Command::Ingest(args,) => run_ingest(args,).await,
        Command::Checkpoint(args,) => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            run_checkpoint(args.command, &SystemClock, &mut handle,)?;
            Ok(true,)
        }
    }
}

async fn run_ingest(args: IngestArgs,) -> Result<bool, Error,>
{
    let mut config = match &args.config {
        Some(path,) => load_config(path,)?,
        None => IngestConfig::default(),
    };
    if let Some(budget,) = args.budget_secs {
        config.settings.time_budget_secs = budget;
        config.settings.validate()?;
    }
    let triggers = plan_triggers(&args, &config,)?;

    let clock = SystemClock;
    let deadline = config.settings.deadline_from(clock.now(),);
    let transport = OctocrabTransport::new(args.token.as_deref(),)?;
    if args.token.is_none() {
        warn!("GITHUB_TOKEN is not set, using the anonymous quota");
    }
    let client = ApiClient::new(transport, clock,)
        .with_retry_policy(config.settings.retry.clone(),)
        .with_page_size(config.settings.page_size,)
        .with_floor_percent(config.settings.rate_limit_floor_percent,);
    let store = JsonFileCheckpointStore::new(&args.state,);
    info!(
        repositories = triggers.len(),
        mode = %args.mode,
        deadline = %deadline,
        state = %store.path().display(),
        "starting ingestion"
    );

    let mut ingestor = Ingestor::new(client, store, config.settings,);
    let results = ingestor.run_all(&triggers, deadline,).await;

    if let Some(dir,) = &args.output {
        write_records(dir, &results,)?;
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_results(&mut handle, &results, args.pretty,)?;

    Ok(results.iter().all(|result| result.status != Status::Failed,),)
}

fn plan_triggers(args: &IngestArgs, config: &IngestConfig,) -> Result<Vec<Trigger,>, Error,>
{
    if args.since.is_some() && args.mode == Mode::Full {
        return Err(Error::validation("--since applies to incremental mode only",),);
    }
    let repositories = match &args.repo {
        Some(repo,) => vec![repo.clone()],
        None => config.enabled_repositories()?,
    };
    if repositories.is_empty() {
        return Err(Error::validation(
            "no repositories to ingest; pass --repo or list repositories in --config",
        ),);
    }

    Ok(repositories
        .into_iter()
        .map(|repository| Trigger {
            mode: args.mode, repository, since: args.since,
        },)
        .collect(),)
}

fn run_checkpoint<C: Clock, W: io::Write,>(command: CheckpointCommand, clock: &C, writer: &mut W,) -> Result<(), Error,>
{
    let (target, checkpoint,) = match command {
        CheckpointCommand::Check(target,) => {
            let checkpoint = JsonFileCheckpointStore::new(&target.state,).get(&target.repo,)?;
            (target, checkpoint,)
        }
        CheckpointCommand::Set(args,) => {
            let store = JsonFileCheckpointStore::new(&args.target.state,);
            let checkpoint = store.set(&args.target.repo, args.position, clock.now(),)?;
            info!(repository = %args.target.repo, position = args.position, "checkpoint set");
            (args.target, Some(checkpoint,),)
        }
        CheckpointCommand::Reset(target,) => {
            let checkpoint = JsonFileCheckpointStore::new(&target.state,).reset(&target.repo, clock.now(),)?;
            info!(repository = %target.repo, "checkpoint reset");
            (target, Some(checkpoint,),)
        }
    };

    let report = serde_json::json!({
        "repository": target.repo.to_string(),
        "checkpoint": checkpoint,
    });
    serde_json::to_writer(&mut *writer, &report,)?;
    writer.write_all(b"\n",).map_err(|source| contrib_ingest::io_error(Path::new("<stdout>",), source,),)?;

    Ok((),)
}
