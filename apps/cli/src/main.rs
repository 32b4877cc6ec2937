//! Location importer - command line entry point
//!
//! Parses a location CSV into a hierarchy and commits it to a FHIR server in
//! parent-first batches. With `--state`, the hierarchy and every server id assigned
//! so far are saved after the run so a failed or interrupted import can be resumed.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use locimport_cli::{config::Config, logging, FhirBatchClient};
use locimport_core::{
    commit, parse_csv, BatchSubmitter, CommitOptions, DryRunSubmitter, Forest, ImportError,
    OverflowPolicy, ServerId,
};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

#[derive(Parser)]
#[command(
    name = "locimport",
    about = "Bulk import of location hierarchies into a FHIR server",
    version,
    arg_required_else_help = true
)]
struct Cli {
    /// Configuration file (defaults to ./locimport.{toml,yaml,json} if present).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a CSV and print the resulting hierarchy as JSON.
    Parse {
        /// Path to the CSV file (or "-" for stdin).
        input: PathBuf,
        /// Pretty-print JSON output.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Parse a CSV and create its locations on the FHIR server.
    Import {
        /// Path to the CSV file (or "-" for stdin).
        input: PathBuf,
        #[command(flatten)]
        commit: CommitArgs,
        /// Print the batches that would be sent instead of contacting the server.
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "state")]
        dry_run: bool,
    },

    /// Continue an import from a state file written by `import --state`.
    Resume {
        /// State file to read (and update).
        state_file: PathBuf,
        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Print CLI version.
    Version,
}

#[derive(clap::Args)]
struct CommitArgs {
    /// Id of an existing Location to create the top-level locations under.
    #[arg(long, value_name = "ID")]
    parent: Option<String>,
    /// Write the hierarchy with assigned server ids to this file after the run.
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,
    /// Override fhir.base_url.
    #[arg(long)]
    base_url: Option<String>,
    /// Override import.max_batch_size.
    #[arg(long)]
    max_batch_size: Option<usize>,
    /// Keep the chunks of a split sibling set together (import.overflow = contiguous).
    #[arg(long, action = ArgAction::SetTrue)]
    contiguous: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config =
        Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Version => Ok(()),
        Commands::Parse { input, pretty } => {
            init(&config)?;
            let forest = read_forest(&input)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if pretty {
                serde_json::to_writer_pretty(&mut out, &forest)?;
            } else {
                serde_json::to_writer(&mut out, &forest)?;
            }
            writeln!(out)?;
            Ok(())
        }
        Commands::Import {
            input,
            commit,
            dry_run,
        } => {
            apply_overrides(&mut config, &commit);
            init(&config)?;
            let forest = read_forest(&input)?;
            run_commit(&config, forest, commit, dry_run).await
        }
        Commands::Resume {
            state_file,
            mut commit,
        } => {
            apply_overrides(&mut config, &commit);
            init(&config)?;
            let forest = load_state(&state_file)?;
            if commit.state.is_none() {
                commit.state = Some(state_file);
            }
            run_commit(&config, forest, commit, false).await
        }
    }
}

fn init(config: &Config) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    logging::init_logging(&config.logging).context("Failed to initialize logging")?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "locimport starting");
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &CommitArgs) {
    if let Some(base_url) = &args.base_url {
        config.fhir.base_url = base_url.clone();
    }
    if let Some(size) = args.max_batch_size {
        config.import.max_batch_size = size;
    }
    if args.contiguous {
        config.import.overflow = OverflowPolicy::Contiguous;
    }
}

fn read_forest(input: &Path) -> Result<Forest> {
    let forest = if input == Path::new("-") {
        parse_csv(std::io::stdin().lock())
    } else {
        let file =
            File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
        parse_csv(BufReader::new(file))
    };
    forest.with_context(|| format!("Failed to parse {}", input.display()))
}

fn load_state(path: &Path) -> Result<Forest> {
    let display = path.display();
    let file = File::open(path).with_context(|| format!("Failed to open state file {display}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid state file {display}"))
}

/// Write to a sibling temp file first so an interrupted write keeps the old state.
fn save_state(path: &Path, forest: &Forest) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let file =
            File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, forest)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        committed = forest.committed_count(),
        total = forest.len(),
        "Saved import state"
    );
    Ok(())
}

async fn run_commit(
    config: &Config,
    mut forest: Forest,
    args: CommitArgs,
    dry_run: bool,
) -> Result<()> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = cancel_tx.send(true);
    });

    let options = CommitOptions {
        scheduler: config.import.scheduler_config(),
        parent: args.parent.map(ServerId::from),
    };

    let dry_run_submitter = DryRunSubmitter::new();
    let client;
    let submitter: &dyn BatchSubmitter = if dry_run {
        &dry_run_submitter
    } else {
        client = FhirBatchClient::new(&config.fhir)?;
        tracing::info!(base_url = client.base_url(), "Importing locations");
        &client
    };

    let outcome = commit(&mut forest, submitter, options, cancel_rx).await;

    if let Some(path) = &args.state {
        save_state(path, &forest)?;
    }
    if dry_run {
        print_batches(&dry_run_submitter)?;
    }

    match outcome {
        Ok(report) => {
            println!(
                "Created {} location(s) in {} batch(es); {} already present",
                report.created, report.batches, report.skipped
            );
            Ok(())
        }
        Err(ImportError::Commit(failure)) => {
            for rejected in &failure.rejected {
                eprintln!(
                    "rejected '{}' (parent {}): {}",
                    rejected.key,
                    rejected
                        .parent
                        .as_ref()
                        .map_or("<top level>", ServerId::as_str),
                    rejected.message
                );
            }
            if args.state.is_some() {
                eprintln!(
                    "Re-run with `locimport resume <state file>` after fixing the rejected rows."
                );
            }
            Err(ImportError::Commit(failure)).context("Import halted")
        }
        Err(e) => Err(e).context("Import failed"),
    }
}

fn print_batches(submitter: &DryRunSubmitter) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (index, batch) in submitter.batches().iter().enumerate() {
        let parent = batch
            .first()
            .and_then(|r| r.body.part_of.as_ref())
            .and_then(|p| p.reference.as_deref())
            .unwrap_or("<top level>");
        let names: Vec<&str> = batch.iter().map(|r| r.correlation_key.as_str()).collect();
        writeln!(
            out,
            "batch {}: {} location(s) under {}: {}",
            index + 1,
            batch.len(),
            parent,
            names.join(", ")
        )?;
    }
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("Failed to install SIGTERM signal handler: {}", e);
            return std::future::pending().await;
        }
    };
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => {
            tracing::info!("SIGINT received, stopping after the batch in flight...");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received, stopping after the batch in flight...");
        }
    }
}

/// Wait for shutdown signal (SIGINT only on non-Unix platforms)
#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        return std::future::pending().await;
    }
    tracing::info!("Shutdown signal received, stopping after the batch in flight...");
}
