//! shellac - music-library cleanup engine
//!
//! Batch pipeline: discover -> analyze -> filter -> group -> organize.
//! Safe by default: copy-only, originals untouched, every filesystem
//! mutation logged and recoverable.

use anyhow::Result;
use clap::Parser;
use shellac_common::config::CleanupConfig;
use shellac_common::events::{CleanupEvent, EventBus};
use shellac_engine::db::{self, StoreError};
use shellac_engine::services::checkpointer::spawn_signal_listener;
use shellac_engine::services::transaction_manager::TxnError;
use shellac_engine::services::workflow_orchestrator::RunOutcome;
use shellac_engine::CleanupOrchestrator;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shellac", about = "Music-library cleanup engine", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "shellac.toml")]
    config: PathBuf,

    /// Source roots to scan (overrides the config file)
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Workspace directory holding the store (overrides the config file)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Plan and stage everything, perform nothing
    #[arg(long)]
    dry_run: bool,

    /// Roll back unfinished transactions from a crashed run, then exit
    #[arg(long)]
    recover: bool,
}

/// Exit codes: 0 clean, 1 completed with per-file failures, 2 no work,
/// 3 transaction rolled back, 4 fatal store error, 130 cancelled
fn exit_code_for(outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Clean => 0,
        RunOutcome::CompletedWithFailures => 1,
        RunOutcome::NoWork => 2,
        RunOutcome::Cancelled => 130,
    }
}

fn exit_code_for_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<StoreError>().is_some() {
        4
    } else if error.downcast_ref::<TxnError>().is_some() {
        3
    } else {
        1
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(outcome) => exit_code_for(outcome),
        Err(error) => {
            tracing::error!(error = ?error, "Run failed");
            exit_code_for_error(&error)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let mut config = CleanupConfig::load_or_default(&cli.config)?;
    if !cli.sources.is_empty() {
        config.source_roots = cli.sources.clone();
    }
    if let Some(workspace) = &cli.workspace {
        config.workspace_dir = workspace.clone();
    }
    if cli.dry_run {
        config.dry_run = true;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        store = %config.store_path().display(),
        "Starting shellac"
    );

    let pool = db::init_store(&config.store_path()).await?;

    let event_bus = EventBus::new(256);
    spawn_progress_logger(&event_bus);

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let mut orchestrator = CleanupOrchestrator::new(pool, config, event_bus, cancel)?;

    if cli.recover {
        let recovered = orchestrator.recover_only().await?;
        tracing::info!(transactions = recovered.len(), "Recovery finished");
        return Ok(RunOutcome::Clean);
    }

    orchestrator.run().await
}

/// Minimal progress consumer; richer renderers subscribe the same way
fn spawn_progress_logger(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                CleanupEvent::PhaseStarted { phase, .. } => {
                    tracing::info!(phase = phase.as_str(), "Phase started");
                }
                CleanupEvent::FileOrganized {
                    destination_path, ..
                } => {
                    tracing::info!(destination = %destination_path, "Organized");
                }
                CleanupEvent::FileQuarantined { path, reasons, .. } => {
                    tracing::warn!(path = %path, reasons = ?reasons, "Quarantined");
                }
                _ => {}
            }
        }
    });
}
