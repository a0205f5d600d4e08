//! Tunesmith CLI - self-play parameter tuning
//!
//! Commands:
//! - evolve: evolutionary search over the whole parameter space
//! - ascend: coordinate ascent, one parameter at a time

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tunesmith_core::RunConfig;
use tunesmith_run::TuningManager;

#[derive(Parser)]
#[command(name = "tunesmith")]
#[command(about = "Self-play engine parameter tuner")]
struct Cli {
    /// Run configuration file
    #[arg(long, default_value = "tunesmith.json")]
    config: PathBuf,

    /// File receiving a plain copy of the log output
    #[arg(long, default_value = "tunesmith.log")]
    log_file: PathBuf,

    /// Fixed RNG seed for reproducible candidate generation
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evolutionary search over the whole parameter space
    Evolve,
    /// Coordinate ascent, probing one parameter at a time
    Ascend,
}

/// Log to stdout and to a plain-text file. Long runs live in tmux or
/// under a supervisor, so the file copy is what survives.
fn init_logging(log_file: &PathBuf) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
    Ok(())
}

/// Tear down workers and the match server before the process dies.
/// Engines keep playing (and holding the server's slots) if they only
/// get orphaned, so the signal path must go through the manager.
fn spawn_signal_handler(manager: Arc<TuningManager>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, stopping workers");
        manager.shutdown().await;
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_file)?;

    let config = RunConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    tracing::info!(
        config = %cli.config.display(),
        params = config.params.len(),
        concurrency = config.concurrency,
        "starting tuning run"
    );

    let manager = Arc::new(TuningManager::new(config, cli.seed));
    spawn_signal_handler(manager.clone());

    match cli.command {
        Commands::Evolve => manager.run_evolution().await,
        Commands::Ascend => manager.run_ascent().await,
    }
}
