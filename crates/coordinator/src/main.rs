//! State Sync Coordinator
//!
//! Main entry point for the state replication demo.
//! Runs either as the coordinator (authority + worker supervisor) or as a
//! worker that mirrors the coordinator's state list.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use rand::Rng;
use state_sync::{CoordinatorServer, MirrorClient, StateAuthority};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod supervisor;

use config::SyncConfig;
use supervisor::WorkerSupervisor;

/// Process mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Coordinator mode - holds the authoritative list and supervises workers
    Coordinator,
    /// Worker mode - mirrors the list and issues add/remove requests
    Worker,
}

/// State replication across a supervised worker pool
#[derive(Parser, Debug)]
#[command(name = "state-sync")]
#[command(about = "Replicate transient states from a coordinator to its workers", long_about = None)]
struct Args {
    /// Process mode (coordinator or worker)
    #[arg(long, value_enum, default_value = "coordinator")]
    mode: Mode,

    /// Coordinator address (bind address in coordinator mode)
    #[arg(long, default_value = "127.0.0.1:9400")]
    addr: String,

    /// Number of workers to spawn (defaults to the CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// Do not respawn workers that exit
    #[arg(long)]
    no_respawn: bool,

    /// Maximum time a worker holds its state before removing it, in milliseconds
    #[arg(long, default_value = "50000")]
    hold_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            coordinator_addr: self.addr.clone(),
            workers: self.workers.unwrap_or(defaults.workers),
            respawn: !self.no_respawn,
            hold_ms: self.hold_ms,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.to_config();
    tracing::debug!("Config: {}", serde_json::to_string(&config)?);

    match args.mode {
        Mode::Coordinator => run_coordinator(config).await,
        Mode::Worker => run_worker(config).await,
    }
}

/// Run in coordinator mode - own the list and keep workers alive
async fn run_coordinator(config: SyncConfig) -> Result<()> {
    tracing::info!("Starting state sync - COORDINATOR MODE");
    tracing::info!("  Coordinator {} is running", std::process::id());
    tracing::info!("  Workers: {}", config.workers);

    let (authority, authority_task) = StateAuthority::new().spawn();

    let server = CoordinatorServer::new(authority.clone());
    let bound_addr = server.start(&config.coordinator_addr).await?;

    let supervisor = WorkerSupervisor::new(bound_addr, config)?;
    let worker_tasks = supervisor.start();

    tracing::info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    let stats = authority.stats();
    tracing::info!(
        "{} states, {} workers attached, {} broadcasts sent",
        stats.state_count,
        stats.attached_workers,
        stats.broadcasts_sent
    );

    for task in worker_tasks {
        task.abort();
    }
    authority_task.abort();

    tracing::info!("Coordinator stopped");

    Ok(())
}

/// Run in worker mode - publish one state, hold it for a while, then remove it
async fn run_worker(config: SyncConfig) -> Result<()> {
    let pid = std::process::id();
    tracing::info!("Starting state sync - WORKER MODE ({})", pid);

    let client = MirrorClient::connect(&config.coordinator_addr).await?;
    let mirror = client.mirror();

    let state = format!("worker:{}", pid);
    mirror.add_state(state.as_str());

    let hold = rand::thread_rng().gen_range(0..=config.hold_ms);
    tokio::time::sleep(Duration::from_millis(hold)).await;

    tracing::info!("States before removal {}: {:?}", pid, mirror.get_states());
    mirror.remove_state(state);

    tokio::select! {
        _ = client.closed() => {
            tracing::warn!("Coordinator connection lost");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down worker...");
        }
    }

    tracing::info!("Worker {} stopped", pid);

    Ok(())
}
