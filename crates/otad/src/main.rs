//! otad — the OtaGrid daemon.
//!
//! Single binary that assembles the rollout orchestration subsystems:
//! - State store (redb)
//! - Assignment engine
//! - Rollout lifecycle manager
//! - Tenant-scoped scheduler loop
//!
//! # Usage
//!
//! ```text
//! otad run --data-dir /var/lib/otagrid --tick-interval-ms 2000
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use otagrid_rollout::{AssignmentEngine, EventBus, OrchestrationEvent, RolloutManager};
use otagrid_scheduler::{RolloutScheduler, SchedulerConfig, StoreTenantDirectory};
use otagrid_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "otad", about = "OtaGrid rollout orchestration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestration loop.
    Run {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/otagrid")]
        data_dir: PathBuf,

        /// Scheduler delay between runs, in milliseconds.
        #[arg(long, default_value = "2000")]
        tick_interval_ms: u64,

        /// Tenants handled concurrently within one scheduler run.
        #[arg(long, default_value = "4")]
        tenant_parallelism: usize,

        /// Targets assigned per chunk while populating a group.
        #[arg(long, default_value = "500")]
        chunk_size: usize,

        /// Concurrent assignment chunks across all rollouts.
        #[arg(long, default_value = "4")]
        assign_parallelism: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,otad=debug,otagrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            data_dir,
            tick_interval_ms,
            tenant_parallelism,
            chunk_size,
            assign_parallelism,
        } => {
            run(
                data_dir,
                tick_interval_ms,
                tenant_parallelism,
                chunk_size,
                assign_parallelism,
            )
            .await
        }
    }
}

async fn run(
    data_dir: PathBuf,
    tick_interval_ms: u64,
    tenant_parallelism: usize,
    chunk_size: usize,
    assign_parallelism: usize,
) -> anyhow::Result<()> {
    info!("OtaGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("otagrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Event bus + log sink.
    let events = EventBus::default();
    let event_rx = events.subscribe();

    // Assignment engine.
    let engine = AssignmentEngine::new(store.clone(), events.clone())
        .with_chunk_size(chunk_size)
        .with_parallelism(assign_parallelism);
    info!(chunk_size, assign_parallelism, "assignment engine initialized");

    // Rollout lifecycle manager.
    let manager = Arc::new(RolloutManager::new(store.clone(), engine, events.clone()));
    info!("rollout manager initialized");

    // Scheduler.
    let directory = Arc::new(StoreTenantDirectory::new(store.clone()));
    let scheduler = RolloutScheduler::new(
        directory,
        manager,
        SchedulerConfig {
            tick_interval: Duration::from_millis(tick_interval_ms),
            tenant_parallelism,
        },
    );
    info!(tick_interval_ms, tenant_parallelism, "scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let event_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    // Event log loop.
    let event_handle = tokio::spawn(async move {
        log_events(event_rx, event_shutdown).await;
    });

    // Scheduler loop.
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    let _ = scheduler_handle.await;
    let _ = event_handle.await;

    info!("OtaGrid daemon stopped");
    Ok(())
}

/// Drain the event bus into the log until shutdown.
async fn log_events(
    mut rx: tokio::sync::broadcast::Receiver<OrchestrationEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => info!(?event, "orchestration event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
