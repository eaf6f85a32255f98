//! fleetwatch gatekeeper: HTTP ingestion server
//!
//! Usage:
//!   gatekeeper --config sensors.json --addr 0.0.0.0:8000 --archive-dir ./archive
//!   gatekeeper --deferred-scoring --backfill-idle-ms 2000

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use fleetwatch::gateway::{self, AppState};
use fleetwatch::{ArchiveWriter, Engine, EngineConfig, MemoryStore, RecordSink, run_backfill};

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(about = "Vehicle sensor ingestion with static alerts and online anomaly scoring")]
struct Cli {
    /// JSON engine configuration (built-in vehicle sensors when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    addr: String,

    /// Directory for the JSON-lines alert archive (disabled when omitted)
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Archive queue capacity before records are dropped
    #[arg(long, default_value = "200000")]
    archive_capacity: usize,

    /// Rows kept in memory before the oldest are evicted (0 = unbounded)
    #[arg(long, default_value = "1000000")]
    max_records: usize,

    /// Store readings unscored and score them in a background worker
    #[arg(long)]
    deferred_scoring: bool,

    /// Backfill pause when no rows are waiting, in milliseconds
    #[arg(long, default_value = "2000")]
    backfill_idle_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Gatekeeper failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    info!("Initializing fleetwatch gatekeeper");

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let engine = Engine::new(config)?;
    let params = engine.registry().params();
    info!(
        signals = engine.config().allowed_signals.len(),
        trees = params.tree_count,
        height = params.tree_height,
        window = params.window_size,
        seed = params.random_seed,
        "Engine configured."
    );

    gateway::init_metrics();

    let archive = match &cli.archive_dir {
        Some(dir) => Some(ArchiveWriter::spawn(dir, cli.archive_capacity)?),
        None => None,
    };

    let store: Arc<dyn RecordSink> = match cli.max_records {
        0 => Arc::new(MemoryStore::new()),
        n => Arc::new(MemoryStore::bounded(n)),
    };
    let engine = Arc::new(engine);

    let backfill = cli.deferred_scoring.then(|| {
        tokio::spawn(run_backfill(
            Arc::clone(&engine),
            Arc::clone(&store),
            Duration::from_millis(cli.backfill_idle_ms),
        ))
    });

    let state = AppState {
        engine,
        store,
        archive: archive.as_ref().map(ArchiveWriter::handle),
        deferred: cli.deferred_scoring,
    };
    let app = gateway::router(state);

    let listener = TcpListener::bind(&cli.addr).await?;
    info!(addr = %cli.addr, "Gatekeeper listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install CTRL+C handler");
            }
            info!("Shutting down...");
        })
        .await?;

    if let Some(worker) = backfill {
        worker.abort();
    }

    // The router (and every state clone) is gone once serve returns, so the
    // archive queue has no producers left.
    if let Some(archive) = archive {
        archive.shutdown();
        info!("Archive flushed.");
    }
    info!("Goodbye.");
    Ok(())
}
