//! medsync-engine - Medical Data Mirror Synchronization Engine
//!
//! Pulls external reference datasets, normalizes, deduplicates and stores
//! them locally, continuously and resumably, under per-source rate limits
//! and a storage budget. Exposes the narrow HTTP control surface consumed
//! by the surrounding service layer.

use anyhow::Result;
use clap::Parser;
use medsync_common::events::EventBus;
use medsync_engine::config::EngineConfig;
use medsync_engine::services::{Orchestrator, ParsePool, StorageGovernor};
use medsync_engine::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "medsync-engine", about = "Medical data mirror synchronization engine")]
struct Args {
    /// Path to the engine TOML configuration
    #[arg(long, env = "MEDSYNC_CONFIG", default_value = "medsync.toml")]
    config: PathBuf,

    /// Managed data root (overrides env/TOML)
    #[arg(long)]
    data_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("Starting medsync-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve data root (CLI > env > TOML > default) and make sure the
    // managed tree exists before anything touches it
    let common_config = medsync_common::config::load_toml_config(&args.config).ok();
    let data_root = medsync_common::config::resolve_data_root(
        args.data_root.as_deref(),
        common_config.as_ref(),
    );
    medsync_common::config::ensure_data_root(&data_root)?;
    info!("Data root: {}", data_root.display());

    let config = Arc::new(EngineConfig::load(&args.config, data_root.clone())?);
    info!(sources = config.sources.len(), "Engine configuration loaded");

    let db_path = medsync_common::config::database_path(&data_root);
    let db_pool = medsync_common::db::init::init_database(&db_path).await?;
    info!("Database: {}", db_path.display());

    let event_bus = EventBus::new(config.engine.event_capacity);
    let parse_pool = ParsePool::new(config.effective_worker_pool_size());

    // Storage governor: scans the managed tree, pauses intake over budget
    let storage_governor = Arc::new(StorageGovernor::new(
        config.storage.clone(),
        data_root,
        event_bus.clone(),
    ));
    let storage_pause = storage_governor.pause_signal();
    let storage_snapshot = storage_governor.latest_snapshot();
    tokio::spawn(storage_governor.clone().run());

    let orchestrator = Arc::new(Orchestrator::new(
        db_pool.clone(),
        event_bus.clone(),
        config.clone(),
        storage_pause.clone(),
        parse_pool,
    ));

    let state = AppState::new(
        db_pool,
        event_bus,
        config.clone(),
        orchestrator,
        storage_snapshot,
        storage_pause,
    );

    let app = medsync_engine::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.engine.bind_addr).await?;
    info!("Listening on http://{}", config.engine.bind_addr);
    info!("Health check: http://{}/health", config.engine.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
