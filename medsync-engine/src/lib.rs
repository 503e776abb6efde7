//! medsync-engine library interface
//!
//! The mirror synchronization engine: pulls external reference datasets
//! (bibliographic archives, trial registries, drug listings, code sets,
//! health-topic corpora), normalizes and deduplicates the records, and
//! loads them into the local canonical store under checkpointed, rate-
//! limited, storage-governed jobs. Exposed as a library for integration
//! testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;

pub use crate::error::{ApiError, ApiResult};

use crate::config::EngineConfig;
use crate::models::StorageSnapshot;
use crate::services::Orchestrator;
use axum::Router;
use chrono::{DateTime, Utc};
use medsync_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Resolved engine configuration
    pub config: Arc<EngineConfig>,
    /// Job supervisor
    pub orchestrator: Arc<Orchestrator>,
    /// Latest storage snapshot, published by the storage governor
    pub storage_snapshot: Arc<RwLock<Option<StorageSnapshot>>>,
    /// Storage pause signal (true = intake paused)
    pub storage_pause: watch::Receiver<bool>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: Arc<EngineConfig>,
        orchestrator: Arc<Orchestrator>,
        storage_snapshot: Arc<RwLock<Option<StorageSnapshot>>>,
        storage_pause: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            event_bus,
            config,
            orchestrator,
            storage_snapshot,
            storage_pause,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::source_routes())
        .merge(api::storage_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
