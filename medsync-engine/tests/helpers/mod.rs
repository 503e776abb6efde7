//! Shared test fixtures: scripted source adapters and engine setup
#![allow(dead_code)]

use async_trait::async_trait;
use medsync_engine::config::{EngineConfig, EngineSettings, RetryConfig, StorageConfig};
use medsync_engine::error::SyncError;
use medsync_engine::models::{
    Checkpoint, DatasetKind, MergePolicy, RawRecord, SourceDescriptor,
};
use medsync_engine::services::{Orchestrator, ParsePool};
use medsync_engine::sources::{FetchedPage, SourceAdapter};
use medsync_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Failure an adapter page can be scripted to emit before succeeding
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transient,
    RateLimited(Option<Duration>),
    Permanent,
}

impl MockFailure {
    fn to_error(&self) -> SyncError {
        match self {
            MockFailure::Transient => SyncError::Transient("simulated timeout".into()),
            MockFailure::RateLimited(hint) => SyncError::RateLimited { retry_after: *hint },
            MockFailure::Permanent => SyncError::PermanentRecord("simulated bad page".into()),
        }
    }
}

/// Checkpoint-driven scripted source
///
/// The page token is the index of the next page to fetch, so replaying a
/// checkpoint replays the same page, exactly like a real paged source.
pub struct MockAdapter {
    source_id: String,
    kind: DatasetKind,
    pages: Vec<Vec<RawRecord>>,
    failures: Mutex<HashMap<usize, VecDeque<MockFailure>>>,
    page_errors: HashMap<usize, String>,
    gates: HashMap<usize, Arc<Semaphore>>,
}

impl MockAdapter {
    pub fn new(source_id: &str, kind: DatasetKind, pages: Vec<Vec<RawRecord>>) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            pages,
            failures: Mutex::new(HashMap::new()),
            page_errors: HashMap::new(),
            gates: HashMap::new(),
        }
    }

    /// Script failures emitted before the page finally succeeds
    pub fn fail_page(mut self, page: usize, failures: Vec<MockFailure>) -> Self {
        self.failures
            .get_mut()
            .unwrap()
            .insert(page, failures.into());
        self
    }

    /// Mark a page as structurally bad but skippable
    pub fn page_error(mut self, page: usize, reason: &str) -> Self {
        self.page_errors.insert(page, reason.to_string());
        self
    }

    /// Gate a page on a semaphore permit, for deterministic pacing
    pub fn gate_page(mut self, page: usize, gate: Arc<Semaphore>) -> Self {
        self.gates.insert(page, gate);
        self
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        self.kind
    }

    async fn fetch_next_page(
        &self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<FetchedPage, SyncError> {
        let base = checkpoint.cloned().unwrap_or_default();
        let page_index: usize = base
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);

        if let Some(gate) = self.gates.get(&page_index) {
            let gate = gate.clone();
            gate.acquire().await.expect("gate closed").forget();
        }

        if let Some(failure) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&page_index)
            .and_then(|queue| queue.pop_front())
        {
            return Err(failure.to_error());
        }

        let next_checkpoint = base.advanced_to(Some((page_index + 1).to_string()), 0);

        if page_index >= self.pages.len() {
            return Ok(FetchedPage {
                records: Vec::new(),
                next_checkpoint,
                has_more: false,
                page_error: None,
            });
        }

        if let Some(reason) = self.page_errors.get(&page_index) {
            return Ok(FetchedPage {
                records: Vec::new(),
                next_checkpoint,
                has_more: page_index + 1 < self.pages.len(),
                page_error: Some(reason.clone()),
            });
        }

        Ok(FetchedPage {
            records: self.pages[page_index].clone(),
            next_checkpoint,
            has_more: page_index + 1 < self.pages.len(),
            page_error: None,
        })
    }
}

/// One drug-label raw record
pub fn drug_record(page: usize, index: usize) -> RawRecord {
    RawRecord::new(format!("mock:{}:{}", page, index))
        .with_field("generic_name", format!("drug-{}-{}", page, index))
        .with_field("strength", "10 mg")
        .with_field("route", "oral")
        .with_field("ndc", format!("{:04}-{:04}", page, index))
}

/// Reference page layout: 10, 10, 5 records
pub fn scenario_pages() -> Vec<Vec<RawRecord>> {
    vec![
        (0..10).map(|i| drug_record(0, i)).collect(),
        (0..10).map(|i| drug_record(1, i)).collect(),
        (0..5).map(|i| drug_record(2, i)).collect(),
    ]
}

pub fn drug_source() -> SourceDescriptor {
    SourceDescriptor {
        id: "drug-registry".to_string(),
        kind: DatasetKind::DrugRegistry,
        endpoint: "mock://drug-registry".to_string(),
        rate_per_sec: 1000,
        burst: 100,
        page_size: 100,
        merge_policy: MergePolicy::PreferMoreComplete,
        similarity_threshold: None,
    }
}

/// Engine config tuned for fast tests
pub fn test_config(sources: Vec<SourceDescriptor>) -> EngineConfig {
    EngineConfig {
        engine: EngineSettings {
            bind_addr: "127.0.0.1:0".to_string(),
            worker_pool_size: 2,
            batch_size: 50,
            fetch_deadline_secs: 5,
            event_capacity: 64,
        },
        retry: RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 10,
            max_transient_retries: 3,
            consecutive_failure_budget: 2,
            batch_retry_limit: 3,
        },
        storage: StorageConfig {
            budget_bytes: u64::MAX,
            pause_free_bytes: 0,
            resume_free_bytes: 1,
            scan_interval_secs: 3600,
            stale_temp_secs: 3600,
        },
        sources,
        data_root: std::env::temp_dir(),
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub orchestrator: Arc<Orchestrator>,
    pub storage_pause: watch::Sender<bool>,
    pub event_bus: EventBus,
    /// Keeps the database file alive for the test's duration
    pub data_dir: tempfile::TempDir,
}

/// Engine over a file-backed temp database
///
/// File-backed rather than :memory: because the job task and the test's
/// status polling use separate pool connections concurrently, and every
/// :memory: connection is its own database.
pub async fn test_env(sources: Vec<SourceDescriptor>) -> TestEnv {
    let data_dir = tempfile::TempDir::new().unwrap();
    let db_path = data_dir.path().join("medsync-test.db");
    let pool = medsync_common::db::init::init_database(&db_path).await.unwrap();

    let event_bus = EventBus::new(64);
    let (storage_pause, storage_pause_rx) = watch::channel(false);
    let config = Arc::new(test_config(sources));

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        event_bus.clone(),
        config,
        storage_pause_rx,
        ParsePool::new(2),
    ));

    TestEnv {
        pool,
        orchestrator,
        storage_pause,
        event_bus,
        data_dir,
    }
}

/// Poll a source's status until the predicate holds or the timeout expires
pub async fn wait_for_status<F>(env: &TestEnv, source_id: &str, timeout: Duration, predicate: F)
where
    F: Fn(&medsync_engine::services::orchestrator::JobStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(status) = env.orchestrator.status(source_id).await {
            if predicate(&status) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for status predicate; last state {:?}, processed {}, failed {}, error {:?}",
                    status.state, status.items_processed, status.items_failed, status.last_error
                );
            }
        } else if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for any status of '{}'", source_id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
