//! Orchestrator
//!
//! Supervises one job per source, runs jobs concurrently and independently,
//! and exposes start/pause/resume/cancel/status control. A failure or
//! pause in one source's job has no effect on any other.
//!
//! Job loop per page:
//!   Fetching → (RateLimited ⇄ Fetching) → Parsing → Ingesting →
//!   Checkpointing → Fetching ... | Completed | Failed
//! Paused is entered from any loop state (storage governor or operator)
//! and returns to the same state on resume. Cancellation is honored at
//! suspension points only, never mid-batch; the checkpoint stays at its
//! last committed value.

use crate::config::EngineConfig;
use crate::db;
use crate::error::{ApiError, SyncError};
use crate::models::{CanonicalRecord, Checkpoint, JobState, SourceDescriptor, SyncJob};
use crate::services::batcher::{IngestionBatcher, SqliteBatchWriter};
use crate::services::dedup::DedupEngine;
use crate::services::normalizer;
use crate::services::rate_governor::RateGovernor;
use crate::services::retry::BackoffPolicy;
use crate::services::ParsePool;
use crate::sources::{build_adapter, SourceAdapter};
use chrono::Utc;
use medsync_common::events::{EventBus, SyncEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Control handle for one running job
struct JobHandle {
    job: Arc<RwLock<SyncJob>>,
    cancel: CancellationToken,
    manual_pause: watch::Sender<bool>,
}

/// Status view returned to the control surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub job_id: uuid::Uuid,
    pub source_id: String,
    pub state: JobState,
    pub items_processed: u64,
    pub items_failed: u64,
    pub last_error: Option<String>,
    pub started_at: chrono::DateTime<Utc>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    /// Human-readable checkpoint position
    pub checkpoint: Option<String>,
}

pub struct Orchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    config: Arc<EngineConfig>,
    parse_pool: ParsePool,
    storage_pause: watch::Receiver<bool>,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: Arc<EngineConfig>,
        storage_pause: watch::Receiver<bool>,
        parse_pool: ParsePool,
    ) -> Self {
        Self {
            db,
            event_bus,
            config,
            parse_pool,
            storage_pause,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Start a sync job for a configured source
    pub async fn start(&self, source_id: &str) -> Result<JobStatus, ApiError> {
        let descriptor = self
            .config
            .source(source_id)
            .ok_or_else(|| ApiError::NotFound(format!("unknown source: {}", source_id)))?
            .clone();

        let adapter = build_adapter(&descriptor, &self.config.spool_dir(), self.parse_pool.clone())
            .map_err(|e| ApiError::Internal(format!("adapter construction failed: {}", e)))?;

        self.spawn_job(descriptor, adapter).await
    }

    /// Start a job with an explicit adapter
    ///
    /// The seam `start` goes through; also the entry point for tests that
    /// script a source's behavior.
    pub async fn spawn_job(
        &self,
        descriptor: SourceDescriptor,
        adapter: Box<dyn SourceAdapter>,
    ) -> Result<JobStatus, ApiError> {
        let mut jobs = self.jobs.write().await;

        if let Some(handle) = jobs.get(&descriptor.id) {
            if !handle.job.read().await.is_terminal() {
                return Err(ApiError::Conflict(format!(
                    "sync already running for source '{}'",
                    descriptor.id
                )));
            }
        }

        let job = SyncJob::new(&descriptor.id);
        db::jobs::save_job(&self.db, &job)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let job_shared = Arc::new(RwLock::new(job.clone()));
        let cancel = CancellationToken::new();
        let (manual_pause, manual_pause_rx) = watch::channel(false);

        let ctx = JobContext {
            db: self.db.clone(),
            event_bus: self.event_bus.clone(),
            config: self.config.clone(),
            descriptor: descriptor.clone(),
            adapter: adapter.into(),
            job: job_shared.clone(),
            cancel: cancel.clone(),
            storage_pause: self.storage_pause.clone(),
            manual_pause: manual_pause_rx,
            parse_pool: self.parse_pool.clone(),
        };

        info!(source_id = %descriptor.id, job_id = %job.job_id, "Starting sync job");
        tokio::spawn(async move { ctx.run().await });

        jobs.insert(
            descriptor.id.clone(),
            JobHandle {
                job: job_shared,
                cancel,
                manual_pause,
            },
        );

        Ok(JobStatus::from_job(&job, None))
    }

    /// Operator pause; honored at the job's next suspension point
    pub async fn pause(&self, source_id: &str) -> Result<(), ApiError> {
        let jobs = self.jobs.read().await;
        let handle = jobs
            .get(source_id)
            .ok_or_else(|| ApiError::NotFound(format!("no job for source: {}", source_id)))?;
        if handle.job.read().await.is_terminal() {
            return Err(ApiError::Conflict(format!(
                "job for source '{}' already finished",
                source_id
            )));
        }
        let _ = handle.manual_pause.send(true);
        Ok(())
    }

    /// Clear an operator pause
    pub async fn resume(&self, source_id: &str) -> Result<(), ApiError> {
        let jobs = self.jobs.read().await;
        let handle = jobs
            .get(source_id)
            .ok_or_else(|| ApiError::NotFound(format!("no job for source: {}", source_id)))?;
        let _ = handle.manual_pause.send(false);
        Ok(())
    }

    /// Cooperative cancel; honored at the next suspension point
    pub async fn cancel(&self, source_id: &str) -> Result<(), ApiError> {
        let jobs = self.jobs.read().await;
        let handle = jobs
            .get(source_id)
            .ok_or_else(|| ApiError::NotFound(format!("no job for source: {}", source_id)))?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Status of the current (or most recent) job for a source
    pub async fn status(&self, source_id: &str) -> Result<JobStatus, ApiError> {
        let checkpoint = db::checkpoints::load(&self.db, source_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let jobs = self.jobs.read().await;
        if let Some(handle) = jobs.get(source_id) {
            let job = handle.job.read().await.clone();
            return Ok(JobStatus::from_job(&job, checkpoint.as_ref()));
        }
        drop(jobs);

        // Not running in this process: fall back to the archive
        let job = db::jobs::load_latest_for_source(&self.db, source_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(format!("no job history for source: {}", source_id)))?;
        Ok(JobStatus::from_job(&job, checkpoint.as_ref()))
    }

    /// Status of every configured source
    pub async fn list_statuses(&self) -> Vec<(String, Option<JobStatus>)> {
        let mut out = Vec::new();
        for source in &self.config.sources {
            out.push((source.id.clone(), self.status(&source.id).await.ok()));
        }
        out
    }
}

impl JobStatus {
    fn from_job(job: &SyncJob, checkpoint: Option<&Checkpoint>) -> Self {
        Self {
            job_id: job.job_id,
            source_id: job.source_id.clone(),
            state: job.state,
            items_processed: job.items_processed,
            items_failed: job.items_failed,
            last_error: job.last_error.clone(),
            started_at: job.started_at,
            ended_at: job.ended_at,
            checkpoint: checkpoint.map(|c| c.position()),
        }
    }
}

/// Everything one job task owns
struct JobContext {
    db: SqlitePool,
    event_bus: EventBus,
    config: Arc<EngineConfig>,
    descriptor: SourceDescriptor,
    adapter: Arc<dyn SourceAdapter>,
    job: Arc<RwLock<SyncJob>>,
    cancel: CancellationToken,
    storage_pause: watch::Receiver<bool>,
    manual_pause: watch::Receiver<bool>,
    parse_pool: ParsePool,
}

impl JobContext {
    async fn run(mut self) {
        let source_id = self.descriptor.id.clone();
        match self.job_loop().await {
            Ok(()) => {}
            Err(e) => {
                error!(source_id = %source_id, error = %e, "Sync job failed");
                let job_snapshot = {
                    let mut job = self.job.write().await;
                    job.record_error(e.status_text());
                    job.transition_to(JobState::Failed);
                    job.clone()
                };
                if let Err(save_error) = db::jobs::save_job(&self.db, &job_snapshot).await {
                    error!(source_id = %source_id, error = %save_error, "Failed job could not be archived");
                }
                self.event_bus.emit_lossy(SyncEvent::JobFailed {
                    job_id: job_snapshot.job_id,
                    source_id,
                    error: job_snapshot.last_error.unwrap_or_default(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Transition, persist, broadcast
    async fn transition(&self, new_state: JobState) {
        let (old_state, job_snapshot) = {
            let mut job = self.job.write().await;
            let (old, _) = job.transition_to(new_state);
            (old, job.clone())
        };
        if old_state == new_state {
            return;
        }
        if let Err(e) = db::jobs::save_job(&self.db, &job_snapshot).await {
            warn!(error = %e, "Job state could not be persisted");
        }
        self.event_bus.emit_lossy(SyncEvent::JobStateChanged {
            job_id: job_snapshot.job_id,
            source_id: job_snapshot.source_id,
            old_state: old_state.as_str().to_string(),
            new_state: new_state.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Suspension point: wait out storage/operator pauses, observe cancel
    ///
    /// Returns false when the job was cancelled while waiting.
    async fn pause_gate(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let paused = *self.storage_pause.borrow() || *self.manual_pause.borrow();
            if !paused {
                break;
            }

            let was_paused = {
                let mut job = self.job.write().await;
                if job.state != JobState::Paused {
                    job.pause();
                    Some(job.clone())
                } else {
                    None
                }
            };
            if let Some(snapshot) = was_paused {
                info!(source_id = %snapshot.source_id, "Job paused");
                let _ = db::jobs::save_job(&self.db, &snapshot).await;
                self.event_bus.emit_lossy(SyncEvent::JobStateChanged {
                    job_id: snapshot.job_id,
                    source_id: snapshot.source_id,
                    old_state: snapshot.resume_state.unwrap_or(JobState::Fetching).as_str().to_string(),
                    new_state: JobState::Paused.as_str().to_string(),
                    timestamp: Utc::now(),
                });
            }

            let mut storage = self.storage_pause.clone();
            let mut manual = self.manual_pause.clone();
            tokio::select! {
                _ = storage.changed() => {}
                _ = manual.changed() => {}
                // Re-poll periodically; a flip between borrow and select
                // must not strand the job in Paused
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = self.cancel.cancelled() => return false,
            }
        }

        // Leaving a pause restores the interrupted state
        let resumed = {
            let mut job = self.job.write().await;
            if job.state == JobState::Paused {
                job.resume();
                Some(job.clone())
            } else {
                None
            }
        };
        if let Some(snapshot) = resumed {
            info!(source_id = %snapshot.source_id, state = snapshot.state.as_str(), "Job resumed");
            let _ = db::jobs::save_job(&self.db, &snapshot).await;
        }
        true
    }

    async fn job_loop(&mut self) -> Result<(), SyncError> {
        let source_id = self.descriptor.id.clone();
        let kind = self.adapter.dataset_kind();

        let governor = RateGovernor::new(self.descriptor.rate_per_sec, self.descriptor.burst);
        let backoff = BackoffPolicy::from_config(&self.config.retry);
        let dedup = DedupEngine::new(
            kind,
            self.descriptor.similarity_threshold,
            self.descriptor.merge_policy,
        );
        let batcher = IngestionBatcher::new(
            Arc::new(SqliteBatchWriter::new(
                self.db.clone(),
                dedup,
                self.event_bus.clone(),
            )),
            backoff.clone(),
            self.config.retry.batch_retry_limit,
            self.config.engine.batch_size,
        );
        let fetch_deadline = Duration::from_secs(self.config.engine.fetch_deadline_secs);

        let mut checkpoint = db::checkpoints::load(&self.db, &source_id).await?;
        if let Some(cp) = &checkpoint {
            info!(source_id = %source_id, position = %cp.position(), "Resuming from checkpoint");
        }

        let mut consecutive_failures: u32 = 0;
        let mut transient_attempts: u32 = 0;

        loop {
            // Suspension point before every fetch
            if !self.pause_gate().await {
                self.transition(JobState::Cancelled).await;
                info!(source_id = %source_id, "Job cancelled");
                return Ok(());
            }

            self.transition(JobState::Fetching).await;

            if let Err(e) = governor.acquire(fetch_deadline).await {
                warn!(source_id = %source_id, error = %e, "Token acquisition timed out");
                transient_attempts += 1;
                if transient_attempts > self.config.retry.max_transient_retries {
                    transient_attempts = 0;
                    consecutive_failures += 1;
                    self.note_page_failure(consecutive_failures, e.status_text(), false)
                        .await?;
                }
                continue;
            }

            let page = match self.adapter.fetch_next_page(checkpoint.as_ref()).await {
                Ok(page) => {
                    governor.report_success().await;
                    page
                }
                Err(SyncError::RateLimited { retry_after }) => {
                    self.transition(JobState::RateLimited).await;
                    let window = governor.report_rate_limited(retry_after).await;
                    info!(
                        source_id = %source_id,
                        cooldown_ms = window.as_millis() as u64,
                        "Source rate limited; cooling down"
                    );
                    // Unbounded retries: the job is expected to eventually proceed
                    continue;
                }
                Err(SyncError::Transient(reason)) => {
                    transient_attempts += 1;
                    if transient_attempts <= self.config.retry.max_transient_retries {
                        warn!(
                            source_id = %source_id,
                            attempt = transient_attempts,
                            reason = %reason,
                            "Transient fetch error; backing off"
                        );
                        backoff.wait(transient_attempts - 1).await;
                        continue;
                    }
                    transient_attempts = 0;
                    consecutive_failures += 1;
                    self.note_page_failure(consecutive_failures, reason, true).await?;
                    continue;
                }
                Err(SyncError::PermanentRecord(reason)) => {
                    consecutive_failures += 1;
                    self.note_page_failure(consecutive_failures, reason, true).await?;
                    backoff.wait(consecutive_failures.saturating_sub(1)).await;
                    continue;
                }
                Err(other) => return Err(other),
            };
            transient_attempts = 0;

            // A structurally bad page with a knowable successor: log, count,
            // advance the cursor past it, keep going.
            if let Some(reason) = page.page_error {
                consecutive_failures += 1;
                self.note_page_failure(consecutive_failures, reason, true).await?;
                self.transition(JobState::Checkpointing).await;
                db::checkpoints::commit(&self.db, &source_id, &page.next_checkpoint).await?;
                checkpoint = Some(page.next_checkpoint);
                if !page.has_more {
                    break;
                }
                continue;
            }

            // Parsing / normalization, offloaded to the worker pool
            self.transition(JobState::Parsing).await;
            let raw_records = page.records;
            let normalize_source = source_id.clone();
            let (records, rejected): (Vec<CanonicalRecord>, u64) = self
                .parse_pool
                .run(move || {
                    let mut records = Vec::with_capacity(raw_records.len());
                    let mut rejected: u64 = 0;
                    for raw in &raw_records {
                        match normalizer::normalize(kind, &normalize_source, None, raw) {
                            Ok(canonical) => records.push(canonical),
                            Err(e) => {
                                warn!(error = %e, "Record rejected during normalization");
                                rejected += 1;
                            }
                        }
                    }
                    (records, rejected)
                })
                .await;
            if rejected > 0 {
                let mut job = self.job.write().await;
                job.items_failed += rejected;
            }

            // Ingest, then advance the checkpoint only after the commit
            self.transition(JobState::Ingesting).await;
            match batcher.commit(kind, &records).await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    {
                        let mut job = self.job.write().await;
                        job.items_processed += outcome.total() as u64;
                    }
                    self.event_bus.emit_lossy(SyncEvent::BatchCommitted {
                        source_id: source_id.clone(),
                        dataset_kind: kind.to_string(),
                        batch_size: records.len(),
                        new_records: outcome.new_records,
                        exact_duplicates: outcome.exact_duplicates,
                        merged: outcome.merged,
                        timestamp: Utc::now(),
                    });
                }
                Err(SyncError::WriteConflict(reason)) => {
                    // Batch aborted past the retry bound: the checkpoint
                    // stays put, the page is refetched on the next pass.
                    consecutive_failures += 1;
                    self.note_page_failure(consecutive_failures, reason, false).await?;
                    continue;
                }
                Err(other) => return Err(other),
            }

            self.transition(JobState::Checkpointing).await;
            db::checkpoints::commit(&self.db, &source_id, &page.next_checkpoint).await?;
            checkpoint = Some(page.next_checkpoint.clone());

            {
                let job = self.job.read().await;
                self.event_bus.emit_lossy(SyncEvent::PageCompleted {
                    job_id: job.job_id,
                    source_id: source_id.clone(),
                    sequence: page.next_checkpoint.sequence,
                    records: records.len(),
                    timestamp: Utc::now(),
                });
            }
            {
                let snapshot = self.job.read().await.clone();
                let _ = db::jobs::save_job(&self.db, &snapshot).await;
            }

            if !page.has_more {
                break;
            }
        }

        // Source exhausted
        self.transition(JobState::Completed).await;
        let snapshot = self.job.read().await.clone();
        let duration_seconds = snapshot
            .ended_at
            .map(|end| (end - snapshot.started_at).num_seconds().max(0) as u64)
            .unwrap_or(0);
        info!(
            source_id = %source_id,
            items_processed = snapshot.items_processed,
            items_failed = snapshot.items_failed,
            duration_seconds,
            "Sync job completed"
        );
        self.event_bus.emit_lossy(SyncEvent::JobCompleted {
            job_id: snapshot.job_id,
            source_id,
            items_processed: snapshot.items_processed,
            items_failed: snapshot.items_failed,
            duration_seconds,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record one page failure; errors out with PermanentJob when the
    /// consecutive-failure budget is exhausted
    async fn note_page_failure(
        &self,
        consecutive_failures: u32,
        reason: String,
        count_item: bool,
    ) -> Result<(), SyncError> {
        warn!(
            source_id = %self.descriptor.id,
            consecutive = consecutive_failures,
            reason = %reason,
            "Page failed"
        );
        {
            let mut job = self.job.write().await;
            if count_item {
                job.items_failed += 1;
            }
            job.record_error(&reason);
            let snapshot = job.clone();
            drop(job);
            let _ = db::jobs::save_job(&self.db, &snapshot).await;
        }

        if consecutive_failures > self.config.retry.consecutive_failure_budget {
            return Err(SyncError::PermanentJob(format!(
                "{} consecutive page failures (budget {}): {}",
                consecutive_failures, self.config.retry.consecutive_failure_budget, reason
            )));
        }
        Ok(())
    }
}
