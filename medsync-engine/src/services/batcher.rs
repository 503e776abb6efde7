//! Ingestion batcher
//!
//! Groups normalized records into bounded transactional batches and writes
//! them under the dataset-kind advisory lock. Batch lifecycle:
//!
//!   Pending → Locking → Writing → Committed | Aborted
//!
//! A write conflict sends the batch back to Pending and retries with
//! exponential backoff plus jitter, up to the configured bound. Exceeding
//! the bound aborts the batch; its records stay in the unprocessed stream
//! (the checkpoint is not advanced past them) and are retried on the job's
//! next pass.

use crate::db;
use crate::error::SyncError;
use crate::models::{CanonicalRecord, DatasetKind, DuplicateDecision};
use crate::services::dedup::DedupEngine;
use crate::services::retry::BackoffPolicy;
use async_trait::async_trait;
use medsync_common::events::{EventBus, SyncEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Batch lifecycle state, for logs and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Locking,
    Writing,
    Committed,
    Aborted,
}

/// What one committed batch did to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub new_records: usize,
    pub exact_duplicates: usize,
    pub merged: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.new_records + self.exact_duplicates + self.merged
    }
}

/// Seam between the batcher's retry machinery and the store
///
/// One attempt = lock, transact, write, release. Conflicts surface as
/// `SyncError::WriteConflict`; the batcher owns the retry decision.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn write(
        &self,
        kind: DatasetKind,
        records: &[CanonicalRecord],
    ) -> Result<BatchOutcome, SyncError>;
}

/// SQLite-backed writer: advisory lock per dataset kind, one transaction
/// per batch, dedup classification inside the transaction
pub struct SqliteBatchWriter {
    pool: SqlitePool,
    dedup: DedupEngine,
    event_bus: EventBus,
    /// Lock holder identity; unique per job
    holder: String,
}

impl SqliteBatchWriter {
    pub fn new(pool: SqlitePool, dedup: DedupEngine, event_bus: EventBus) -> Self {
        Self {
            pool,
            dedup,
            event_bus,
            holder: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl BatchWriter for SqliteBatchWriter {
    async fn write(
        &self,
        kind: DatasetKind,
        records: &[CanonicalRecord],
    ) -> Result<BatchOutcome, SyncError> {
        let lock_name = kind.lock_name();
        if !db::locks::try_acquire(&self.pool, &lock_name, &self.holder).await? {
            return Err(SyncError::WriteConflict(format!(
                "advisory lock '{}' held elsewhere",
                lock_name
            )));
        }

        let result = self.write_locked(kind, records).await;

        // Release unconditionally; a failed release would wedge every
        // later batch of this kind.
        if let Err(release_error) = db::locks::release(&self.pool, &lock_name, &self.holder).await {
            warn!(lock = %lock_name, error = %release_error, "Advisory lock release failed");
        }

        result
    }
}

impl SqliteBatchWriter {
    async fn write_locked(
        &self,
        kind: DatasetKind,
        records: &[CanonicalRecord],
    ) -> Result<BatchOutcome, SyncError> {
        let mut tx = self.pool.begin().await.map_err(db::classify_db_error)?;
        let mut outcome = BatchOutcome::default();

        for record in records {
            let candidates =
                db::records::fetch_candidates(&mut tx, kind, record.blocking_key()).await?;

            match self.dedup.classify(record, &candidates) {
                DuplicateDecision::New => {
                    db::records::insert_record(&mut tx, record).await?;
                    outcome.new_records += 1;
                }
                DuplicateDecision::ExactDuplicate { existing } => {
                    db::records::touch_last_seen(
                        &mut tx,
                        existing,
                        &record.provenance.source_id,
                        record.provenance.source_revision.as_deref(),
                    )
                    .await?;
                    outcome.exact_duplicates += 1;
                }
                DuplicateDecision::MergeCandidate { existing, similarity } => {
                    let existing_payload = db::records::get_payload(&mut tx, existing).await?;
                    let merge = self.dedup.merge(&existing_payload, record);
                    db::records::apply_merge(
                        &mut tx,
                        existing,
                        &merge.merged_payload,
                        &merge.before_payload,
                        record,
                        similarity,
                        &self.dedup.policy().to_string(),
                    )
                    .await?;
                    info!(
                        kind = %kind,
                        winner = %existing,
                        similarity,
                        policy = %self.dedup.policy(),
                        "Consolidated near-duplicate record"
                    );
                    self.event_bus.emit_lossy(SyncEvent::RecordsMerged {
                        dataset_kind: kind.to_string(),
                        winner: existing,
                        similarity,
                        policy: self.dedup.policy().to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    outcome.merged += 1;
                }
            }
        }

        tx.commit().await.map_err(db::classify_db_error)?;
        Ok(outcome)
    }
}

/// Retry-bounded batch committer
pub struct IngestionBatcher {
    writer: Arc<dyn BatchWriter>,
    backoff: BackoffPolicy,
    retry_limit: u32,
    batch_size: usize,
}

impl IngestionBatcher {
    pub fn new(
        writer: Arc<dyn BatchWriter>,
        backoff: BackoffPolicy,
        retry_limit: u32,
        batch_size: usize,
    ) -> Self {
        Self {
            writer,
            backoff,
            retry_limit,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Commit records in bounded sub-batches
    ///
    /// Stops at the first aborted sub-batch so the caller's checkpoint
    /// never advances past uncommitted records.
    pub async fn commit(
        &self,
        kind: DatasetKind,
        records: &[CanonicalRecord],
    ) -> Result<BatchOutcome, SyncError> {
        let mut total = BatchOutcome::default();
        for chunk in records.chunks(self.batch_size.max(1)) {
            let outcome = self.commit_one(kind, chunk).await?;
            total.new_records += outcome.new_records;
            total.exact_duplicates += outcome.exact_duplicates;
            total.merged += outcome.merged;
        }
        Ok(total)
    }

    async fn commit_one(
        &self,
        kind: DatasetKind,
        records: &[CanonicalRecord],
    ) -> Result<BatchOutcome, SyncError> {
        let mut state = BatchState::Pending;
        let mut attempt: u32 = 0;

        loop {
            state = BatchState::Locking;
            debug!(kind = %kind, state = ?state, attempt, batch = records.len(), "Batch locking");

            state = BatchState::Writing;
            debug!(kind = %kind, state = ?state, "Batch writing");
            match self.writer.write(kind, records).await {
                Ok(outcome) => {
                    state = BatchState::Committed;
                    debug!(
                        kind = %kind,
                        state = ?state,
                        new = outcome.new_records,
                        duplicates = outcome.exact_duplicates,
                        merged = outcome.merged,
                        "Batch committed"
                    );
                    return Ok(outcome);
                }
                Err(SyncError::WriteConflict(reason)) => {
                    if attempt >= self.retry_limit {
                        state = BatchState::Aborted;
                        for record in records {
                            warn!(
                                kind = %kind,
                                state = ?state,
                                fingerprint = %record.fingerprint,
                                "Record failed for this run; retained in unprocessed stream"
                            );
                        }
                        return Err(SyncError::WriteConflict(format!(
                            "batch aborted after {} conflict retries: {}",
                            attempt, reason
                        )));
                    }
                    state = BatchState::Pending;
                    debug!(
                        kind = %kind,
                        state = ?state,
                        attempt,
                        reason = %reason,
                        "Write conflict; batch re-queued with backoff"
                    );
                    self.backoff.wait(attempt).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MergePolicy, Provenance};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn drug_record(natural_key: &str, fingerprint: &str) -> CanonicalRecord {
        CanonicalRecord {
            guid: Uuid::new_v4(),
            dataset_kind: DatasetKind::DrugRegistry,
            natural_key: natural_key.to_string(),
            fingerprint: fingerprint.to_string(),
            payload: json!({"generic_name": natural_key.split('|').next().unwrap()}),
            provenance: Provenance {
                source_id: "drug-registry".to_string(),
                retrieved_at: Utc::now(),
                source_revision: None,
            },
        }
    }

    /// Writer that fails with WriteConflict a scripted number of times
    struct FlakyWriter {
        conflicts_remaining: AtomicU32,
        commits: AtomicU32,
    }

    impl FlakyWriter {
        fn new(conflicts: u32) -> Self {
            Self {
                conflicts_remaining: AtomicU32::new(conflicts),
                commits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchWriter for FlakyWriter {
        async fn write(
            &self,
            _kind: DatasetKind,
            records: &[CanonicalRecord],
        ) -> Result<BatchOutcome, SyncError> {
            let remaining = self.conflicts_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(SyncError::WriteConflict("simulated deadlock".into()));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(BatchOutcome {
                new_records: records.len(),
                ..Default::default()
            })
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_conflicts_below_bound_eventually_commit() {
        let writer = Arc::new(FlakyWriter::new(3));
        let batcher = IngestionBatcher::new(writer.clone(), fast_backoff(), 3, 100);

        let records = vec![drug_record("metformin|500 mg|oral", "fp-1")];
        let outcome = batcher.commit(DatasetKind::DrugRegistry, &records).await.unwrap();

        assert_eq!(outcome.new_records, 1);
        assert_eq!(writer.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflicts_past_bound_abort() {
        let writer = Arc::new(FlakyWriter::new(4));
        let batcher = IngestionBatcher::new(writer.clone(), fast_backoff(), 3, 100);

        let records = vec![drug_record("metformin|500 mg|oral", "fp-1")];
        let result = batcher.commit(DatasetKind::DrugRegistry, &records).await;

        assert!(matches!(result, Err(SyncError::WriteConflict(_))));
        assert_eq!(writer.commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_sub_batches() {
        let writer = Arc::new(FlakyWriter::new(0));
        let batcher = IngestionBatcher::new(writer.clone(), fast_backoff(), 3, 2);

        let records: Vec<_> = (0..5)
            .map(|i| drug_record(&format!("drug-{}|1 mg|oral", i), &format!("fp-{}", i)))
            .collect();
        let outcome = batcher.commit(DatasetKind::DrugRegistry, &records).await.unwrap();

        assert_eq!(outcome.new_records, 5);
        // 5 records at batch_size 2 → 3 writer calls
        assert_eq!(writer.commits.load(Ordering::SeqCst), 3);
    }

    async fn sqlite_batcher(pool: &SqlitePool) -> IngestionBatcher {
        let dedup = DedupEngine::new(DatasetKind::DrugRegistry, None, MergePolicy::UnionOfFields);
        let writer = Arc::new(SqliteBatchWriter::new(pool.clone(), dedup, EventBus::new(16)));
        IngestionBatcher::new(writer, fast_backoff(), 3, 100)
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        medsync_common::db::init::create_canonical_records_table(&pool).await.unwrap();
        medsync_common::db::init::create_merge_audit_table(&pool).await.unwrap();
        medsync_common::db::init::create_advisory_locks_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sqlite_writer_no_double_count() {
        let pool = memory_pool().await;
        let batcher = sqlite_batcher(&pool).await;

        let record = drug_record("metformin|500 mg|oral", "fp-1");
        // Same logical record twice, as a retried page would replay it
        batcher
            .commit(DatasetKind::DrugRegistry, &[record.clone()])
            .await
            .unwrap();
        let second = batcher
            .commit(DatasetKind::DrugRegistry, &[record])
            .await
            .unwrap();

        assert_eq!(second.exact_duplicates, 1);
        assert_eq!(second.new_records, 0);

        let count = db::records::count_by_kind(&pool, DatasetKind::DrugRegistry)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sqlite_writer_consolidates_near_duplicate() {
        let pool = memory_pool().await;
        let batcher = sqlite_batcher(&pool).await; // union-of-fields policy

        let mut first = drug_record("metformin hydrochloride|500 mg|oral", "fp-1");
        first.payload = json!({"generic_name": "metformin hydrochloride", "ndc": "0001"});
        batcher
            .commit(DatasetKind::DrugRegistry, &[first])
            .await
            .unwrap();

        // Same entity with source formatting drift: differing fingerprint,
        // high natural-key similarity
        let mut drifted = drug_record("metformin hydrochloride|500mg|oral", "fp-2");
        drifted.payload =
            json!({"generic_name": "metformin hydrochloride", "manufacturer": "NewCo"});
        let outcome = batcher
            .commit(DatasetKind::DrugRegistry, &[drifted])
            .await
            .unwrap();

        assert_eq!(outcome.merged, 1);
        assert_eq!(outcome.new_records, 0);

        // One consolidated row, one audit entry, loser provenance retained
        let count = db::records::count_by_kind(&pool, DatasetKind::DrugRegistry)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let audit: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merge_audit")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(audit, 1);

        let merged_from: Option<String> =
            sqlx::query_scalar("SELECT merged_from FROM canonical_records LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(merged_from.unwrap().contains("fp-2"));
    }

    #[tokio::test]
    async fn test_sqlite_writer_blocked_by_foreign_lock() {
        let pool = memory_pool().await;
        let batcher = sqlite_batcher(&pool).await;

        // Someone else holds the drug-registry lock the whole time
        db::locks::try_acquire(&pool, &DatasetKind::DrugRegistry.lock_name(), "other-job")
            .await
            .unwrap();

        let records = vec![drug_record("metformin|500 mg|oral", "fp-1")];
        let result = batcher.commit(DatasetKind::DrugRegistry, &records).await;
        assert!(matches!(result, Err(SyncError::WriteConflict(_))));
    }
}
