//! Sync job persistence
//!
//! Jobs are archived here on every state transition so status queries
//! survive process restarts. The in-memory job owned by the orchestrator
//! is authoritative while the process lives.

use crate::error::SyncError;
use crate::models::{JobState, SyncJob};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Upsert a job row
pub async fn save_job(pool: &SqlitePool, job: &SyncJob) -> Result<(), SyncError> {
    sqlx::query(
        r#"
        INSERT INTO sync_jobs
            (job_id, source_id, state, items_processed, items_failed, last_error, started_at, ended_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            state = excluded.state,
            items_processed = excluded.items_processed,
            items_failed = excluded.items_failed,
            last_error = excluded.last_error,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(&job.source_id)
    .bind(job.state.as_str())
    .bind(job.items_processed as i64)
    .bind(job.items_failed as i64)
    .bind(&job.last_error)
    .bind(job.started_at.to_rfc3339())
    .bind(job.ended_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}

fn job_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SyncJob, SyncError> {
    let job_id: String = row.get("job_id");
    let state: String = row.get("state");
    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    Ok(SyncJob {
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| SyncError::PermanentRecord(format!("bad job_id in store: {}", e)))?,
        source_id: row.get("source_id"),
        state: state
            .parse::<JobState>()
            .map_err(SyncError::PermanentRecord)?,
        resume_state: None,
        items_processed: row.get::<i64, _>("items_processed") as u64,
        items_failed: row.get::<i64, _>("items_failed") as u64,
        last_error: row.get("last_error"),
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map_err(|e| SyncError::PermanentRecord(format!("bad started_at: {}", e)))?
            .with_timezone(&Utc),
        ended_at: ended_at
            .map(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| SyncError::PermanentRecord(format!("bad ended_at: {}", e)))
            })
            .transpose()?,
    })
}

/// Most recent job for a source, if any
pub async fn load_latest_for_source(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<Option<SyncJob>, SyncError> {
    let row = sqlx::query(
        r#"
        SELECT job_id, source_id, state, items_processed, items_failed, last_error, started_at, ended_at
        FROM sync_jobs
        WHERE source_id = ?
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    row.map(job_from_row).transpose()
}
