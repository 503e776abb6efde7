//! Checkpoint store
//!
//! One durable cursor row per source. `commit` is atomic (single UPSERT
//! inside SQLite's write transaction), idempotent, and refuses to move
//! backwards: a process restart reading the last committed checkpoint can
//! never observe a partially written or regressed value.

use crate::error::SyncError;
use crate::models::Checkpoint;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

/// Load the last committed checkpoint for a source
pub async fn load(pool: &SqlitePool, source_id: &str) -> Result<Option<Checkpoint>, SyncError> {
    let row = sqlx::query(
        "SELECT page_token, byte_offset, sequence FROM checkpoints WHERE source_id = ?",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| Checkpoint {
        page_token: row.get("page_token"),
        byte_offset: row.get::<i64, _>("byte_offset") as u64,
        sequence: row.get::<i64, _>("sequence") as u64,
    }))
}

/// Durably commit a checkpoint
///
/// Returns false when the stored sequence is already at or past the given
/// one (idempotent re-commit or a stale writer); the stored value is left
/// untouched in that case.
pub async fn commit(
    pool: &SqlitePool,
    source_id: &str,
    checkpoint: &Checkpoint,
) -> Result<bool, SyncError> {
    let result = sqlx::query(
        r#"
        INSERT INTO checkpoints (source_id, page_token, byte_offset, sequence, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            page_token = excluded.page_token,
            byte_offset = excluded.byte_offset,
            sequence = excluded.sequence,
            updated_at = excluded.updated_at
        WHERE excluded.sequence > checkpoints.sequence
        "#,
    )
    .bind(source_id)
    .bind(&checkpoint.page_token)
    .bind(checkpoint.byte_offset as i64)
    .bind(checkpoint.sequence as i64)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let advanced = result.rows_affected() > 0;
    if !advanced {
        tracing::debug!(
            source_id = %source_id,
            sequence = checkpoint.sequence,
            "Checkpoint commit was stale; stored cursor unchanged"
        );
    }
    Ok(advanced)
}

/// Remove a source's checkpoint (fresh sync from the beginning)
pub async fn clear(pool: &SqlitePool, source_id: &str) -> Result<(), SyncError> {
    sqlx::query("DELETE FROM checkpoints WHERE source_id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}
