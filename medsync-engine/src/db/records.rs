//! Canonical record store operations
//!
//! All write paths run inside the batch writer's transaction; callers pass
//! the open connection. The (dataset_kind, fingerprint) unique constraint
//! is the dedup backstop at the storage layer.

use crate::error::SyncError;
use crate::models::{CanonicalRecord, DatasetKind};
use crate::services::dedup::StoredCandidate;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Candidate rows for dedup classification
///
/// Prefiltered by the blocking key (first natural-key component) so the
/// similarity pass never scans a whole dataset kind.
pub async fn fetch_candidates(
    conn: &mut SqliteConnection,
    kind: DatasetKind,
    blocking_key: &str,
) -> Result<Vec<StoredCandidate>, SyncError> {
    let pattern = format!(
        "{}%",
        blocking_key.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let rows = sqlx::query(
        "SELECT guid, fingerprint, natural_key FROM canonical_records \
         WHERE dataset_kind = ? AND natural_key LIKE ? ESCAPE '\\'",
    )
    .bind(kind.as_str())
    .bind(pattern)
    .fetch_all(conn)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let guid: String = row.get("guid");
        candidates.push(StoredCandidate {
            guid: Uuid::parse_str(&guid)
                .map_err(|e| SyncError::PermanentRecord(format!("bad guid in store: {}", e)))?,
            fingerprint: row.get("fingerprint"),
            natural_key: row.get("natural_key"),
        });
    }
    Ok(candidates)
}

/// Stored payload of one row
pub async fn get_payload(
    conn: &mut SqliteConnection,
    guid: Uuid,
) -> Result<serde_json::Value, SyncError> {
    let payload: String =
        sqlx::query_scalar("SELECT payload FROM canonical_records WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_one(conn)
            .await?;
    serde_json::from_str(&payload)
        .map_err(|e| SyncError::PermanentRecord(format!("bad payload in store: {}", e)))
}

/// Insert a brand-new canonical record
pub async fn insert_record(
    conn: &mut SqliteConnection,
    record: &CanonicalRecord,
) -> Result<(), SyncError> {
    let now = record.provenance.retrieved_at.to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO canonical_records
            (guid, dataset_kind, fingerprint, natural_key, payload,
             source_id, source_revision, first_seen_at, last_seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.guid.to_string())
    .bind(record.dataset_kind.as_str())
    .bind(&record.fingerprint)
    .bind(&record.natural_key)
    .bind(record.payload.to_string())
    .bind(&record.provenance.source_id)
    .bind(&record.provenance.source_revision)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await
    .map_err(crate::db::classify_db_error)?;
    Ok(())
}

/// Refresh provenance on an exact duplicate; the payload stays untouched
pub async fn touch_last_seen(
    conn: &mut SqliteConnection,
    guid: Uuid,
    source_id: &str,
    source_revision: Option<&str>,
) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE canonical_records \
         SET last_seen_at = ?, source_id = ?, source_revision = COALESCE(?, source_revision) \
         WHERE guid = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(source_id)
    .bind(source_revision)
    .bind(guid.to_string())
    .execute(conn)
    .await
    .map_err(crate::db::classify_db_error)?;
    Ok(())
}

/// Apply a consolidation: update the winner's payload, retain the loser's
/// provenance in merged_from, and write the audit row
pub async fn apply_merge(
    conn: &mut SqliteConnection,
    winner: Uuid,
    merged_payload: &serde_json::Value,
    before_payload: &serde_json::Value,
    loser: &CanonicalRecord,
    similarity: f64,
    policy: &str,
) -> Result<(), SyncError> {
    let merged_from: Option<String> =
        sqlx::query_scalar("SELECT merged_from FROM canonical_records WHERE guid = ?")
            .bind(winner.to_string())
            .fetch_one(&mut *conn)
            .await?;

    let mut secondary: Vec<serde_json::Value> = merged_from
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    secondary.push(serde_json::json!({
        "fingerprint": loser.fingerprint,
        "source_id": loser.provenance.source_id,
        "retrieved_at": loser.provenance.retrieved_at.to_rfc3339(),
        "source_revision": loser.provenance.source_revision,
    }));

    sqlx::query(
        "UPDATE canonical_records SET payload = ?, merged_from = ?, last_seen_at = ? WHERE guid = ?",
    )
    .bind(merged_payload.to_string())
    .bind(serde_json::Value::Array(secondary).to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(winner.to_string())
    .execute(&mut *conn)
    .await
    .map_err(crate::db::classify_db_error)?;

    sqlx::query(
        r#"
        INSERT INTO merge_audit
            (dataset_kind, winner_guid, loser_fingerprint, similarity, policy,
             before_payload, after_payload, merged_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(loser.dataset_kind.as_str())
    .bind(winner.to_string())
    .bind(&loser.fingerprint)
    .bind(similarity)
    .bind(policy)
    .bind(before_payload.to_string())
    .bind(merged_payload.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(crate::db::classify_db_error)?;

    Ok(())
}

/// Count stored rows of one kind
pub async fn count_by_kind(pool: &SqlitePool, kind: DatasetKind) -> Result<i64, SyncError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM canonical_records WHERE dataset_kind = ?")
            .bind(kind.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}
