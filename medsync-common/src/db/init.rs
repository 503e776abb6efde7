//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to
//! date. All `create_*_table` functions are idempotent (CREATE TABLE IF NOT
//! EXISTS) and safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pool sized for one writer per dataset kind plus status readers
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while one batch writer holds the lock
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Short busy timeout; contention is handled by the batcher's own
    // backoff-and-retry loop rather than by long blocking waits.
    sqlx::query("PRAGMA busy_timeout = 250").execute(&pool).await?;

    create_canonical_records_table(&pool).await?;
    create_checkpoints_table(&pool).await?;
    create_sync_jobs_table(&pool).await?;
    create_merge_audit_table(&pool).await?;
    create_advisory_locks_table(&pool).await?;

    Ok(pool)
}

/// Canonical record store
///
/// One row per logical entity per dataset kind; the fingerprint is the
/// dedup identity and carries a UNIQUE constraint scoped to the kind.
pub async fn create_canonical_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_records (
            guid TEXT PRIMARY KEY,
            dataset_kind TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            natural_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_revision TEXT,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            merged_from TEXT,
            UNIQUE(dataset_kind, fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_canonical_records_kind_key \
         ON canonical_records(dataset_kind, natural_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-source resume cursors
pub async fn create_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source_id TEXT PRIMARY KEY,
            page_token TEXT,
            byte_offset INTEGER NOT NULL DEFAULT 0,
            sequence INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Job archive; survives restarts so status queries can report the last run
pub async fn create_sync_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            job_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            state TEXT NOT NULL,
            items_processed INTEGER NOT NULL DEFAULT 0,
            items_failed INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_jobs_source ON sync_jobs(source_id, started_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge audit log: before/after snapshots for every consolidation
pub async fn create_merge_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merge_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_kind TEXT NOT NULL,
            winner_guid TEXT NOT NULL,
            loser_fingerprint TEXT NOT NULL,
            similarity REAL NOT NULL,
            policy TEXT NOT NULL,
            before_payload TEXT NOT NULL,
            after_payload TEXT NOT NULL,
            merged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Named advisory locks scoped to a dataset kind
///
/// SQLite has no server-side advisory locks; a conditional INSERT into this
/// table is the cooperative equivalent. Rows are removed on release.
pub async fn create_advisory_locks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS advisory_locks (
            lock_name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
