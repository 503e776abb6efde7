//! Named advisory locks scoped to a dataset kind
//!
//! SQLite offers no server-side advisory locks, so a conditional INSERT
//! into a dedicated table stands in: the INSERT succeeds for exactly one
//! holder, everyone else sees zero affected rows and backs off. Unrelated
//! dataset kinds use different lock names and never contend.

use crate::error::SyncError;
use chrono::Utc;
use sqlx::SqlitePool;

/// Try to acquire a named lock; returns false when another holder has it
pub async fn try_acquire(
    pool: &SqlitePool,
    lock_name: &str,
    holder: &str,
) -> Result<bool, SyncError> {
    let result = sqlx::query(
        "INSERT INTO advisory_locks (lock_name, holder, acquired_at) VALUES (?, ?, ?) \
         ON CONFLICT(lock_name) DO NOTHING",
    )
    .bind(lock_name)
    .bind(holder)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(crate::db::classify_db_error)?;

    Ok(result.rows_affected() > 0)
}

/// Release a lock held by `holder`; a foreign holder's lock is left alone
pub async fn release(pool: &SqlitePool, lock_name: &str, holder: &str) -> Result<(), SyncError> {
    sqlx::query("DELETE FROM advisory_locks WHERE lock_name = ? AND holder = ?")
        .bind(lock_name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        medsync_common::db::init::create_advisory_locks_table(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_second_holder_blocked() {
        let pool = memory_pool().await;
        assert!(try_acquire(&pool, "ingest:drug-registry", "job-a").await.unwrap());
        assert!(!try_acquire(&pool, "ingest:drug-registry", "job-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_different_kinds_do_not_contend() {
        let pool = memory_pool().await;
        assert!(try_acquire(&pool, "ingest:drug-registry", "job-a").await.unwrap());
        assert!(try_acquire(&pool, "ingest:code-set", "job-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_frees_lock() {
        let pool = memory_pool().await;
        assert!(try_acquire(&pool, "ingest:code-set", "job-a").await.unwrap());
        release(&pool, "ingest:code-set", "job-a").await.unwrap();
        assert!(try_acquire(&pool, "ingest:code-set", "job-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_ignores_foreign_holder() {
        let pool = memory_pool().await;
        assert!(try_acquire(&pool, "ingest:code-set", "job-a").await.unwrap());
        release(&pool, "ingest:code-set", "job-b").await.unwrap();
        // job-a still holds it
        assert!(!try_acquire(&pool, "ingest:code-set", "job-c").await.unwrap());
    }
}
