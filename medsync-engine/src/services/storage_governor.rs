//! Storage governor
//!
//! Periodically measures the managed data root against its byte budget and
//! gates intake: when free budget drops below the pause threshold every
//! job is signalled to pause before its next fetch (in-flight writes
//! finish), a cleanup pass reclaims temp artifacts and uncompressed files
//! that have a compressed sibling, and jobs resume automatically once free
//! budget recovers above the higher resume threshold. The gap between the
//! two thresholds is the hysteresis band that prevents thrash.

use crate::config::StorageConfig;
use crate::models::{CleanupCandidate, CleanupReason, StorageSnapshot};
use chrono::Utc;
use medsync_common::events::{EventBus, SyncEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct StorageGovernor {
    config: StorageConfig,
    managed_root: std::path::PathBuf,
    event_bus: EventBus,
    /// true = paused; jobs wait on this at their suspension points
    pause_tx: watch::Sender<bool>,
    latest: Arc<RwLock<Option<StorageSnapshot>>>,
}

impl StorageGovernor {
    pub fn new(config: StorageConfig, managed_root: impl Into<std::path::PathBuf>, event_bus: EventBus) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            config,
            managed_root: managed_root.into(),
            event_bus,
            pause_tx,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Receiver jobs wait on at their suspension points
    pub fn pause_signal(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }

    /// Latest snapshot handle for the status API
    pub fn latest_snapshot(&self) -> Arc<RwLock<Option<StorageSnapshot>>> {
        self.latest.clone()
    }

    /// Run the periodic scan loop; intended for `tokio::spawn`
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One scan + threshold evaluation cycle
    pub async fn tick(&self) {
        let root = self.managed_root.clone();
        let stale_after = Duration::from_secs(self.config.stale_temp_secs);
        let budget = self.config.budget_bytes;

        let snapshot = match tokio::task::spawn_blocking(move || {
            take_snapshot(&root, budget, stale_after)
        })
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Storage scan task failed");
                return;
            }
        };

        let free = snapshot.free_bytes();
        let paused = *self.pause_tx.borrow();

        if !paused && free < self.config.pause_free_bytes {
            info!(
                used_bytes = snapshot.used_bytes,
                budget_bytes = snapshot.budget_bytes,
                "Free storage below pause threshold; pausing intake"
            );
            let _ = self.pause_tx.send(true);
            self.event_bus.emit_lossy(SyncEvent::StoragePaused {
                used_bytes: snapshot.used_bytes,
                budget_bytes: snapshot.budget_bytes,
                timestamp: Utc::now(),
            });
            self.cleanup(&snapshot).await;
        } else if paused && free >= self.config.resume_free_bytes {
            info!(
                used_bytes = snapshot.used_bytes,
                "Free storage recovered above resume threshold; resuming intake"
            );
            let _ = self.pause_tx.send(false);
            self.event_bus.emit_lossy(SyncEvent::StorageResumed {
                used_bytes: snapshot.used_bytes,
                budget_bytes: snapshot.budget_bytes,
                timestamp: Utc::now(),
            });
        }

        *self.latest.write().await = Some(snapshot);
    }

    /// Delete cleanup candidates; failures are logged and skipped
    async fn cleanup(&self, snapshot: &StorageSnapshot) {
        for candidate in &snapshot.cleanup_candidates {
            match tokio::fs::remove_file(&candidate.path).await {
                Ok(()) => info!(
                    path = %candidate.path.display(),
                    reason = ?candidate.reason,
                    bytes = candidate.bytes,
                    "Reclaimed storage"
                ),
                Err(e) => warn!(
                    path = %candidate.path.display(),
                    error = %e,
                    "Cleanup candidate could not be removed"
                ),
            }
        }
    }
}

/// Walk the managed tree and compute a snapshot
///
/// Cleanup candidates are stale `*.tmp` / `*.partial` artifacts and
/// uncompressed files lying next to a `.gz` sibling of the same name
/// (the compressed copy is the retained form).
pub fn take_snapshot(root: &Path, budget_bytes: u64, stale_after: Duration) -> StorageSnapshot {
    let mut used_bytes: u64 = 0;
    let mut candidates = Vec::new();
    let now = SystemTime::now();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let bytes = metadata.len();
        used_bytes += bytes;

        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if name.ends_with(".tmp") || name.ends_with(".partial") {
            let stale = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .map(|age| age >= stale_after)
                .unwrap_or(false);
            if stale {
                candidates.push(CleanupCandidate {
                    path: path.to_path_buf(),
                    reason: CleanupReason::StaleTemp,
                    bytes,
                });
            }
            continue;
        }

        if !name.ends_with(".gz") {
            let mut gz_name = path.as_os_str().to_os_string();
            gz_name.push(".gz");
            if Path::new(&gz_name).is_file() {
                candidates.push(CleanupCandidate {
                    path: path.to_path_buf(),
                    reason: CleanupReason::UncompressedWithGzSibling,
                    bytes,
                });
            }
        }
    }

    StorageSnapshot {
        taken_at: Utc::now(),
        managed_root: root.to_path_buf(),
        used_bytes,
        budget_bytes,
        cleanup_candidates: candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, bytes: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; bytes]).unwrap();
        path
    }

    #[test]
    fn test_snapshot_counts_used_bytes() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "a.jsonl", 100);
        write_file(temp.path(), "b.xml", 50);

        let snapshot = take_snapshot(temp.path(), 1000, Duration::from_secs(3600));
        assert_eq!(snapshot.used_bytes, 150);
        assert_eq!(snapshot.free_bytes(), 850);
        assert!(snapshot.cleanup_candidates.is_empty());
    }

    #[test]
    fn test_uncompressed_with_gz_sibling_flagged() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "baseline-01.xml", 500);
        write_file(temp.path(), "baseline-01.xml.gz", 80);
        write_file(temp.path(), "baseline-02.xml", 400); // no sibling

        let snapshot = take_snapshot(temp.path(), 10_000, Duration::from_secs(3600));
        let flagged: Vec<_> = snapshot
            .cleanup_candidates
            .iter()
            .filter(|c| c.reason == CleanupReason::UncompressedWithGzSibling)
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].path.ends_with("baseline-01.xml"));
    }

    #[test]
    fn test_fresh_temp_files_not_flagged() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "download.partial", 100);

        // stale_after of an hour: a file written just now is not stale
        let snapshot = take_snapshot(temp.path(), 10_000, Duration::from_secs(3600));
        assert!(snapshot.cleanup_candidates.is_empty());

        // stale_after of zero: everything qualifies
        let snapshot = take_snapshot(temp.path(), 10_000, Duration::from_secs(0));
        assert_eq!(snapshot.cleanup_candidates.len(), 1);
        assert_eq!(snapshot.cleanup_candidates[0].reason, CleanupReason::StaleTemp);
    }

    fn governor_with(temp: &TempDir, budget: u64, pause: u64, resume: u64) -> Arc<StorageGovernor> {
        let config = StorageConfig {
            budget_bytes: budget,
            pause_free_bytes: pause,
            resume_free_bytes: resume,
            scan_interval_secs: 3600,
            stale_temp_secs: 0,
        };
        Arc::new(StorageGovernor::new(
            config,
            temp.path().to_path_buf(),
            EventBus::new(16),
        ))
    }

    #[tokio::test]
    async fn test_pause_and_auto_resume_with_hysteresis() {
        let temp = TempDir::new().unwrap();
        // Budget 1000, pause below 200 free, resume at 500 free
        let governor = governor_with(&temp, 1000, 200, 500);
        let mut signal = governor.pause_signal();

        // 900 used → 100 free → pause
        let big = write_file(temp.path(), "dump.jsonl", 900);
        governor.tick().await;
        assert!(*signal.borrow_and_update());

        // 600 used → 400 free: inside the hysteresis band, stays paused
        fs::write(&big, vec![b'x'; 600]).unwrap();
        governor.tick().await;
        assert!(*signal.borrow_and_update());

        // 400 used → 600 free: above resume threshold, resumes
        fs::write(&big, vec![b'x'; 400]).unwrap();
        governor.tick().await;
        assert!(!*signal.borrow_and_update());
    }

    #[tokio::test]
    async fn test_pause_triggers_cleanup() {
        let temp = TempDir::new().unwrap();
        let governor = governor_with(&temp, 1000, 200, 500);

        write_file(temp.path(), "big.jsonl", 850);
        let stale = write_file(temp.path(), "leftover.tmp", 100);

        governor.tick().await;
        // Cleanup ran during the pause tick and removed the stale artifact
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_snapshot_published_for_status() {
        let temp = TempDir::new().unwrap();
        let governor = governor_with(&temp, 1000, 200, 500);
        write_file(temp.path(), "a.xml", 10);

        governor.tick().await;
        let latest = governor.latest_snapshot();
        let snapshot = latest.read().await.clone().unwrap();
        assert_eq!(snapshot.used_bytes, 10);
    }
}
