//! Storage snapshot types
//!
//! A snapshot is a point-in-time reading of the managed data root. It is
//! recomputed on the governor's interval and never trusted beyond its own
//! freshness window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a file is eligible for cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupReason {
    /// Stale temp/partial download artifact
    StaleTemp,
    /// Uncompressed file with a compressed sibling of equal logical content
    UncompressedWithGzSibling,
}

/// One cleanup-eligible file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupCandidate {
    pub path: PathBuf,
    pub reason: CleanupReason,
    pub bytes: u64,
}

/// Point-in-time disk usage reading for the managed tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub taken_at: DateTime<Utc>,
    pub managed_root: PathBuf,
    /// Bytes currently used under the managed root
    pub used_bytes: u64,
    /// Configured byte budget for the managed root
    pub budget_bytes: u64,
    pub cleanup_candidates: Vec<CleanupCandidate>,
}

impl StorageSnapshot {
    /// Bytes still available inside the budget
    pub fn free_bytes(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.used_bytes)
    }

    /// Total bytes reclaimable by the cleanup pass
    pub fn reclaimable_bytes(&self) -> u64 {
        self.cleanup_candidates.iter().map(|c| c.bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_bytes_saturates() {
        let snapshot = StorageSnapshot {
            taken_at: Utc::now(),
            managed_root: PathBuf::from("/data"),
            used_bytes: 2048,
            budget_bytes: 1024,
            cleanup_candidates: vec![],
        };
        assert_eq!(snapshot.free_bytes(), 0);
    }

    #[test]
    fn test_reclaimable_sums_candidates() {
        let snapshot = StorageSnapshot {
            taken_at: Utc::now(),
            managed_root: PathBuf::from("/data"),
            used_bytes: 10,
            budget_bytes: 100,
            cleanup_candidates: vec![
                CleanupCandidate {
                    path: PathBuf::from("/data/tmp/a.partial"),
                    reason: CleanupReason::StaleTemp,
                    bytes: 40,
                },
                CleanupCandidate {
                    path: PathBuf::from("/data/spool/b.xml"),
                    reason: CleanupReason::UncompressedWithGzSibling,
                    bytes: 60,
                },
            ],
        };
        assert_eq!(snapshot.reclaimable_bytes(), 100);
    }
}
