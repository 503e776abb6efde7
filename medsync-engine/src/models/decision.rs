//! Duplicate classification outcome
//!
//! Never persisted standalone; consumed immediately by the ingestion
//! batcher's writer.

use uuid::Uuid;

/// Outcome of comparing a canonical record against the store
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateDecision {
    /// No matching entity; insert a new row
    New,
    /// Identical (kind, fingerprint); refresh provenance only
    ExactDuplicate { existing: Uuid },
    /// Same kind, high field similarity, differing fingerprint
    MergeCandidate { existing: Uuid, similarity: f64 },
}
