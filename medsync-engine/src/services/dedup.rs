//! Deduplication and consolidation engine
//!
//! Pure classification and merge logic; all store access happens in the
//! batch writer, which feeds candidate rows in. Near-duplicate detection
//! uses Jaro-Winkler similarity over normalized natural keys with a
//! per-kind threshold (a global threshold does not hold up across record
//! shapes as dissimilar as trial registrations and billing codes).

use crate::models::{CanonicalRecord, DatasetKind, DuplicateDecision, MergePolicy};
use serde_json::Value;
use uuid::Uuid;

/// Default similarity thresholds per dataset kind
///
/// `None` disables fuzzy matching entirely: code sets are exact-only,
/// since two distinct billing codes can be one edit apart.
pub fn default_threshold(kind: DatasetKind) -> Option<f64> {
    match kind {
        DatasetKind::Bibliographic => Some(0.93),
        DatasetKind::TrialRegistry => Some(0.95),
        DatasetKind::DrugRegistry => Some(0.92),
        DatasetKind::CodeSet => None,
        DatasetKind::TopicCorpus => Some(0.90),
    }
}

/// A stored row the incoming record is compared against
#[derive(Debug, Clone)]
pub struct StoredCandidate {
    pub guid: Uuid,
    pub fingerprint: String,
    pub natural_key: String,
}

pub struct DedupEngine {
    kind: DatasetKind,
    threshold: Option<f64>,
    policy: MergePolicy,
}

/// Before/after payload snapshots for the merge audit log
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged_payload: Value,
    pub before_payload: Value,
}

impl DedupEngine {
    pub fn new(kind: DatasetKind, threshold_override: Option<f64>, policy: MergePolicy) -> Self {
        Self {
            kind,
            threshold: threshold_override.or_else(|| default_threshold(kind)),
            policy,
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Classify an incoming record against candidate rows of its kind
    ///
    /// Candidates must share the record's blocking key (first natural-key
    /// component); the writer is responsible for that prefilter.
    pub fn classify(
        &self,
        record: &CanonicalRecord,
        candidates: &[StoredCandidate],
    ) -> DuplicateDecision {
        debug_assert_eq!(record.dataset_kind, self.kind);

        if let Some(exact) = candidates
            .iter()
            .find(|c| c.fingerprint == record.fingerprint)
        {
            return DuplicateDecision::ExactDuplicate { existing: exact.guid };
        }

        let threshold = match self.threshold {
            Some(t) => t,
            None => return DuplicateDecision::New,
        };

        let best = candidates
            .iter()
            .map(|c| (c, strsim::jaro_winkler(&record.natural_key, &c.natural_key)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((candidate, similarity)) => DuplicateDecision::MergeCandidate {
                existing: candidate.guid,
                similarity,
            },
            None => DuplicateDecision::New,
        }
    }

    /// Consolidate an incoming near-duplicate into the existing payload
    ///
    /// Never destructive: the caller persists the returned before/after
    /// snapshots to the audit log and retains the loser's provenance as a
    /// secondary reference.
    pub fn merge(&self, existing_payload: &Value, incoming: &CanonicalRecord) -> MergeResult {
        let before_payload = existing_payload.clone();
        let merged_payload = match self.policy {
            MergePolicy::PreferNewest => incoming.payload.clone(),
            MergePolicy::PreferMoreComplete => {
                if populated_fields(&incoming.payload) > populated_fields(existing_payload) {
                    incoming.payload.clone()
                } else {
                    existing_payload.clone()
                }
            }
            MergePolicy::UnionOfFields => {
                let mut merged = existing_payload
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                if let Some(incoming_fields) = incoming.payload.as_object() {
                    for (key, value) in incoming_fields {
                        // Existing values win on conflict
                        merged.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
                Value::Object(merged)
            }
        };

        MergeResult {
            merged_payload,
            before_payload,
        }
    }
}

fn populated_fields(payload: &Value) -> usize {
    payload
        .as_object()
        .map(|o| {
            o.values()
                .filter(|v| match v {
                    Value::Null => false,
                    Value::String(s) => !s.trim().is_empty(),
                    _ => true,
                })
                .count()
        })
        .unwrap_or(0)
}
