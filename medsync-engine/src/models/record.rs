//! Raw and canonical record shapes

use crate::models::DatasetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One source-native unit before normalization
///
/// Transient: exists only inside the pipeline for one record. Fields are
/// kept in a BTreeMap so that downstream processing is deterministic
/// regardless of source field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Where this record came from, for logs (file+index or page+index)
    pub locator: String,
    /// Source-native field name → value
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

/// Provenance metadata carried by every canonical record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    pub retrieved_at: DateTime<Utc>,
    /// Source-side revision marker when the source exposes one
    pub source_revision: Option<String>,
}

/// Normalized record as stored in the canonical store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub guid: Uuid,
    pub dataset_kind: DatasetKind,
    /// Normalized natural-key components joined with '|'
    pub natural_key: String,
    /// SHA-256 over the kind's fixed natural-key ordering
    pub fingerprint: String,
    /// Structured fields plus free text, as JSON
    pub payload: serde_json::Value,
    pub provenance: Provenance,
}

impl CanonicalRecord {
    /// First natural-key component; used as the dedup blocking key
    pub fn blocking_key(&self) -> &str {
        self.natural_key
            .split('|')
            .next()
            .unwrap_or(&self.natural_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_builder() {
        let record = RawRecord::new("labels.jsonl:17")
            .with_field("generic_name", "Metformin")
            .with_field("strength", "500 mg");
        assert_eq!(record.field("generic_name"), Some("Metformin"));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn test_blocking_key_is_first_component() {
        let record = CanonicalRecord {
            guid: Uuid::new_v4(),
            dataset_kind: DatasetKind::DrugRegistry,
            natural_key: "metformin|500 mg|oral".to_string(),
            fingerprint: "abc".to_string(),
            payload: serde_json::json!({}),
            provenance: Provenance {
                source_id: "drug-registry".to_string(),
                retrieved_at: Utc::now(),
                source_revision: None,
            },
        };
        assert_eq!(record.blocking_key(), "metformin");
    }
}
