//! Raw → canonical record normalization
//!
//! Pure and deterministic: the same raw fields always produce the same
//! canonical record and fingerprint, independent of source formatting
//! drift (case, whitespace, field order).
//!
//! Natural-key orderings are fixed per dataset kind:
//! - bibliographic:  title | journal | year
//! - trial-registry: registry_id
//! - drug-registry:  generic_name | strength | route
//! - code-set:       code_system | code
//! - topic-corpus:   title | language
//!
//! A record missing any natural-key field is rejected outright; an
//! unstable fingerprint computed from partial data is worse than a
//! dropped record.

use crate::error::SyncError;
use crate::models::{CanonicalRecord, DatasetKind, Provenance, RawRecord};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Natural-key field names for a kind, in fingerprint order
pub fn natural_key_fields(kind: DatasetKind) -> &'static [&'static str] {
    match kind {
        DatasetKind::Bibliographic => &["title", "journal", "year"],
        DatasetKind::TrialRegistry => &["registry_id"],
        DatasetKind::DrugRegistry => &["generic_name", "strength", "route"],
        DatasetKind::CodeSet => &["code_system", "code"],
        DatasetKind::TopicCorpus => &["title", "language"],
    }
}

/// Lower-case, trim, and collapse internal whitespace runs to one space
fn normalize_component(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize one raw record into its canonical form
///
/// The fingerprint is SHA-256 over the kind tag and the normalized
/// natural-key components joined with an unprintable separator, so the
/// same logical entity always hashes identically.
pub fn normalize(
    kind: DatasetKind,
    source_id: &str,
    source_revision: Option<String>,
    raw: &RawRecord,
) -> Result<CanonicalRecord, SyncError> {
    let mut components = Vec::new();
    for field in natural_key_fields(kind) {
        match raw.field(field) {
            Some(value) if !value.trim().is_empty() => {
                components.push(normalize_component(value));
            }
            _ => {
                return Err(SyncError::PermanentRecord(format!(
                    "record {} missing natural-key field '{}'",
                    raw.locator, field
                )));
            }
        }
    }

    let natural_key = components.join("|");

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for component in &components {
        hasher.update([0x1f]);
        hasher.update(component.as_bytes());
    }
    let fingerprint = format!("{:x}", hasher.finalize());

    // Full field map travels as the payload; the natural keys are a
    // projection of it, not a replacement.
    let payload = serde_json::Value::Object(
        raw.fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    );

    Ok(CanonicalRecord {
        guid: Uuid::new_v4(),
        dataset_kind: kind,
        natural_key,
        fingerprint,
        payload,
        provenance: Provenance {
            source_id: source_id.to_string(),
            retrieved_at: Utc::now(),
            source_revision,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drug_record(generic: &str, strength: &str, route: &str) -> RawRecord {
        RawRecord::new("labels.jsonl:0")
            .with_field("generic_name", generic)
            .with_field("strength", strength)
            .with_field("route", route)
            .with_field("brand_name", "Glucophage")
    }

    #[test]
    fn test_fingerprint_stable_under_whitespace_and_case() {
        let a = drug_record("Metformin  Hydrochloride", "500 mg", "ORAL");
        let b = drug_record("metformin hydrochloride", "  500   mg ", "oral");

        let ca = normalize(DatasetKind::DrugRegistry, "drug-registry", None, &a).unwrap();
        let cb = normalize(DatasetKind::DrugRegistry, "drug-registry", None, &b).unwrap();

        assert_eq!(ca.fingerprint, cb.fingerprint);
        assert_eq!(ca.natural_key, "metformin hydrochloride|500 mg|oral");
    }

    #[test]
    fn test_fingerprint_independent_of_field_order() {
        // BTreeMap ordering already normalizes iteration, but build the
        // records in opposite insertion orders to prove the point.
        let a = RawRecord::new("x:0")
            .with_field("route", "oral")
            .with_field("strength", "81 mg")
            .with_field("generic_name", "aspirin");
        let b = RawRecord::new("y:4")
            .with_field("generic_name", "aspirin")
            .with_field("strength", "81 mg")
            .with_field("route", "oral");

        let ca = normalize(DatasetKind::DrugRegistry, "s1", None, &a).unwrap();
        let cb = normalize(DatasetKind::DrugRegistry, "s2", None, &b).unwrap();
        assert_eq!(ca.fingerprint, cb.fingerprint);
    }

    #[test]
    fn test_fingerprint_differs_across_kinds() {
        let raw = RawRecord::new("x:0")
            .with_field("title", "Diabetes")
            .with_field("language", "en")
            .with_field("journal", "Diabetes")
            .with_field("year", "en");
        let topic = normalize(DatasetKind::TopicCorpus, "s", None, &raw).unwrap();
        let biblio = normalize(DatasetKind::Bibliographic, "s", None, &raw).unwrap();
        assert_ne!(topic.fingerprint, biblio.fingerprint);
    }

    #[test]
    fn test_missing_natural_key_field_rejected() {
        let raw = RawRecord::new("labels.jsonl:3")
            .with_field("generic_name", "Metformin")
            .with_field("strength", "500 mg");
        let result = normalize(DatasetKind::DrugRegistry, "drug-registry", None, &raw);
        assert!(matches!(result, Err(SyncError::PermanentRecord(_))));
    }

    #[test]
    fn test_blank_natural_key_field_rejected() {
        let raw = drug_record("Metformin", "   ", "oral");
        let result = normalize(DatasetKind::DrugRegistry, "drug-registry", None, &raw);
        assert!(matches!(result, Err(SyncError::PermanentRecord(_))));
    }

    #[test]
    fn test_payload_keeps_all_fields() {
        let raw = drug_record("Metformin", "500 mg", "oral");
        let canonical = normalize(DatasetKind::DrugRegistry, "drug-registry", None, &raw).unwrap();
        assert_eq!(
            canonical.payload.get("brand_name").and_then(|v| v.as_str()),
            Some("Glucophage")
        );
    }
}
