//! Source descriptors and dataset kinds
//!
//! A `SourceDescriptor` is built once from configuration at process start
//! and never mutated. Adapters are selected by the `kind` tag, not by
//! inheritance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five mirrored dataset families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Bibliographic archive (XML batch files)
    Bibliographic,
    /// Clinical trial registry (paged JSON API)
    TrialRegistry,
    /// Regulatory drug listings (JSON-lines dumps)
    DrugRegistry,
    /// Diagnostic/billing code sets (tabular files)
    CodeSet,
    /// Health-topic corpus (paged JSON API)
    TopicCorpus,
}

impl DatasetKind {
    /// Name of the dataset-kind-scoped advisory lock
    pub fn lock_name(&self) -> String {
        format!("ingest:{}", self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Bibliographic => "bibliographic",
            DatasetKind::TrialRegistry => "trial-registry",
            DatasetKind::DrugRegistry => "drug-registry",
            DatasetKind::CodeSet => "code-set",
            DatasetKind::TopicCorpus => "topic-corpus",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How near-duplicates of a kind are consolidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Keep the payload from the most recently retrieved source
    PreferNewest,
    /// Keep whichever payload has more populated fields
    #[default]
    PreferMoreComplete,
    /// Field-wise union; existing values win on conflict
    UnionOfFields,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePolicy::PreferNewest => "prefer-newest",
            MergePolicy::PreferMoreComplete => "prefer-more-complete",
            MergePolicy::UnionOfFields => "union-of-fields",
        };
        f.write_str(name)
    }
}

/// Immutable descriptor of one external source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable identifier used in URLs, checkpoints and logs
    pub id: String,
    /// Dataset family this source feeds
    pub kind: DatasetKind,
    /// Base endpoint: http(s) URL, or a local path for file-dump sources
    pub endpoint: String,
    /// Sustained request rate allowed by the source
    pub rate_per_sec: u32,
    /// Burst size on top of the sustained rate
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Records per fetch_next_page call
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Consolidation policy for near-duplicates of this source's kind
    #[serde(default)]
    pub merge_policy: MergePolicy,
    /// Optional override of the kind's default similarity threshold
    pub similarity_threshold: Option<f64>,
}

fn default_burst() -> u32 {
    1
}

fn default_page_size() -> usize {
    100
}
