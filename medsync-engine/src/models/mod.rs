//! Data model for the synchronization engine

mod checkpoint;
mod decision;
mod job;
mod record;
mod source;
mod storage;

pub use checkpoint::Checkpoint;
pub use decision::DuplicateDecision;
pub use job::{JobState, SyncJob};
pub use record::{CanonicalRecord, Provenance, RawRecord};
pub use source::{DatasetKind, MergePolicy, SourceDescriptor};
pub use storage::{CleanupCandidate, CleanupReason, StorageSnapshot};
