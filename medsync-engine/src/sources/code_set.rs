//! Diagnostic/billing code-set adapter
//!
//! Mirrors tabular code releases (code TAB description, one row per code).
//! The code system name is fixed per source and stamped onto every record,
//! since the files themselves carry only the bare rows.

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, SourceDescriptor};
use crate::services::{pipeline, ParsePool};
use crate::sources::{ensure_local_file, FetchedPage, SourceAdapter};
use async_trait::async_trait;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;

const COLUMNS: [&str; 2] = ["code", "description"];

pub struct CodeSetAdapter {
    source_id: String,
    endpoint: String,
    spool_dir: PathBuf,
    page_size: usize,
    parse_pool: ParsePool,
}

impl CodeSetAdapter {
    pub fn new(
        descriptor: &SourceDescriptor,
        spool_dir: &std::path::Path,
        parse_pool: ParsePool,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            source_id: descriptor.id.clone(),
            endpoint: descriptor.endpoint.clone(),
            spool_dir: spool_dir.to_path_buf(),
            page_size: descriptor.page_size,
            parse_pool,
        })
    }
}

#[async_trait]
impl SourceAdapter for CodeSetAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        DatasetKind::CodeSet
    }

    async fn fetch_next_page(
        &self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<FetchedPage, SyncError> {
        let path = ensure_local_file(&self.endpoint, &self.source_id, &self.spool_dir).await?;

        let base = checkpoint.cloned().unwrap_or_default();
        let offset = base.byte_offset;
        let page_size = self.page_size;
        let locator = format!(
            "{}@{}",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            offset
        );

        let parse_path = path.clone();
        let chunk = self
            .parse_pool
            .run(move || -> Result<pipeline::ParsedChunk, SyncError> {
                let file = std::fs::File::open(&parse_path)?;
                let mut reader = BufReader::new(file);
                reader.seek(SeekFrom::Start(offset))?;
                pipeline::parse_delimited_page(reader, '\t', &COLUMNS, &locator, page_size)
            })
            .await?;

        let mut records = chunk.records;
        for record in records.iter_mut() {
            record
                .fields
                .insert("code_system".to_string(), self.source_id.clone());
        }

        Ok(FetchedPage {
            records,
            next_checkpoint: base.advanced_to(None, offset + chunk.bytes_consumed),
            has_more: !chunk.exhausted,
            page_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergePolicy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_codes_stamped_with_code_system() {
        let temp = TempDir::new().unwrap();
        let release = temp.path().join("icd10-2026.tsv");
        std::fs::write(&release, "A00\tCholera\nA01\tTyphoid fever\n").unwrap();

        let spool = TempDir::new().unwrap();
        let descriptor = SourceDescriptor {
            id: "icd-10".to_string(),
            kind: DatasetKind::CodeSet,
            endpoint: release.to_str().unwrap().to_string(),
            rate_per_sec: 10,
            burst: 1,
            page_size: 10,
            merge_policy: MergePolicy::UnionOfFields,
            similarity_threshold: None,
        };
        let adapter = CodeSetAdapter::new(&descriptor, spool.path(), ParsePool::new(2)).unwrap();

        let page = adapter.fetch_next_page(None).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(!page.has_more);
        assert_eq!(page.records[0].field("code_system"), Some("icd-10"));
        assert_eq!(page.records[0].field("code"), Some("A00"));
        assert_eq!(page.records[1].field("description"), Some("Typhoid fever"));
    }
}
