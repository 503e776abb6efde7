//! Drug-label registry adapter
//!
//! Mirrors regulatory drug-listing dumps published as JSON-lines (one
//! label object per line). Spooled locally, consumed by byte offset.

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, SourceDescriptor};
use crate::services::{pipeline, ParsePool};
use crate::sources::{ensure_local_file, FetchedPage, SourceAdapter};
use async_trait::async_trait;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;

pub struct DrugRegistryAdapter {
    source_id: String,
    endpoint: String,
    spool_dir: PathBuf,
    page_size: usize,
    parse_pool: ParsePool,
}

impl DrugRegistryAdapter {
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
impl SourceAdapter for DrugRegistryAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        DatasetKind::DrugRegistry
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
                pipeline::parse_jsonl_page(reader, &locator, page_size)
            })
            .await?;

        Ok(FetchedPage {
            records: chunk.records,
            next_checkpoint: base.advanced_to(None, offset + chunk.bytes_consumed),
            has_more: !chunk.exhausted,
            page_error: None,
        })
    }
}
