//! Bibliographic archive adapter
//!
//! Mirrors batch XML archives of citation records (one `<article>` element
//! per record). The payload is spooled locally once, then consumed in
//! bounded slices; the checkpoint is a byte offset into the decompressed
//! stream, so a multi-gigabyte baseline file never needs more memory than
//! one page of records.

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, SourceDescriptor};
use crate::services::{pipeline, ParsePool};
use crate::sources::{ensure_local_file, FetchedPage, SourceAdapter};
use async_trait::async_trait;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;

/// XML element that delimits one citation record
const RECORD_TAG: &str = "article";

pub struct BibliographicAdapter {
    source_id: String,
    endpoint: String,
    spool_dir: PathBuf,
    page_size: usize,
    parse_pool: ParsePool,
}

impl BibliographicAdapter {
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

    /// Map the archive's native element names onto the canonical field
    /// names the normalizer fingerprints over
    fn canonicalize_fields(records: &mut [crate::models::RawRecord]) {
        for record in records.iter_mut() {
            // Some archives emit <journaltitle>, others <journal>
            if !record.fields.contains_key("journal") {
                if let Some(journal) = record.fields.remove("journaltitle") {
                    record.fields.insert("journal".to_string(), journal);
                }
            }
            if !record.fields.contains_key("year") {
                if let Some(year) = record.fields.remove("pubyear") {
                    record.fields.insert("year".to_string(), year);
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for BibliographicAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        DatasetKind::Bibliographic
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
                pipeline::parse_xml_page(reader, RECORD_TAG, &locator, page_size)
            })
            .await?;

        let mut records = chunk.records;
        Self::canonicalize_fields(&mut records);

        Ok(FetchedPage {
            records,
            next_checkpoint: base.advanced_to(None, offset + chunk.bytes_consumed),
            has_more: !chunk.exhausted,
            page_error: None,
        })
    }
}
