//! Health-topic corpus adapter
//!
//! Paged JSON API with numeric page cursors. Unlike token-paged sources,
//! a structurally bad page here still has a knowable successor, so the
//! adapter reports the page failure in-band and advances the cursor past
//! it; the job logs one page failure and keeps going.

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, RawRecord, SourceDescriptor};
use crate::sources::{check_status, http_client, map_transport_error, FetchedPage, SourceAdapter};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TopicsPage {
    #[serde(default)]
    topics: Vec<Topic>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Topic {
    title: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

pub struct TopicCorpusAdapter {
    source_id: String,
    endpoint: String,
    page_size: usize,
    client: reqwest::Client,
}

impl TopicCorpusAdapter {
    pub fn new(descriptor: &SourceDescriptor) -> Result<Self, SyncError> {
        Ok(Self {
            source_id: descriptor.id.clone(),
            endpoint: descriptor.endpoint.clone(),
            page_size: descriptor.page_size,
            client: http_client()?,
        })
    }

    fn parse_page(&self, body: &str, page: u64) -> Result<(Vec<RawRecord>, bool), SyncError> {
        let parsed: TopicsPage = serde_json::from_str(body).map_err(|e| {
            SyncError::PermanentRecord(format!("unparsable topic page {}: {}", page, e))
        })?;

        let mut records = Vec::with_capacity(parsed.topics.len());
        for (index, topic) in parsed.topics.into_iter().enumerate() {
            let mut record = RawRecord::new(format!("page{}:{}", page, index))
                .with_field("title", topic.title)
                .with_field(
                    "language",
                    topic.language.unwrap_or_else(|| "en".to_string()),
                );
            if let Some(url) = topic.url {
                record = record.with_field("url", url);
            }
            if let Some(summary) = topic.summary {
                record = record.with_field("summary", summary);
            }
            records.push(record);
        }
        Ok((records, parsed.has_more))
    }
}

#[async_trait]
impl SourceAdapter for TopicCorpusAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        DatasetKind::TopicCorpus
    }

    async fn fetch_next_page(
        &self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<FetchedPage, SyncError> {
        let base = checkpoint.cloned().unwrap_or_default();
        let page: u64 = base
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(1);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("page", page.to_string()), ("pageSize", self.page_size.to_string())])
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(&response)?;
        let body = response.text().await.map_err(map_transport_error)?;

        match self.parse_page(&body, page) {
            Ok((records, has_more)) => Ok(FetchedPage {
                records,
                next_checkpoint: base.advanced_to(Some((page + 1).to_string()), 0),
                has_more,
                page_error: None,
            }),
            Err(SyncError::PermanentRecord(reason)) => {
                // Numeric cursor: the next page is knowable, so skip past
                // the bad one instead of wedging the job on it.
                Ok(FetchedPage {
                    records: Vec::new(),
                    next_checkpoint: base.advanced_to(Some((page + 1).to_string()), 0),
                    has_more: true,
                    page_error: Some(reason),
                })
            }
            Err(other) => Err(other),
        }
    }
}
