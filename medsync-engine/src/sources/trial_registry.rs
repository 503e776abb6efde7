//! Clinical trial registry adapter
//!
//! Paged JSON API with an opaque continuation token (ClinicalTrials-style
//! `nextPageToken`). The checkpoint carries the token; a missing token in
//! the response means the registry is exhausted.

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, RawRecord, SourceDescriptor};
use crate::sources::{check_status, http_client, map_transport_error, FetchedPage, SourceAdapter};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StudiesPage {
    #[serde(default)]
    studies: Vec<serde_json::Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct TrialRegistryAdapter {
    source_id: String,
    endpoint: String,
    page_size: usize,
    client: reqwest::Client,
}

impl TrialRegistryAdapter {
    pub fn new(descriptor: &SourceDescriptor) -> Result<Self, SyncError> {
        Ok(Self {
            source_id: descriptor.id.clone(),
            endpoint: descriptor.endpoint.clone(),
            page_size: descriptor.page_size,
            client: http_client()?,
        })
    }

    /// Flatten one study object into adapter-neutral fields
    ///
    /// Registry payloads nest identity under protocolSection; records
    /// without a registry id are unusable and rejected here rather than
    /// handed to the normalizer with a hole in the natural key.
    fn study_to_record(study: &serde_json::Value, locator: String) -> Option<RawRecord> {
        let identification = study
            .pointer("/protocolSection/identificationModule")
            .or_else(|| study.get("identificationModule"))?;
        let registry_id = identification.get("nctId").and_then(|v| v.as_str())?;

        let mut record = RawRecord::new(locator).with_field("registry_id", registry_id);

        if let Some(title) = identification.get("briefTitle").and_then(|v| v.as_str()) {
            record = record.with_field("title", title);
        }
        if let Some(status) = study
            .pointer("/protocolSection/statusModule/overallStatus")
            .and_then(|v| v.as_str())
        {
            record = record.with_field("status", status);
        }
        if let Some(sponsor) = study
            .pointer("/protocolSection/sponsorCollaboratorsModule/leadSponsor/name")
            .and_then(|v| v.as_str())
        {
            record = record.with_field("sponsor", sponsor);
        }
        if let Some(conditions) = study
            .pointer("/protocolSection/conditionsModule/conditions")
            .and_then(|v| v.as_array())
        {
            let joined = conditions
                .iter()
                .filter_map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                record = record.with_field("conditions", joined);
            }
        }
        Some(record)
    }

    fn parse_page(&self, body: &str, page_label: &str) -> Result<(Vec<RawRecord>, Option<String>), SyncError> {
        let page: StudiesPage = serde_json::from_str(body).map_err(|e| {
            SyncError::PermanentRecord(format!("unparsable registry page {}: {}", page_label, e))
        })?;

        let mut records = Vec::with_capacity(page.studies.len());
        for (index, study) in page.studies.iter().enumerate() {
            let locator = format!("{}:{}", page_label, index);
            match Self::study_to_record(study, locator.clone()) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(locator = %locator, "Skipping study without registry id");
                }
            }
        }
        Ok((records, page.next_page_token))
    }
}

#[async_trait]
impl SourceAdapter for TrialRegistryAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dataset_kind(&self) -> DatasetKind {
        DatasetKind::TrialRegistry
    }

    async fn fetch_next_page(
        &self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<FetchedPage, SyncError> {
        let base = checkpoint.cloned().unwrap_or_default();

        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("pageSize", self.page_size.to_string())]);
        if let Some(token) = &base.page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        check_status(&response)?;
        let body = response.text().await.map_err(map_transport_error)?;

        let page_label = base.page_token.clone().unwrap_or_else(|| "first".to_string());
        let (records, next_token) = self.parse_page(&body, &page_label)?;

        let has_more = next_token.is_some();
        Ok(FetchedPage {
            records,
            next_checkpoint: base.advanced_to(next_token, 0),
            has_more,
            page_error: None,
        })
    }
}
