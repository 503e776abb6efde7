//! Source adapters
//!
//! One adapter per external data source. Adapters know their source's
//! transport, cursor shape and record schema, and nothing else: they
//! perform no storage writes beyond their own spool files. Transport
//! failures map onto the engine error taxonomy here, so every adapter and
//! the job loop share one retry vocabulary.
//!
//! Adapters are selected by the source descriptor's kind tag.

mod bibliographic;
mod code_set;
mod drug_registry;
mod topic_corpus;
mod trial_registry;

pub use bibliographic::BibliographicAdapter;
pub use code_set::CodeSetAdapter;
pub use drug_registry::DrugRegistryAdapter;
pub use topic_corpus::TopicCorpusAdapter;
pub use trial_registry::TrialRegistryAdapter;

use crate::error::SyncError;
use crate::models::{Checkpoint, DatasetKind, RawRecord, SourceDescriptor};
use crate::services::ParsePool;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// One page of raw records plus the cursor past it
#[derive(Debug)]
pub struct FetchedPage {
    pub records: Vec<RawRecord>,
    pub next_checkpoint: Checkpoint,
    pub has_more: bool,
    /// Present when the page's container was structurally unusable but the
    /// cursor could still advance past it. The records are empty and the
    /// job counts one page failure.
    pub page_error: Option<String>,
}

/// Contract every source adapter implements
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn dataset_kind(&self) -> DatasetKind;

    /// Fetch the page after `checkpoint` (None = fresh job)
    ///
    /// Side effects are limited to network I/O and the adapter's own spool
    /// files. Errors follow the taxonomy: `Transient` for timeouts/5xx,
    /// `RateLimited` for 429/503, `PermanentRecord` for an unusable page.
    async fn fetch_next_page(
        &self,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<FetchedPage, SyncError>;
}

/// Build the adapter for a source descriptor
pub fn build_adapter(
    descriptor: &SourceDescriptor,
    spool_dir: &Path,
    parse_pool: ParsePool,
) -> Result<Box<dyn SourceAdapter>, SyncError> {
    let adapter: Box<dyn SourceAdapter> = match descriptor.kind {
        DatasetKind::Bibliographic => {
            Box::new(BibliographicAdapter::new(descriptor, spool_dir, parse_pool)?)
        }
        DatasetKind::TrialRegistry => Box::new(TrialRegistryAdapter::new(descriptor)?),
        DatasetKind::DrugRegistry => {
            Box::new(DrugRegistryAdapter::new(descriptor, spool_dir, parse_pool)?)
        }
        DatasetKind::CodeSet => Box::new(CodeSetAdapter::new(descriptor, spool_dir, parse_pool)?),
        DatasetKind::TopicCorpus => Box::new(TopicCorpusAdapter::new(descriptor)?),
    };
    Ok(adapter)
}

/// Shared HTTP client builder
pub(crate) fn http_client() -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .user_agent(concat!("medsync/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| SyncError::Transient(format!("http client build failed: {}", e)))
}

/// Map an HTTP response status onto the error taxonomy
///
/// 429/503 become RateLimited with the Retry-After hint when present;
/// other 5xx are Transient; remaining 4xx are permanent for this page.
pub(crate) fn check_status(response: &reqwest::Response) -> Result<(), SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    if status.as_u16() == 429 || status.as_u16() == 503 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SyncError::RateLimited { retry_after });
    }

    if status.is_server_error() {
        return Err(SyncError::Transient(format!("server error {}", status)));
    }

    Err(SyncError::PermanentRecord(format!(
        "client error {} from source",
        status
    )))
}

/// Map a reqwest transport error onto the taxonomy
pub(crate) fn map_transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        SyncError::Transient(format!("transport error: {}", error))
    } else {
        SyncError::PermanentRecord(format!("unrecoverable transport error: {}", error))
    }
}

/// Make the source payload available as a local file, spooling it first
/// when the endpoint is remote or gzip-compressed
///
/// Downloads stream chunk-by-chunk to a `.partial` file renamed only on
/// completion, so a crashed download never masquerades as a finished
/// spool. Gzip payloads are decompressed once into the spool; the `.gz`
/// original is the retained form under storage pressure.
pub(crate) async fn ensure_local_file(
    endpoint: &str,
    source_id: &str,
    spool_dir: &Path,
) -> Result<PathBuf, SyncError> {
    let is_remote = endpoint.starts_with("http://") || endpoint.starts_with("https://");

    let compressed = endpoint.ends_with(".gz");
    let file_name = endpoint
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("payload");
    let spooled_name = format!("{}-{}", source_id, file_name);
    let spooled = spool_dir.join(&spooled_name);
    let decompressed = spool_dir.join(spooled_name.trim_end_matches(".gz"));

    let local_compressed: PathBuf = if is_remote {
        if !spooled.exists() {
            download_to(endpoint, &spooled).await?;
        }
        spooled
    } else {
        PathBuf::from(endpoint)
    };

    if !compressed {
        return Ok(local_compressed);
    }

    if !decompressed.exists() {
        let src = local_compressed.clone();
        let dst = decompressed.clone();
        tokio::task::spawn_blocking(move || gunzip_to(&src, &dst))
            .await
            .map_err(|e| SyncError::Transient(format!("decompress task failed: {}", e)))??;
    }
    Ok(decompressed)
}

async fn download_to(endpoint: &str, target: &Path) -> Result<(), SyncError> {
    let client = http_client()?;
    let response = client
        .get(endpoint)
        .send()
        .await
        .map_err(map_transport_error)?;
    check_status(&response)?;

    let partial = target.with_extension("partial");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut bytes: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        bytes += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, target).await?;
    info!(endpoint = %endpoint, bytes, target = %target.display(), "Spooled source payload");
    Ok(())
}

fn gunzip_to(src: &Path, dst: &Path) -> Result<(), SyncError> {
    use std::io::{BufReader, BufWriter};

    let input = std::fs::File::open(src)?;
    let mut decoder = flate2::read::GzDecoder::new(BufReader::new(input));

    let partial = dst.with_extension("partial");
    let mut output = BufWriter::new(std::fs::File::create(&partial)?);
    if let Err(e) = std::io::copy(&mut decoder, &mut output) {
        warn!(src = %src.display(), error = %e, "Gzip payload unusable");
        let _ = std::fs::remove_file(&partial);
        return Err(SyncError::PermanentRecord(format!(
            "corrupt gzip payload {}: {}",
            src.display(),
            e
        )));
    }
    drop(output);
    std::fs::rename(&partial, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_plain_file_used_in_place() {
        let temp = TempDir::new().unwrap();
        let payload = temp.path().join("codes.tsv");
        std::fs::write(&payload, "A00\tCholera\n").unwrap();

        let spool = TempDir::new().unwrap();
        let resolved = ensure_local_file(payload.to_str().unwrap(), "code-set", spool.path())
            .await
            .unwrap();
        assert_eq!(resolved, payload);
    }

    #[tokio::test]
    async fn test_local_gz_file_decompressed_into_spool() {
        let temp = TempDir::new().unwrap();
        let gz_path = temp.path().join("baseline.xml.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(std::fs::File::create(&gz_path).unwrap(), flate2::Compression::default());
        encoder.write_all(b"<set><r><id>1</id></r></set>").unwrap();
        encoder.finish().unwrap();

        let spool = TempDir::new().unwrap();
        let resolved = ensure_local_file(gz_path.to_str().unwrap(), "biblio", spool.path())
            .await
            .unwrap();

        assert!(resolved.starts_with(spool.path()));
        assert_eq!(
            std::fs::read_to_string(&resolved).unwrap(),
            "<set><r><id>1</id></r></set>"
        );

        // Second call reuses the decompressed spool
        let again = ensure_local_file(gz_path.to_str().unwrap(), "biblio", spool.path())
            .await
            .unwrap();
        assert_eq!(again, resolved);
    }

    #[tokio::test]
    async fn test_corrupt_gz_is_permanent() {
        let temp = TempDir::new().unwrap();
        let gz_path = temp.path().join("broken.xml.gz");
        std::fs::write(&gz_path, b"this is not gzip").unwrap();

        let spool = TempDir::new().unwrap();
        let result = ensure_local_file(gz_path.to_str().unwrap(), "biblio", spool.path()).await;
        assert!(matches!(result, Err(SyncError::PermanentRecord(_))));
    }
}
