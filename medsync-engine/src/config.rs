//! Engine configuration
//!
//! All operational knobs are consumed from a TOML file (with env/CLI
//! overrides for the data root, resolved by medsync-common). The engine
//! owns none of these values; it validates them once at startup and treats
//! the result as immutable.

use crate::models::SourceDescriptor;
use medsync_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Retry/backoff ceilings shared by the job loop and the batcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Bounded retries for Transient fetch errors on one page
    pub max_transient_retries: u32,
    /// Back-to-back page failures tolerated before the job fails
    pub consecutive_failure_budget: u32,
    /// Write-conflict retries per batch before the batch aborts
    pub batch_retry_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            max_transient_retries: 3,
            consecutive_failure_budget: 5,
            batch_retry_limit: 4,
        }
    }
}

/// Storage governor thresholds (quota model over the managed tree)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Byte budget for everything under the data root
    pub budget_bytes: u64,
    /// Pause intake when free budget drops below this
    pub pause_free_bytes: u64,
    /// Resume intake once free budget recovers above this (must exceed
    /// pause_free_bytes; the gap prevents thrash at the boundary)
    pub resume_free_bytes: u64,
    /// Seconds between snapshots
    pub scan_interval_secs: u64,
    /// Age in seconds after which tmp/partial artifacts count as stale
    pub stale_temp_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 50 * 1024 * 1024 * 1024,
            pause_free_bytes: 2 * 1024 * 1024 * 1024,
            resume_free_bytes: 4 * 1024 * 1024 * 1024,
            scan_interval_secs: 60,
            stale_temp_secs: 24 * 3600,
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// HTTP bind address for the control surface
    pub bind_addr: String,
    /// CPU-bound parse/normalize worker pool size (0 = number of cores)
    pub worker_pool_size: usize,
    /// Records per ingestion batch (caps lock hold time)
    pub batch_size: usize,
    /// Deadline for one rate-governor token acquisition, seconds
    pub fetch_deadline_secs: u64,
    /// EventBus capacity
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5840".to_string(),
            worker_pool_size: 0,
            batch_size: 200,
            fetch_deadline_secs: 120,
            event_capacity: 256,
        }
    }
}

/// Fully resolved engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    /// Resolved at load time, not part of the TOML `[engine]` table
    #[serde(skip)]
    pub data_root: PathBuf,
}

impl EngineConfig {
    /// Load from a TOML file and attach the resolved data root
    pub fn load(path: &Path, data_root: PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read engine config failed ({}): {}", path.display(), e))
        })?;
        let mut config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Parse engine config failed ({}): {}", path.display(), e))
        })?;
        config.data_root = data_root;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.storage.resume_free_bytes <= self.storage.pause_free_bytes {
            return Err(Error::Config(
                "storage.resume_free_bytes must exceed storage.pause_free_bytes".to_string(),
            ));
        }
        if self.engine.batch_size == 0 {
            return Err(Error::Config("engine.batch_size must be positive".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.rate_per_sec == 0 {
                return Err(Error::Config(format!(
                    "source '{}' has rate_per_sec = 0",
                    source.id
                )));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Config(format!("duplicate source id '{}'", source.id)));
            }
        }
        Ok(())
    }

    /// Worker pool size with the 0 = cores default applied
    pub fn effective_worker_pool_size(&self) -> usize {
        if self.engine.worker_pool_size > 0 {
            self.engine.worker_pool_size
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        }
    }

    pub fn source(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Spool directory for file-dump sources
    pub fn spool_dir(&self) -> PathBuf {
        self.data_root.join("spool")
    }

    /// Temp directory for in-progress downloads
    pub fn tmp_dir(&self) -> PathBuf {
        self.data_root.join("tmp")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            sources: Vec::new(),
            data_root: PathBuf::from("./medsync_data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatasetKind, MergePolicy};

    fn sample_source(id: &str) -> SourceDescriptor {
        SourceDescriptor {
            id: id.to_string(),
            kind: DatasetKind::DrugRegistry,
            endpoint: "https://example.org/labels.jsonl".to_string(),
            rate_per_sec: 2,
            burst: 1,
            page_size: 50,
            merge_policy: MergePolicy::PreferMoreComplete,
            similarity_threshold: None,
        }
    }

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_resume_must_exceed_pause() {
        let mut config = EngineConfig::default();
        config.storage.pause_free_bytes = 100;
        config.storage.resume_free_bytes = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let mut config = EngineConfig::default();
        config.sources = vec![sample_source("a"), sample_source("a")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut config = EngineConfig::default();
        let mut source = sample_source("a");
        source.rate_per_sec = 0;
        config.sources = vec![source];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [engine]
            bind_addr = "0.0.0.0:5840"
            worker_pool_size = 4
            batch_size = 100
            fetch_deadline_secs = 60
            event_capacity = 128

            [retry]
            base_delay_ms = 100
            max_delay_ms = 5000
            max_transient_retries = 2
            consecutive_failure_budget = 3
            batch_retry_limit = 4

            [storage]
            budget_bytes = 1000000
            pause_free_bytes = 100000
            resume_free_bytes = 200000
            scan_interval_secs = 30
            stale_temp_secs = 3600

            [[sources]]
            id = "trial-registry"
            kind = "trial-registry"
            endpoint = "https://example.org/api/v2/studies"
            rate_per_sec = 1
        "#;
        let mut config: EngineConfig = toml::from_str(toml).unwrap();
        config.data_root = PathBuf::from("/tmp/medsync");
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.engine.worker_pool_size, 4);
        assert_eq!(config.effective_worker_pool_size(), 4);
        assert_eq!(config.source("trial-registry").unwrap().rate_per_sec, 1);
    }
}
