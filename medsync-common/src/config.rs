//! Configuration loading and data root resolution
//!
//! Resolution priority for the data root, matching every other MedSync knob:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging section of the TOML config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "medsync_engine=debug"
    pub filter: Option<String>,
}

/// Top-level TOML configuration file shape
///
/// Engine-specific sections (sources, storage thresholds, retry ceilings)
/// are deserialized by the engine crate; this struct only carries the parts
/// every crate needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Managed data root (spool files, database, temp downloads)
    pub data_root: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolve the managed data root
pub fn resolve_data_root(cli_arg: Option<&str>, toml_config: Option<&TomlConfig>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("MEDSYNC_DATA_ROOT") {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(config) = toml_config {
        if let Some(root) = &config.data_root {
            return PathBuf::from(root);
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_root()
}

/// OS-dependent default data root
fn default_data_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("medsync"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/medsync"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("medsync"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/medsync"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("medsync"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\medsync"))
    } else {
        PathBuf::from("./medsync_data")
    }
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

/// Ensure the data root directory (and its spool/tmp subdirectories) exist
pub fn ensure_data_root(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(root.join("spool"))?;
    std::fs::create_dir_all(root.join("tmp"))?;
    Ok(())
}

/// Path of the SQLite database inside the data root
pub fn database_path(root: &Path) -> PathBuf {
    root.join("medsync.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_arg_wins() {
        let config = TomlConfig {
            data_root: Some("/from/toml".to_string()),
            logging: LoggingConfig::default(),
        };
        let resolved = resolve_data_root(Some("/from/cli"), Some(&config));
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_toml_used_without_cli() {
        // Only valid when the env var is unset in the test environment
        if std::env::var("MEDSYNC_DATA_ROOT").is_ok() {
            return;
        }
        let config = TomlConfig {
            data_root: Some("/from/toml".to_string()),
            logging: LoggingConfig::default(),
        };
        let resolved = resolve_data_root(None, Some(&config));
        assert_eq!(resolved, PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_ensure_data_root_creates_subdirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("medsync");
        ensure_data_root(&root).unwrap();
        assert!(root.join("spool").is_dir());
        assert!(root.join("tmp").is_dir());
    }

    #[test]
    fn test_load_toml_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("medsync.toml");
        std::fs::write(&path, "data_root = \"/srv/medsync\"\n[logging]\nfilter = \"debug\"\n")
            .unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.data_root.as_deref(), Some("/srv/medsync"));
        assert_eq!(config.logging.filter.as_deref(), Some("debug"));
    }
}
