//! Configuration system for docmount
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/docmount/config.toml
//! - Linux: ~/.config/docmount/config.toml
//! - Windows: %APPDATA%/docmount/config.toml

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{DEFAULT_IDLE_TTL_SECS, DEFAULT_REAP_INTERVAL_SECS, DEFAULT_RESERVED_FOLDER};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mount settings
    pub mount: MountConfig,
    /// Shadow file and mirror settings
    pub cache: CacheConfig,
    /// Remote store settings
    pub remote: RemoteConfig,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Default mount point (optional)
    pub mount_point: Option<PathBuf>,
    /// Let other users access the mount
    pub allow_other: bool,
    /// Attribute TTL handed to the kernel, in seconds
    pub attr_ttl_secs: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: None,
            allow_other: false,
            attr_ttl_secs: 1,
        }
    }
}

/// Shadow file cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Host mirror directory (uses ~/docmount-mirror if None)
    pub mirror_dir: Option<PathBuf>,
    /// Idle seconds before an unused shadow file is reaped
    pub idle_ttl_secs: u64,
    /// Background reaper interval in seconds
    pub reap_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mirror_dir: None,
            idle_ttl_secs: DEFAULT_IDLE_TTL_SECS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }
}

/// Remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Folder injected by the remote API into the root listing, hidden locally
    pub reserved_folder: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            reserved_folder: DEFAULT_RESERVED_FOLDER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        match Self::default_path() {
            Some(path) => self.save_to(&path),
            None => Err(ConfigError::NoConfigDir),
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "docmount", "docmount")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the effective mirror directory (config override or ~/docmount-mirror)
    pub fn mirror_dir(&self) -> PathBuf {
        self.cache
            .mirror_dir
            .clone()
            .or_else(|| {
                directories::BaseDirs::new().map(|dirs| dirs.home_dir().join("docmount-mirror"))
            })
            .unwrap_or_else(|| std::env::temp_dir().join("docmount-mirror"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.idle_ttl_secs, 300);
        assert_eq!(config.cache.reap_interval_secs, 60);
        assert_eq!(config.remote.reserved_folder, "My folders");
        assert!(config.mount.mount_point.is_none());
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [cache]
            idle_ttl_secs = 30
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.idle_ttl_secs, 30);
        // Other values should be defaults
        assert_eq!(config.cache.reap_interval_secs, 60);
        assert_eq!(config.remote.reserved_folder, "My folders");
    }

    #[test]
    fn test_sample_config() {
        let sample = Config::sample();
        assert!(sample.contains("[mount]"));
        assert!(sample.contains("[cache]"));
        assert!(sample.contains("[remote]"));
    }

    #[test]
    fn test_config_load_missing() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.cache.idle_ttl_secs, 300);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.mirror_dir = Some(dir.path().join("mirror"));
        config.remote.reserved_folder = "Shared".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cache.mirror_dir, Some(dir.path().join("mirror")));
        assert_eq!(loaded.remote.reserved_folder, "Shared");
        assert_eq!(loaded.mirror_dir(), dir.path().join("mirror"));
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nidle_ttl_secs = ").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
