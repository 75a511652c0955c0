pub mod schema;

pub use schema::{BufferConfig, CompactionConfig, NoticeConfig, StoreConfig};

use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

impl StoreConfig {
    /// `~/.iris-workspaces/config.toml`, or `./config.toml` without a home dir.
    pub fn default_path() -> PathBuf {
        UserDirs::new().map_or_else(
            || PathBuf::from("config.toml"),
            |u| u.home_dir().join(".iris-workspaces").join("config.toml"),
        )
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(ConfigError::Io)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Load(e.to_string()))
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`StoreConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.max_pending_events == 0 {
            return Err(ConfigError::Validation(
                "buffer.max_pending_events must be greater than 0".into(),
            ));
        }
        if self.compaction.max_extraction_attempts == 0 {
            return Err(ConfigError::Validation(
                "compaction.max_extraction_attempts must be greater than 0".into(),
            ));
        }
        if self.notices.capacity == 0 {
            return Err(ConfigError::Validation(
                "notices.capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
