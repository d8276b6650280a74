//! picosense Configuration Module
//! Handles loading and validating device_config.json

use crate::engine::updater::layout::is_plain_subdir;
use crate::engine::updater::release::Channel;
use crate::engine::updater::transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "device_config.json";

/// Longest accepted delay between scheduling and running an update (one week)
pub const MAX_UPDATE_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ota: OtaConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    pub enabled: bool,
    pub channel: Channel,
    pub update_delay_secs: u64,
    pub backup_enabled: bool,
    pub prerelease_tag_prefix: String,
    pub github_repo: RepoConfig,
    /// Directory inside the repository holding the firmware files
    pub firmware_path: String,
    pub api_base: String,
    pub raw_base: String,
    pub retry: RetryConfig,
    pub chunk_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub owner: String,
    pub name: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub staging_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: Channel::Stable,
            update_delay_secs: 5,
            backup_enabled: true,
            prerelease_tag_prefix: "dev-".to_string(),
            github_repo: RepoConfig::default(),
            firmware_path: "firmware".to_string(),
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            retry: RetryConfig::default(),
            chunk_size: 1024,
            request_timeout_secs: 30,
        }
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            owner: "picosense".to_string(),
            name: "picosense-firmware".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("temp"),
            backup_dir: PathBuf::from("backup"),
        }
    }
}

impl OtaConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.delay_ms),
        )
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_secs(self.update_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load `device_config.json` from the device root.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config through a temp file and rename
    pub fn save(&self, root: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let config_path = root.join(CONFIG_FILE);
        let temp_path = config_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &config_path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let repo = &self.ota.github_repo;
        if repo.owner.trim().is_empty() || repo.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ota.github_repo owner and name must be set".to_string(),
            ));
        }
        if repo.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("ota.github_repo.branch is empty".to_string()));
        }
        if self.ota.chunk_size == 0 {
            return Err(ConfigError::Invalid("ota.chunk_size must be positive".to_string()));
        }
        if self.ota.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ota.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ota.update_delay_secs > MAX_UPDATE_DELAY_SECS {
            return Err(ConfigError::Invalid(format!(
                "ota.update_delay_secs must be at most {}",
                MAX_UPDATE_DELAY_SECS
            )));
        }
        self.storage.validate()
    }
}

impl StorageConfig {
    /// Both dirs are cleared during updates: they must be plain relative
    /// subdirectories of the device root and must not overlap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, dir) in [
            ("storage.staging_dir", &self.staging_dir),
            ("storage.backup_dir", &self.backup_dir),
        ] {
            if !is_plain_subdir(dir) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a relative subdirectory name, got {:?}",
                    key, dir
                )));
            }
        }
        if self.staging_dir.starts_with(&self.backup_dir)
            || self.backup_dir.starts_with(&self.staging_dir)
        {
            return Err(ConfigError::Invalid(
                "storage.staging_dir and storage.backup_dir must not overlap".to_string(),
            ));
        }
        Ok(())
    }
}
