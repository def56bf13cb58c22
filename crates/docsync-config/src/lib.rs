//! Configuration management for docsync
//!
//! Configuration is layered: serialized defaults first, then an optional YAML,
//! TOML or JSON file, then environment variables prefixed with `DOCSYNC` using
//! `__` as the section separator (`DOCSYNC_SYNC__CONCURRENCY=4`).
//!
//! # Examples
//!
//! ```rust
//! use docsync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file(".docsync/config.yaml")
//!     .add_env_prefix("DOCSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Concurrency: {}", config.sync.concurrency);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use docsync_types::{RetryConfig, MAX_BATCH_BLOCKS, MAX_TEXT_LEN};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, CONTROL_DIR, ENV_PREFIX};

/// Main configuration structure for docsync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Remote store location
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Engine tuning
    #[serde(default)]
    pub sync: SyncSettings,
    /// Backoff for transient remote failures
    #[serde(default)]
    pub retry: RetrySettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Root node url, or an error when none is configured
    pub fn require_root_url(&self) -> ConfigResult<&str> {
        self.remote
            .root_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::missing_required("remote.root_url"))
    }
}

/// Where the remote tree lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Url of the node the working-tree root maps to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,
    /// Prefix used when building node urls
    pub base_url: String,
    /// JSON file backing the file store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root_url: None,
            base_url: "https://pages.local".to_string(),
            store_path: None,
        }
    }
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Width of the concurrent diff-check pool
    pub concurrency: usize,
    /// Depth bound for remote discovery walks
    pub discovery_depth: usize,
    /// Blocks per append request
    pub max_batch_blocks: usize,
    /// Characters per rich-text run
    pub max_text_len: usize,
    /// Archive duplicate sibling nodes after a push
    pub dedup: bool,
    /// Rewrite directory nodes with links to their children
    pub update_dir_index: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 6,
            discovery_depth: 3,
            max_batch_blocks: MAX_BATCH_BLOCKS,
            max_text_len: MAX_TEXT_LEN,
            dedup: true,
            update_dir_index: true,
        }
    }
}

/// Retry schedule expressed in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_delay_ms: duration_ms(retry.initial_delay),
            max_delay_ms: duration_ms(retry.max_delay),
            backoff_multiplier: retry.backoff_multiplier,
        }
    }
}

impl RetrySettings {
    /// Convert into the runtime retry policy
    pub fn to_retry_config(&self) -> ConfigResult<RetryConfig> {
        RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .map_err(|message| ConfigError::invalid_value("retry", message))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Append the action log to this file as well as stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_log: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            action_log: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync.concurrency, 6);
        assert_eq!(config.sync.discovery_depth, 3);
        assert_eq!(config.sync.max_batch_blocks, 100);
        assert_eq!(config.sync.max_text_len, 1800);
        assert_eq!(config.logging.level, "warn");
        assert!(config.remote.root_url.is_none());
    }

    #[test]
    fn test_retry_settings_match_runtime_defaults() {
        let settings = RetrySettings::default();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.initial_delay_ms, 500);
        assert_eq!(settings.max_delay_ms, 4000);

        let retry = settings.to_retry_config().unwrap();
        assert_eq!(retry, RetryConfig::default());
    }

    #[test]
    fn test_require_root_url() {
        let mut config = Config::default();
        assert!(matches!(
            config.require_root_url(),
            Err(ConfigError::MissingRequired { .. })
        ));

        config.remote.root_url = Some("   ".to_string());
        assert!(config.require_root_url().is_err());

        config.remote.root_url = Some("https://pages.local/abc".to_string());
        assert_eq!(config.require_root_url().unwrap(), "https://pages.local/abc");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("concurrency"));
        assert!(!yaml.contains("root_url"));

        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
