//! Layered configuration: defaults, then files, then environment

use crate::{Config, ConfigError, ConfigResult};
use config::builder::DefaultState;
use config::{Environment, File, FileFormat};
use docsync_types::MAX_BATCH_BLOCKS;
use std::path::{Path, PathBuf};

/// Separator between section and key in environment variable names
const ENV_SEPARATOR: &str = "__";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone)]
enum Layer {
    Defaults,
    File(PathBuf),
    Env(String),
}

/// Collects configuration layers; later layers override earlier ones
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    layers: Vec<Layer>,
}

impl ConfigBuilder {
    /// Create a builder with no layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer the built-in defaults
    pub fn add_defaults(mut self) -> Self {
        self.layers.push(Layer::Defaults);
        self
    }

    /// Layer a YAML, TOML or JSON file; a missing file is skipped
    pub fn add_source_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.layers.push(Layer::File(path.as_ref().to_path_buf()));
        self
    }

    /// Layer environment variables named `<prefix>_<SECTION>__<KEY>`
    pub fn add_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.layers.push(Layer::Env(prefix.into()));
        self
    }

    /// Merge the layers and validate the result
    pub fn build(self) -> ConfigResult<Config> {
        let mut inner = config::Config::builder();
        for layer in self.layers {
            inner = Self::add_layer(inner, layer)?;
        }

        let config: Config = inner.build()?.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn add_layer(
        inner: config::ConfigBuilder<DefaultState>,
        layer: Layer,
    ) -> ConfigResult<config::ConfigBuilder<DefaultState>> {
        Ok(match layer {
            Layer::Defaults => {
                let defaults = serde_yaml::to_value(Config::default())?;
                inner.add_source(config::Config::try_from(&defaults)?)
            }
            Layer::File(path) if path.exists() => {
                let format = file_format(&path);
                inner.add_source(File::from(path).format(format))
            }
            Layer::File(_) => inner,
            Layer::Env(prefix) => inner.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            ),
        })
    }

    /// Check every setting against its allowed range
    pub fn validate(config: &Config) -> ConfigResult<()> {
        let sync = &config.sync;
        if !(1..=32).contains(&sync.concurrency) {
            return Err(ConfigError::invalid_value(
                "sync.concurrency",
                "must be between 1 and 32",
            ));
        }
        if !(1..=MAX_BATCH_BLOCKS).contains(&sync.max_batch_blocks) {
            return Err(ConfigError::invalid_value(
                "sync.max_batch_blocks",
                format!("must be between 1 and {}", MAX_BATCH_BLOCKS),
            ));
        }
        if !(100..=2000).contains(&sync.max_text_len) {
            return Err(ConfigError::invalid_value(
                "sync.max_text_len",
                "must be between 100 and 2000",
            ));
        }
        if sync.discovery_depth == 0 {
            return Err(ConfigError::invalid_value(
                "sync.discovery_depth",
                "must be greater than 0",
            ));
        }

        if config.remote.base_url.trim().is_empty() {
            return Err(ConfigError::missing_required("remote.base_url"));
        }

        config.retry.to_retry_config()?;

        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}
