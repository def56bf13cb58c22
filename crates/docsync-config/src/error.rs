//! Errors raised while layering, validating and saving configuration

use docsync_types::Error as DocsyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read or written
    #[error("I/O error on config file '{path}': {source}")]
    Io {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A configuration document could not be encoded or decoded
    #[error("Invalid {format} configuration: {message}")]
    Format {
        /// File format involved
        format: &'static str,
        /// Parser or encoder message
        message: String,
    },

    /// A setting the command needs is not set
    #[error("Missing required configuration: {key}")]
    MissingRequired {
        /// Dotted key of the setting
        key: String,
    },

    /// A setting is out of its allowed range
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue {
        /// Dotted key of the setting
        key: String,
        /// What is wrong with it
        message: String,
    },

    /// Merging the defaults, files and environment failed
    #[error("Cannot layer configuration sources: {0}")]
    Layering(#[from] config::ConfigError),
}

impl ConfigError {
    /// A setting the command needs is not set
    pub fn missing_required<S: Into<String>>(key: S) -> Self {
        Self::MissingRequired { key: key.into() }
    }

    /// A setting is out of its allowed range
    pub fn invalid_value<K: Into<String>, S: Into<String>>(key: K, message: S) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn format(format: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Format {
            format,
            message: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::format("YAML", error)
    }
}

impl From<ConfigError> for DocsyncError {
    fn from(error: ConfigError) -> Self {
        DocsyncError::configuration(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
