//! Error types and handling for docsync
//!
//! Every failure the engine can observe is mapped onto one [`Error`] variant. The
//! variant decides the policy: configuration problems abort before any mutation,
//! transient remote failures are retried with backoff, conflicts are re-resolved by
//! title search and per-item local failures are logged and skipped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - the current item fails, the run continues
    Medium,
    /// High severity - the run should be aborted
    High,
    /// Critical severity - entire process should be terminated
    Critical,
}

/// Main error type for docsync operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    /// Missing or invalid configuration, e.g. no remote root
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Timeout, rate limit or server-side failure of the remote store
    #[error("Transient remote error: {message}")]
    RemoteTransient {
        /// Error message from the remote store
        message: String,
    },

    /// Remote request rejected for a reason retrying will not fix
    #[error("Remote error: {message}")]
    RemoteFatal {
        /// Error message from the remote store
        message: String,
    },

    /// A concurrent create raced with ours
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message describing the conflict
        message: String,
    },

    /// Remote node does not exist
    #[error("Remote node not found: {id}")]
    NotFound {
        /// Id of the missing node
        id: String,
    },

    /// Filesystem failure on a single item
    #[error("I/O error on '{path}': {message}")]
    LocalIo {
        /// Path that failed
        path: PathBuf,
        /// Underlying error message
        message: String,
    },

    /// A construct that could not be converted
    #[error("Conversion warning: {message}")]
    Conversion {
        /// What was dropped and why
        message: String,
    },

    /// Index, cache or manifest could not be (de)serialized
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message from the serializer
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration errors
    Configuration,
    /// Retryable remote errors
    RemoteTransient,
    /// Non-retryable remote errors
    RemoteFatal,
    /// Create races
    Conflict,
    /// Missing remote nodes
    NotFound,
    /// Local filesystem errors
    LocalIo,
    /// Conversion diagnostics
    Conversion,
    /// Serialization errors
    Serialization,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::RemoteTransient { .. } => ErrorKind::RemoteTransient,
            Self::RemoteFatal { .. } => ErrorKind::RemoteFatal,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LocalIo { .. } => ErrorKind::LocalIo,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration { .. } => ErrorSeverity::Critical,
            Self::RemoteFatal { .. } => ErrorSeverity::High,
            Self::RemoteTransient { .. }
            | Self::Conflict { .. }
            | Self::NotFound { .. }
            | Self::LocalIo { .. }
            | Self::Serialization { .. } => ErrorSeverity::Medium,
            Self::Conversion { .. } => ErrorSeverity::Low,
        }
    }

    /// Check if the surrounding walk can continue past this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration { .. })
    }

    /// Check if this error should trigger a retry with backoff
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::RemoteTransient { .. })
    }

    /// Check if this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        self.severity() >= ErrorSeverity::Critical
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new transient remote error
    pub fn remote_transient<S: Into<String>>(message: S) -> Self {
        Self::RemoteTransient {
            message: message.into(),
        }
    }

    /// Create a new fatal remote error
    pub fn remote_fatal<S: Into<String>>(message: S) -> Self {
        Self::RemoteFatal {
            message: message.into(),
        }
    }

    /// Create a new conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a new local I/O error for `path`
    pub fn local_io<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::LocalIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new conversion diagnostic
    pub fn conversion<S: Into<String>>(message: S) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Classify an HTTP-style status code returned by a remote service
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => Self::RemoteTransient { message },
            404 => Self::NotFound { id: message },
            409 => Self::Conflict { message },
            _ => Self::RemoteFatal {
                message: format!("{} ({})", message, status),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::LocalIo {
            path: PathBuf::new(),
            message: error.to_string(),
        }
    }
}
