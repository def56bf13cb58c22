//! Result type alias for docsync operations

use crate::Error;

/// Result type alias for docsync operations
pub type Result<T> = std::result::Result<T, Error>;
