//! Core type system and error handling for docsync
//!
//! This crate provides the foundational types shared by every docsync crate:
//!
//! - **Error handling**: one error taxonomy with severity and retry policy
//! - **Block model**: the structured document form exchanged with the remote store
//! - **Remote model**: node metadata and the [`RemoteStore`] trait
//! - **Configuration**: retry/backoff settings and remote limits
//!
//! # Examples
//!
//! ```rust
//! use docsync_types::{Block, Error, Result, RichSpan};
//!
//! fn greeting() -> Result<Block> {
//!     let block = Block::paragraph(vec![RichSpan::plain("hello")]);
//!     if block.plain_text().is_empty() {
//!         return Err(Error::conversion("empty paragraph"));
//!     }
//!     Ok(block)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{RetryConfig, MAX_BATCH_BLOCKS, MAX_TEXT_LEN};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::RemoteStore;
pub use types::*;
