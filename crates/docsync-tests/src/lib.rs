//! docsync integration test support
//!
//! Shared fixtures for the end-to-end scenarios under `tests/`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Working-tree and remote-store fixtures
pub mod test_utils;
