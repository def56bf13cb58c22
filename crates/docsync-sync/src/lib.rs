//! Two-way synchronization between a local text tree and a remote page store
//!
//! This crate holds the docsync engines:
//!
//! - **Conversion**: markdown and source files to remote blocks and back
//! - **Push**: mirror the working tree onto the remote tree, skipping unchanged files
//! - **Pull**: diff-check indexed nodes, discover new ones, stage their text
//! - **Merge**: two-way line merge of staged text into the working tree
//! - **State**: the persistent sync index and the change cache
//!
//! # Examples
//!
//! ```rust
//! use docsync_config::Config;
//! use docsync_sync::{MemoryStore, PushOptions, SyncContext, TreeSynchronizer};
//! use std::sync::Arc;
//!
//! # async fn example() -> docsync_types::Result<()> {
//! let store = Arc::new(MemoryStore::new("https://pages.local"));
//! let root = store.create_root("Workspace").await;
//!
//! let mut config = Config::default();
//! config.remote.root_url = Some(root.url);
//! let ctx = SyncContext::new("notes", config, store);
//!
//! let report = TreeSynchronizer::new(&ctx).push(PushOptions::default()).await?;
//! println!("Created {} nodes", report.stats.nodes_created);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod context;
pub mod convert;
pub mod fsutil;
pub mod index;
pub mod manifest;
pub mod merge;
pub mod pull;
pub mod push;
pub mod remote;
pub mod report;
pub mod status;

pub use cache::ChangeCache;
pub use context::{ControlLayout, SyncContext};
pub use convert::DocumentConverter;
pub use index::{IgnoreRules, IndexEntry, SyncIndex};
pub use manifest::{Manifest, ManifestItem};
pub use merge::{merge_text, MergeEngine, MergeStatus, Strategy};
pub use pull::{DiffPuller, PullOptions};
pub use push::{PushOptions, TreeSynchronizer};
pub use remote::{FileStore, MemoryStore, RetryingStore};
pub use report::{Action, ActionLog, ActionRecord, MergeReport, PullReport, SyncReport};
pub use status::{status, StatusReport};
