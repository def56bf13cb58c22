//! Working-tree and remote-store fixtures shared by the integration tests

use docsync_config::Config;
use docsync_sync::remote::{MemoryStore, RetryingStore};
use docsync_sync::{
    DiffPuller, MergeEngine, MergeReport, PullOptions, PullReport, PushOptions, SyncContext,
    SyncIndex, SyncReport, TreeSynchronizer,
};
use docsync_types::{Block, NodeRef, RemoteStore, Result, RetryConfig, RichSpan};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Base url of the in-memory store
pub const BASE_URL: &str = "https://pages.local";

/// Retry policy short enough for tests
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
    }
}

/// Paragraph blocks, one per line of `text`
pub fn paragraphs(text: &str) -> Vec<Block> {
    text.lines()
        .map(|line| Block::paragraph(vec![RichSpan::plain(line)]))
        .collect()
}

/// A temporary working tree bound to a fresh in-memory remote root
pub struct Workspace {
    dir: TempDir,
    /// The remote store shared by every context of this workspace
    pub store: Arc<MemoryStore>,
    /// The remote root node
    pub root: NodeRef,
}

impl Workspace {
    /// Create an empty working tree and a remote root titled `Workspace`
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(MemoryStore::new(BASE_URL));
        let root = store.create_root("Workspace").await;
        Self { dir, store, root }
    }

    /// Working-tree root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration binding the tree to the remote root
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.remote.root_url = Some(self.root.url.clone());
        config
    }

    /// Context talking to the store directly
    pub fn ctx(&self) -> SyncContext {
        SyncContext::new(self.path(), self.config(), self.store.clone())
    }

    /// Context going through the retry decorator
    pub fn retrying_ctx(&self) -> SyncContext {
        let store: Arc<dyn RemoteStore> =
            Arc::new(RetryingStore::new(self.store.clone(), fast_retry()));
        SyncContext::new(self.path(), self.config(), store)
    }

    /// Write a working-tree file, creating parent directories
    pub fn write(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, text).expect("Failed to write file");
        path
    }

    /// Read a working-tree file
    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).expect("Failed to read file")
    }

    /// Whether a working-tree path exists
    pub fn exists(&self, rel: &str) -> bool {
        self.path().join(rel).exists()
    }

    /// Load the index of the working tree
    pub async fn index(&self) -> Result<SyncIndex> {
        SyncIndex::load(&self.ctx().layout().control_dir).await
    }

    /// Push with default options
    pub async fn push(&self) -> Result<SyncReport> {
        self.push_with(PushOptions::default()).await
    }

    /// Push with explicit options
    pub async fn push_with(&self, options: PushOptions) -> Result<SyncReport> {
        let ctx = self.ctx();
        TreeSynchronizer::new(&ctx).push(options).await
    }

    /// Pull with default options
    pub async fn pull(&self) -> Result<PullReport> {
        let ctx = self.ctx();
        DiffPuller::new(&ctx).pull(&PullOptions::default()).await
    }

    /// Merge the staging area into the working tree
    pub async fn merge(&self) -> Result<MergeReport> {
        let ctx = self.ctx();
        let mut index = self.index().await?;
        MergeEngine::new(&ctx).apply_staged(&mut index).await
    }

    /// Remote node id recorded in the index for `rel`
    pub async fn node_id(&self, rel: &str) -> Option<String> {
        self.index()
            .await
            .ok()?
            .get(rel)
            .and_then(|entry| entry.remote_node_id.clone())
    }
}
