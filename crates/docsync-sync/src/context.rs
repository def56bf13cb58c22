//! Session object handed to every engine component

use crate::convert::DocumentConverter;
use crate::index::{SyncIndex, IGNORE_FILE, INDEX_FILE};
use crate::remote::{node_id_from_url, FileStore, RetryingStore};
use crate::cache::CACHE_FILE;
use docsync_config::{Config, CONTROL_DIR};
use docsync_types::{Error, RemoteStore, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// File name of the file store when no path is configured
pub const DEFAULT_STORE_FILE: &str = "remote.json";

/// Paths of the control directory of one working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLayout {
    /// Working-tree root
    pub root: PathBuf,
    /// `<root>/.docsync`
    pub control_dir: PathBuf,
    /// Index file
    pub index: PathBuf,
    /// Change cache file
    pub cache: PathBuf,
    /// Tree-local config file
    pub config: PathBuf,
    /// Tree-local credential file
    pub env: PathBuf,
    /// Staging area of the current pull
    pub staging: PathBuf,
    /// Snapshots of earlier staging areas
    pub history: PathBuf,
    /// User ignore file
    pub ignore_file: PathBuf,
}

impl ControlLayout {
    /// Layout for the working tree at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let control_dir = root.join(CONTROL_DIR);
        Self {
            index: control_dir.join(INDEX_FILE),
            cache: control_dir.join(CACHE_FILE),
            config: control_dir.join("config.yaml"),
            env: control_dir.join(".env"),
            staging: control_dir.join("pull").join("latest"),
            history: control_dir.join("pull").join("history"),
            ignore_file: root.join(IGNORE_FILE),
            control_dir,
            root,
        }
    }

    /// Credential files in lookup order
    pub fn credential_chain(&self) -> Vec<PathBuf> {
        vec![self.env.clone(), self.root.join(".env")]
    }

    /// Default location of the file store
    pub fn default_store_path(&self) -> PathBuf {
        self.control_dir.join(DEFAULT_STORE_FILE)
    }
}

/// Everything one command run needs: tree, settings and remote store
#[derive(Clone)]
pub struct SyncContext {
    layout: ControlLayout,
    config: Config,
    store: Arc<dyn RemoteStore>,
    converter: DocumentConverter,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .field("converter", &self.converter)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Create a context around an existing store
    pub fn new(root: impl Into<PathBuf>, config: Config, store: Arc<dyn RemoteStore>) -> Self {
        let converter = DocumentConverter::new(config.sync.max_text_len);
        Self {
            layout: ControlLayout::new(root),
            config,
            store,
            converter,
        }
    }

    /// Create a context backed by the configured file store with retries
    pub async fn open(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let layout = ControlLayout::new(root);
        let store = open_file_store(&layout, &config).await?;
        let retry = config.retry.to_retry_config()?;
        let store: Arc<dyn RemoteStore> = Arc::new(RetryingStore::new(store, retry));

        let converter = DocumentConverter::new(config.sync.max_text_len);
        Ok(Self {
            layout,
            config,
            store,
            converter,
        })
    }

    /// Working-tree root
    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    /// Control directory paths
    pub fn layout(&self) -> &ControlLayout {
        &self.layout
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Remote store handle
    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Shared remote store handle
    pub fn store_handle(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    /// Name of the working-tree root directory
    pub fn root_name(&self) -> Option<String> {
        let root = self.layout.root.canonicalize().ok()?;
        root.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    /// Document converter configured for this tree
    pub fn converter(&self) -> &DocumentConverter {
        &self.converter
    }

    /// Root node url: the configured one, else the one recorded in the index
    pub fn root_url(&self, index: &SyncIndex) -> Result<String> {
        match self.config.require_root_url() {
            Ok(url) => Ok(url.to_string()),
            Err(e) => index
                .root_url()
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::configuration(e.to_string())),
        }
    }

    /// Root node id and url
    pub fn root_node(&self, index: &SyncIndex) -> Result<(String, String)> {
        let url = self.root_url(index)?;
        let id = node_id_from_url(&url).ok_or_else(|| {
            Error::configuration(format!("Root url '{}' does not contain a node id", url))
        })?;
        Ok((id, url))
    }
}

/// Open the file store configured for `layout`
pub async fn open_file_store(layout: &ControlLayout, config: &Config) -> Result<FileStore> {
    let path = match &config.remote.store_path {
        Some(path) if path.is_relative() => layout.root.join(path),
        Some(path) => path.clone(),
        None => layout.default_store_path(),
    };
    debug!("Using file store {}", path.display());
    FileStore::open(path, config.remote.base_url.clone()).await
}
