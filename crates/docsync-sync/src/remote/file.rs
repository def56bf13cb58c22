//! Remote store persisted to a JSON file

use super::memory::{MemoryStore, StoreState};
use crate::fsutil::write_atomic;
use async_trait::async_trait;
use docsync_types::{Block, Error, NodeRef, RemoteNode, RemoteStore, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// A [`MemoryStore`] written back to disk after every mutation
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub async fn open(path: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                Error::serialization(format!("Invalid store file '{}': {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(Error::local_io(&path, e.to_string())),
        };

        debug!("Opened file store {}", path.display());
        Ok(Self {
            path,
            inner: MemoryStore::with_state(base_url, state),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory view
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Create a parentless node and persist it
    pub async fn create_root(&self, title: &str) -> Result<NodeRef> {
        let node = self.inner.create_root(title).await;
        self.persist().await?;
        Ok(node)
    }

    async fn persist(&self) -> Result<()> {
        let state = self.inner.state().await;
        let data = serde_json::to_vec_pretty(&state)
            .map_err(|e| Error::serialization(format!("Failed to serialize store: {}", e)))?;
        write_atomic(&self.path, data).await
    }
}

#[async_trait]
impl RemoteStore for FileStore {
    async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
        let node = self.inner.create_node(parent_id, title).await?;
        self.persist().await?;
        Ok(node)
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        self.inner.get_node(id).await
    }

    async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>> {
        self.inner.list_children(id).await
    }

    async fn find_child_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemoteNode>> {
        self.inner.find_child_by_title(parent_id, title).await
    }

    async fn get_content(&self, id: &str) -> Result<Vec<Block>> {
        self.inner.get_content(id).await
    }

    async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.inner.replace_content(id, blocks).await?;
        self.persist().await
    }

    async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.inner.append_content(id, blocks).await?;
        self.persist().await
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        self.inner.delete_node(id).await?;
        self.persist().await
    }
}
