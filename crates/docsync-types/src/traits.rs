//! Core traits for docsync operations
//!
//! [`RemoteStore`] is the only seam between the engine and a concrete remote
//! document service. Implementations own transport, authentication and paging;
//! the engine owns chunking, retries and idempotence.

use crate::{Block, NodeRef, RemoteNode, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Abstract remote hierarchical node store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a child node titled `title` under `parent_id`
    async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef>;

    /// Fetch node metadata
    async fn get_node(&self, id: &str) -> Result<RemoteNode>;

    /// List the non-archived child nodes of `id`, in creation order
    async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>>;

    /// Find a direct child of `parent_id` by exact title
    async fn find_child_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemoteNode>> {
        Ok(self
            .list_children(parent_id)
            .await?
            .into_iter()
            .find(|node| node.title == title))
    }

    /// Fetch the content blocks of a node
    async fn get_content(&self, id: &str) -> Result<Vec<Block>>;

    /// Drop all content blocks of `id` and store `blocks` instead
    ///
    /// The store rejects more than [`crate::MAX_BATCH_BLOCKS`] blocks per call.
    async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()>;

    /// Append `blocks` to the content of `id`
    ///
    /// The store rejects more than [`crate::MAX_BATCH_BLOCKS`] blocks per call.
    async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()>;

    /// Archive a node
    async fn delete_node(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
        (**self).create_node(parent_id, title).await
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        (**self).get_node(id).await
    }

    async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>> {
        (**self).list_children(id).await
    }

    async fn find_child_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemoteNode>> {
        (**self).find_child_by_title(parent_id, title).await
    }

    async fn get_content(&self, id: &str) -> Result<Vec<Block>> {
        (**self).get_content(id).await
    }

    async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        (**self).replace_content(id, blocks).await
    }

    async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        (**self).append_content(id, blocks).await
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        (**self).delete_node(id).await
    }
}
