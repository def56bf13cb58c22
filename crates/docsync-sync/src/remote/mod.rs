//! Remote store plumbing
//!
//! [`RetryingStore`] wraps any [`RemoteStore`] with the backoff policy,
//! [`write_blocks`] splits content into batches the store accepts, and
//! [`MemoryStore`]/[`FileStore`] are the bundled store implementations.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{CallCounts, MemoryStore, StoreOp};

use async_trait::async_trait;
use docsync_types::{Block, NodeRef, RemoteNode, RemoteStore, Result, RetryConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use tracing::{debug, warn};

static NODE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[0-9a-f]{32}$").expect("valid node id pattern"));

/// Extract the 32-hex node id ending the last path segment of a node url
///
/// Query and fragment are ignored, and so are dashes inside the id.
pub fn node_id_from_url(url: &str) -> Option<String> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    let compact = segment.replace('-', "");
    NODE_ID
        .find(&compact)
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Url of node `id` below `base_url`
pub fn node_url(base_url: &str, id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), id)
}

/// Decorator retrying transient failures with exponential backoff
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    retry: RetryConfig,
}

impl<S: RemoteStore> RetryingStore<S> {
    /// Wrap `inner` with the given retry policy
    pub fn new(inner: S, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.should_retry() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt + 1,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for RetryingStore<S> {
    async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
        self.with_retry("create_node", || self.inner.create_node(parent_id, title))
            .await
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        self.with_retry("get_node", || self.inner.get_node(id)).await
    }

    async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>> {
        self.with_retry("list_children", || self.inner.list_children(id))
            .await
    }

    async fn find_child_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemoteNode>> {
        self.with_retry("find_child_by_title", || {
            self.inner.find_child_by_title(parent_id, title)
        })
        .await
    }

    async fn get_content(&self, id: &str) -> Result<Vec<Block>> {
        self.with_retry("get_content", || self.inner.get_content(id))
            .await
    }

    async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.with_retry("replace_content", || {
            self.inner.replace_content(id, blocks.clone())
        })
        .await
    }

    async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.with_retry("append_content", || {
            self.inner.append_content(id, blocks.clone())
        })
        .await
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        self.with_retry("delete_node", || self.inner.delete_node(id))
            .await
    }
}

/// Write `blocks` to node `id` in batches of at most `batch` blocks
///
/// With `replace` the first batch replaces the node's content and a failure
/// there is returned. Later batches are appended; a failed append is logged and
/// skipped. Returns the number of blocks the store accepted.
pub async fn write_blocks(
    store: &dyn RemoteStore,
    id: &str,
    blocks: Vec<Block>,
    batch: usize,
    replace: bool,
) -> Result<usize> {
    let batch = batch.max(1);
    let total = blocks.len();
    let mut written = 0;
    let mut chunks: Vec<Vec<Block>> = Vec::with_capacity(total / batch + 1);
    let mut iter = blocks.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(batch).collect());
    }

    let mut chunks = chunks.into_iter();
    if replace {
        let first = chunks.next().unwrap_or_default();
        let len = first.len();
        store.replace_content(id, first).await?;
        written += len;
    }

    for (index, chunk) in chunks.enumerate() {
        let len = chunk.len();
        match store.append_content(id, chunk).await {
            Ok(()) => written += len,
            Err(e) => warn!("Skipping batch {} of {} blocks for {}: {}", index + 1, len, id, e),
        }
    }

    debug!("Wrote {}/{} blocks to {}", written, total, id);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_types::{Error, RichSpan};
    use std::time::Duration;

    fn paragraphs(n: usize) -> Vec<Block> {
        (0..n)
            .map(|i| Block::paragraph(vec![RichSpan::plain(format!("p{}", i))]))
            .collect()
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts, Duration::from_millis(1), Duration::from_millis(4), 2.0).unwrap()
    }

    #[test]
    fn test_node_id_from_url() {
        let id = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            node_id_from_url(&format!("https://pages.local/{}", id)).as_deref(),
            Some(id)
        );
        assert_eq!(
            node_id_from_url("https://x.io/Title-01234567-89AB-CDEF-0123-456789ABCDEF").as_deref(),
            Some(id)
        );
        assert_eq!(
            node_id_from_url(&format!("https://x.io/Release-Notes-{}?v=1#top", id)).as_deref(),
            Some(id)
        );
        assert_eq!(
            node_id_from_url(&format!("https://x.io/Page-{}/", id)).as_deref(),
            Some(id)
        );
        assert!(node_id_from_url(&format!("https://x.io/{}/short", id)).is_none());
        assert!(node_id_from_url("https://pages.local/short").is_none());
        assert_eq!(node_url("https://pages.local/", "abc"), "https://pages.local/abc");
    }

    #[tokio::test]
    async fn test_write_blocks_batches() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;

        let written = write_blocks(&store, &root.id, paragraphs(250), 100, true)
            .await
            .unwrap();

        assert_eq!(written, 250);
        let counts = store.calls();
        assert_eq!(counts.replace_content, 1);
        assert_eq!(counts.append_content, 2);
        assert_eq!(store.get_content(&root.id).await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn test_write_blocks_empty_replace_clears() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        store.append_content(&root.id, paragraphs(3)).await.unwrap();

        let written = write_blocks(&store, &root.id, Vec::new(), 100, true)
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(store.get_content(&root.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_append_is_skipped() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        store
            .fail_next(StoreOp::AppendContent, Error::remote_fatal("rejected"))
            .await;

        let written = write_blocks(&store, &root.id, paragraphs(250), 100, false)
            .await
            .unwrap();

        assert_eq!(written, 150);
        assert_eq!(store.get_content(&root.id).await.unwrap().len(), 150);
    }

    #[tokio::test]
    async fn test_failed_replace_propagates() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        store
            .fail_next(StoreOp::ReplaceContent, Error::remote_fatal("rejected"))
            .await;

        let result = write_blocks(&store, &root.id, paragraphs(5), 100, true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        for _ in 0..2 {
            store
                .fail_next(StoreOp::GetNode, Error::remote_transient("timeout"))
                .await;
        }

        let retrying = RetryingStore::new(store, fast_retry(5));
        let node = retrying.get_node(&root.id).await.unwrap();

        assert_eq!(node.id, root.id);
        assert_eq!(retrying.inner().calls().get_node, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        for _ in 0..5 {
            store
                .fail_next(StoreOp::GetNode, Error::remote_transient("timeout"))
                .await;
        }

        let retrying = RetryingStore::new(store, fast_retry(3));
        let err = retrying.get_node(&root.id).await.unwrap_err();

        assert!(err.should_retry());
        assert_eq!(retrying.inner().calls().get_node, 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_fatal_errors() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        store
            .fail_next(StoreOp::CreateNode, Error::remote_fatal("bad request"))
            .await;

        let retrying = RetryingStore::new(store, fast_retry(5));
        assert!(retrying.create_node(&root.id, "x").await.is_err());
        assert_eq!(retrying.inner().calls().create_node, 1);
    }
}
