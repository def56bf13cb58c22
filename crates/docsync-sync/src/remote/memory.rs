//! In-process remote store

use super::node_url;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use docsync_types::{Block, Error, NodeRef, RemoteNode, RemoteStore, Result, MAX_BATCH_BLOCKS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Store operation, used to address injected failures and call counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `create_node`
    CreateNode,
    /// `get_node`
    GetNode,
    /// `list_children`
    ListChildren,
    /// `find_child_by_title`
    FindChild,
    /// `get_content`
    GetContent,
    /// `replace_content`
    ReplaceContent,
    /// `append_content`
    AppendContent,
    /// `delete_node`
    DeleteNode,
}

/// Number of calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_node` calls
    pub create_node: u64,
    /// `get_node` calls
    pub get_node: u64,
    /// `list_children` calls
    pub list_children: u64,
    /// `find_child_by_title` calls
    pub find_child: u64,
    /// `get_content` calls
    pub get_content: u64,
    /// `replace_content` calls
    pub replace_content: u64,
    /// `append_content` calls
    pub append_content: u64,
    /// `delete_node` calls
    pub delete_node: u64,
}

impl CallCounts {
    /// Calls that mutate the store
    pub fn writes(&self) -> u64 {
        self.create_node + self.replace_content + self.append_content + self.delete_node
    }

    /// All calls
    pub fn total(&self) -> u64 {
        self.writes() + self.get_node + self.list_children + self.find_child + self.get_content
    }
}

#[derive(Debug, Default)]
struct Counters([AtomicU64; 8]);

impl Counters {
    fn bump(&self, op: StoreOp) {
        self.0[op as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, op: StoreOp) -> u64 {
        self.0[op as usize].load(Ordering::Relaxed)
    }

    fn reset(&self) {
        for counter in &self.0 {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNode {
    node: RemoteNode,
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    children: Vec<String>,
}

/// Serializable state of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    nodes: BTreeMap<String, StoredNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clock: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Strictly increasing edit timestamp
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut StoredNode> {
        self.nodes.get_mut(id).ok_or_else(|| Error::not_found(id))
    }

    fn insert(&mut self, base_url: &str, parent_id: Option<&str>, title: &str) -> NodeRef {
        let id = Uuid::new_v4().simple().to_string();
        let node = RemoteNode {
            id: id.clone(),
            title: title.to_string(),
            url: node_url(base_url, &id),
            parent_id: parent_id.map(str::to_string),
            last_edited: Some(self.tick()),
            archived: false,
        };
        let node_ref = node.node_ref();
        self.nodes.insert(
            id,
            StoredNode {
                node,
                content: Vec::new(),
                children: Vec::new(),
            },
        );
        node_ref
    }

    fn insert_child(&mut self, base_url: &str, parent_id: &str, title: &str) -> Result<NodeRef> {
        let parent = self.nodes.get(parent_id).ok_or_else(|| Error::not_found(parent_id))?;
        if parent.node.archived {
            return Err(Error::remote_fatal(format!("Parent {} is archived", parent_id)));
        }

        let node_ref = self.insert(base_url, Some(parent_id), title);
        let edited = self.tick();
        let parent = self.node_mut(parent_id)?;
        parent.children.push(node_ref.id.clone());
        parent.node.last_edited = Some(edited);
        Ok(node_ref)
    }

    fn children(&self, id: &str) -> Result<Vec<RemoteNode>> {
        let parent = self.nodes.get(id).ok_or_else(|| Error::not_found(id))?;
        Ok(parent
            .children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .filter(|child| !child.node.archived)
            .map(|child| child.node.clone())
            .collect())
    }

    fn set_content(&mut self, id: &str, blocks: Vec<Block>, replace: bool) -> Result<()> {
        if blocks.len() > MAX_BATCH_BLOCKS {
            return Err(Error::remote_fatal(format!(
                "Request has {} blocks, at most {} are accepted",
                blocks.len(),
                MAX_BATCH_BLOCKS
            )));
        }
        let edited = self.tick();
        let node = self.node_mut(id)?;
        if replace {
            node.content = blocks;
        } else {
            node.content.extend(blocks);
        }
        node.node.last_edited = Some(edited);
        Ok(())
    }
}

/// Remote store holding the node tree in memory
///
/// Content changes, new children and archiving advance a node's last-edited
/// time, which strictly increases across the store.
///
/// Every call is counted, and failures can be queued per operation to
/// exercise retry and error paths.
#[derive(Debug)]
pub struct MemoryStore {
    base_url: String,
    state: RwLock<StoreState>,
    counters: Counters,
    failures: Mutex<Vec<(StoreOp, Error)>>,
}

impl MemoryStore {
    /// Create an empty store building urls below `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_state(base_url, StoreState::default())
    }

    pub(crate) fn with_state(base_url: impl Into<String>, state: StoreState) -> Self {
        Self {
            base_url: base_url.into(),
            state: RwLock::new(state),
            counters: Counters::default(),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn state(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Base url of node urls
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a parentless node
    pub async fn create_root(&self, title: &str) -> NodeRef {
        self.state.write().await.insert(&self.base_url, None, title)
    }

    /// Create a child node without counting the call
    pub async fn insert_child(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
        self.state
            .write()
            .await
            .insert_child(&self.base_url, parent_id, title)
    }

    /// Replace a node's content without counting the call, as a remote edit
    pub async fn edit_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        let mut state = self.state.write().await;
        let edited = state.tick();
        let node = state.node_mut(id)?;
        node.content = blocks;
        node.node.last_edited = Some(edited);
        Ok(())
    }

    /// Override a node's last-edited time
    pub async fn set_last_edited(&self, id: &str, edited: Option<DateTime<Utc>>) -> Result<()> {
        self.state.write().await.node_mut(id)?.node.last_edited = edited;
        Ok(())
    }

    /// Current content without counting the call
    pub async fn content_of(&self, id: &str) -> Option<Vec<Block>> {
        self.state
            .read()
            .await
            .nodes
            .get(id)
            .map(|n| n.content.clone())
    }

    /// All nodes, archived ones included
    pub async fn nodes(&self) -> Vec<RemoteNode> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .map(|n| n.node.clone())
            .collect()
    }

    /// Make the next call of `op` fail with `error`
    pub async fn fail_next(&self, op: StoreOp, error: Error) {
        self.failures.lock().await.push((op, error));
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create_node: self.counters.get(StoreOp::CreateNode),
            get_node: self.counters.get(StoreOp::GetNode),
            list_children: self.counters.get(StoreOp::ListChildren),
            find_child: self.counters.get(StoreOp::FindChild),
            get_content: self.counters.get(StoreOp::GetContent),
            replace_content: self.counters.get(StoreOp::ReplaceContent),
            append_content: self.counters.get(StoreOp::AppendContent),
            delete_node: self.counters.get(StoreOp::DeleteNode),
        }
    }

    /// Zero the call counters
    pub fn reset_calls(&self) {
        self.counters.reset();
    }

    async fn enter(&self, op: StoreOp) -> Result<()> {
        self.counters.bump(op);
        let mut failures = self.failures.lock().await;
        match failures.iter().position(|(failing, _)| *failing == op) {
            Some(index) => Err(failures.remove(index).1),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
        self.enter(StoreOp::CreateNode).await?;
        self.state
            .write()
            .await
            .insert_child(&self.base_url, parent_id, title)
    }

    async fn get_node(&self, id: &str) -> Result<RemoteNode> {
        self.enter(StoreOp::GetNode).await?;
        self.state
            .read()
            .await
            .nodes
            .get(id)
            .map(|n| n.node.clone())
            .ok_or_else(|| Error::not_found(id))
    }

    async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>> {
        self.enter(StoreOp::ListChildren).await?;
        self.state.read().await.children(id)
    }

    async fn find_child_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemoteNode>> {
        self.enter(StoreOp::FindChild).await?;
        Ok(self
            .state
            .read()
            .await
            .children(parent_id)?
            .into_iter()
            .find(|n| n.title == title))
    }

    async fn get_content(&self, id: &str) -> Result<Vec<Block>> {
        self.enter(StoreOp::GetContent).await?;
        self.content_of(id).await.ok_or_else(|| Error::not_found(id))
    }

    async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.enter(StoreOp::ReplaceContent).await?;
        self.state.write().await.set_content(id, blocks, true)
    }

    async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
        self.enter(StoreOp::AppendContent).await?;
        self.state.write().await.set_content(id, blocks, false)
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        self.enter(StoreOp::DeleteNode).await?;
        let mut state = self.state.write().await;
        let edited = state.tick();
        let node = state.node_mut(id)?;
        node.node.archived = true;
        node.node.last_edited = Some(edited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_types::RichSpan;

    #[tokio::test]
    async fn test_create_and_list_children() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        let a = store.create_node(&root.id, "a").await.unwrap();
        let b = store.create_node(&root.id, "b").await.unwrap();

        assert_eq!(a.id.len(), 32);
        assert_eq!(a.url, format!("https://pages.local/{}", a.id));

        let children = store.list_children(&root.id).await.unwrap();
        let titles: Vec<_> = children.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);

        store.delete_node(&a.id).await.unwrap();
        let found = store.find_child_by_title(&root.id, "a").await.unwrap();
        assert!(found.is_none());
        assert_eq!(
            store.find_child_by_title(&root.id, "b").await.unwrap().unwrap().id,
            b.id
        );
        assert!(store.get_node(&a.id).await.unwrap().archived);
    }

    #[tokio::test]
    async fn test_content_edits_advance_last_edited() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        let before = store.get_node(&root.id).await.unwrap().last_edited;

        store
            .append_content(&root.id, vec![Block::paragraph(vec![RichSpan::plain("x")])])
            .await
            .unwrap();
        let after = store.get_node(&root.id).await.unwrap().last_edited;

        assert!(after > before);
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        let blocks = vec![Block::divider(); MAX_BATCH_BLOCKS + 1];

        let err = store.append_content(&root.id, blocks).await.unwrap_err();
        assert!(!err.should_retry());
        assert!(store.content_of(&root.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_node() {
        let store = MemoryStore::new("https://pages.local");
        assert!(store.get_node("nope").await.is_err());
        assert!(store.create_node("nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryStore::new("https://pages.local");
        let root = store.create_root("root").await;
        store
            .fail_next(StoreOp::ListChildren, Error::remote_transient("busy"))
            .await;

        assert!(store.list_children(&root.id).await.is_err());
        assert!(store.list_children(&root.id).await.is_ok());
        assert_eq!(store.calls().list_children, 2);
        assert_eq!(store.calls().writes(), 0);

        store.reset_calls();
        assert_eq!(store.calls().total(), 0);
    }
}
