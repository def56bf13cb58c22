//! Remote change detection and staging
//!
//! A pull never touches the working tree. Everything fetched lands in the
//! staging area together with a manifest; [`crate::merge::MergeEngine`] applies
//! it afterwards.
//!
//! With an index to work from, the pull is a diff-check: every indexed node's
//! last-edited time is fetched concurrently and only nodes edited after their
//! last sync are fetched in full. New nodes are found by a bounded walk from
//! the changed nodes. Without an index the whole remote tree is walked.

use crate::cache::ChangeCache;
use crate::context::SyncContext;
use crate::fsutil::{file_name_for_title, key_path, safe_file_name};
use crate::index::SyncIndex;
use crate::manifest::{Manifest, ManifestItem};
use crate::report::{Action, ActionLog, PullReport, StagedItem};
use chrono::{DateTime, Utc};
use docsync_types::{Block, BlockKind, EntryKind, Error, ErrorKind, RemoteNode, Result, SyncStats};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Depth bound of a full remote walk
pub const FULL_WALK_DEPTH: usize = 32;

/// Options for a pull
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Only look for nodes the index does not know
    pub new_only: bool,
    /// Only refresh nodes the index knows
    pub existing_only: bool,
    /// Report what would be staged without writing anything
    pub dry_run: bool,
    /// Keep the previous staging area under `pull/history`
    pub snapshot: bool,
    /// Override the configured discovery depth
    pub discovery_depth: Option<usize>,
}

/// An indexed node taking part in the diff-check
#[derive(Debug, Clone)]
struct Candidate {
    node_id: String,
    url: String,
    title: String,
    file_path: Option<String>,
    dir_path: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl Candidate {
    /// Working-tree file holding the node's content
    fn content_path(&self) -> Option<String> {
        self.file_path
            .clone()
            .or_else(|| self.dir_path.as_deref().map(body_path))
    }

    fn manifest_item(&self, kind: EntryKind, edited: Option<DateTime<Utc>>) -> ManifestItem {
        ManifestItem {
            node_id: self.node_id.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            kind,
            parent_url: None,
            remote_last_edited: edited,
            is_new: false,
        }
    }

    fn kind(&self) -> EntryKind {
        if self.dir_path.is_some() {
            EntryKind::Dir
        } else {
            EntryKind::File
        }
    }
}

/// Next node to expand during discovery
struct Frontier {
    id: String,
    dir: String,
    depth: usize,
    children: Option<Vec<RemoteNode>>,
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Body file of a directory: `<dir>/<dir name>.md`
fn body_path(dir: &str) -> String {
    let name = dir.rsplit('/').next().unwrap_or(dir);
    join_rel(dir, &format!("{}.md", name))
}

/// Drop blocks that only point at child nodes
fn strip_child_links(blocks: Vec<Block>, children: &[RemoteNode]) -> Vec<Block> {
    blocks
        .into_iter()
        .filter(|block| match &block.kind {
            BlockKind::ChildPage { title } => !children.iter().any(|c| &c.title == title),
            BlockKind::Paragraph => !matches!(
                block.spans.as_slice(),
                [span] if span
                    .link_url
                    .as_deref()
                    .is_some_and(|url| children.iter().any(|c| c.url == url))
            ),
            _ => true,
        })
        .collect()
}

/// Fetches remote changes into the staging area
#[derive(Debug)]
pub struct DiffPuller<'a> {
    ctx: &'a SyncContext,
    log: ActionLog,
    manifest: Manifest,
    staged: Vec<StagedItem>,
    stats: SyncStats,
    dry_run: bool,
}

impl<'a> DiffPuller<'a> {
    /// Create a puller for `ctx`
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            log: ActionLog::new(),
            manifest: Manifest::default(),
            staged: Vec::new(),
            stats: SyncStats::new(),
            dry_run: false,
        }
    }

    /// Report every staged item to `log`
    pub fn with_action_log(mut self, log: ActionLog) -> Self {
        self.log = log;
        self
    }

    /// Run one pull
    pub async fn pull(mut self, options: &PullOptions) -> Result<PullReport> {
        let operation_id = uuid::Uuid::new_v4();
        let start = Instant::now();
        let layout = self.ctx.layout().clone();
        self.dry_run = options.dry_run;

        let mut index = SyncIndex::load(&layout.control_dir).await?;
        let (root_id, root_url) = self.ctx.root_node(&index)?;
        let mut cache = ChangeCache::open(&layout).await?;
        cache.set_parent_url(&root_url);

        info!(
            "Starting pull {} from {} into {}",
            operation_id,
            root_url,
            layout.staging.display()
        );

        if !self.dry_run {
            prepare_staging(&layout.staging, &layout.history, options.snapshot).await?;
        }

        let candidates = collect_candidates(&index);
        let full_walk = candidates.is_empty();
        let depth = options
            .discovery_depth
            .unwrap_or(self.ctx.config().sync.discovery_depth);
        let mut checked = 0;
        let mut changed_count = 0;

        let discovered = if full_walk {
            info!("Index has no remote nodes, walking the whole remote tree");
            self.stage_root_body(&root_id, &root_url).await;
            let seeds = vec![root_id.clone()];
            self.discover(&index, &cache, seeds, &root_id, FULL_WALK_DEPTH, false)
                .await
        } else {
            checked = candidates.len();
            let changed = self.diff_check(&mut index, &mut cache, candidates).await?;
            changed_count = changed.len();
            info!("Diff-check: {} of {} nodes changed", changed_count, checked);

            if !options.new_only {
                for (candidate, node) in &changed {
                    if let Err(e) = self.fetch_changed(candidate, node.as_ref()).await {
                        warn!("Failed to fetch {}: {}", candidate.title, e);
                        self.stats.errors += 1;
                        self.log.record(
                            Action::Error,
                            candidate.kind(),
                            candidate.content_path().unwrap_or_default(),
                            &candidate.title,
                            &candidate.url,
                        );
                    }
                }
            }

            if options.new_only || !options.existing_only {
                let seeds = if changed.is_empty() {
                    vec![root_id.clone()]
                } else {
                    changed.iter().map(|(c, _)| c.node_id.clone()).collect()
                };
                self.discover(&index, &cache, seeds, &root_id, depth, true)
                    .await
            } else {
                Vec::new()
            }
        };

        let discovered_count = discovered.len();
        if !self.dry_run {
            cache.add_known_node_ids(discovered);
            self.manifest.save(&layout.staging).await?;
            index.save().await?;
            cache.save().await?;
        }

        self.stats.duration = start.elapsed();
        info!(
            "Pull finished: {} staged, {} unchanged, {} errors in {:?}",
            self.stats.files_staged, self.stats.unchanged, self.stats.errors, self.stats.duration
        );

        Ok(PullReport {
            operation_id,
            stats: self.stats,
            staging: layout.staging,
            staged: self.staged,
            changed: changed_count,
            checked,
            discovered: discovered_count,
            full_walk,
            actions: self.log.into_records(),
            dry_run: self.dry_run,
        })
    }

    /// Fetch last-edited times of all candidates and return the changed ones
    async fn diff_check(
        &mut self,
        index: &mut SyncIndex,
        cache: &mut ChangeCache,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<(Candidate, Option<RemoteNode>)>> {
        let permits = Arc::new(Semaphore::new(self.ctx.config().sync.concurrency.max(1)));
        let store = self.ctx.store_handle();

        let checks = candidates.into_iter().map(|candidate| {
            let permits = Arc::clone(&permits);
            let store = Arc::clone(&store);
            async move {
                let _permit = permits.acquire().await;
                let result = store.get_node(&candidate.node_id).await;
                (candidate, result)
            }
        });
        let results = join_all(checks).await;

        let mut changed = Vec::new();
        let mut observed: BTreeMap<String, Option<DateTime<Utc>>> = BTreeMap::new();
        for (candidate, result) in results {
            match result {
                Ok(node) if node.archived => {
                    warn!("Remote node of {} is archived, skipping", candidate.title);
                    self.stats.errors += 1;
                }
                Ok(node) => {
                    observed.insert(candidate.node_id.clone(), node.last_edited);
                    let is_changed = match (node.last_edited, candidate.last_sync_at) {
                        (Some(edited), Some(synced)) => edited > synced,
                        _ => true,
                    };
                    if is_changed {
                        changed.push((candidate, Some(node)));
                    } else {
                        self.stats.unchanged += 1;
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Remote node of {} no longer exists", candidate.title);
                    self.stats.errors += 1;
                }
                Err(e) => {
                    debug!("Could not read {}: {}, treating as changed", candidate.node_id, e);
                    changed.push((candidate, None));
                }
            }
        }

        if !self.dry_run {
            let keys: Vec<String> = index
                .entries()
                .filter(|(_, e)| {
                    e.remote_node_id
                        .as_ref()
                        .is_some_and(|id| observed.contains_key(id))
                })
                .map(|(k, _)| k.to_string())
                .collect();
            for key in keys {
                if let Some(mut entry) = index.get(&key).cloned() {
                    let id = entry.remote_node_id.clone().unwrap_or_default();
                    if let Some(edited) = observed.get(&id).copied().flatten() {
                        entry.remote_last_edited = Some(edited);
                        index.set(key, entry);
                    }
                }
            }
            cache.set_remote_snapshot(observed);
        }

        Ok(changed)
    }

    /// Stage the content of a changed indexed node
    async fn fetch_changed(
        &mut self,
        candidate: &Candidate,
        node: Option<&RemoteNode>,
    ) -> Result<()> {
        let Some(content_path) = candidate.content_path() else {
            return Ok(());
        };
        let edited = node.and_then(|n| n.last_edited);

        if let Some(dir) = &candidate.dir_path {
            let item = candidate.manifest_item(EntryKind::Dir, edited);
            self.manifest.items.insert(dir.clone(), item);
        }

        if self.dry_run {
            self.log.record(
                Action::Update,
                candidate.kind(),
                &content_path,
                &candidate.title,
                &candidate.url,
            );
            return Ok(());
        }

        let ctx = self.ctx;
        let store = ctx.store();
        let children = if candidate.dir_path.is_some() {
            store.list_children(&candidate.node_id).await?
        } else {
            Vec::new()
        };
        let content = store.get_content(&candidate.node_id).await?;
        let blocks = strip_child_links(content, &children);
        let text = self
            .ctx
            .converter()
            .blocks_to_file_text(Path::new(&content_path), &blocks);

        // A directory without a body file only gets one when the remote has a body.
        if candidate.file_path.is_none() && text.trim().is_empty() {
            self.log.record(
                Action::Update,
                EntryKind::Dir,
                candidate.dir_path.as_deref().unwrap_or_default(),
                &candidate.title,
                &candidate.url,
            );
            return Ok(());
        }

        self.stage(&content_path, &text).await?;
        let item = candidate.manifest_item(EntryKind::File, edited);
        self.manifest.items.insert(content_path.clone(), item);
        self.staged.push(StagedItem {
            rel_path: content_path.clone(),
            node_id: candidate.node_id.clone(),
            is_new: false,
        });
        self.log.record(
            Action::Update,
            candidate.kind(),
            content_path,
            &candidate.title,
            &candidate.url,
        );
        Ok(())
    }

    /// Stage the root node's own content as the root body file
    async fn stage_root_body(&mut self, root_id: &str, root_url: &str) {
        if let Err(e) = self.try_stage_root_body(root_id, root_url).await {
            warn!("Failed to fetch root content: {}", e);
            self.stats.errors += 1;
        }
    }

    async fn try_stage_root_body(&mut self, root_id: &str, root_url: &str) -> Result<()> {
        let root_name = self
            .ctx
            .root_name()
            .map(|name| safe_file_name(&name))
            .unwrap_or_else(|| "root".to_string());
        let rel = format!("{}.md", root_name);

        let ctx = self.ctx;
        let store = ctx.store();
        let node = store.get_node(root_id).await?;
        if self.dry_run {
            return Ok(());
        }
        let children = store.list_children(root_id).await?;
        let blocks = strip_child_links(store.get_content(root_id).await?, &children);
        let text = self.ctx.converter().blocks_to_text(&blocks);
        if text.trim().is_empty() {
            return Ok(());
        }

        self.stage(&rel, &text).await?;
        self.manifest
            .items
            .insert(rel.clone(), new_item(&node, EntryKind::File));
        self.staged.push(StagedItem {
            rel_path: rel.clone(),
            node_id: root_id.to_string(),
            is_new: true,
        });
        self.log.record(Action::New, EntryKind::File, rel, node.title, root_url);
        Ok(())
    }

    /// Breadth-first search for nodes missing from the index
    ///
    /// Returns the ids of the nodes staged as new.
    async fn discover(
        &mut self,
        index: &SyncIndex,
        cache: &ChangeCache,
        seeds: Vec<String>,
        root_id: &str,
        max_depth: usize,
        skip_known: bool,
    ) -> Vec<String> {
        let mut found = Vec::new();
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        visited.insert(root_id.to_string());
        let mut dirs: HashMap<String, String> = HashMap::new();

        let mut queue: VecDeque<Frontier> = seeds
            .into_iter()
            .filter_map(|id| {
                let dir = if id == root_id {
                    Some(String::new())
                } else {
                    indexed_dir(index, &id)
                };
                dir.map(|dir| Frontier {
                    id,
                    dir,
                    depth: 0,
                    children: None,
                })
            })
            .collect();

        while let Some(frontier) = queue.pop_front() {
            if frontier.depth >= max_depth {
                continue;
            }

            let children = match frontier.children {
                Some(children) => children,
                None => match self.ctx.store().list_children(&frontier.id).await {
                    Ok(children) => children,
                    Err(e) => {
                        warn!("Failed to list children of {}: {}", frontier.id, e);
                        self.stats.errors += 1;
                        continue;
                    }
                },
            };

            for child in children {
                if !visited.insert(child.id.clone()) {
                    continue;
                }

                if index.find_by_node_id(&child.id).is_some() {
                    if let Some(dir) = indexed_dir(index, &child.id) {
                        queue.push_back(Frontier {
                            id: child.id,
                            dir,
                            depth: frontier.depth + 1,
                            children: None,
                        });
                    }
                    continue;
                }
                if skip_known && cache.known_node_ids().contains(&child.id) {
                    debug!("Skipping known node {}", child.id);
                    continue;
                }

                match self.stage_new(&child, &frontier.dir).await {
                    Ok(Some((dir, grandchildren))) => {
                        dirs.insert(child.id.clone(), dir.clone());
                        found.push(child.id.clone());
                        queue.push_back(Frontier {
                            id: child.id,
                            dir,
                            depth: frontier.depth + 1,
                            children: Some(grandchildren),
                        });
                    }
                    Ok(None) => found.push(child.id),
                    Err(e) => {
                        warn!("Failed to stage new node {}: {}", child.title, e);
                        self.stats.errors += 1;
                        let rel = join_rel(&frontier.dir, &safe_file_name(&child.title));
                        self.log
                            .record(Action::Error, EntryKind::File, rel, &child.title, &child.url);
                    }
                }
            }
        }

        debug!("Discovery staged {} new nodes, {} as directories", found.len(), dirs.len());
        found
    }

    /// Stage a node the index does not know under `parent_dir`
    ///
    /// Returns the node's directory and children when it has children.
    async fn stage_new(
        &mut self,
        node: &RemoteNode,
        parent_dir: &str,
    ) -> Result<Option<(String, Vec<RemoteNode>)>> {
        let ctx = self.ctx;
        let store = ctx.store();
        let children = store.list_children(&node.id).await?;

        if children.is_empty() {
            let rel = join_rel(parent_dir, &file_name_for_title(&node.title));
            if !self.dry_run {
                let blocks = store.get_content(&node.id).await?;
                let text = self
                    .ctx
                    .converter()
                    .blocks_to_file_text(Path::new(&rel), &blocks);
                self.stage(&rel, &text).await?;
                self.manifest
                    .items
                    .insert(rel.clone(), new_item(node, EntryKind::File));
                self.staged.push(StagedItem {
                    rel_path: rel.clone(),
                    node_id: node.id.clone(),
                    is_new: true,
                });
            }
            self.log.record(Action::New, EntryKind::File, rel, &node.title, &node.url);
            return Ok(None);
        }

        let dir = join_rel(parent_dir, &safe_file_name(&node.title));
        self.manifest
            .items
            .insert(dir.clone(), new_item(node, EntryKind::Dir));

        if !self.dry_run {
            let blocks = strip_child_links(store.get_content(&node.id).await?, &children);
            let text = self.ctx.converter().blocks_to_text(&blocks);
            if !text.trim().is_empty() {
                let rel = body_path(&dir);
                self.stage(&rel, &text).await?;
                self.manifest
                    .items
                    .insert(rel.clone(), new_item(node, EntryKind::File));
                self.staged.push(StagedItem {
                    rel_path: rel,
                    node_id: node.id.clone(),
                    is_new: true,
                });
            }
        }

        self.log.record(Action::New, EntryKind::Dir, &dir, &node.title, &node.url);
        Ok(Some((dir, children)))
    }

    async fn stage(&mut self, rel: &str, text: &str) -> Result<()> {
        let path = self.ctx.layout().staging.join(key_path(rel));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::local_io(parent, e.to_string()))?;
        }
        fs::write(&path, text)
            .await
            .map_err(|e| Error::local_io(&path, e.to_string()))?;
        self.stats.files_staged += 1;
        Ok(())
    }
}

/// Manifest item for a node the index does not know
fn new_item(node: &RemoteNode, kind: EntryKind) -> ManifestItem {
    ManifestItem {
        node_id: node.id.clone(),
        url: node.url.clone(),
        title: node.title.clone(),
        kind,
        parent_url: None,
        remote_last_edited: node.last_edited,
        is_new: true,
    }
}

/// Indexed nodes grouped by id
fn collect_candidates(index: &SyncIndex) -> Vec<Candidate> {
    let mut by_id: BTreeMap<String, Candidate> = BTreeMap::new();

    for (key, entry) in index.entries() {
        let Some(id) = entry.remote_node_id.clone().filter(|id| !id.is_empty()) else {
            continue;
        };
        let candidate = by_id.entry(id.clone()).or_insert_with(|| Candidate {
            node_id: id,
            url: entry.remote_url.clone().unwrap_or_default(),
            title: entry.title.clone(),
            file_path: None,
            dir_path: None,
            last_sync_at: entry.last_sync_at,
        });

        match entry.kind {
            EntryKind::File => candidate.file_path = Some(key.to_string()),
            EntryKind::Dir => candidate.dir_path = Some(key.to_string()),
        }
        candidate.last_sync_at = match (candidate.last_sync_at, entry.last_sync_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
    }

    by_id.into_values().collect()
}

/// Working-tree directory of an indexed node's children
fn indexed_dir(index: &SyncIndex, id: &str) -> Option<String> {
    let (key, entry) = index.find_by_node_id(id)?;
    match entry.kind {
        EntryKind::Dir => Some(key.to_string()),
        EntryKind::File => {
            let path = key_path(key);
            let stem = path.file_stem()?.to_string_lossy().into_owned();
            let parent = path
                .parent()
                .map(crate::fsutil::rel_key)
                .unwrap_or_default();
            // A body file stands for its directory.
            if path
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|dir| dir.to_string_lossy() == stem)
            {
                Some(parent)
            } else {
                Some(join_rel(&parent, &stem))
            }
        }
    }
}

/// Move or remove the previous staging area and create an empty one
pub async fn prepare_staging(staging: &Path, history: &Path, snapshot: bool) -> Result<()> {
    if fs::try_exists(staging).await.unwrap_or(false) {
        if snapshot {
            fs::create_dir_all(history)
                .await
                .map_err(|e| Error::local_io(history, e.to_string()))?;
            let stamp = Utc::now().timestamp();
            let mut target = history.join(stamp.to_string());
            let mut suffix = 1;
            while fs::try_exists(&target).await.unwrap_or(false) {
                target = history.join(format!("{}-{}", stamp, suffix));
                suffix += 1;
            }
            fs::rename(staging, &target)
                .await
                .map_err(|e| Error::local_io(staging, e.to_string()))?;
            info!("Kept previous staging area as {}", target.display());
        } else {
            fs::remove_dir_all(staging)
                .await
                .map_err(|e| Error::local_io(staging, e.to_string()))?;
        }
    }

    fs::create_dir_all(staging)
        .await
        .map_err(|e| Error::local_io(staging, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use crate::remote::{MemoryStore, StoreOp};
    use async_trait::async_trait;
    use chrono::Duration;
    use docsync_config::Config;
    use docsync_types::{NodeRef, RemoteStore, RichSpan};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Store counting concurrent `get_node` calls
    struct GaugedStore {
        inner: MemoryStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for GaugedStore {
        async fn create_node(&self, parent_id: &str, title: &str) -> Result<NodeRef> {
            self.inner.create_node(parent_id, title).await
        }

        async fn get_node(&self, id: &str) -> Result<RemoteNode> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.get_node(id).await
        }

        async fn list_children(&self, id: &str) -> Result<Vec<RemoteNode>> {
            self.inner.list_children(id).await
        }

        async fn get_content(&self, id: &str) -> Result<Vec<Block>> {
            self.inner.get_content(id).await
        }

        async fn replace_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
            self.inner.replace_content(id, blocks).await
        }

        async fn append_content(&self, id: &str, blocks: Vec<Block>) -> Result<()> {
            self.inner.append_content(id, blocks).await
        }

        async fn delete_node(&self, id: &str) -> Result<()> {
            self.inner.delete_node(id).await
        }
    }

    fn context(dir: &TempDir, root_url: String, store: Arc<dyn RemoteStore>) -> SyncContext {
        let mut config = Config::default();
        config.remote.root_url = Some(root_url);
        config.sync.concurrency = 2;
        SyncContext::new(dir.path(), config, store)
    }

    async fn link(ctx: &SyncContext, rel: &str, node: &NodeRef, synced: Option<DateTime<Utc>>) {
        let mut index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let title = rel.trim_end_matches(".md");
        let mut entry = IndexEntry::new(EntryKind::File, title).with_node(&node.id, &node.url);
        entry.last_sync_at = synced;
        index.set(rel, entry);
        index.save().await.unwrap();
    }

    fn existing_only() -> PullOptions {
        PullOptions {
            existing_only: true,
            ..PullOptions::default()
        }
    }

    fn synced_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn page(store: &MemoryStore, parent: &str, title: &str, text: &str) -> NodeRef {
        let node = store.insert_child(parent, title).await.unwrap();
        store
            .edit_content(&node.id, vec![Block::paragraph(vec![RichSpan::plain(text)])])
            .await
            .unwrap();
        node
    }

    #[tokio::test]
    async fn test_edit_at_last_sync_is_not_refetched() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let same = page(&store, &root.id, "same", "kept").await;
        let later = page(&store, &root.id, "later", "edited remotely").await;
        store.set_last_edited(&same.id, Some(synced_at())).await.unwrap();
        let edited = synced_at() + Duration::seconds(1);
        store.set_last_edited(&later.id, Some(edited)).await.unwrap();
        let ctx = context(&temp_dir, root.url, store.clone());
        link(&ctx, "same.md", &same, Some(synced_at())).await;
        link(&ctx, "later.md", &later, Some(synced_at())).await;
        store.reset_calls();

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.changed, 1);
        assert_eq!(report.stats.unchanged, 1);
        assert_eq!(store.calls().get_content, 1);
        let staged: Vec<&str> = report.staged.iter().map(|s| s.rel_path.as_str()).collect();
        assert_eq!(staged, vec!["later.md"]);
        let text = std::fs::read_to_string(ctx.layout().staging.join("later.md")).unwrap();
        assert_eq!(text.trim(), "edited remotely");
    }

    #[tokio::test]
    async fn test_missing_last_edited_counts_as_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let node = page(&store, &root.id, "notes", "undated").await;
        store.set_last_edited(&node.id, None).await.unwrap();
        let ctx = context(&temp_dir, root.url, store.clone());
        link(&ctx, "notes.md", &node, Some(synced_at())).await;

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.changed, 1);
        assert_eq!(report.staged.len(), 1);
        assert!(ctx.layout().staging.join("notes.md").exists());
    }

    #[tokio::test]
    async fn test_never_synced_entry_counts_as_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let node = page(&store, &root.id, "notes", "fresh").await;
        let ctx = context(&temp_dir, root.url, store.clone());
        link(&ctx, "notes.md", &node, None).await;

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.changed, 1);
    }

    #[tokio::test]
    async fn test_unreadable_node_counts_as_changed() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let node = page(&store, &root.id, "notes", "fetched anyway").await;
        store.set_last_edited(&node.id, Some(synced_at())).await.unwrap();
        let ctx = context(&temp_dir, root.url, store.clone());
        link(&ctx, "notes.md", &node, Some(synced_at())).await;
        store
            .fail_next(StoreOp::GetNode, Error::remote_transient("timeout"))
            .await;

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.changed, 1);
        assert_eq!(report.stats.errors, 0);
        let manifest = Manifest::load(&ctx.layout().staging).await.unwrap().unwrap();
        let item = manifest.items.get("notes.md").unwrap();
        assert!(item.remote_last_edited.is_none());
        assert!(!item.is_new);
    }

    #[tokio::test]
    async fn test_vanished_node_is_an_error_not_a_change() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let node = page(&store, &root.id, "notes", "gone").await;
        let ctx = context(&temp_dir, root.url, store.clone());
        link(&ctx, "notes.md", &node, Some(synced_at())).await;
        store
            .fail_next(StoreOp::GetNode, Error::not_found(node.id.clone()))
            .await;

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.changed, 0);
        assert_eq!(report.stats.errors, 1);
        assert!(report.staged.is_empty());
    }

    #[tokio::test]
    async fn test_diff_check_respects_concurrency_limit() {
        let temp_dir = TempDir::new().unwrap();
        let inner = MemoryStore::new("https://pages.local");
        let root = inner.create_root("Workspace").await;
        let mut nodes = Vec::new();
        for i in 0..8 {
            let node = page(&inner, &root.id, &format!("page{}", i), "text").await;
            inner.set_last_edited(&node.id, Some(synced_at())).await.unwrap();
            nodes.push(node);
        }
        let store = Arc::new(GaugedStore {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ctx = context(&temp_dir, root.url, store.clone());
        for (i, node) in nodes.iter().enumerate() {
            link(&ctx, &format!("page{}.md", i), node, Some(synced_at())).await;
        }

        let report = DiffPuller::new(&ctx).pull(&existing_only()).await.unwrap();

        assert_eq!(report.checked, 8);
        assert_eq!(report.changed, 0);
        assert_eq!(store.peak.load(Ordering::SeqCst), 2);
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_body_path() {
        assert_eq!(body_path("guide"), "guide/guide.md");
        assert_eq!(body_path("docs/api"), "docs/api/api.md");
    }
}
