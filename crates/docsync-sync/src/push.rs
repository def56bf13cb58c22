//! Working tree to remote tree synchronization
//!
//! The push walks the working tree pre-order: subdirectories first, then files,
//! both sorted by name. Every directory maps to a container node and every
//! supported file to a content node. The root directory is not a node of its
//! own; its children go straight under the configured root node.
//!
//! Unchanged files are recognized by their content hash and cost no remote
//! call, so pushing an unchanged tree twice writes nothing the second time.

use crate::cache::{ChangeCache, DirListing};
use crate::context::SyncContext;
use crate::convert::is_supported_extension;
use crate::fsutil::{content_hash, key_path, modified_nanos, node_title};
use crate::index::{IgnoreRules, IndexEntry, SyncIndex};
use crate::merge::has_conflicts;
use crate::remote::write_blocks;
use crate::report::{Action, ActionLog, SyncReport};
use chrono::{DateTime, Utc};
use docsync_config::SyncSettings;
use docsync_types::{
    Block, EntryKind, Error, ErrorKind, NodeRef, RemoteNode, Result, RichSpan, SyncStats,
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

/// Title searches after a create conflict
const CONFLICT_ATTEMPTS: usize = 3;

/// Pause between conflict title searches
const CONFLICT_PAUSE: Duration = Duration::from_millis(200);

/// Options for a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOptions {
    /// Skip files whose content hash matches the index
    pub changed_only: bool,
    /// Hash and log the plan without touching the store, the index or the cache
    pub dry_run: bool,
    /// Rewrite directory nodes with links to their children
    pub update_dir_index: bool,
    /// Archive duplicate sibling nodes
    pub dedup: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            changed_only: true,
            dry_run: false,
            update_dir_index: true,
            dedup: true,
        }
    }
}

impl PushOptions {
    /// Options following the engine settings
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            update_dir_index: settings.update_dir_index,
            dedup: settings.dedup,
            ..Self::default()
        }
    }

    /// Push every file regardless of its hash
    pub fn force_all(mut self) -> Self {
        self.changed_only = false;
        self
    }

    /// Only plan the push
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Container node a directory maps to
#[derive(Debug, Clone)]
struct Target {
    id: String,
    url: String,
}

impl From<NodeRef> for Target {
    fn from(node: NodeRef) -> Self {
        Self {
            id: node.id,
            url: node.url,
        }
    }
}

/// What processing one directory produced
#[derive(Debug, Default)]
struct DirOutcome {
    /// Whether anything under the directory was written
    changed: bool,
}

/// Mirrors the working tree onto the remote tree
#[derive(Debug)]
pub struct TreeSynchronizer<'a> {
    ctx: &'a SyncContext,
    log: ActionLog,
}

impl<'a> TreeSynchronizer<'a> {
    /// Create a synchronizer for `ctx`
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            log: ActionLog::new(),
        }
    }

    /// Report every visited item to `log`
    pub fn with_action_log(mut self, log: ActionLog) -> Self {
        self.log = log;
        self
    }

    /// Run one push
    pub async fn push(self, options: PushOptions) -> Result<SyncReport> {
        let operation_id = uuid::Uuid::new_v4();
        let start = Instant::now();
        let layout = self.ctx.layout().clone();

        let metadata = fs::metadata(&layout.root)
            .await
            .map_err(|e| Error::local_io(&layout.root, e.to_string()))?;
        if !metadata.is_dir() {
            return Err(Error::configuration(format!(
                "{} is not a directory",
                layout.root.display()
            )));
        }

        let mut index = SyncIndex::load(&layout.control_dir).await?;
        let (root_id, root_url) = self.ctx.root_node(&index)?;
        let mut cache = ChangeCache::open(&layout).await?;
        let ignore = IgnoreRules::load(&layout.root, index.ignore_patterns()).await?;
        if !options.dry_run {
            index.set_root_url(root_url.clone());
            cache.set_parent_url(&root_url);
        }

        info!(
            "Starting push {} of {} to {}{}",
            operation_id,
            layout.root.display(),
            root_url,
            if options.dry_run { " (dry run)" } else { "" }
        );

        let mut walk = Walk {
            ctx: self.ctx,
            options,
            root_name: self.ctx.root_name().unwrap_or_default(),
            index,
            cache,
            ignore,
            log: self.log,
            stats: SyncStats::new(),
            files_seen: 0,
        };

        let root = Target {
            id: root_id,
            url: root_url,
        };
        walk.process_dir(String::new(), Some(root), false).await?;

        if !options.dry_run {
            walk.cache.set_ignore_patterns(walk.ignore.user_patterns());
            walk.cache.set_last_total(walk.files_seen);
            walk.index.save().await?;
            walk.cache.save().await?;
        }

        let (hits, misses) = walk.cache.hit_stats();
        debug!("Change cache: {} hits, {} misses", hits, misses);

        let mut stats = walk.stats;
        stats.duration = start.elapsed();
        info!(
            "Push finished: {} created, {} updated, {} unchanged, {} errors in {:?}",
            stats.nodes_created, stats.nodes_updated, stats.unchanged, stats.errors, stats.duration
        );

        Ok(SyncReport {
            operation_id,
            stats,
            actions: walk.log.into_records(),
            dry_run: options.dry_run,
        })
    }
}

/// State of one push walk
struct Walk<'a> {
    ctx: &'a SyncContext,
    options: PushOptions,
    root_name: String,
    index: SyncIndex,
    cache: ChangeCache,
    ignore: IgnoreRules,
    log: ActionLog,
    stats: SyncStats,
    files_seen: u64,
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Whether `file` is the body file of a directory named `dir_name`
fn is_body_file(file: &str, dir_name: &str) -> bool {
    !dir_name.is_empty()
        && Path::new(file)
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy() == dir_name)
}

/// Paragraph linking to a child node
fn child_link(title: &str, url: &str) -> Block {
    Block::paragraph(vec![RichSpan::plain(title).with_link(url)])
}

/// Duplicate groups among `children`: `(kept, archived)` per title
fn duplicate_groups(children: &[RemoteNode]) -> Vec<(&RemoteNode, Vec<&RemoteNode>)> {
    let mut by_title: BTreeMap<&str, Vec<&RemoteNode>> = BTreeMap::new();
    for child in children {
        by_title.entry(child.title.as_str()).or_default().push(child);
    }

    by_title
        .into_values()
        .filter(|group| group.len() > 1)
        .filter_map(|group| {
            let keep = group.iter().copied().max_by_key(|n| n.last_edited)?;
            let rest = group.into_iter().filter(|n| n.id != keep.id).collect();
            Some((keep, rest))
        })
        .collect()
}

impl<'a> Walk<'a> {
    /// Process the directory `rel` mapped to `target`
    ///
    /// `target` is `None` only in a dry run for a directory that would be created.
    /// A dry run resolves subdirectories from the index alone.
    fn process_dir(
        &mut self,
        rel: String,
        target: Option<Target>,
        created: bool,
    ) -> BoxFuture<'_, Result<DirOutcome>> {
        async move {
            let listing = self.list_dir(&rel).await?;
            let dir_name = if rel.is_empty() {
                self.root_name.clone()
            } else {
                rel.rsplit('/').next().unwrap_or(&rel).to_string()
            };
            let mut outcome = DirOutcome::default();
            let mut links: Vec<(String, String)> = Vec::new();

            for name in &listing.dirs {
                let child_rel = join_rel(&rel, name);
                let resolved = match &target {
                    Some(parent) if !self.options.dry_run => {
                        self.resolve_dir(&child_rel, name, parent).await
                    }
                    _ => Ok(self.plan_dir(&child_rel, name)),
                };
                let (child, child_created) = match resolved {
                    Ok(resolved) => resolved,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Failed to resolve directory {}: {}", child_rel, e);
                        self.stats.errors += 1;
                        self.log
                            .record(Action::Error, EntryKind::Dir, &child_rel, name, "");
                        continue;
                    }
                };

                if let Some(child) = &child {
                    links.push((name.clone(), child.url.clone()));
                }
                let child_outcome = match self.process_dir(child_rel, child, child_created).await {
                    Ok(child_outcome) => child_outcome,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Skipping directory {}: {}", name, e);
                        self.stats.errors += 1;
                        DirOutcome::default()
                    }
                };
                outcome.changed |= child_created || child_outcome.changed;
            }

            let mut body: Option<(String, PathBuf)> = None;
            for name in &listing.files {
                let child_rel = join_rel(&rel, name);
                let path = self.ctx.root().join(key_path(&child_rel));
                if is_body_file(name, &dir_name) {
                    body = Some((child_rel, path));
                    continue;
                }

                self.files_seen += 1;
                match self.process_file(&child_rel, &path, target.as_ref()).await {
                    Ok((changed, url)) => {
                        outcome.changed |= changed;
                        if let Some(url) = url {
                            links.push((node_title(&path), url));
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Failed to push {}: {}", child_rel, e);
                        self.stats.errors += 1;
                        self.log.record(
                            Action::Error,
                            EntryKind::File,
                            &child_rel,
                            node_title(&path),
                            "",
                        );
                    }
                }
            }

            // Dedup sees the nodes created for the children above.
            if self.options.dedup && !self.options.dry_run && !created {
                if let Some(target) = &target {
                    match self.dedup(target).await {
                        Ok(moved) => {
                            for (_, url) in links.iter_mut() {
                                if let Some(kept) = moved.get(url.as_str()) {
                                    *url = kept.clone();
                                }
                            }
                        }
                        Err(e) => warn!("Dedup under {} failed: {}", target.url, e),
                    }
                }
            }

            if let Some((body_rel, body_path)) = body {
                self.files_seen += 1;
                let target = target.as_ref();
                let result = self
                    .process_body(&body_rel, &body_path, &dir_name, target, &links, &outcome)
                    .await;
                match result {
                    Ok(changed) => outcome.changed |= changed,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Failed to push {}: {}", body_rel, e);
                        self.stats.errors += 1;
                        self.log
                            .record(Action::Error, EntryKind::File, &body_rel, &dir_name, "");
                    }
                }
            } else if outcome.changed && !rel.is_empty() {
                // The root node keeps its own content unless a root body file exists.
                if let Some(target) = &target {
                    if self.options.update_dir_index && !self.options.dry_run {
                        let blocks = links.iter().map(|(t, u)| child_link(t, u)).collect();
                        match self.write_dir_content(target, blocks).await {
                            Ok(true) => {}
                            Ok(false) => self.stats.errors += 1,
                            Err(e) => {
                                warn!("Failed to update the index of {}: {}", target.url, e);
                                self.stats.errors += 1;
                            }
                        }
                    }
                    if !self.options.dry_run {
                        self.confirm_node(&target.id).await?;
                    }
                }
            }

            Ok(outcome)
        }
        .boxed()
    }

    /// Sorted, filtered listing of directory `rel`
    async fn list_dir(&mut self, rel: &str) -> Result<DirListing> {
        let path = self.ctx.root().join(key_path(rel));
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Error::local_io(&path, e.to_string()))?;
        let mtime = modified_nanos(&metadata);

        let cached = mtime.and_then(|m| self.cache.listing(rel, m).cloned());
        let listing = match cached {
            Some(listing) => listing,
            None => {
                let mut dirs = Vec::new();
                let mut files = Vec::new();
                let mut entries = fs::read_dir(&path)
                    .await
                    .map_err(|e| Error::local_io(&path, e.to_string()))?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| Error::local_io(&path, e.to_string()))?
                {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    match entry.file_type().await {
                        Ok(ft) if ft.is_dir() => dirs.push(name),
                        Ok(ft) if ft.is_file() => files.push(name),
                        Ok(_) => debug!("Skipping special entry {}", entry.path().display()),
                        Err(e) => warn!("Cannot stat {}: {}", entry.path().display(), e),
                    }
                }
                dirs.sort();
                files.sort();

                let listing = DirListing {
                    modified_nanos: mtime.unwrap_or_default(),
                    dirs,
                    files,
                };
                if mtime.is_some() && !self.options.dry_run {
                    self.cache.record_listing(rel, listing.clone());
                }
                listing
            }
        };

        let ignored = |name: &String| self.ignore.is_ignored(&key_path(&join_rel(rel, name)));
        Ok(DirListing {
            modified_nanos: listing.modified_nanos,
            dirs: listing.dirs.iter().filter(|n| !ignored(n)).cloned().collect(),
            files: listing
                .files
                .iter()
                .filter(|n| !ignored(n))
                .filter(|n| {
                    let supported = Path::new(n.as_str())
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(is_supported_extension);
                    if !supported {
                        debug!("Skipping unsupported file {}", join_rel(rel, n));
                    }
                    supported
                })
                .cloned()
                .collect(),
        })
    }

    /// Dry-run resolution of a subdirectory from the index alone
    fn plan_dir(&mut self, rel: &str, name: &str) -> (Option<Target>, bool) {
        let known = self
            .index
            .get(rel)
            .filter(|e| e.is_linked())
            .map(|e| Target {
                id: e.remote_node_id.clone().unwrap_or_default(),
                url: e.remote_url.clone().unwrap_or_default(),
            });

        match known {
            Some(target) => {
                self.log
                    .record(Action::SameHash, EntryKind::Dir, rel, name, &target.url);
                (Some(target), false)
            }
            None => {
                debug!("DRY RUN: Would create directory node {}", rel);
                self.log.record(Action::New, EntryKind::Dir, rel, name, "");
                (None, false)
            }
        }
    }

    /// Resolve or create the container node of subdirectory `rel`
    async fn resolve_dir(
        &mut self,
        rel: &str,
        name: &str,
        parent: &Target,
    ) -> Result<(Option<Target>, bool)> {
        if let Some(entry) = self.index.get(rel).filter(|e| e.is_linked()) {
            let target = Target {
                id: entry.remote_node_id.clone().unwrap_or_default(),
                url: entry.remote_url.clone().unwrap_or_default(),
            };
            self.log
                .record(Action::Unchanged, EntryKind::Dir, rel, name, &target.url);
            self.stats.unchanged += 1;
            return Ok((Some(target), false));
        }

        let ctx = self.ctx;
        let (node, created) = match ctx.store().find_child_by_title(&parent.id, name).await? {
            Some(existing) => {
                debug!("Linked directory {} to existing node {}", rel, existing.id);
                (existing.node_ref(), false)
            }
            None => self.create_or_resolve(&parent.id, name).await?,
        };

        let edited = self.read_back(&node.id).await;
        let mut entry = IndexEntry::new(EntryKind::Dir, name).with_node(&node.id, &node.url);
        entry.parent_url = Some(parent.url.clone());
        entry.remote_last_edited = Some(edited);
        entry.last_sync_at = Some(edited);
        entry.touch();
        self.index.set(rel, entry);
        self.index.save().await?;

        let action = if created {
            self.stats.nodes_created += 1;
            Action::New
        } else {
            self.stats.unchanged += 1;
            Action::Unchanged
        };
        self.log.record(action, EntryKind::Dir, rel, name, &node.url);
        Ok((Some(node.into()), created))
    }

    /// Create `title` under `parent_id`, falling back to a title search on conflict
    async fn create_or_resolve(&self, parent_id: &str, title: &str) -> Result<(NodeRef, bool)> {
        let store = self.ctx.store();
        let error = match store.create_node(parent_id, title).await {
            Ok(node) => return Ok((node, true)),
            Err(e) if e.kind() == ErrorKind::Conflict => e,
            Err(e) => return Err(e),
        };

        debug!("Create of {} conflicted, resolving by title", title);
        for attempt in 0..CONFLICT_ATTEMPTS {
            if let Some(node) = store.find_child_by_title(parent_id, title).await? {
                return Ok((node.node_ref(), false));
            }
            if attempt + 1 < CONFLICT_ATTEMPTS {
                tokio::time::sleep(CONFLICT_PAUSE).await;
            }
        }
        Err(error)
    }

    /// Hash of the file at `path`, from the cache when mtime and size match
    async fn file_hash(
        &mut self,
        rel: &str,
        path: &Path,
    ) -> Result<(String, Option<i64>, Vec<u8>)> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| Error::local_io(path, e.to_string()))?;
        let mtime = modified_nanos(&metadata);
        let size = metadata.len();

        if let Some(hash) = mtime.and_then(|m| self.cache.file_hash(rel, m, size)) {
            return Ok((hash, mtime, Vec::new()));
        }

        let data = fs::read(path)
            .await
            .map_err(|e| Error::local_io(path, e.to_string()))?;
        let hash = content_hash(&data);
        if let Some(m) = mtime.filter(|_| !self.options.dry_run) {
            self.cache.record_file(rel, m, size, hash.clone());
        }
        Ok((hash, mtime, data))
    }

    /// Text of `path`, reusing `data` when it was already read
    async fn read_text(path: &Path, data: Vec<u8>) -> Result<String> {
        let data = if data.is_empty() {
            fs::read(path)
                .await
                .map_err(|e| Error::local_io(path, e.to_string()))?
        } else {
            data
        };
        let text = String::from_utf8(data)
            .map_err(|_| Error::local_io(path, "file is not valid UTF-8"))?;
        if has_conflicts(&text) {
            return Err(Error::conversion(format!(
                "{} has unresolved conflict markers",
                path.display()
            )));
        }
        Ok(text)
    }

    /// Whether the index already holds `hash` for a linked `rel`
    fn is_unchanged(&self, rel: &str, hash: &str) -> bool {
        self.options.changed_only
            && self
                .index
                .get(rel)
                .is_some_and(|e| e.is_linked() && e.content_hash.as_deref() == Some(hash))
    }

    /// Push one regular file; returns whether it was written and its node url
    async fn process_file(
        &mut self,
        rel: &str,
        path: &Path,
        parent: Option<&Target>,
    ) -> Result<(bool, Option<String>)> {
        let title = node_title(path);
        let (hash, mtime, data) = self.file_hash(rel, path).await?;
        let entry = self.index.get(rel).cloned();
        let known_url = entry
            .as_ref()
            .filter(|e| e.is_linked())
            .and_then(|e| e.remote_url.clone());

        if self.is_unchanged(rel, &hash) {
            let action = if self.options.dry_run {
                Action::SameHash
            } else {
                Action::Unchanged
            };
            let url = known_url.clone().unwrap_or_default();
            self.log.record(action, EntryKind::File, rel, &title, url);
            self.stats.unchanged += 1;
            return Ok((false, known_url));
        }

        let text = Self::read_text(path, data).await?;
        let blocks = self.ctx.converter().file_to_blocks(path, &text);
        let linked = entry.as_ref().is_some_and(IndexEntry::is_linked);

        let Some(parent) = parent.filter(|_| !self.options.dry_run) else {
            let action = if linked { Action::Update } else { Action::New };
            debug!("DRY RUN: Would push {} ({} blocks)", rel, blocks.len());
            let url = known_url.clone().unwrap_or_default();
            self.log.record(action, EntryKind::File, rel, &title, url);
            return Ok((true, known_url));
        };

        let ctx = self.ctx;
        let batch = ctx.config().sync.max_batch_blocks;
        let store = ctx.store();
        let expected = blocks.len();
        let existing = entry
            .as_ref()
            .filter(|e| e.is_linked())
            .map(|e| Target {
                id: e.remote_node_id.clone().unwrap_or_default(),
                url: e.remote_url.clone().unwrap_or_default(),
            });

        let (node, action, written) = match existing {
            Some(node) => match write_blocks(store, &node.id, blocks.clone(), batch, true).await {
                Ok(written) => (node, Action::Update, written),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Remote node of {} is gone, creating a new one", rel);
                    self.create_with_content(&parent.id, &title, blocks, batch)
                        .await?
                }
                Err(e) => return Err(e),
            },
            None => {
                self.create_with_content(&parent.id, &title, blocks, batch)
                    .await?
            }
        };

        match action {
            Action::New => self.stats.nodes_created += 1,
            _ => self.stats.nodes_updated += 1,
        }
        self.stats.blocks_written += written as u64;

        // Without a hash the next push rewrites the whole node.
        let complete = written == expected;
        let edited = self.read_back(&node.id).await;
        let mut entry = entry
            .unwrap_or_else(|| IndexEntry::new(EntryKind::File, &title))
            .with_node(&node.id, &node.url);
        entry.kind = EntryKind::File;
        entry.title = title.clone();
        entry.parent_url = Some(parent.url.clone());
        entry.content_hash = complete.then_some(hash);
        entry.local_modified_nanos = mtime;
        entry.remote_last_edited = Some(edited);
        entry.last_sync_at = Some(edited);
        entry.touch();
        self.index.set(rel, entry);
        self.index.save().await?;

        if !complete {
            warn!(
                "Only {} of {} blocks of {} reached the remote, retrying on the next push",
                written, expected, rel
            );
            self.stats.errors += 1;
            self.log
                .record(Action::Error, EntryKind::File, rel, &title, &node.url);
            return Ok((true, Some(node.url)));
        }

        self.log.record(action, EntryKind::File, rel, &title, &node.url);
        Ok((true, Some(node.url)))
    }

    /// Create a content node and append `blocks` to it
    async fn create_with_content(
        &self,
        parent_id: &str,
        title: &str,
        blocks: Vec<Block>,
        batch: usize,
    ) -> Result<(Target, Action, usize)> {
        let (node, created) = self.create_or_resolve(parent_id, title).await?;
        // A node found by title after a conflict may hold content already.
        let written =
            write_blocks(self.ctx.store(), &node.id, blocks, batch, !created).await?;
        let action = if created { Action::New } else { Action::Update };
        Ok((node.into(), action, written))
    }

    /// Push the body file of a directory and refresh the directory node
    async fn process_body(
        &mut self,
        rel: &str,
        path: &Path,
        dir_name: &str,
        target: Option<&Target>,
        links: &[(String, String)],
        outcome: &DirOutcome,
    ) -> Result<bool> {
        let (hash, mtime, data) = self.file_hash(rel, path).await?;
        let url = target.map(|t| t.url.clone()).unwrap_or_default();
        let body_unchanged = self.is_unchanged(rel, &hash);
        let rewrite_links = self.options.update_dir_index && outcome.changed;

        if body_unchanged && !rewrite_links {
            let action = if self.options.dry_run {
                Action::SameHash
            } else {
                Action::Unchanged
            };
            self.log.record(action, EntryKind::File, rel, dir_name, &url);
            self.stats.unchanged += 1;
            if outcome.changed && !self.options.dry_run {
                if let Some(target) = target {
                    self.confirm_node(&target.id).await?;
                }
            }
            return Ok(false);
        }

        let text = Self::read_text(path, data).await?;
        let mut blocks = self.ctx.converter().text_to_blocks(&text);
        if self.options.update_dir_index {
            blocks.extend(links.iter().map(|(t, u)| child_link(t, u)));
        }

        let linked = self.index.get(rel).is_some_and(IndexEntry::is_linked);
        let action = if linked { Action::Update } else { Action::New };
        let Some(target) = target.filter(|_| !self.options.dry_run) else {
            debug!("DRY RUN: Would write body {} ({} blocks)", rel, blocks.len());
            self.log.record(action, EntryKind::File, rel, dir_name, &url);
            return Ok(!body_unchanged);
        };

        let complete = self.write_dir_content(target, blocks).await?;

        let mut entry = self
            .index
            .get(rel)
            .cloned()
            .unwrap_or_else(|| IndexEntry::new(EntryKind::File, dir_name))
            .with_node(&target.id, &target.url);
        entry.content_hash = complete.then_some(hash);
        entry.local_modified_nanos = mtime;
        entry.touch();
        self.index.set(rel, entry);
        self.confirm_node(&target.id).await?;

        if !complete {
            self.stats.errors += 1;
            self.log.record(Action::Error, EntryKind::File, rel, dir_name, &url);
            return Ok(true);
        }
        self.log.record(action, EntryKind::File, rel, dir_name, &url);
        Ok(!body_unchanged)
    }

    /// Replace the content of a directory node; returns whether every block landed
    async fn write_dir_content(&mut self, target: &Target, blocks: Vec<Block>) -> Result<bool> {
        let batch = self.ctx.config().sync.max_batch_blocks;
        let expected = blocks.len();
        let written = write_blocks(self.ctx.store(), &target.id, blocks, batch, true).await?;
        self.stats.nodes_updated += 1;
        self.stats.blocks_written += written as u64;
        if written < expected {
            warn!(
                "Only {} of {} blocks reached directory node {}",
                written, expected, target.url
            );
            return Ok(false);
        }
        debug!("Rewrote directory node {} with {} blocks", target.url, written);
        Ok(true)
    }

    /// Last-edited time of `id`, the current instant when unreadable
    async fn read_back(&self, id: &str) -> DateTime<Utc> {
        match self.ctx.store().get_node(id).await {
            Ok(node) => node.last_edited.unwrap_or_else(Utc::now),
            Err(e) => {
                debug!("Could not read back {}: {}", id, e);
                Utc::now()
            }
        }
    }

    /// Record the current remote state of `id` on every entry mapped to it
    async fn confirm_node(&mut self, id: &str) -> Result<()> {
        if self.index.find_by_node_id(id).is_none() {
            return Ok(());
        }
        let edited = self.read_back(id).await;
        for (_, entry) in self.index.entries_mut() {
            if entry.remote_node_id.as_deref() == Some(id) {
                entry.remote_last_edited = Some(edited);
                entry.last_sync_at = Some(edited);
                entry.touch();
            }
        }
        self.index.save().await
    }

    /// Archive duplicate siblings under `parent`, keeping the most recently edited
    ///
    /// Returns the url of every archived node mapped to the url of the node kept
    /// in its place.
    async fn dedup(&mut self, parent: &Target) -> Result<BTreeMap<String, String>> {
        let ctx = self.ctx;
        let store = ctx.store();
        let children = store.list_children(&parent.id).await?;
        let mut repoint: BTreeMap<String, Target> = BTreeMap::new();
        let mut moved: BTreeMap<String, String> = BTreeMap::new();

        for (keep, rest) in duplicate_groups(&children) {
            let referenced: BTreeSet<&str> = std::iter::once(keep)
                .chain(rest.iter().copied())
                .filter(|n| self.index.find_by_node_id(&n.id).is_some())
                .map(|n| n.id.as_str())
                .collect();
            let kinds: BTreeSet<EntryKind> = referenced
                .iter()
                .filter_map(|id| self.index.find_by_node_id(id).map(|(_, e)| e.kind))
                .collect();
            if kinds.len() > 1 {
                warn!(
                    "Siblings titled {} map to a file and a directory, not deduplicating",
                    keep.title
                );
                continue;
            }

            for duplicate in rest {
                match store.delete_node(&duplicate.id).await {
                    Ok(()) => {
                        info!("Archived duplicate node {} titled {}", duplicate.id, keep.title);
                        moved.insert(duplicate.url.clone(), keep.url.clone());
                        repoint.insert(duplicate.id.clone(), keep.node_ref().into());
                    }
                    Err(e) => warn!("Failed to archive duplicate {}: {}", duplicate.id, e),
                }
            }
        }

        if repoint.is_empty() {
            return Ok(moved);
        }
        for (_, entry) in self.index.entries_mut() {
            let Some(kept) = entry
                .remote_node_id
                .as_ref()
                .and_then(|id| repoint.get(id))
            else {
                continue;
            };
            entry.remote_node_id = Some(kept.id.clone());
            entry.remote_url = Some(kept.url.clone());
            entry.content_hash = None;
            entry.touch();
        }
        self.index.save().await?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryStore, StoreOp};
    use docsync_config::Config;
    use docsync_types::RemoteStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<MemoryStore>, SyncContext) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let root = store.create_root("Workspace").await;
        let mut config = Config::default();
        config.remote.root_url = Some(root.url);
        let ctx = SyncContext::new(temp_dir.path(), config, store.clone());
        (temp_dir, store, ctx)
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn test_body_file_detection() {
        assert!(is_body_file("guide.md", "guide"));
        assert!(!is_body_file("guide.md", "docs"));
        assert!(!is_body_file("guide.md", ""));
    }

    #[test]
    fn test_duplicate_groups_keep_latest() {
        let node = |id: &str, title: &str, minute: u32| RemoteNode {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://pages.local/{}", id),
            parent_id: Some("root".to_string()),
            last_edited: Some(
                DateTime::parse_from_rfc3339(&format!("2024-01-01T00:{:02}:00Z", minute))
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            archived: false,
        };
        let children = vec![node("a", "notes", 1), node("b", "notes", 5), node("c", "other", 2)];

        let groups = duplicate_groups(&children);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.id, "b");
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[0].1[0].id, "a");
    }

    #[tokio::test]
    async fn test_push_creates_tree() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "intro.md", "# Intro\n\nHello.\n");
        write(temp_dir.path(), "guide/setup.md", "Install it.\n");
        write(temp_dir.path(), "guide/tool.py", "print('hi')\n");

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert!(!report.has_errors());
        assert_eq!(report.stats.nodes_created, 4);
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        for key in ["intro.md", "guide", "guide/setup.md", "guide/tool.py"] {
            assert!(index.get(key).unwrap().is_linked(), "{} not linked", key);
        }
        let tool = index.get("guide/tool.py").unwrap();
        assert_eq!(tool.title, "tool.py");
        let guide_id = index.get("guide").unwrap().remote_node_id.clone().unwrap();
        let links = store.content_of(&guide_id).await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|b| b.spans[0].link_url.is_some()));
    }

    #[tokio::test]
    async fn test_second_push_writes_nothing() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "a.md", "alpha\n");
        write(temp_dir.path(), "docs/b.md", "beta\n");

        TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();
        store.reset_calls();

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert_eq!(report.stats.remote_writes(), 0);
        assert_eq!(store.calls().writes(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_store_calls() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "a.md", "alpha\n");
        write(temp_dir.path(), "docs/b.md", "beta\n");
        store.reset_calls();

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default().dry_run())
            .await
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(store.calls().total(), 0);
        assert!(!ctx.layout().index.exists());
        let actions: Vec<Action> = report.actions.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![Action::New, Action::New, Action::New]);
    }

    #[tokio::test]
    async fn test_body_file_becomes_directory_content() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "guide/guide.md", "Read me first.\n");
        write(temp_dir.path(), "guide/step.md", "Step one.\n");

        TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let dir = index.get("guide").unwrap();
        let body = index.get("guide/guide.md").unwrap();
        assert_eq!(body.remote_node_id, dir.remote_node_id);
        let content = store
            .content_of(dir.remote_node_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(content[0].plain_text(), "Read me first.");
        assert_eq!(content.len(), 2);
        assert_eq!(content[1].plain_text(), "step");
    }

    #[tokio::test]
    async fn test_changed_file_is_replaced() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "a.md", "first\n");
        TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        write(temp_dir.path(), "a.md", "second version\n");
        store.reset_calls();
        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert_eq!(report.stats.nodes_updated, 1);
        assert_eq!(report.stats.nodes_created, 0);
        assert_eq!(store.calls().create_node, 0);
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let id = index.get("a.md").unwrap().remote_node_id.clone().unwrap();
        let content = store.content_of(&id).await.unwrap();
        assert_eq!(content[0].plain_text(), "second version");
    }

    #[tokio::test]
    async fn test_conflict_markers_block_the_file() {
        let (temp_dir, _store, ctx) = setup().await;
        write(
            temp_dir.path(),
            "a.md",
            "<<<<<<< LOCAL\nmine\n=======\ntheirs\n>>>>>>> REMOTE\n",
        );

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.actions[0].action, Action::Error);
    }

    #[tokio::test]
    async fn test_missing_root_fails_before_any_call() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let ctx = SyncContext::new(temp_dir.path(), Config::default(), store.clone());
        write(temp_dir.path(), "a.md", "alpha\n");

        let err = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_create_conflict_resolves_by_title() {
        let (temp_dir, store, ctx) = setup().await;
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let (root_id, _) = ctx.root_node(&index).unwrap();
        store.insert_child(&root_id, "a").await.unwrap();
        store
            .fail_next(StoreOp::CreateNode, Error::conflict("exists"))
            .await;
        write(temp_dir.path(), "a.md", "alpha\n");

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions {
                dedup: false,
                ..PushOptions::default()
            })
            .await
            .unwrap();

        assert!(!report.has_errors());
        let children = store.list_children(&root_id).await.unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_archives_older_duplicates() {
        let (temp_dir, store, ctx) = setup().await;
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let (root_id, _) = ctx.root_node(&index).unwrap();
        store.insert_child(&root_id, "notes").await.unwrap();
        store.insert_child(&root_id, "notes").await.unwrap();
        write(temp_dir.path(), "notes.md", "text\n");

        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert!(!report.has_errors());
        let remaining = store.list_children(&root_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let entry = index.get("notes.md").unwrap();
        assert_eq!(entry.remote_node_id.as_deref(), Some(remaining[0].id.as_str()));
        assert_eq!(store.content_of(&remaining[0].id).await.unwrap()[0].plain_text(), "text");

        store.reset_calls();
        TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();
        assert_eq!(store.calls().delete_node, 0);
    }

    #[tokio::test]
    async fn test_dry_run_of_a_pushed_tree_leaves_store_and_index_alone() {
        let (temp_dir, store, ctx) = setup().await;
        write(temp_dir.path(), "a.md", "alpha\n");
        write(temp_dir.path(), "docs/b.md", "beta\n");
        TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();
        let index_before = std::fs::read_to_string(&ctx.layout().index).unwrap();
        let nodes_before = store.nodes().await.len();

        write(temp_dir.path(), "docs/b.md", "beta, revised\n");
        write(temp_dir.path(), "docs/new/c.md", "gamma\n");
        store.reset_calls();
        let report = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default().dry_run())
            .await
            .unwrap();

        assert_eq!(store.calls().total(), 0);
        assert_eq!(store.nodes().await.len(), nodes_before);
        assert_eq!(std::fs::read_to_string(&ctx.layout().index).unwrap(), index_before);
        let planned: Vec<(&str, Action)> = report
            .actions
            .iter()
            .map(|r| (r.path.as_str(), r.action))
            .collect();
        assert_eq!(
            planned,
            vec![
                ("docs", Action::SameHash),
                ("docs/new", Action::New),
                ("docs/new/c.md", Action::New),
                ("docs/b.md", Action::Update),
                ("a.md", Action::SameHash),
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_write_is_retried_on_the_next_push() {
        let (temp_dir, store, ctx) = setup().await;
        let text: Vec<String> = (0..150).map(|i| format!("paragraph {}", i)).collect();
        write(temp_dir.path(), "long.md", &text.join("\n\n"));
        store
            .fail_next(StoreOp::AppendContent, Error::remote_fatal("rejected"))
            .await;

        let first = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert_eq!(first.stats.errors, 1);
        assert_eq!(first.actions[0].action, Action::Error);
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        let entry = index.get("long.md").unwrap();
        assert!(entry.is_linked());
        assert!(entry.content_hash.is_none());
        let id = entry.remote_node_id.clone().unwrap();
        assert!(store.content_of(&id).await.unwrap().len() < 150);

        let second = TreeSynchronizer::new(&ctx)
            .push(PushOptions::default())
            .await
            .unwrap();

        assert!(!second.has_errors());
        assert_eq!(second.stats.nodes_updated, 1);
        assert_eq!(second.stats.nodes_created, 0);
        assert_eq!(store.content_of(&id).await.unwrap().len(), 150);
        let index = SyncIndex::load(&ctx.layout().control_dir).await.unwrap();
        assert!(index.get("long.md").unwrap().content_hash.is_some());
    }
}
