//! Two-way merge of staged remote content into the working tree
//!
//! Divergent lines are kept side by side between conflict markers:
//!
//! ```text
//! <<<<<<< LOCAL
//! local lines
//! =======
//! remote lines
//! >>>>>>> REMOTE
//! ```

use crate::context::SyncContext;
use crate::fsutil::{content_hash, key_path, path_modified_nanos, rel_key, write_atomic};
use crate::index::{IndexEntry, SyncIndex};
use crate::manifest::{Manifest, ManifestItem, MANIFEST_FILE};
use crate::report::{MergeOutcome, MergeReport};
use chrono::Utc;
use docsync_types::{EntryKind, Error, Result};
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Opens a local region
pub const LOCAL_MARKER: &str = "<<<<<<< LOCAL";
/// Separates the local and remote halves of a region
pub const SEPARATOR_MARKER: &str = "=======";
/// Closes a region
pub const REMOTE_MARKER: &str = ">>>>>>> REMOTE";

/// Result of merging one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MergeStatus {
    /// Local file absent, remote content written
    Add,
    /// Remote content empty, local file removed
    Delete,
    /// Nothing to do
    Same,
    /// Merged with conflict markers left for the user
    Update,
    /// Merged cleanly into new content
    Replace,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Same => "SAME",
            Self::Update => "UPDATE",
            Self::Replace => "REPLACE",
        };
        f.pad(label)
    }
}

/// Merge `remote` into `local`
///
/// `local` is `None` when the working-tree file does not exist. The returned
/// text is what the working-tree file should contain afterwards.
pub fn merge_text(local: Option<&str>, remote: &str) -> (MergeStatus, String) {
    let current = local.unwrap_or_default();
    if current == remote {
        return (MergeStatus::Same, remote.to_string());
    }
    if current.is_empty() {
        return (MergeStatus::Add, remote.to_string());
    }
    if remote.is_empty() {
        return (MergeStatus::Delete, String::new());
    }

    let (merged, conflicted) = two_way_diff(current, remote);
    let status = if conflicted {
        MergeStatus::Update
    } else {
        MergeStatus::Replace
    };
    (status, merged)
}

fn push_region<'a>(out: &mut Vec<&'a str>, ours: &[&'a str], theirs: &[&'a str]) {
    out.push(LOCAL_MARKER);
    out.extend(ours);
    out.push(SEPARATOR_MARKER);
    out.extend(theirs);
    out.push(REMOTE_MARKER);
}

fn two_way_diff(local: &str, remote: &str) -> (String, bool) {
    let old: Vec<&str> = local.lines().collect();
    let new: Vec<&str> = remote.lines().collect();
    let ops = capture_diff_slices(Algorithm::Lcs, &old, &new);

    let mut out: Vec<&str> = Vec::with_capacity(old.len() + new.len());
    let mut conflicted = false;
    let mut ops = ops.iter().map(|op| op.as_tag_tuple()).peekable();

    while let Some((tag, old_range, new_range)) = ops.next() {
        match tag {
            DiffTag::Equal => out.extend(&old[old_range]),
            DiffTag::Insert => match ops.peek() {
                Some((DiffTag::Delete, next_old, _)) => {
                    let ours = &old[next_old.clone()];
                    push_region(&mut out, ours, &new[new_range]);
                    ops.next();
                    conflicted = true;
                }
                _ => out.extend(&new[new_range]),
            },
            DiffTag::Delete | DiffTag::Replace => {
                let mut theirs = &new[new_range];
                if tag == DiffTag::Delete {
                    if let Some((DiffTag::Insert, _, next_new)) = ops.peek() {
                        theirs = &new[next_new.clone()];
                        ops.next();
                    }
                }
                push_region(&mut out, &old[old_range], theirs);
                conflicted = true;
            }
        }
    }

    let mut text = out.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    (text, conflicted)
}

/// Which conflict marker a line holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    /// `<<<<<<< LOCAL`
    Local,
    /// `=======`
    Separator,
    /// `>>>>>>> REMOTE`
    Remote,
}

/// A conflict marker found in a text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    /// 1-based line number
    pub line: usize,
    /// Marker found on that line
    pub kind: MarkerKind,
}

fn marker_kind(line: &str) -> Option<MarkerKind> {
    match line.trim_end() {
        LOCAL_MARKER => Some(MarkerKind::Local),
        SEPARATOR_MARKER => Some(MarkerKind::Separator),
        REMOTE_MARKER => Some(MarkerKind::Remote),
        _ => None,
    }
}

/// All conflict markers in `text`
pub fn detect_conflicts(text: &str) -> Vec<ConflictMarker> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| marker_kind(line).map(|kind| ConflictMarker { line: i + 1, kind }))
        .collect()
}

/// Whether `text` still holds a conflict region
pub fn has_conflicts(text: &str) -> bool {
    text.lines().any(|line| marker_kind(line) == Some(MarkerKind::Local))
}

/// How to settle conflict regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Keep the local half
    Local,
    /// Keep the remote half
    Remote,
    /// Keep the local half followed by the remote half
    Both,
    /// Leave the markers for the user
    Manual,
}

/// Replace every conflict region in `text` according to `strategy`
pub fn resolve_conflicts(text: &str, strategy: Strategy) -> String {
    if strategy == Strategy::Manual {
        return text.to_string();
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Side {
        Outside,
        Local,
        Remote,
    }

    let mut out: Vec<&str> = Vec::new();
    let mut side = Side::Outside;
    let mut local: Vec<&str> = Vec::new();
    let mut remote: Vec<&str> = Vec::new();

    for line in text.lines() {
        match (marker_kind(line), side) {
            (Some(MarkerKind::Local), Side::Outside) => side = Side::Local,
            (Some(MarkerKind::Separator), Side::Local) => side = Side::Remote,
            (Some(MarkerKind::Remote), Side::Remote) => {
                match strategy {
                    Strategy::Local => out.append(&mut local),
                    Strategy::Remote => out.append(&mut remote),
                    Strategy::Both | Strategy::Manual => {
                        out.append(&mut local);
                        out.append(&mut remote);
                    }
                }
                local.clear();
                remote.clear();
                side = Side::Outside;
            }
            (_, Side::Local) => local.push(line),
            (_, Side::Remote) => remote.push(line),
            (_, Side::Outside) => out.push(line),
        }
    }

    // An unterminated region is kept verbatim.
    if side != Side::Outside {
        out.push(LOCAL_MARKER);
        out.append(&mut local);
        if side == Side::Remote {
            out.push(SEPARATOR_MARKER);
            out.append(&mut remote);
        }
    }

    let mut resolved = out.join("\n");
    if text.ends_with('\n') && !resolved.is_empty() {
        resolved.push('\n');
    }
    resolved
}

/// Remove empty directories below `root`, deepest first
///
/// `root` itself and hidden directories are kept. Returns how many were removed.
pub async fn cleanup_empty_dirs(root: &Path) -> Result<usize> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut removed = 0;
        let walker = WalkDir::new(&root).min_depth(1).contents_first(true);

        for entry in walker.into_iter().filter_map(std::result::Result::ok) {
            let hidden = entry.path().strip_prefix(&root).map_or(true, |rel| {
                rel.components()
                    .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
            });
            if hidden || !entry.file_type().is_dir() {
                continue;
            }
            let is_empty = std::fs::read_dir(entry.path())
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if is_empty && std::fs::remove_dir(entry.path()).is_ok() {
                debug!("Removed empty directory {}", entry.path().display());
                removed += 1;
            }
        }
        removed
    })
    .await
    .map_err(|e| Error::local_io("", format!("Task join error: {}", e)))
}

/// Applies a staging area to the working tree
#[derive(Debug, Clone)]
pub struct MergeEngine {
    staging: PathBuf,
    root: PathBuf,
}

impl MergeEngine {
    /// Merge engine for the staging area and working tree of `ctx`
    pub fn new(ctx: &SyncContext) -> Self {
        Self::with_paths(&ctx.layout().staging, ctx.root())
    }

    /// Merge engine for explicit paths
    pub fn with_paths(staging: impl Into<PathBuf>, working_tree: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
            root: working_tree.into(),
        }
    }

    /// Merge every staged file into the working tree and update the index
    pub async fn apply_staged(&self, index: &mut SyncIndex) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        if !self.staging.is_dir() {
            info!("Nothing staged in {}", self.staging.display());
            return Ok(report);
        }

        let manifest = Manifest::load(&self.staging).await?.unwrap_or_else(|| {
            warn!("Staging area has no manifest, timestamps default to now");
            Manifest::default()
        });

        let mut deleted = false;
        for rel in self.staged_files().await? {
            let item = manifest.items.get(&rel);
            match self.apply_one(&rel, item, index).await {
                Ok(status) => {
                    deleted |= status == MergeStatus::Delete;
                    debug!("{:?} {}", status, rel);
                    report.outcomes.push(MergeOutcome { rel_path: rel, status });
                }
                Err(e) => warn!("Failed to merge {}: {}", rel, e),
            }
        }

        // Directory nodes have no staged file of their own.
        for (rel, item) in manifest.items.iter().filter(|(_, i)| i.kind == EntryKind::Dir) {
            let synced = item.remote_last_edited.unwrap_or(manifest.pulled_at);
            let mut entry = index
                .get(rel)
                .cloned()
                .unwrap_or_else(|| entry_from_manifest(rel, item));
            if entry.last_sync_at.map_or(true, |last| synced > last) {
                entry.last_sync_at = Some(synced);
                entry.remote_last_edited = item.remote_last_edited.or(entry.remote_last_edited);
                entry.touch();
                index.set(rel.clone(), entry);
            }
        }

        index.save().await?;

        if deleted {
            cleanup_empty_dirs(&self.root).await?;
        }

        info!(
            "Merge finished: {} added, {} replaced, {} conflicted, {} deleted, {} unchanged",
            report.count(MergeStatus::Add),
            report.count(MergeStatus::Replace),
            report.count(MergeStatus::Update),
            report.count(MergeStatus::Delete),
            report.count(MergeStatus::Same)
        );
        Ok(report)
    }

    /// Staged files relative to the staging root, sorted, manifest excluded
    pub async fn staged_files(&self) -> Result<Vec<String>> {
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&staging)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.path().strip_prefix(&staging).ok().map(rel_key))
                .filter(|rel| rel != MANIFEST_FILE)
                .collect()
        })
        .await
        .map_err(|e| Error::local_io("", format!("Task join error: {}", e)))
    }

    async fn apply_one(
        &self,
        rel: &str,
        item: Option<&ManifestItem>,
        index: &mut SyncIndex,
    ) -> Result<MergeStatus> {
        let staged_path = self.staging.join(key_path(rel));
        let local_path = self.root.join(key_path(rel));

        let staged = fs::read_to_string(&staged_path)
            .await
            .map_err(|e| Error::local_io(&staged_path, e.to_string()))?;
        let local = match fs::read_to_string(&local_path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::local_io(&local_path, e.to_string())),
        };

        let staged_hash = content_hash(staged.as_bytes());
        if let (Some(entry), Some(local)) = (index.get(rel), &local) {
            let local_hash = content_hash(local.as_bytes());
            if entry.staged_hash.as_deref() == Some(staged_hash.as_str())
                && entry.merged_hash.as_deref() == Some(local_hash.as_str())
            {
                return Ok(MergeStatus::Same);
            }
        }

        let (status, merged) = merge_text(local.as_deref(), &staged);
        match status {
            MergeStatus::Same => {
                if let Some(edited) = item.and_then(|i| i.remote_last_edited) {
                    if let Some(entry) = index.get(rel).cloned() {
                        if entry.last_sync_at.map_or(true, |synced| edited > synced) {
                            let mut entry = entry;
                            entry.last_sync_at = Some(edited);
                            entry.remote_last_edited = Some(edited);
                            entry.touch();
                            index.set(rel, entry);
                        }
                    }
                }
                return Ok(MergeStatus::Same);
            }
            MergeStatus::Delete => match fs::remove_file(&local_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::local_io(&local_path, e.to_string())),
            },
            MergeStatus::Add | MergeStatus::Update | MergeStatus::Replace => {
                write_atomic(&local_path, merged.clone().into_bytes()).await?;
            }
        }

        let mut entry = match (index.get(rel), item) {
            (Some(entry), _) => entry.clone(),
            (None, Some(item)) => entry_from_manifest(rel, item),
            (None, None) => IndexEntry::new(EntryKind::File, title_of(rel)),
        };
        if let Some(item) = item {
            if !entry.is_linked() {
                entry.remote_node_id = Some(item.node_id.clone());
                entry.remote_url = Some(item.url.clone());
            }
            if item.remote_last_edited.is_some() {
                entry.remote_last_edited = item.remote_last_edited;
            }
        }

        let merged_hash = content_hash(merged.as_bytes());
        if merged == staged {
            entry.content_hash = Some(merged_hash.clone());
        }
        entry.staged_hash = Some(staged_hash);
        entry.merged_hash = Some(merged_hash);
        entry.local_modified_nanos = path_modified_nanos(&local_path).await;
        entry.last_sync_at = Some(
            item.and_then(|i| i.remote_last_edited)
                .unwrap_or_else(Utc::now),
        );
        entry.touch();
        index.set(rel, entry);

        Ok(status)
    }
}

fn title_of(rel: &str) -> String {
    let path = key_path(rel);
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel.to_string())
}

fn entry_from_manifest(rel: &str, item: &ManifestItem) -> IndexEntry {
    let title = if item.title.is_empty() {
        title_of(rel)
    } else {
        item.title.clone()
    };
    let mut entry = IndexEntry::new(item.kind, title).with_node(&item.node_id, &item.url);
    entry.parent_url = item.parent_url.clone();
    entry.remote_last_edited = item.remote_last_edited;
    entry
}
