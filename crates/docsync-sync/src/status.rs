//! Working-tree status: index summary, pending staging and conflicts

use crate::context::SyncContext;
use crate::convert::is_supported_extension;
use crate::fsutil::{key_path, rel_key};
use crate::index::{IgnoreRules, SyncIndex};
use crate::manifest::Manifest;
use crate::merge::{detect_conflicts, has_conflicts, MergeEngine};
use chrono::{DateTime, Utc};
use docsync_types::{EntryKind, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// A working-tree file still holding conflict markers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    /// Path relative to the working-tree root
    pub rel_path: String,
    /// Number of marker lines
    pub markers: usize,
    /// Line of the first marker, 1-based
    pub first_line: usize,
}

/// Snapshot of a working tree's sync state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Remote root the tree is bound to
    pub root_url: Option<String>,
    /// Indexed files
    pub files: usize,
    /// Indexed directories
    pub dirs: usize,
    /// Entries without a remote node
    pub unlinked: usize,
    /// Most recent sync of any entry
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When the staged pull was taken
    pub pulled_at: Option<DateTime<Utc>>,
    /// Files waiting in the staging area
    pub staged: Vec<String>,
    /// Files with unresolved conflicts
    pub conflicts: Vec<ConflictFile>,
}

impl StatusReport {
    /// Whether merge has work left to do
    pub fn has_pending_merge(&self) -> bool {
        !self.staged.is_empty()
    }
}

/// Collect the status of the tree behind `ctx`
pub async fn status(ctx: &SyncContext) -> Result<StatusReport> {
    let layout = ctx.layout();
    let index = SyncIndex::load(&layout.control_dir).await?;
    let ignore = IgnoreRules::load(&layout.root, index.ignore_patterns()).await?;

    let mut report = StatusReport {
        root_url: ctx.root_url(&index).ok(),
        ..StatusReport::default()
    };
    for (_, entry) in index.entries() {
        match entry.kind {
            EntryKind::File => report.files += 1,
            EntryKind::Dir => report.dirs += 1,
        }
        if !entry.is_linked() {
            report.unlinked += 1;
        }
        report.last_sync_at = report.last_sync_at.max(entry.last_sync_at);
    }

    report.staged = MergeEngine::new(ctx).staged_files().await?;
    report.pulled_at = Manifest::load(&layout.staging)
        .await?
        .map(|manifest| manifest.pulled_at);

    for rel in text_files(layout.root.clone(), ignore).await? {
        let path = layout.root.join(key_path(&rel));
        let Ok(text) = fs::read_to_string(&path).await else {
            debug!("Skipping unreadable {}", path.display());
            continue;
        };
        if !has_conflicts(&text) {
            continue;
        }
        let markers = detect_conflicts(&text);
        if let Some(first) = markers.first() {
            report.conflicts.push(ConflictFile {
                rel_path: rel,
                markers: markers.len(),
                first_line: first.line,
            });
        }
    }

    Ok(report)
}

/// Supported, non-ignored files of the working tree, sorted
async fn text_files(root: PathBuf, ignore: IgnoreRules) -> Result<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.path()
                    .strip_prefix(&root)
                    .map_or(false, |rel| !ignore.is_ignored(rel))
            })
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(is_supported_extension)
            })
            .filter_map(|e| e.path().strip_prefix(&root).ok().map(rel_key))
            .collect()
    })
    .await
    .map_err(|e| Error::local_io("", format!("Task join error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use docsync_config::Config;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_finds_conflicts_and_staging() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new("https://pages.local"));
        let ctx = SyncContext::new(temp_dir.path(), Config::default(), store);
        let root = temp_dir.path();

        std::fs::write(root.join("clean.md"), "fine\n").unwrap();
        std::fs::create_dir_all(root.join("notes")).unwrap();
        std::fs::write(
            root.join("notes/todo.md"),
            "intro\n<<<<<<< LOCAL\na\n=======\nb\n>>>>>>> REMOTE\n",
        )
        .unwrap();
        let staged = ctx.layout().staging.join("clean.md");
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(staged, "fine, edited\n").unwrap();

        let report = status(&ctx).await.unwrap();

        assert!(report.root_url.is_none());
        assert_eq!(report.staged, vec!["clean.md".to_string()]);
        assert!(report.has_pending_merge());
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].rel_path, "notes/todo.md");
        assert_eq!(report.conflicts[0].markers, 3);
        assert_eq!(report.conflicts[0].first_line, 2);
    }
}
