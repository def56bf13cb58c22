//! Persistent mapping from working-tree paths to remote nodes
//!
//! The index lives in `<control>/index.yaml`. Writes are load-merge-write: the
//! document on disk is re-read, fields this process did not touch are kept, the
//! in-memory items are laid over it and the result replaces the file through a
//! rename. Entries are never removed automatically.

use crate::fsutil::{key_path, rel_key, write_atomic};
use chrono::{DateTime, Utc};
use docsync_types::{EntryKind, Error, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File name of the index inside the control directory
pub const INDEX_FILE: &str = "index.yaml";

/// Name of the user ignore file at the working-tree root
pub const IGNORE_FILE: &str = ".docsyncignore";

const INDEX_VERSION: u32 = 1;

/// One synced file or directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// File or directory
    pub kind: EntryKind,
    /// Title of the remote node
    pub title: String,
    /// Id of the remote node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_node_id: Option<String>,
    /// Url of the remote node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Url of the parent node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    /// blake3 of the local content last pushed or merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Local modification time at the last sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_modified_nanos: Option<i64>,
    /// Remote last-edited time as last observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_last_edited: Option<DateTime<Utc>>,
    /// When local and remote were last confirmed equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When this entry last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// blake3 of the staged text of the last merge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_hash: Option<String>,
    /// blake3 of the text the last merge wrote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_hash: Option<String>,
}

impl IndexEntry {
    /// Create an entry that is not linked to a node yet
    pub fn new(kind: EntryKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            remote_node_id: None,
            remote_url: None,
            parent_url: None,
            content_hash: None,
            local_modified_nanos: None,
            remote_last_edited: None,
            last_sync_at: None,
            updated_at: None,
            staged_hash: None,
            merged_hash: None,
        }
    }

    /// Link the entry to a node
    pub fn with_node(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.remote_node_id = Some(id.into());
        self.remote_url = Some(url.into());
        self
    }

    /// Whether the entry points at a remote node
    pub fn is_linked(&self) -> bool {
        self.remote_node_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Mark the entry as changed now
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ignore: Vec<String>,
    #[serde(default)]
    items: BTreeMap<String, IndexEntry>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

impl Default for IndexDocument {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            generated_at: None,
            root_url: None,
            ignore: Vec::new(),
            items: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl IndexDocument {
    async fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(path)
            .await
            .map_err(|e| Error::local_io(path, e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_yaml::from_str(&text).map(Some).map_err(|e| {
            Error::serialization(format!("Failed to parse index '{}': {}", path.display(), e))
        })
    }
}

/// Path to remote-node mapping of one working tree
#[derive(Debug)]
pub struct SyncIndex {
    path: PathBuf,
    doc: IndexDocument,
    root_changed: bool,
}

impl SyncIndex {
    /// Load `<control_dir>/index.yaml`, or start empty when it does not exist
    pub async fn load(control_dir: &Path) -> Result<Self> {
        let path = control_dir.join(INDEX_FILE);
        let doc = IndexDocument::read(&path).await?.unwrap_or_default();
        debug!("Loaded index with {} items from {}", doc.items.len(), path.display());

        Ok(Self {
            path,
            doc,
            root_changed: false,
        })
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry for a relative path
    pub fn get(&self, rel: &str) -> Option<&IndexEntry> {
        self.doc.items.get(rel)
    }

    /// Entry for a relative path given as a path
    pub fn get_path(&self, rel: &Path) -> Option<&IndexEntry> {
        self.get(&rel_key(rel))
    }

    /// Insert or replace the entry for `rel`
    pub fn set(&mut self, rel: impl Into<String>, entry: IndexEntry) {
        self.doc.items.insert(rel.into(), entry);
    }

    /// All entries, ordered by path
    pub fn entries(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.doc.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutable access to all entries
    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&str, &mut IndexEntry)> {
        self.doc.items.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// First entry pointing at `id`, directories before files
    pub fn find_by_node_id(&self, id: &str) -> Option<(&str, &IndexEntry)> {
        let mut matches = self
            .entries()
            .filter(|(_, e)| e.remote_node_id.as_deref() == Some(id));
        let first = matches.next()?;
        if first.1.kind == EntryKind::Dir {
            return Some(first);
        }
        Some(
            matches
                .find(|(_, e)| e.kind == EntryKind::Dir)
                .unwrap_or(first),
        )
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.doc.items.len()
    }

    /// Whether the index has no entries
    pub fn is_empty(&self) -> bool {
        self.doc.items.is_empty()
    }

    /// Url of the root node as recorded in the index
    pub fn root_url(&self) -> Option<&str> {
        self.doc.root_url.as_deref()
    }

    /// Record the root node url
    pub fn set_root_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if self.doc.root_url.as_deref() != Some(url.as_str()) {
            self.doc.root_url = Some(url);
            self.root_changed = true;
        }
    }

    /// Ignore patterns stored in the index
    pub fn ignore_patterns(&self) -> &[String] {
        &self.doc.ignore
    }

    /// Write the index, merging with whatever is on disk
    pub async fn save(&mut self) -> Result<()> {
        let mut merged = IndexDocument::read(&self.path).await?.unwrap_or_default();

        if self.root_changed || merged.root_url.is_none() {
            merged.root_url = self.doc.root_url.clone();
        }
        if merged.ignore.is_empty() {
            merged.ignore = self.doc.ignore.clone();
        }
        for (key, value) in &self.doc.extra {
            merged.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, entry) in &self.doc.items {
            merged.items.insert(key.clone(), entry.clone());
        }
        merged.version = INDEX_VERSION;
        merged.generated_at = Some(Utc::now());

        let text = serde_yaml::to_string(&merged)
            .map_err(|e| Error::serialization(format!("Failed to serialize index: {}", e)))?;
        write_atomic(&self.path, text.into_bytes()).await?;

        debug!("Saved index with {} items", merged.items.len());
        self.doc = merged;
        self.root_changed = false;
        Ok(())
    }
}

const DEFAULT_IGNORED_NAMES: &[&str] = &[
    ".docsync",
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    ".idea",
    ".vscode",
    ".DS_Store",
];

const DEFAULT_IGNORED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "ico", "tiff", "tif", "pdf", "swp",
];

/// Glob-based filter deciding which working-tree entries are synced
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    set: GlobSet,
    user_patterns: Vec<String>,
}

impl IgnoreRules {
    /// Build rules from user patterns plus the built-in defaults
    pub fn new(user_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();

        for name in DEFAULT_IGNORED_NAMES {
            for pattern in [format!("**/{}", name), format!("**/{}/**", name)] {
                builder.add(build_glob(&pattern, false)?);
            }
        }
        for ext in DEFAULT_IGNORED_EXTENSIONS {
            builder.add(build_glob(&format!("**/*.{}", ext), true)?);
        }

        for pattern in user_patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!("Ignoring invalid ignore pattern '{}': {}", pattern, e),
            }
        }

        let set = builder
            .build()
            .map_err(|e| Error::configuration(format!("Invalid ignore rules: {}", e)))?;

        Ok(Self {
            set,
            user_patterns: user_patterns.to_vec(),
        })
    }

    /// Load `<root>/.docsyncignore` and combine it with `index_patterns`
    pub async fn load(root: &Path, index_patterns: &[String]) -> Result<Self> {
        let path = root.join(IGNORE_FILE);
        let mut patterns = match fs::read_to_string(&path).await {
            Ok(text) => parse_ignore_file(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::local_io(&path, e.to_string())),
        };
        patterns.extend(index_patterns.iter().cloned());
        Self::new(&patterns)
    }

    /// User patterns in effect
    pub fn user_patterns(&self) -> &[String] {
        &self.user_patterns
    }

    /// Whether a path relative to the working-tree root is out of scope
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let hidden = rel.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|s| s.starts_with('.') && s != "." && s != "..")
        });
        hidden || self.set.is_match(key_path(&rel_key(rel)))
    }
}

fn build_glob(pattern: &str, case_insensitive: bool) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| Error::configuration(format!("Invalid glob '{}': {}", pattern, e)))
}

/// Parse an ignore file: one glob per line, `#` comments, leading `/` stripped,
/// a trailing `/` matches the directory and everything below it
pub fn parse_ignore_file(text: &str) -> Vec<String> {
    let mut patterns = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.trim_start_matches('/');
        if line.is_empty() {
            continue;
        }
        match line.strip_suffix('/') {
            Some(dir) if !dir.is_empty() => {
                patterns.push(dir.to_string());
                patterns.push(format!("{}/**", dir));
            }
            Some(_) => {}
            None => patterns.push(line.to_string()),
        }
    }

    patterns
}
