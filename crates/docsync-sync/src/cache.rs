//! Probe-gated cache of listings, file hashes and remote snapshots
//!
//! Everything here is advisory: a stale or missing cache only costs extra
//! hashing and listing. The stored [`Probe`] fingerprints the inputs that can
//! change the meaning of cached data. When it differs from the current one the
//! cache starts empty.

use crate::context::ControlLayout;
use crate::fsutil::{path_modified_nanos, write_atomic};
use chrono::{DateTime, Utc};
use docsync_types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// File name of the cache inside the control directory
pub const CACHE_FILE: &str = ".cache.json";

/// Fingerprint of the cache's inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Modification time of the config file
    pub config: Option<i64>,
    /// Modification time of the ignore file
    pub ignore: Option<i64>,
    /// Modification time of the index file
    pub index: Option<i64>,
    /// Existing credential files in lookup order, with modification times
    pub credentials: Vec<(String, i64)>,
}

impl Probe {
    /// Fingerprint the files of a control layout
    pub async fn compute(layout: &ControlLayout) -> Self {
        let mut credentials = Vec::new();
        for path in layout.credential_chain() {
            if let Some(mtime) = path_modified_nanos(&path).await {
                credentials.push((path.display().to_string(), mtime));
            }
        }

        Self {
            config: path_modified_nanos(&layout.config).await,
            ignore: path_modified_nanos(&layout.ignore_file).await,
            index: path_modified_nanos(&layout.index).await,
            credentials,
        }
    }
}

/// Cached listing of one directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirListing {
    /// Directory modification time the listing was taken at
    pub modified_nanos: i64,
    /// Subdirectory names, sorted
    pub dirs: Vec<String>,
    /// File names, sorted
    pub files: Vec<String>,
}

/// Cached hash of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// File modification time the hash was taken at
    pub modified_nanos: i64,
    /// File size the hash was taken at
    pub size: u64,
    /// blake3 hex digest
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    probe: Probe,
    #[serde(default)]
    remote_snapshot: BTreeMap<String, Option<DateTime<Utc>>>,
    #[serde(default)]
    known_node_ids: BTreeSet<String>,
    #[serde(default)]
    dir_snapshot: BTreeMap<String, DirListing>,
    #[serde(default)]
    file_snapshot: BTreeMap<String, FileSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_url: Option<String>,
    #[serde(default)]
    ignore_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_total: Option<u64>,
}

/// Change cache of one working tree
#[derive(Debug)]
pub struct ChangeCache {
    path: PathBuf,
    layout: ControlLayout,
    doc: CacheDocument,
    dirty: bool,
    hits: u64,
    misses: u64,
}

impl ChangeCache {
    /// Open the cache, discarding its contents when the probe changed
    pub async fn open(layout: &ControlLayout) -> Result<Self> {
        let probe = Probe::compute(layout).await;
        let path = layout.cache.clone();
        let stored = Self::read(&path).await;

        let (doc, dirty) = match stored {
            Some(doc) if doc.probe == probe => {
                debug!(
                    "Reusing change cache: {} files, {} dirs",
                    doc.file_snapshot.len(),
                    doc.dir_snapshot.len()
                );
                (doc, false)
            }
            Some(_) => {
                info!("Change cache invalidated, inputs changed");
                (
                    CacheDocument {
                        probe,
                        ..CacheDocument::default()
                    },
                    true,
                )
            }
            None => (
                CacheDocument {
                    probe,
                    ..CacheDocument::default()
                },
                true,
            ),
        };

        Ok(Self {
            path,
            layout: layout.clone(),
            doc,
            dirty,
            hits: 0,
            misses: 0,
        })
    }

    async fn read(path: &Path) -> Option<CacheDocument> {
        let data = fs::read(path).await.ok()?;
        match serde_json::from_slice(&data) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Ignoring unreadable change cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Cached hash of `rel` when its modification time and size still match
    pub fn file_hash(&mut self, rel: &str, modified_nanos: i64, size: u64) -> Option<String> {
        match self.doc.file_snapshot.get(rel) {
            Some(snap) if snap.modified_nanos == modified_nanos && snap.size == size => {
                self.hits += 1;
                Some(snap.hash.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Remember the hash of `rel`
    pub fn record_file(
        &mut self,
        rel: impl Into<String>,
        modified_nanos: i64,
        size: u64,
        hash: String,
    ) {
        let snapshot = FileSnapshot {
            modified_nanos,
            size,
            hash,
        };
        let rel = rel.into();
        if self.doc.file_snapshot.get(&rel) != Some(&snapshot) {
            self.doc.file_snapshot.insert(rel, snapshot);
            self.dirty = true;
        }
    }

    /// Cached listing of directory `rel` when its modification time still matches
    pub fn listing(&self, rel: &str, modified_nanos: i64) -> Option<&DirListing> {
        self.doc
            .dir_snapshot
            .get(rel)
            .filter(|l| l.modified_nanos == modified_nanos)
    }

    /// Remember the listing of directory `rel`
    pub fn record_listing(&mut self, rel: impl Into<String>, listing: DirListing) {
        let rel = rel.into();
        if self.doc.dir_snapshot.get(&rel) != Some(&listing) {
            self.doc.dir_snapshot.insert(rel, listing);
            self.dirty = true;
        }
    }

    /// Last known remote edit times by node id
    pub fn remote_snapshot(&self) -> &BTreeMap<String, Option<DateTime<Utc>>> {
        &self.doc.remote_snapshot
    }

    /// Replace the remote snapshot entries for the given nodes
    pub fn set_remote_snapshot(
        &mut self,
        snapshot: impl IntoIterator<Item = (String, Option<DateTime<Utc>>)>,
    ) {
        for (id, edited) in snapshot {
            if self.doc.remote_snapshot.get(&id) != Some(&edited) {
                self.doc.remote_snapshot.insert(id, edited);
                self.dirty = true;
            }
        }
    }

    /// Nodes discovered remotely but not present in the index
    pub fn known_node_ids(&self) -> &BTreeSet<String> {
        &self.doc.known_node_ids
    }

    /// Add discovered node ids
    pub fn add_known_node_ids(&mut self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            self.dirty |= self.doc.known_node_ids.insert(id);
        }
    }

    /// Root node url the cached remote data belongs to
    pub fn parent_url(&self) -> Option<&str> {
        self.doc.parent_url.as_deref()
    }

    /// Record the root node url, clearing remote data cached for another root
    pub fn set_parent_url(&mut self, url: &str) {
        if self.doc.parent_url.as_deref() == Some(url) {
            return;
        }
        if self.doc.parent_url.is_some() {
            self.doc.remote_snapshot.clear();
            self.doc.known_node_ids.clear();
        }
        self.doc.parent_url = Some(url.to_string());
        self.dirty = true;
    }

    /// Ignore patterns in effect when the cache was written
    pub fn ignore_patterns(&self) -> &[String] {
        &self.doc.ignore_patterns
    }

    /// Record the ignore patterns in effect
    pub fn set_ignore_patterns(&mut self, patterns: &[String]) {
        if self.doc.ignore_patterns != patterns {
            self.doc.ignore_patterns = patterns.to_vec();
            self.dirty = true;
        }
    }

    /// Number of files seen by the last full push
    pub fn last_total(&self) -> Option<u64> {
        self.doc.last_total
    }

    /// Record the number of files seen by a push
    pub fn set_last_total(&mut self, total: u64) {
        if self.doc.last_total != Some(total) {
            self.doc.last_total = Some(total);
            self.dirty = true;
        }
    }

    /// Hash lookups served from the cache and missed, in this session
    pub fn hit_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Whether there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the cache when it changed
    ///
    /// The probe is recomputed first so files this run wrote, such as the index,
    /// do not invalidate the cache for the next run.
    pub async fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        self.doc.probe = Probe::compute(&self.layout).await;
        let data = serde_json::to_vec_pretty(&self.doc)
            .map_err(|e| Error::serialization(format!("Failed to serialize cache: {}", e)))?;
        write_atomic(&self.path, data).await?;

        self.dirty = false;
        debug!("Saved change cache to {}", self.path.display());
        Ok(())
    }

    /// Remove the cache file and forget everything
    pub async fn clear(&mut self) -> Result<()> {
        self.doc = CacheDocument {
            probe: self.doc.probe.clone(),
            ..CacheDocument::default()
        };
        self.dirty = false;

        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared change cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::local_io(&self.path, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(root: &Path) -> ChangeCache {
        ChangeCache::open(&ControlLayout::new(root)).await.unwrap()
    }

    #[tokio::test]
    async fn test_file_hash_hit_and_miss() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = open(temp_dir.path()).await;

        assert!(cache.file_hash("a.md", 10, 5).is_none());
        cache.record_file("a.md", 10, 5, "abc".to_string());
        assert_eq!(cache.file_hash("a.md", 10, 5).as_deref(), Some("abc"));
        assert!(cache.file_hash("a.md", 11, 5).is_none());
        assert!(cache.file_hash("a.md", 10, 6).is_none());
        assert_eq!(cache.hit_stats(), (1, 3));
    }

    #[tokio::test]
    async fn test_reused_when_probe_matches() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut cache = open(temp_dir.path()).await;
            cache.record_file("a.md", 1, 2, "h".to_string());
            cache.add_known_node_ids(vec!["n1".to_string()]);
            cache.set_last_total(7);
            cache.save().await.unwrap();
            assert!(!cache.is_dirty());
        }

        let mut cache = open(temp_dir.path()).await;
        assert_eq!(cache.file_hash("a.md", 1, 2).as_deref(), Some("h"));
        assert!(cache.known_node_ids().contains("n1"));
        assert_eq!(cache.last_total(), Some(7));
    }

    #[tokio::test]
    async fn test_invalidated_when_ignore_file_changes() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut cache = open(temp_dir.path()).await;
            cache.record_file("a.md", 1, 2, "h".to_string());
            cache.save().await.unwrap();
        }

        std::fs::write(temp_dir.path().join(".docsyncignore"), "drafts/\n").unwrap();

        let mut cache = open(temp_dir.path()).await;
        assert!(cache.file_hash("a.md", 1, 2).is_none());
    }

    #[tokio::test]
    async fn test_listing_requires_matching_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = open(temp_dir.path()).await;
        let listing = DirListing {
            modified_nanos: 42,
            dirs: vec!["sub".to_string()],
            files: vec!["a.md".to_string()],
        };
        cache.record_listing("docs", listing.clone());

        assert_eq!(cache.listing("docs", 42), Some(&listing));
        assert!(cache.listing("docs", 43).is_none());
    }

    #[tokio::test]
    async fn test_parent_url_change_drops_remote_data() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = open(temp_dir.path()).await;
        cache.set_parent_url("https://pages.local/a");
        cache.set_remote_snapshot(vec![("n1".to_string(), Some(Utc::now()))]);
        cache.add_known_node_ids(vec!["n2".to_string()]);

        cache.set_parent_url("https://pages.local/b");
        assert!(cache.remote_snapshot().is_empty());
        assert!(cache.known_node_ids().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_reset() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ControlLayout::new(temp_dir.path());
        std::fs::create_dir_all(&layout.control_dir).unwrap();
        std::fs::write(&layout.cache, "{ not json").unwrap();

        let cache = ChangeCache::open(&layout).await.unwrap();
        assert!(cache.is_dirty());
        assert!(cache.known_node_ids().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut cache = open(temp_dir.path()).await;
        cache.set_last_total(1);
        cache.save().await.unwrap();
        assert!(temp_dir.path().join(".docsync").join(CACHE_FILE).exists());

        cache.clear().await.unwrap();
        assert!(!temp_dir.path().join(".docsync").join(CACHE_FILE).exists());
        assert_eq!(cache.last_total(), None);
    }
}
