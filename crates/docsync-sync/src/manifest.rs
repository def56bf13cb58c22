//! Record of what a pull staged

use crate::fsutil::write_atomic;
use chrono::{DateTime, Utc};
use docsync_types::{EntryKind, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// File name of the manifest inside the staging area
pub const MANIFEST_FILE: &str = "manifest.json";

/// One pulled node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Source node
    pub node_id: String,
    /// Source node url
    pub url: String,
    /// Source node title
    pub title: String,
    /// File or directory
    pub kind: EntryKind,
    /// Url of the parent node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    /// Remote last-edited time at fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_last_edited: Option<DateTime<Utc>>,
    /// Whether the node was unknown to the index
    #[serde(default)]
    pub is_new: bool,
}

/// Items of one staging area, keyed by working-tree relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the pull ran
    pub pulled_at: DateTime<Utc>,
    /// Pulled items
    #[serde(default)]
    pub items: BTreeMap<String, ManifestItem>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            pulled_at: Utc::now(),
            items: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Read the manifest of `staging`, `None` when there is none
    pub async fn load(staging: &Path) -> Result<Option<Self>> {
        let path = staging.join(MANIFEST_FILE);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::local_io(&path, e.to_string())),
        };

        serde_json::from_slice(&data).map(Some).map_err(|e| {
            Error::serialization(format!("Invalid manifest '{}': {}", path.display(), e))
        })
    }

    /// Write the manifest into `staging`
    pub async fn save(&self, staging: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize manifest: {}", e)))?;
        write_atomic(&staging.join(MANIFEST_FILE), data).await
    }
}
