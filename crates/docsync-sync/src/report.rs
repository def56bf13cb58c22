//! Action log and run reports

use crate::merge::MergeStatus;
use docsync_types::{EntryKind, OperationId, SyncStats};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;

/// What happened to one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Created remotely, or staged from a node new to the index
    New,
    /// Rewritten remotely, or staged from a changed node
    Update,
    /// Nothing to do
    Unchanged,
    /// Would be skipped because its hash is unchanged (dry run)
    SameHash,
    /// Failed and skipped
    Error,
}

impl Action {
    /// Code printed in the action column
    pub fn code(self) -> &'static str {
        match self {
            Self::New => "N",
            Self::Update => "U",
            Self::Unchanged => "-",
            Self::SameHash => "-(same-hash)",
            Self::Error => "E",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

/// One row of the action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// What happened
    pub action: Action,
    /// File or directory
    pub kind: EntryKind,
    /// Path relative to the working-tree root
    pub path: String,
    /// Remote title
    pub title: String,
    /// Remote url, empty when unknown
    pub url: String,
}

impl ActionRecord {
    /// Tabular form: action, kind, path, title, url
    pub fn row(&self) -> String {
        format!(
            "{:<12} {:<4} {:<40} {:<32} {}",
            self.action.code(),
            self.kind.label(),
            truncate(&self.path, 40),
            truncate(&self.title, 32),
            self.url
        )
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Collects action records, logs them and forwards them to a live listener
#[derive(Debug, Default)]
pub struct ActionLog {
    records: Vec<ActionRecord>,
    sender: Option<mpsc::UnboundedSender<ActionRecord>>,
}

impl ActionLog {
    /// Create a log without a listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log forwarding every record to `sender`
    pub fn with_sender(sender: mpsc::UnboundedSender<ActionRecord>) -> Self {
        Self {
            records: Vec::new(),
            sender: Some(sender),
        }
    }

    /// Record one item
    pub fn record(
        &mut self,
        action: Action,
        kind: EntryKind,
        path: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) {
        let record = ActionRecord {
            action,
            kind,
            path: path.into(),
            title: title.into(),
            url: url.into(),
        };

        info!(
            action = record.action.code(),
            kind = record.kind.label(),
            path = %record.path,
            title = %record.title,
            url = %record.url,
            "sync action"
        );

        if let Some(sender) = &self.sender {
            // A closed listener only loses live output; the records are kept.
            let _ = sender.send(record.clone());
        }
        self.records.push(record);
    }

    /// Records so far
    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Number of records with `action`
    pub fn count(&self, action: Action) -> usize {
        self.records.iter().filter(|r| r.action == action).count()
    }

    /// Take the records, leaving the log empty
    pub fn into_records(self) -> Vec<ActionRecord> {
        self.records
    }
}

/// Outcome of a push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Run id
    pub operation_id: OperationId,
    /// Counters
    pub stats: SyncStats,
    /// One record per visited item
    pub actions: Vec<ActionRecord>,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl SyncReport {
    /// Whether any item failed
    pub fn has_errors(&self) -> bool {
        self.stats.errors > 0
    }
}

/// One file written into the staging area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedItem {
    /// Path relative to the staging root and the working tree
    pub rel_path: String,
    /// Source node
    pub node_id: String,
    /// Whether the node was unknown to the index
    pub is_new: bool,
}

/// Outcome of a pull
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullReport {
    /// Run id
    pub operation_id: OperationId,
    /// Counters
    pub stats: SyncStats,
    /// Staging directory of this run
    pub staging: PathBuf,
    /// Files staged
    pub staged: Vec<StagedItem>,
    /// Indexed nodes found changed by the diff-check
    pub changed: usize,
    /// Nodes checked by the diff-check
    pub checked: usize,
    /// New nodes found by discovery
    pub discovered: usize,
    /// Whether the whole remote tree was walked
    pub full_walk: bool,
    /// One record per staged item
    pub actions: Vec<ActionRecord>,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// Merge outcome of one staged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Path relative to the working tree
    pub rel_path: String,
    /// What the merge did
    pub status: MergeStatus,
}

/// Outcome of applying the staging area
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeReport {
    /// One outcome per staged file
    pub outcomes: Vec<MergeOutcome>,
}

impl MergeReport {
    /// Number of files with `status`
    pub fn count(&self, status: MergeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Files left with conflict markers
    pub fn conflicted(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == MergeStatus::Update)
            .map(|o| o.rel_path.as_str())
    }
}
