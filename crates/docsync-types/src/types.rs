//! Core data types for docsync
//!
//! The block model is the exchange format between the converter, the engine and
//! the remote store. Blocks are plain values: conversion always builds a fresh
//! sequence and nothing mutates a block after it has been produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for one push or pull run
pub type OperationId = uuid::Uuid;

/// A run of text with uniform inline formatting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichSpan {
    /// Visible text
    pub text: String,
    /// Bold
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    /// Italic
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    /// Strikethrough
    #[serde(default, skip_serializing_if = "is_false")]
    pub strikethrough: bool,
    /// Inline code
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
    /// Link target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RichSpan {
    /// Create an unformatted span
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Mark the span bold
    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    /// Mark the span italic
    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    /// Attach a link
    pub fn with_link(mut self, url: impl Into<String>) -> Self {
        self.link_url = Some(url.into());
        self
    }

    /// Copy the formatting of this span onto new text
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}

/// Type of a block together with its type-specific attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    /// Plain paragraph
    Paragraph,
    /// Heading, level 1 to 3
    Heading {
        /// Heading level
        level: u8,
    },
    /// Bulleted list item
    BulletedItem,
    /// Numbered list item
    NumberedItem,
    /// Checkbox item
    ToDo {
        /// Whether the box is ticked
        checked: bool,
    },
    /// Block quote
    Quote,
    /// Horizontal rule
    Divider,
    /// Fenced code
    Code {
        /// Normalized language name
        language: String,
    },
    /// Table container, rows are its children
    Table {
        /// Number of columns
        width: usize,
        /// Whether the first row is a header
        has_column_header: bool,
    },
    /// Table row
    TableRow {
        /// One span list per cell
        cells: Vec<Vec<RichSpan>>,
    },
    /// Reference to a child node
    ChildPage {
        /// Title of the child node
        title: String,
    },
    /// A remote type this crate does not model
    Unsupported {
        /// Remote type name
        name: String,
    },
}

/// A typed content unit with optional nested children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block type
    pub kind: BlockKind,
    /// Rich text of the block
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<RichSpan>,
    /// Nested blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    /// Create a block without children
    pub fn new(kind: BlockKind, spans: Vec<RichSpan>) -> Self {
        Self {
            kind,
            spans,
            children: Vec::new(),
        }
    }

    /// Create a paragraph
    pub fn paragraph(spans: Vec<RichSpan>) -> Self {
        Self::new(BlockKind::Paragraph, spans)
    }

    /// Create a heading
    pub fn heading(level: u8, spans: Vec<RichSpan>) -> Self {
        Self::new(BlockKind::Heading { level }, spans)
    }

    /// Create a code block holding `text` verbatim
    pub fn code(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            BlockKind::Code {
                language: language.into(),
            },
            vec![RichSpan::plain(text)],
        )
    }

    /// Create a divider
    pub fn divider() -> Self {
        Self::new(BlockKind::Divider, Vec::new())
    }

    /// Attach children
    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }

    /// Concatenated text of all spans
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Remote type name of this block
    pub fn type_name(&self) -> &str {
        match &self.kind {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading { level: 1 } => "heading_1",
            BlockKind::Heading { level: 2 } => "heading_2",
            BlockKind::Heading { .. } => "heading_3",
            BlockKind::BulletedItem => "bulleted_list_item",
            BlockKind::NumberedItem => "numbered_list_item",
            BlockKind::ToDo { .. } => "to_do",
            BlockKind::Quote => "quote",
            BlockKind::Divider => "divider",
            BlockKind::Code { .. } => "code",
            BlockKind::Table { .. } => "table",
            BlockKind::TableRow { .. } => "table_row",
            BlockKind::ChildPage { .. } => "child_page",
            BlockKind::Unsupported { name } => name,
        }
    }
}

/// Handle returned when a node is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node id
    pub id: String,
    /// Browsable url of the node
    pub url: String,
}

/// Metadata of a remote node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Node id
    pub id: String,
    /// Title
    pub title: String,
    /// Browsable url
    pub url: String,
    /// Parent node id, `None` for a root
    pub parent_id: Option<String>,
    /// Last time the node or its content changed
    pub last_edited: Option<DateTime<Utc>>,
    /// Whether the node has been archived
    #[serde(default)]
    pub archived: bool,
}

impl RemoteNode {
    /// Reference form of this node
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            url: self.url.clone(),
        }
    }
}

/// Kind of a synced working-tree entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
}

impl EntryKind {
    /// Short label used in the action log
    pub fn label(self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Dir => "DIR",
        }
    }
}

/// Counters for one push or pull run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Remote nodes created
    pub nodes_created: u64,
    /// Remote nodes whose content was rewritten
    pub nodes_updated: u64,
    /// Items that needed no work
    pub unchanged: u64,
    /// Items that failed and were skipped
    pub errors: u64,
    /// Blocks sent to the remote store
    pub blocks_written: u64,
    /// Files written into the staging area
    pub files_staged: u64,
    /// Total duration of the run
    pub duration: Duration,
}

impl SyncStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remote write operations performed
    pub fn remote_writes(&self) -> u64 {
        self.nodes_created + self.nodes_updated
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &SyncStats) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.unchanged += other.unchanged;
        self.errors += other.errors;
        self.blocks_written += other.blocks_written;
        self.files_staged += other.files_staged;
        self.duration += other.duration;
    }
}
