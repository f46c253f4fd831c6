//! Entry, line, and project records.
//!
//! # Invariants
//! - `Entry.path` is always a normalized `VirtualPath` and never the root.
//! - `Entry.kind` never changes after creation.
//! - `Line.line_no` is 1-based and unique within one file.

use crate::parse::path::VirtualPath;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Stable row id of one project.
pub type ProjectId = i64;

/// Stable row id of one entry.
pub type EntryId = i64;

/// Scoping unit binding a namespace to one store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Root location string, unique per store.
    pub root: String,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
}

/// Namespace node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Container node.
    Dir,
    /// Line-oriented content node.
    File,
}

impl EntryKind {
    /// Column value stored in `files.type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::File => "file",
        }
    }

    pub(crate) fn from_column(value: &str) -> Option<Self> {
        match value {
            "dir" => Some(Self::Dir),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dir => "directory",
            Self::File => "file",
        })
    }
}

/// One directory or file in the virtual namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub project_id: ProjectId,
    pub path: VirtualPath,
    /// Leaf segment of `path`.
    pub name: String,
    pub kind: EntryKind,
    /// Human-readable side note.
    pub note: Option<String>,
    /// Control-channel payload, stored in `files.aicom`.
    pub control: Option<String>,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// One numbered line of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub line_no: u32,
    pub content: String,
    /// Line-level side note, stored in `file_lines.side`.
    pub note: Option<String>,
    /// Line-level control-channel payload.
    pub control: Option<String>,
}

/// Entry plus its attached tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStat {
    pub entry: Entry,
    pub tags: Vec<String>,
}

/// Flat export record for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub path: VirtualPath,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    /// Always empty for directories.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub lines: Vec<Line>,
}
