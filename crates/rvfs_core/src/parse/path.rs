//! Canonical virtual path model.
//!
//! # Invariants
//! - The empty path is the implicit root and is never stored as an entry.
//! - `..` is resolved lexically against the segments seen so far.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const SEPARATOR: char = '/';

/// Errors from path normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A `..` segment would climb above the root.
    EscapesRoot(String),
    /// A segment contains a character that cannot be stored.
    InvalidSegment(String),
    /// The root was given where an entry path is required.
    Root,
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EscapesRoot(raw) => write!(f, "path escapes the project root: `{raw}`"),
            Self::InvalidSegment(segment) => write!(f, "invalid path segment: `{segment}`"),
            Self::Root => write!(f, "the root cannot be addressed as an entry"),
        }
    }
}

impl Error for PathError {}

/// Normalized, slash-joined virtual path.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// Returns the implicit root path.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalizes raw user input.
    ///
    /// Leading/trailing separators, empty segments, and `.` are dropped;
    /// `..` pops the previous segment.
    ///
    /// # Errors
    /// - `EscapesRoot` when `..` is applied at the root.
    /// - `InvalidSegment` when a segment contains a NUL byte.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::EscapesRoot(raw.to_string()));
                    }
                }
                other => {
                    if other.contains('\0') {
                        return Err(PathError::InvalidSegment(other.replace('\0', "\\0")));
                    }
                    segments.push(other);
                }
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates path segments from the root downwards.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|segment| !segment.is_empty())
    }

    /// Returns the leaf segment, or an empty string for the root.
    pub fn name(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }

    /// Returns the parent path, `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind(SEPARATOR) {
            Some(index) => Self(self.0[..index].to_string()),
            None => Self::root(),
        })
    }

    /// Returns every non-root prefix, shortest first, ending with `self`.
    pub fn ancestors(&self) -> Vec<VirtualPath> {
        let mut prefixes = Vec::new();
        let mut current = String::new();
        for segment in self.segments() {
            if !current.is_empty() {
                current.push(SEPARATOR);
            }
            current.push_str(segment);
            prefixes.push(Self(current.clone()));
        }
        prefixes
    }

    /// Appends a relative suffix, normalizing the result.
    pub fn join(&self, suffix: &str) -> Result<VirtualPath, PathError> {
        if self.is_root() {
            return Self::parse(suffix);
        }
        Self::parse(&format!("{}/{}", self.0, suffix))
    }

    /// Returns whether `self` equals `base` or lies below it.
    pub fn starts_with(&self, base: &VirtualPath) -> bool {
        self.strip_prefix(base).is_some()
    }

    /// Returns the remainder of `self` below `base`.
    ///
    /// `Some("")` means `self == base`.
    pub fn strip_prefix(&self, base: &VirtualPath) -> Option<&str> {
        if base.is_root() {
            return Some(&self.0);
        }
        let rest = self.0.strip_prefix(base.as_str())?;
        if rest.is_empty() {
            return Some(rest);
        }
        rest.strip_prefix(SEPARATOR)
    }
}

impl Display for VirtualPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        write!(f, "{}", self.0)
    }
}
