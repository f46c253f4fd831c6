//! Virtual filesystem use-case service.
//!
//! # Responsibility
//! - Implement path-addressed filesystem operations over `StoreRepository`.
//! - Enforce namespace invariants the schema cannot express.
//!
//! # Invariants
//! - Every created entry has all of its ancestors present as directories.
//! - An entry's kind never changes; kind conflicts are reported, not repaired.
//! - Each public mutation runs inside exactly one store transaction.
//! - Tags always attach at entry level, even for line-targeted annotations.

use crate::model::entry::{Entry, EntryKind, EntryStat, ExportedEntry, Line, ProjectId};
use crate::parse::annotation::Annotation;
use crate::parse::path::{PathError, VirtualPath};
use crate::repo::store_repo::{StoreError, StoreRepository};
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from virtual filesystem operations.
#[derive(Debug)]
pub enum FsError {
    /// Input path could not be normalized or names the root where an entry
    /// is required.
    InvalidPath(PathError),
    /// Target path does not exist.
    NotFound(VirtualPath),
    /// Create or move hit an existing entry of the other kind.
    TypeConflict {
        path: VirtualPath,
        existing: EntryKind,
    },
    /// Operation requires a different kind than the one stored.
    KindMismatch {
        path: VirtualPath,
        expected: EntryKind,
    },
    /// Non-recursive remove on a directory with descendants.
    NotEmpty(VirtualPath),
    /// Non-recursive remove on an empty directory.
    IsDirectory(VirtualPath),
    /// Move destination is already taken.
    DestinationExists(VirtualPath),
    /// Move source/destination combination is not allowed.
    InvalidMove {
        src: VirtualPath,
        dst: VirtualPath,
    },
    /// Line numbers are 1-based.
    InvalidLine(u32),
    /// Store-level failure.
    Store(StoreError),
}

impl Display for FsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(err) => write!(f, "{err}"),
            Self::NotFound(path) => write!(f, "not found: {path}"),
            Self::TypeConflict { path, existing } => {
                write!(f, "type conflict: {path} already exists as a {existing}")
            }
            Self::KindMismatch { path, expected } => {
                write!(f, "{path} is not a {expected}")
            }
            Self::NotEmpty(path) => {
                write!(f, "directory not empty: {path}; use -r to remove recursively")
            }
            Self::IsDirectory(path) => {
                write!(f, "is a directory: {path}; use -r to remove it")
            }
            Self::DestinationExists(path) => write!(f, "destination already exists: {path}"),
            Self::InvalidMove { src, dst } => write!(f, "cannot move {src} to {dst}"),
            Self::InvalidLine(line) => write!(f, "invalid line number {line}; lines start at 1"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPath(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PathError> for FsError {
    fn from(value: PathError) -> Self {
        Self::InvalidPath(value)
    }
}

impl From<StoreError> for FsError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::EntryNotFound(path) => Self::NotFound(path),
            other => Self::Store(other),
        }
    }
}

/// Project-scoped virtual filesystem facade.
pub struct FsService<R: StoreRepository> {
    repo: R,
    project_id: ProjectId,
}

impl<R: StoreRepository> FsService<R> {
    /// Creates service for an already-resolved project id.
    pub fn new(repo: R, project_id: ProjectId) -> Self {
        Self { repo, project_id }
    }

    /// Binds the service to the project row for `root`, creating it if absent.
    pub fn bind(repo: R, root: &str) -> Result<Self, FsError> {
        let project_id = repo.ensure_project(root)?;
        debug!("event=project_bind module=fs status=ok project_id={project_id}");
        Ok(Self { repo, project_id })
    }

    /// Returns the scoping project id.
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Creates a directory and every missing ancestor.
    ///
    /// Metadata lands on the deepest directory only. Existing directories
    /// along the way are reused.
    pub fn make_directory(&self, path: &str, annotation: &Annotation) -> Result<Entry, FsError> {
        let path = parse_entry_path(path)?;
        let entry = self.repo.atomic(|repo| {
            let leaf = create_directory_chain(repo, self.project_id, &path)?;
            apply_entry_annotation(repo, self.project_id, &leaf.path, annotation)?;
            reload(repo, self.project_id, &leaf.path)
        })?;
        info!(
            "event=fs_mkdir module=fs status=ok depth={} annotated={}",
            path.ancestors().len(),
            !annotation.is_empty()
        );
        Ok(entry)
    }

    /// Creates a file, its parent chain, and an optional first line.
    ///
    /// Re-creating an existing file only applies metadata; initial content is
    /// written when the file has no line 1 yet.
    pub fn new_file(
        &self,
        path: &str,
        content: Option<&str>,
        annotation: &Annotation,
    ) -> Result<Entry, FsError> {
        let path = parse_entry_path(path)?;
        let entry = self.repo.atomic(|repo| {
            if let Some(parent) = path.parent().filter(|parent| !parent.is_root()) {
                create_directory_chain(repo, self.project_id, &parent)?;
            }
            let entry = repo.upsert_entry(self.project_id, &path, EntryKind::File)?;
            if entry.kind != EntryKind::File {
                return Err(FsError::TypeConflict {
                    path: path.clone(),
                    existing: entry.kind,
                });
            }
            apply_entry_annotation(repo, self.project_id, &path, annotation)?;
            if let Some(text) = content.filter(|text| !text.is_empty()) {
                repo.insert_line(self.project_id, &path, 1, text)?;
            }
            reload(repo, self.project_id, &path)
        })?;
        info!(
            "event=fs_newfile module=fs status=ok has_content={} annotated={}",
            content.is_some_and(|text| !text.is_empty()),
            !annotation.is_empty()
        );
        Ok(entry)
    }

    /// Lists `path` and every entry below it, ordered by path.
    ///
    /// The root always lists successfully, even when empty.
    pub fn list(&self, path: &str) -> Result<Vec<Entry>, FsError> {
        let path = VirtualPath::parse(path)?;
        let entries = self.repo.list_subtree(self.project_id, &path)?;
        if !path.is_root() && entries.first().map(|entry| &entry.path) != Some(&path) {
            return Err(FsError::NotFound(path));
        }
        Ok(entries)
    }

    /// Lists only the direct children of `path`.
    pub fn list_immediate(&self, path: &str) -> Result<Vec<Entry>, FsError> {
        let base = VirtualPath::parse(path)?;
        let entries = self.list(base.as_str())?;
        Ok(immediate_children(&base, entries))
    }

    /// Reads every line of a file in ascending line order.
    pub fn read(&self, path: &str) -> Result<Vec<Line>, FsError> {
        let path = parse_entry_path(path)?;
        self.require_kind(&path, EntryKind::File)?;
        Ok(self.repo.read_lines(self.project_id, &path)?)
    }

    /// Reads a file as newline-joined text.
    pub fn read_text(&self, path: &str) -> Result<String, FsError> {
        let lines = self.read(path)?;
        Ok(lines
            .into_iter()
            .map(|line| line.content)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Appends one line and returns its number.
    pub fn append(&self, path: &str, text: &str) -> Result<u32, FsError> {
        let path = parse_entry_path(path)?;
        let line_no = self.repo.atomic(|repo| {
            require_kind(repo, self.project_id, &path, EntryKind::File)?;
            Ok::<_, FsError>(repo.append_line(self.project_id, &path, text)?)
        })?;
        debug!("event=fs_append module=fs status=ok line_no={line_no}");
        Ok(line_no)
    }

    /// Applies metadata to an entry, or to one line of a file.
    ///
    /// With `line`, note/control go to that line (created empty if missing)
    /// while tags still attach to the entry.
    pub fn annotate(
        &self,
        path: &str,
        line: Option<u32>,
        annotation: &Annotation,
    ) -> Result<Entry, FsError> {
        let path = parse_entry_path(path)?;
        if line == Some(0) {
            return Err(FsError::InvalidLine(0));
        }
        let entry = self.repo.atomic(|repo| {
            let entry = require_entry(repo, self.project_id, &path)?;
            match line {
                Some(line_no) => {
                    if entry.kind != EntryKind::File {
                        return Err(FsError::KindMismatch {
                            path: path.clone(),
                            expected: EntryKind::File,
                        });
                    }
                    repo.set_line_metadata(
                        self.project_id,
                        &path,
                        line_no,
                        annotation.note.as_deref(),
                        annotation.control.as_deref(),
                    )?;
                    if !annotation.tags.is_empty() {
                        repo.attach_tags(self.project_id, &path, &annotation.tags)?;
                    }
                }
                None => apply_entry_annotation(repo, self.project_id, &path, annotation)?,
            }
            reload(repo, self.project_id, &path)
        })?;
        info!(
            "event=fs_annotate module=fs status=ok target={} tags={}",
            if line.is_some() { "line" } else { "entry" },
            annotation.tags.len()
        );
        Ok(entry)
    }

    /// Returns one entry with its tags.
    pub fn stat(&self, path: &str) -> Result<EntryStat, FsError> {
        let path = parse_entry_path(path)?;
        let entry = require_entry(&self.repo, self.project_id, &path)?;
        let tags = self.repo.list_tags(self.project_id, &path)?;
        Ok(EntryStat { entry, tags })
    }

    /// Moves a file, or a directory with its whole subtree.
    ///
    /// Missing parent directories of `dst` are created in the same
    /// transaction. Moving a path onto itself is a no-op.
    pub fn move_entry(&self, src: &str, dst: &str) -> Result<Entry, FsError> {
        let src = VirtualPath::parse(src)?;
        let dst = VirtualPath::parse(dst)?;
        if src.is_root() || dst.is_root() {
            return Err(FsError::InvalidMove { src, dst });
        }

        let (entry, moved) = self.repo.atomic(|repo| {
            let source = require_entry(repo, self.project_id, &src)?;
            if src == dst {
                return Ok((source, 0));
            }
            if dst.starts_with(&src) {
                return Err(FsError::InvalidMove {
                    src: src.clone(),
                    dst: dst.clone(),
                });
            }
            if repo.get_entry(self.project_id, &dst)?.is_some()
                || repo.count_descendants(self.project_id, &dst)? > 0
            {
                return Err(FsError::DestinationExists(dst.clone()));
            }
            if let Some(parent) = dst.parent().filter(|parent| !parent.is_root()) {
                create_directory_chain(repo, self.project_id, &parent)?;
            }

            let moved = repo.rename_subtree(self.project_id, &src, &dst)?;
            if source.kind == EntryKind::File && moved != 1 {
                return Err(FsError::Store(StoreError::InvalidData(format!(
                    "file rename touched {moved} rows"
                ))));
            }
            Ok((reload(repo, self.project_id, &dst)?, moved))
        })?;
        info!(
            "event=fs_move module=fs status=ok kind={} moved={moved}",
            entry.kind.as_str()
        );
        Ok(entry)
    }

    /// Removes a file, or a directory subtree when `recursive`.
    ///
    /// Returns the number of removed entries.
    pub fn remove(&self, path: &str, recursive: bool) -> Result<usize, FsError> {
        let path = parse_entry_path(path)?;
        let removed = self.repo.atomic(|repo| {
            let entry = require_entry(repo, self.project_id, &path)?;
            if entry.kind == EntryKind::Dir && !recursive {
                if repo.count_descendants(self.project_id, &path)? > 0 {
                    return Err(FsError::NotEmpty(path.clone()));
                }
                return Err(FsError::IsDirectory(path.clone()));
            }
            let removed =
                repo.delete_subtree(self.project_id, &path, entry.kind == EntryKind::Dir)?;
            Ok(removed)
        })?;
        info!("event=fs_remove module=fs status=ok recursive={recursive} removed={removed}");
        Ok(removed)
    }

    /// Materializes every entry with its tags and lines, ordered by path.
    pub fn export(&self) -> Result<Vec<ExportedEntry>, FsError> {
        let exported = self.repo.atomic(|repo| {
            let entries = repo.list_subtree(self.project_id, &VirtualPath::root())?;
            let mut exported = Vec::with_capacity(entries.len());
            for entry in entries {
                let tags = repo.list_tags(self.project_id, &entry.path)?;
                let lines = match entry.kind {
                    EntryKind::File => repo.read_lines(self.project_id, &entry.path)?,
                    EntryKind::Dir => Vec::new(),
                };
                exported.push(ExportedEntry {
                    path: entry.path,
                    kind: entry.kind,
                    note: entry.note,
                    control: entry.control,
                    tags,
                    lines,
                });
            }
            Ok::<_, FsError>(exported)
        })?;
        debug!(
            "event=fs_export module=fs status=ok entries={}",
            exported.len()
        );
        Ok(exported)
    }

    fn require_kind(&self, path: &VirtualPath, kind: EntryKind) -> Result<Entry, FsError> {
        require_kind(&self.repo, self.project_id, path, kind)
    }
}

/// Keeps entries whose parent is exactly `base`.
pub fn immediate_children(base: &VirtualPath, entries: Vec<Entry>) -> Vec<Entry> {
    entries
        .into_iter()
        .filter(|entry| entry.path.parent().as_ref() == Some(base))
        .collect()
}

fn parse_entry_path(raw: &str) -> Result<VirtualPath, FsError> {
    let path = VirtualPath::parse(raw)?;
    if path.is_root() {
        return Err(PathError::Root.into());
    }
    Ok(path)
}

fn create_directory_chain<R: StoreRepository>(
    repo: &R,
    project_id: ProjectId,
    path: &VirtualPath,
) -> Result<Entry, FsError> {
    let mut last = None;
    for prefix in path.ancestors() {
        let entry = repo.upsert_entry(project_id, &prefix, EntryKind::Dir)?;
        if entry.kind != EntryKind::Dir {
            return Err(FsError::TypeConflict {
                path: prefix,
                existing: entry.kind,
            });
        }
        last = Some(entry);
    }
    last.ok_or_else(|| FsError::NotFound(path.clone()))
}

fn apply_entry_annotation<R: StoreRepository>(
    repo: &R,
    project_id: ProjectId,
    path: &VirtualPath,
    annotation: &Annotation,
) -> Result<(), FsError> {
    if annotation.has_text() {
        repo.update_entry_metadata(
            project_id,
            path,
            annotation.note.as_deref(),
            annotation.control.as_deref(),
        )?;
    }
    if !annotation.tags.is_empty() {
        repo.attach_tags(project_id, path, &annotation.tags)?;
    }
    Ok(())
}

fn require_entry<R: StoreRepository>(
    repo: &R,
    project_id: ProjectId,
    path: &VirtualPath,
) -> Result<Entry, FsError> {
    repo.get_entry(project_id, path)?
        .ok_or_else(|| FsError::NotFound(path.clone()))
}

fn require_kind<R: StoreRepository>(
    repo: &R,
    project_id: ProjectId,
    path: &VirtualPath,
    kind: EntryKind,
) -> Result<Entry, FsError> {
    let entry = require_entry(repo, project_id, path)?;
    if entry.kind != kind {
        return Err(FsError::KindMismatch {
            path: path.clone(),
            expected: kind,
        });
    }
    Ok(entry)
}

fn reload<R: StoreRepository>(
    repo: &R,
    project_id: ProjectId,
    path: &VirtualPath,
) -> Result<Entry, FsError> {
    require_entry(repo, project_id, path)
}
