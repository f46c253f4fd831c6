//! Entry/line/tag store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Own every SQL statement issued against a project store.
//! - Expose path-addressed primitives scoped by `ProjectId`.
//! - Make every multi-statement primitive atomic.
//!
//! # Invariants
//! - Subtree = exact path plus the half-open range `[X/, X0)`; `'0'` is the
//!   code point right after `'/'`, so the range covers exactly `X/...`.
//! - Creation primitives skip only uniqueness conflicts (`ON CONFLICT ... DO
//!   NOTHING`). Every other constraint failure surfaces as `StoreError::Db`.
//! - Timestamp columns are declared `INTEGER` (epoch milliseconds).
//! - Line listing is deterministic: `lineno ASC`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::entry::{Entry, EntryId, EntryKind, Line, Project, ProjectId};
use crate::parse::path::VirtualPath;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const ENTRY_COLUMNS: &str = "id, project_id, path, name, type, note, aicom, created_at";

/// Result type used by store adapter operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store adapter operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target path has no entry of the required kind.
    EntryNotFound(VirtualPath),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Column exists with a declared type this binary cannot read.
    InvalidColumnType {
        table: &'static str,
        column: &'static str,
        declared: String,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::EntryNotFound(path) => write!(f, "entry not found: {path}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "store requires table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "store requires column `{column}` in table `{table}`")
            }
            Self::InvalidColumnType {
                table,
                column,
                declared,
            } => write!(
                f,
                "store column `{table}.{column}` is declared `{declared}`, expected `INTEGER`"
            ),
            Self::InvalidData(message) => write!(f, "invalid store data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the relational virtual filesystem.
pub trait StoreRepository {
    /// Runs `f` inside one transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Nested calls join
    /// the outer transaction.
    fn atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>;

    /// Inserts the project row for `root` if absent and returns its id.
    fn ensure_project(&self, root: &str) -> StoreResult<ProjectId>;
    /// Loads one project by id.
    fn get_project(&self, project_id: ProjectId) -> StoreResult<Option<Project>>;

    /// Inserts an entry if the path is free and returns the stored row.
    ///
    /// The returned kind may differ from `kind` when the path was taken.
    fn upsert_entry(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        kind: EntryKind,
    ) -> StoreResult<Entry>;
    /// Loads one entry by exact path.
    fn get_entry(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Option<Entry>>;
    /// Lists `path` itself plus every entry below it, ordered by path.
    fn list_subtree(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<Entry>>;
    /// Counts entries strictly below `path`.
    fn count_descendants(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<u64>;
    /// Overwrites note/control fields; `None` keeps the stored value.
    fn update_entry_metadata(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        note: Option<&str>,
        control: Option<&str>,
    ) -> StoreResult<()>;
    /// Attaches labels not already present on the entry. Returns inserted count.
    fn attach_tags(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        tags: &[String],
    ) -> StoreResult<usize>;
    /// Lists labels attached to one entry, sorted.
    fn list_tags(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<String>>;

    /// Appends one line after the current maximum line number.
    fn append_line(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        content: &str,
    ) -> StoreResult<u32>;
    /// Inserts a line at `line_no` unless one exists. Returns whether it inserted.
    fn insert_line(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        line_no: u32,
        content: &str,
    ) -> StoreResult<bool>;
    /// Loads every line of one file in ascending order.
    fn read_lines(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<Line>>;
    /// Ensures line `line_no` exists (empty if new), then overwrites its
    /// note/control fields; `None` keeps the stored value.
    fn set_line_metadata(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        line_no: u32,
        note: Option<&str>,
        control: Option<&str>,
    ) -> StoreResult<()>;

    /// Rewrites `old` and every path below it to live under `new`.
    fn rename_subtree(
        &self,
        project_id: ProjectId,
        old: &VirtualPath,
        new: &VirtualPath,
    ) -> StoreResult<usize>;
    /// Deletes `path` (and its subtree when `recursive`) with lines and tags.
    fn delete_subtree(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        recursive: bool,
    ) -> StoreResult<usize>;
}

/// SQLite-backed store repository.
pub struct SqliteStoreRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStoreRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl StoreRepository for SqliteStoreRepository<'_> {
    fn atomic<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn ensure_project(&self, root: &str) -> StoreResult<ProjectId> {
        self.conn.execute(
            "INSERT INTO projects (root) VALUES (?1) ON CONFLICT (root) DO NOTHING;",
            [root],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM projects WHERE root = ?1;",
            [root],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_project(&self, project_id: ProjectId) -> StoreResult<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, root, created_at FROM projects WHERE id = ?1;",
                [project_id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        root: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    fn upsert_entry(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        kind: EntryKind,
    ) -> StoreResult<Entry> {
        if path.is_root() {
            return Err(StoreError::InvalidData(
                "the root path cannot be stored as an entry".to_string(),
            ));
        }
        self.conn.execute(
            "INSERT INTO files (project_id, path, name, type)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (project_id, path) DO NOTHING;",
            params![project_id, path.as_str(), path.name(), kind.as_str()],
        )?;
        load_entry(self.conn, project_id, path)?
            .ok_or_else(|| StoreError::EntryNotFound(path.clone()))
    }

    fn get_entry(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Option<Entry>> {
        load_entry(self.conn, project_id, path)
    }

    fn list_subtree(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<Entry>> {
        let mut items = Vec::new();
        if path.is_root() {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM files
                 WHERE project_id = ?1
                 ORDER BY path ASC;"
            ))?;
            let mut rows = stmt.query([project_id])?;
            while let Some(row) = rows.next()? {
                items.push(parse_entry_row(row)?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM files
                 WHERE project_id = ?1
                   AND (path = ?2 OR (path >= ?2 || '/' AND path < ?2 || '0'))
                 ORDER BY path ASC;"
            ))?;
            let mut rows = stmt.query(params![project_id, path.as_str()])?;
            while let Some(row) = rows.next()? {
                items.push(parse_entry_row(row)?);
            }
        }
        Ok(items)
    }

    fn count_descendants(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<u64> {
        let count: i64 = if path.is_root() {
            self.conn.query_row(
                "SELECT COUNT(*) FROM files WHERE project_id = ?1;",
                [project_id],
                |row| row.get(0),
            )?
        } else {
            self.conn.query_row(
                "SELECT COUNT(*)
                 FROM files
                 WHERE project_id = ?1
                   AND path >= ?2 || '/'
                   AND path < ?2 || '0';",
                params![project_id, path.as_str()],
                |row| row.get(0),
            )?
        };
        u64::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative entry count `{count}`")))
    }

    fn update_entry_metadata(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        note: Option<&str>,
        control: Option<&str>,
    ) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE files
             SET note = COALESCE(?3, note),
                 aicom = COALESCE(?4, aicom)
             WHERE project_id = ?1
               AND path = ?2;",
            params![project_id, path.as_str(), note, control],
        )?;
        if changed == 0 {
            return Err(StoreError::EntryNotFound(path.clone()));
        }
        Ok(())
    }

    fn attach_tags(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        tags: &[String],
    ) -> StoreResult<usize> {
        self.atomic(|repo| {
            let file_id = require_entry_id(repo.conn, project_id, path, None)?;
            let mut inserted = 0;
            for tag in tags {
                inserted += repo.conn.execute(
                    "INSERT INTO file_tags (file_id, tag)
                     SELECT ?1, ?2
                     WHERE NOT EXISTS (
                        SELECT 1 FROM file_tags WHERE file_id = ?1 AND tag = ?2
                     );",
                    params![file_id, tag.as_str()],
                )?;
            }
            Ok(inserted)
        })
    }

    fn list_tags(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.tag
             FROM file_tags t
             INNER JOIN files f ON f.id = t.file_id
             WHERE f.project_id = ?1
               AND f.path = ?2
             ORDER BY t.tag ASC;",
        )?;
        let mut rows = stmt.query(params![project_id, path.as_str()])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(row.get(0)?);
        }
        Ok(tags)
    }

    fn append_line(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        content: &str,
    ) -> StoreResult<u32> {
        self.atomic(|repo| {
            let file_id = require_entry_id(repo.conn, project_id, path, Some(EntryKind::File))?;
            let line_no: u32 = repo.conn.query_row(
                "SELECT COALESCE(MAX(lineno), 0) + 1 FROM file_lines WHERE file_id = ?1;",
                [file_id],
                |row| row.get(0),
            )?;
            repo.conn.execute(
                "INSERT INTO file_lines (file_id, lineno, content) VALUES (?1, ?2, ?3);",
                params![file_id, line_no, content],
            )?;
            Ok(line_no)
        })
    }

    fn insert_line(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        line_no: u32,
        content: &str,
    ) -> StoreResult<bool> {
        let file_id = require_entry_id(self.conn, project_id, path, Some(EntryKind::File))?;
        let inserted = self.conn.execute(
            "INSERT INTO file_lines (file_id, lineno, content) VALUES (?1, ?2, ?3)
             ON CONFLICT (file_id, lineno) DO NOTHING;",
            params![file_id, line_no, content],
        )?;
        Ok(inserted == 1)
    }

    fn read_lines(&self, project_id: ProjectId, path: &VirtualPath) -> StoreResult<Vec<Line>> {
        let file_id = require_entry_id(self.conn, project_id, path, Some(EntryKind::File))?;
        let mut stmt = self.conn.prepare(
            "SELECT lineno, content, side, aicom
             FROM file_lines
             WHERE file_id = ?1
             ORDER BY lineno ASC;",
        )?;
        let mut rows = stmt.query([file_id])?;
        let mut lines = Vec::new();
        while let Some(row) = rows.next()? {
            lines.push(Line {
                line_no: row.get("lineno")?,
                content: row.get("content")?,
                note: row.get("side")?,
                control: row.get("aicom")?,
            });
        }
        Ok(lines)
    }

    fn set_line_metadata(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        line_no: u32,
        note: Option<&str>,
        control: Option<&str>,
    ) -> StoreResult<()> {
        self.atomic(|repo| {
            let file_id = require_entry_id(repo.conn, project_id, path, Some(EntryKind::File))?;
            repo.conn.execute(
                "INSERT INTO file_lines (file_id, lineno, content) VALUES (?1, ?2, '')
                 ON CONFLICT (file_id, lineno) DO NOTHING;",
                params![file_id, line_no],
            )?;
            repo.conn.execute(
                "UPDATE file_lines
                 SET side = COALESCE(?3, side),
                     aicom = COALESCE(?4, aicom)
                 WHERE file_id = ?1
                   AND lineno = ?2;",
                params![file_id, line_no, note, control],
            )?;
            Ok(())
        })
    }

    fn rename_subtree(
        &self,
        project_id: ProjectId,
        old: &VirtualPath,
        new: &VirtualPath,
    ) -> StoreResult<usize> {
        if old.is_root() || new.is_root() {
            return Err(StoreError::InvalidData(
                "the root path cannot be renamed".to_string(),
            ));
        }
        self.atomic(|repo| {
            let changed = repo.conn.execute(
                "UPDATE files
                 SET path = ?3 || substr(path, length(?2) + 1),
                     name = CASE WHEN path = ?2 THEN ?4 ELSE name END
                 WHERE project_id = ?1
                   AND (path = ?2 OR (path >= ?2 || '/' AND path < ?2 || '0'));",
                params![project_id, old.as_str(), new.as_str(), new.name()],
            )?;
            if changed == 0 {
                return Err(StoreError::EntryNotFound(old.clone()));
            }
            Ok(changed)
        })
    }

    fn delete_subtree(
        &self,
        project_id: ProjectId,
        path: &VirtualPath,
        recursive: bool,
    ) -> StoreResult<usize> {
        if path.is_root() {
            return Err(StoreError::InvalidData(
                "the root path cannot be deleted".to_string(),
            ));
        }
        let scope = if recursive {
            "project_id = ?1 AND (path = ?2 OR (path >= ?2 || '/' AND path < ?2 || '0'))"
        } else {
            "project_id = ?1 AND path = ?2"
        };
        self.atomic(|repo| {
            repo.conn.execute(
                &format!(
                    "DELETE FROM file_lines WHERE file_id IN (SELECT id FROM files WHERE {scope});"
                ),
                params![project_id, path.as_str()],
            )?;
            repo.conn.execute(
                &format!(
                    "DELETE FROM file_tags WHERE file_id IN (SELECT id FROM files WHERE {scope});"
                ),
                params![project_id, path.as_str()],
            )?;
            let deleted = repo.conn.execute(
                &format!("DELETE FROM files WHERE {scope};"),
                params![project_id, path.as_str()],
            )?;
            if deleted == 0 {
                return Err(StoreError::EntryNotFound(path.clone()));
            }
            Ok(deleted)
        })
    }
}

fn load_entry(
    conn: &Connection,
    project_id: ProjectId,
    path: &VirtualPath,
) -> StoreResult<Option<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS}
         FROM files
         WHERE project_id = ?1
           AND path = ?2;"
    ))?;
    let mut rows = stmt.query(params![project_id, path.as_str()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_entry_row(row)?));
    }
    Ok(None)
}

fn require_entry_id(
    conn: &Connection,
    project_id: ProjectId,
    path: &VirtualPath,
    kind: Option<EntryKind>,
) -> StoreResult<EntryId> {
    let found: Option<(EntryId, String)> = conn
        .query_row(
            "SELECT id, type FROM files WHERE project_id = ?1 AND path = ?2;",
            params![project_id, path.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match (found, kind) {
        (None, _) => Err(StoreError::EntryNotFound(path.clone())),
        (Some((id, _)), None) => Ok(id),
        (Some((id, stored)), Some(expected)) if stored == expected.as_str() => Ok(id),
        (Some(_), Some(_)) => Err(StoreError::EntryNotFound(path.clone())),
    }
}

fn parse_entry_row(row: &Row<'_>) -> StoreResult<Entry> {
    let kind_text: String = row.get("type")?;
    let kind = EntryKind::from_column(&kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid entry kind `{kind_text}` in files.type"))
    })?;

    let path_text: String = row.get("path")?;
    let path = VirtualPath::parse(&path_text)
        .map_err(|err| StoreError::InvalidData(format!("invalid path in files.path: {err}")))?;
    if path.as_str() != path_text || path.is_root() {
        return Err(StoreError::InvalidData(format!(
            "non-normalized path `{path_text}` in files.path"
        )));
    }

    Ok(Entry {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        path,
        name: row.get("name")?,
        kind,
        note: row.get("note")?,
        control: row.get("aicom")?,
        created_at: row.get("created_at")?,
    })
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = crate::db::migrations::current_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let required: [(&'static str, &[&'static str]); 4] = [
        ("projects", &["id", "root", "created_at"]),
        (
            "files",
            &[
                "id",
                "project_id",
                "path",
                "name",
                "type",
                "note",
                "aicom",
                "created_at",
            ],
        ),
        ("file_tags", &["id", "file_id", "tag"]),
        (
            "file_lines",
            &["id", "file_id", "lineno", "content", "side", "aicom"],
        ),
    ];

    for (table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for &column in columns {
            if column_type(conn, table, column)?.is_none() {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }

    for table in ["projects", "files"] {
        let declared = column_type(conn, table, "created_at")?.unwrap_or_default();
        if !declared.eq_ignore_ascii_case("INTEGER") {
            return Err(StoreError::InvalidColumnType {
                table,
                column: "created_at",
                declared,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Declared type of `table.column`, or `None` when the column is absent.
fn column_type(conn: &Connection, table: &str, column: &str) -> StoreResult<Option<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(Some(row.get(2)?));
        }
    }
    Ok(None)
}
