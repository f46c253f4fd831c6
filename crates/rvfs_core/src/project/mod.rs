//! Project bundles and store binding.
//!
//! # Responsibility
//! - Resolve a project name to its backing store file.
//! - Create new `NAME.aiosproj/` bundles with metadata and a migrated store.
//! - Bind an opened store to its single `projects` row.
//!
//! # Invariants
//! - The project key is the canonicalized bundle directory (or the parent
//!   directory of a legacy `NAME.sqlite` store), rendered as a string.
//! - Moving, renaming, or unpacking a bundle elsewhere changes its key. The
//!   next session binds a fresh, empty `projects` row. Rows stored under the
//!   old key stay in the file but are no longer listed.
//! - Name resolution is deterministic: search dirs in order, bundle before
//!   legacy store within each dir.

use crate::db::{open_db, DbError};
use crate::repo::store_repo::{SqliteStoreRepository, StoreError};
use crate::service::fs_service::{FsError, FsService};
use log::{error, info};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix of a bundle directory.
pub const BUNDLE_SUFFIX: &str = ".aiosproj";
/// Store file name inside a bundle.
pub const BUNDLE_STORE_FILE: &str = "project.sqlite";
/// Metadata file name inside a bundle.
pub const BUNDLE_META_FILE: &str = "meta.json";
/// Resource directory name inside a bundle.
pub const BUNDLE_RC_DIR: &str = "rc";
/// Suffix of a legacy single-file store.
pub const LEGACY_STORE_SUFFIX: &str = ".sqlite";
/// Current `meta.json` format version.
pub const META_VERSION: u32 = 1;

/// Errors from project lifecycle operations.
#[derive(Debug)]
pub enum ProjectError {
    InvalidName(String),
    AlreadyExists { name: String, store: PathBuf },
    NotFound(String),
    Io { path: PathBuf, source: std::io::Error },
    Metadata(serde_json::Error),
    Db(DbError),
    Fs(FsError),
}

impl Display for ProjectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid project name `{name}`"),
            Self::AlreadyExists { name, store } => {
                write!(f, "project already exists: {name} ({})", store.display())
            }
            Self::NotFound(name) => write!(f, "project not found: {name}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Metadata(err) => write!(f, "project metadata error: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Fs(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProjectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Metadata(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Fs(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ProjectError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<FsError> for ProjectError {
    fn from(value: FsError) -> Self {
        Self::Fs(value)
    }
}

impl From<StoreError> for ProjectError {
    fn from(value: StoreError) -> Self {
        Self::Fs(FsError::from(value))
    }
}

impl From<serde_json::Error> for ProjectError {
    fn from(value: serde_json::Error) -> Self {
        Self::Metadata(value)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProjectError + '_ {
    move |source| ProjectError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub name: String,
    /// Epoch ms creation timestamp.
    pub created_at: u64,
    pub version: u32,
}

/// Located project store and the root it binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBundle {
    /// Bundle directory, or the directory containing a legacy store.
    pub root: PathBuf,
    /// SQLite store file.
    pub store_path: PathBuf,
    /// `true` for a bare `NAME.sqlite` outside any bundle.
    pub legacy: bool,
}

impl ProjectBundle {
    /// Derives the bundle layout from a store file path.
    pub fn from_store_path(store_path: impl Into<PathBuf>) -> Self {
        let store_path = store_path.into();
        let parent = store_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let legacy = store_path.file_name().and_then(|name| name.to_str())
            != Some(BUNDLE_STORE_FILE);
        Self {
            root: parent,
            store_path,
            legacy,
        }
    }

    /// Project key stored in `projects.root`.
    ///
    /// Path-derived, so a bundle opened from a new location gets a new key.
    pub fn root_key(&self) -> String {
        std::fs::canonicalize(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .to_string_lossy()
            .into_owned()
    }

    /// Reads `meta.json`; legacy stores have none.
    pub fn read_meta(&self) -> Result<Option<ProjectMeta>, ProjectError> {
        if self.legacy {
            return Ok(None);
        }
        let path = self.root.join(BUNDLE_META_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ProjectError::Io { path, source }),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }
}

/// Ordered set of directories searched for project stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLocator {
    pub search_dirs: Vec<PathBuf>,
}

impl ProjectLocator {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    /// Working directory first, then `projects_home`.
    pub fn from_cwd(projects_home: impl Into<PathBuf>) -> Result<Self, ProjectError> {
        let cwd = std::env::current_dir().map_err(io_error(Path::new(".")))?;
        Ok(Self::new(vec![cwd, projects_home.into()]))
    }

    /// Finds the store for `name`, checking each search dir for a bundle
    /// and then a legacy store.
    pub fn resolve(&self, name: &str) -> Option<ProjectBundle> {
        if validate_name(name).is_err() {
            return None;
        }
        self.search_dirs.iter().find_map(|dir| {
            let bundle_store = dir
                .join(format!("{name}{BUNDLE_SUFFIX}"))
                .join(BUNDLE_STORE_FILE);
            if bundle_store.is_file() {
                return Some(ProjectBundle::from_store_path(bundle_store));
            }
            let legacy_store = dir.join(format!("{name}{LEGACY_STORE_SUFFIX}"));
            legacy_store
                .is_file()
                .then(|| ProjectBundle::from_store_path(legacy_store))
        })
    }

    /// Like [`Self::resolve`] but reports a missing project as an error.
    pub fn require(&self, name: &str) -> Result<ProjectBundle, ProjectError> {
        validate_name(name)?;
        self.resolve(name)
            .ok_or_else(|| ProjectError::NotFound(name.to_string()))
    }

    /// Lists project names visible in the search dirs, first match wins.
    pub fn list(&self) -> Vec<(String, ProjectBundle)> {
        let mut found: Vec<(String, ProjectBundle)> = Vec::new();
        for dir in &self.search_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter_map(|file_name| {
                    file_name
                        .strip_suffix(BUNDLE_SUFFIX)
                        .or_else(|| file_name.strip_suffix(LEGACY_STORE_SUFFIX))
                        .map(str::to_string)
                })
                .collect();
            names.sort();
            names.dedup();
            for name in names {
                if found.iter().any(|(known, _)| *known == name) {
                    continue;
                }
                if let Some(bundle) = self.resolve(&name) {
                    found.push((name, bundle));
                }
            }
        }
        found
    }

    /// Creates a bundle for `name` under `base_dir`.
    ///
    /// Fails when `name` already resolves through this locator.
    pub fn init(&self, name: &str, base_dir: &Path) -> Result<ProjectBundle, ProjectError> {
        validate_name(name)?;
        if let Some(existing) = self.resolve(name) {
            return Err(ProjectError::AlreadyExists {
                name: name.to_string(),
                store: existing.store_path,
            });
        }
        create_bundle(name, base_dir)
    }
}

/// Creates a bundle for `name` directly under `base_dir`.
pub fn init_project(name: &str, base_dir: &Path) -> Result<ProjectBundle, ProjectError> {
    ProjectLocator::new(vec![base_dir.to_path_buf()]).init(name, base_dir)
}

fn create_bundle(name: &str, base_dir: &Path) -> Result<ProjectBundle, ProjectError> {
    let root = base_dir.join(format!("{name}{BUNDLE_SUFFIX}"));
    let rc_dir = root.join(BUNDLE_RC_DIR);
    std::fs::create_dir_all(&rc_dir).map_err(io_error(&rc_dir))?;

    let meta = ProjectMeta {
        name: name.to_string(),
        created_at: now_epoch_ms(),
        version: META_VERSION,
    };
    let meta_path = root.join(BUNDLE_META_FILE);
    let mut body = serde_json::to_string_pretty(&meta)?;
    body.push('\n');
    std::fs::write(&meta_path, body).map_err(io_error(&meta_path))?;

    let bundle = ProjectBundle::from_store_path(root.join(BUNDLE_STORE_FILE));
    let conn = open_db(&bundle.store_path).inspect_err(|err| {
        error!("event=project_init module=project status=error error={err}");
    })?;
    FsService::bind(SqliteStoreRepository::try_new(&conn)?, &bundle.root_key())?;

    info!("event=project_init module=project status=ok version={META_VERSION}");
    Ok(bundle)
}

/// Opened store plus the bundle it came from.
pub struct ProjectSession {
    bundle: ProjectBundle,
    conn: Connection,
}

/// Opens the bundle's store with migrations applied.
pub fn open_project(bundle: ProjectBundle) -> Result<ProjectSession, ProjectError> {
    let conn = open_db(&bundle.store_path)?;
    info!(
        "event=project_open module=project status=ok legacy={}",
        bundle.legacy
    );
    Ok(ProjectSession { bundle, conn })
}

impl ProjectSession {
    pub fn bundle(&self) -> &ProjectBundle {
        &self.bundle
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Binds a filesystem service to this bundle's project row.
    ///
    /// Creates the row on first use; safe to call repeatedly.
    pub fn fs(&self) -> Result<FsService<SqliteStoreRepository<'_>>, ProjectError> {
        let repo = SqliteStoreRepository::try_new(&self.conn)?;
        Ok(FsService::bind(repo, &self.bundle.root_key())?)
    }
}

/// Accepts ASCII letters, digits, `-`, `_`, and `.`; no leading dot.
pub fn validate_name(name: &str) -> Result<(), ProjectError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProjectError::InvalidName(name.to_string()))
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
