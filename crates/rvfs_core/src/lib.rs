//! Core of the relational virtual filesystem.
//!
//! A project's directories, files, lines, tags, and notes live as rows in one
//! SQLite store. Every operation goes through an explicit [`FsService`] bound
//! to a single project.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod parse;
pub mod project;
pub mod repo;
pub mod service;

pub use config::{ConfigError, RvfsConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entry::{
    Entry, EntryId, EntryKind, EntryStat, ExportedEntry, Line, Project, ProjectId,
};
pub use parse::annotation::Annotation;
pub use parse::path::{PathError, VirtualPath};
pub use project::{
    init_project, open_project, ProjectBundle, ProjectError, ProjectLocator, ProjectMeta,
    ProjectSession,
};
pub use repo::store_repo::{SqliteStoreRepository, StoreError, StoreRepository, StoreResult};
pub use service::fs_service::{FsError, FsService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
