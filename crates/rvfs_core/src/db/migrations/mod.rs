//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Every applied version is recorded in `schema_migrations`.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - Foreign keys are off while migrations run so tables can be rebuilt.
//!   The result must pass `PRAGMA foreign_key_check` before commit.

use crate::db::{DbError, DbResult};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_lookup_indexes.sql"),
    },
    Migration {
        version: 3,
        sql: include_str!("0003_rebuild_tables.sql"),
    },
];

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
);";

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_version(conn)?;
    let latest = latest_version();

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let outcome = run_pending(conn, current_version);
    let restored = conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"));
    outcome?;
    restored?;

    Ok(())
}

fn run_pending(conn: &mut Connection, current_version: u32) -> DbResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(VERSION_TABLE_SQL)?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1) ON CONFLICT (version) DO NOTHING;",
            params![migration.version],
        )?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }

    let violation: Option<String> = tx
        .query_row("PRAGMA foreign_key_check;", [], |row| row.get(0))
        .optional()?;
    if let Some(table) = violation {
        return Err(DbError::ForeignKeyViolation { table });
    }
    tx.commit()?;

    Ok(())
}

/// Returns the schema version recorded on this connection.
///
/// The higher of `PRAGMA user_version` and `MAX(schema_migrations.version)`
/// wins, so a store touched by a newer binary is never downgraded.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let user_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let has_table: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'schema_migrations'
        );",
        [],
        |row| row.get(0),
    )?;
    if has_table == 0 {
        return Ok(user_version);
    }

    let recorded: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations;",
        [],
        |row| row.get(0),
    )?;
    Ok(user_version.max(recorded))
}
