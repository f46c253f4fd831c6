//! `rvfs` command-line front end.
//!
//! # Responsibility
//! - Map subcommands onto `rvfs_core` operations.
//! - Select the project store explicitly; `HEIMDAL_PROJECT_DB` is read here
//!   and nowhere else.

use clap::{Args, Parser, Subcommand};
use log::{error, warn};
use rvfs_core::service::fs_service::immediate_children;
use rvfs_core::{
    init_logging, open_project, Annotation, DbError, Entry, FsService, ProjectBundle,
    ProjectLocator, RvfsConfig, SqliteStoreRepository, VirtualPath,
};
use std::error::Error;
use std::path::PathBuf;

const STORE_ENV: &str = "HEIMDAL_PROJECT_DB";

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "rvfs", version, about = "Relational virtual filesystem")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Store file to operate on.
    #[arg(long, global = true, conflicts_with = "project")]
    db: Option<PathBuf>,
    /// Project name resolved from the working directory, then the projects home.
    #[arg(long, global = true)]
    project: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a `NAME.aiosproj` bundle.
    Init {
        name: String,
        /// Directory to create the bundle in (default: working directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show where a project lives, or list visible projects.
    Where { name: Option<String> },
    /// Create a directory and its parents.
    Mkdir {
        path: String,
        /// Metadata clause: `// note`, `@@tag1,tag2`, or `::control::`.
        meta: Vec<String>,
    },
    /// Create a file and its parents.
    Newfile {
        path: String,
        /// Initial first line.
        #[arg(long)]
        content: Option<String>,
        meta: Vec<String>,
    },
    /// List entries under a path.
    Ls {
        path: Option<String>,
        /// Include the whole subtree.
        #[arg(short = 'R', long)]
        recursive: bool,
    },
    /// Print file content.
    Cat {
        path: String,
        /// Prefix each line with its number.
        #[arg(short = 'n', long)]
        number: bool,
    },
    /// Append one line to a file.
    Append {
        path: String,
        #[arg(long)]
        text: String,
    },
    /// Set note, tags, or control text on an entry or one line.
    Annotate {
        path: String,
        #[arg(long)]
        line: Option<u32>,
        meta: Vec<String>,
    },
    /// Move or rename a file or directory.
    Mv { src: String, dst: String },
    /// Remove a file, or a directory with `-r`.
    Rm {
        #[arg(short = 'r', long)]
        recursive: bool,
        path: String,
    },
    /// Print one entry with its tags as JSON.
    Stat { path: String },
    /// Dump every entry with tags and lines as JSON.
    Export {
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = match RvfsConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rvfs: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = init_logging(&config.log_level, &config.log_dir) {
        eprintln!("rvfs: logging disabled: {err}");
    }

    if let Err(err) = run(cli, &config) {
        let busy = store_busy(&*err);
        error!("event=cli_command module=cli status=error busy={busy}");
        eprintln!("rvfs: {err}");
        if busy {
            eprintln!("rvfs: the store is locked by another process; retry once it finishes");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: &RvfsConfig) -> CliResult<()> {
    let locator = ProjectLocator::from_cwd(&config.projects_home)?;
    match cli.command {
        Command::Init { name, dir } => {
            let base_dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let bundle = locator.init(&name, &base_dir)?;
            println!("created bundle: {}", bundle.root.display());
            println!("db: {}", bundle.store_path.display());
            Ok(())
        }
        Command::Where { name: Some(name) } => {
            let bundle = locator.require(&name)?;
            println!("project: {name}");
            if !bundle.legacy {
                println!("dir: {}", bundle.root.display());
            }
            println!("db: {}", bundle.store_path.display());
            Ok(())
        }
        Command::Where { name: None } => {
            for (name, bundle) in locator.list() {
                println!("- {name}\t{}", bundle.store_path.display());
            }
            Ok(())
        }
        command => {
            let bundle = select_store(&cli.store, &locator)?;
            let session = open_project(bundle)?;
            let fs = session.fs()?;
            run_fs(&fs, command)
        }
    }
}

fn select_store(store: &StoreArgs, locator: &ProjectLocator) -> CliResult<ProjectBundle> {
    if let Some(db) = &store.db {
        return Ok(ProjectBundle::from_store_path(db));
    }
    if let Some(name) = &store.project {
        return Ok(locator.require(name)?);
    }
    match std::env::var_os(STORE_ENV) {
        Some(db) if !db.is_empty() => Ok(ProjectBundle::from_store_path(PathBuf::from(db))),
        _ => {
            warn!("event=store_select module=cli status=error reason=no_store");
            Err(format!("no project selected: pass --db or --project, or set {STORE_ENV}").into())
        }
    }
}

fn run_fs(fs: &FsService<SqliteStoreRepository<'_>>, command: Command) -> CliResult<()> {
    match command {
        Command::Mkdir { path, meta } => {
            fs.make_directory(&path, &parse_meta(&meta))?;
            println!("ok");
        }
        Command::Newfile {
            path,
            content,
            meta,
        } => {
            fs.new_file(&path, content.as_deref(), &parse_meta(&meta))?;
            println!("ok");
        }
        Command::Ls { path, recursive } => {
            let base = VirtualPath::parse(path.as_deref().unwrap_or_default())?;
            let entries = fs.list(base.as_str())?;
            let targets_file = entries
                .first()
                .is_some_and(|first| first.path == base && first.is_file());
            let shown = if targets_file {
                entries
            } else if recursive {
                entries
                    .into_iter()
                    .filter(|entry| entry.path != base)
                    .collect()
            } else {
                immediate_children(&base, entries)
            };
            for entry in &shown {
                println!("{}", render_entry(entry));
            }
        }
        Command::Cat { path, number } => {
            for line in fs.read(&path)? {
                if number {
                    println!("{:>4}  {}", line.line_no, line.content);
                } else {
                    println!("{}", line.content);
                }
            }
        }
        Command::Append { path, text } => {
            fs.append(&path, &text)?;
            println!("ok");
        }
        Command::Annotate { path, line, meta } => {
            let annotation = parse_meta(&meta);
            if annotation.is_empty() {
                return Err(
                    "nothing to annotate: expected `// note`, `@@tags`, or `::control::`".into(),
                );
            }
            fs.annotate(&path, line, &annotation)?;
            println!("ok");
        }
        Command::Mv { src, dst } => {
            fs.move_entry(&src, &dst)?;
            println!("ok");
        }
        Command::Rm { recursive, path } => {
            fs.remove(&path, recursive)?;
            println!("ok");
        }
        Command::Stat { path } => {
            println!("{}", serde_json::to_string_pretty(&fs.stat(&path)?)?);
        }
        Command::Export { out } => {
            let body = serde_json::to_string_pretty(&fs.export()?)?;
            match out {
                Some(out) => {
                    std::fs::write(&out, body + "\n")?;
                    println!("ok");
                }
                None => println!("{body}"),
            }
        }
        Command::Init { .. } | Command::Where { .. } => {}
    }
    Ok(())
}

/// True when any error in the chain is SQLite giving up on a held lock.
fn store_busy(err: &(dyn Error + 'static)) -> bool {
    std::iter::successors(Some(err), |&err| err.source())
        .any(|err| err.downcast_ref::<DbError>().is_some_and(DbError::is_busy))
}

fn parse_meta(words: &[String]) -> Annotation {
    Annotation::parse(&words.join(" "))
}

fn render_entry(entry: &Entry) -> String {
    let mut out = entry.path.to_string();
    if entry.is_dir() {
        out.push('/');
    }
    if let Some(note) = &entry.note {
        out.push_str("  // ");
        out.push_str(note);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{parse_meta, store_busy, Cli, CliResult, Command};
    use clap::{CommandFactory, Parser};
    use rusqlite::ffi;
    use rvfs_core::{DbError, FsError, StoreError};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn metadata_words_are_joined_before_parsing() {
        let words = vec!["//".to_string(), "keep".to_string(), "this".to_string()];
        assert_eq!(parse_meta(&words).note.as_deref(), Some("keep this"));
    }

    #[test]
    fn rm_accepts_recursive_flag_and_global_db() {
        let cli =
            Cli::try_parse_from(["rvfs", "rm", "-r", "docs", "--db", "/tmp/p.sqlite"]).unwrap();
        assert!(matches!(cli.command, Command::Rm { recursive: true, .. }));
        assert_eq!(cli.store.db.unwrap().to_str(), Some("/tmp/p.sqlite"));
    }

    #[test]
    fn busy_store_is_detected_through_wrapped_errors() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ));
        let wrapped: CliResult<()> = Err(FsError::Store(StoreError::Db(busy)).into());
        assert!(store_busy(&*wrapped.unwrap_err()));

        let other = FsError::Store(StoreError::InvalidData("x".to_string()));
        let other: CliResult<()> = Err(other.into());
        assert!(!store_busy(&*other.unwrap_err()));
    }
}
