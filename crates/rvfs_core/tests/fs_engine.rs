use rusqlite::Connection;
use rvfs_core::db::open_db_in_memory;
use rvfs_core::{
    Annotation, EntryKind, FsError, FsService, PathError, SqliteStoreRepository, StoreError,
    StoreRepository,
};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn bind<'conn>(conn: &'conn Connection, root: &str) -> FsService<SqliteStoreRepository<'conn>> {
    FsService::bind(SqliteStoreRepository::try_new(conn).unwrap(), root).unwrap()
}

fn paths(fs: &FsService<SqliteStoreRepository<'_>>, base: &str) -> Vec<String> {
    fs.list(base)
        .unwrap()
        .into_iter()
        .map(|entry| entry.path.as_str().to_string())
        .collect()
}

fn none() -> Annotation {
    Annotation::default()
}

#[test]
fn make_directory_twice_keeps_one_entry_per_segment() {
    let conn = setup();
    let fs = bind(&conn, "/work/demo.aiosproj");

    fs.make_directory("a/b/c", &none()).unwrap();
    fs.make_directory("/a/b/c/", &none()).unwrap();

    assert_eq!(paths(&fs, ""), vec!["a", "a/b", "a/b/c"]);
    for entry in fs.list("").unwrap() {
        assert_eq!(entry.kind, EntryKind::Dir);
    }
}

#[test]
fn every_prefix_of_a_new_file_is_a_directory() {
    let conn = setup();
    let fs = bind(&conn, "root");

    fs.new_file("src/core/lib.rs", None, &none()).unwrap();

    for prefix in ["src", "src/core"] {
        assert!(fs.stat(prefix).unwrap().entry.is_dir(), "{prefix}");
    }
    assert!(fs.stat("src/core/lib.rs").unwrap().entry.is_file());
}

#[test]
fn metadata_lands_on_deepest_directory_only() {
    let conn = setup();
    let fs = bind(&conn, "root");

    fs.make_directory("docs/api", &Annotation::parse("// public surface"))
        .unwrap();

    assert_eq!(fs.stat("docs").unwrap().entry.note, None);
    assert_eq!(
        fs.stat("docs/api").unwrap().entry.note.as_deref(),
        Some("public surface")
    );
}

#[test]
fn identical_paths_in_two_projects_are_distinct() {
    let conn = setup();
    let first = bind(&conn, "one");
    let second = bind(&conn, "two");

    first.new_file("f.txt", Some("first"), &none()).unwrap();
    second.new_file("f.txt", Some("second"), &none()).unwrap();

    assert_ne!(first.project_id(), second.project_id());
    assert_eq!(first.read_text("f.txt").unwrap(), "first");
    assert_eq!(second.read_text("f.txt").unwrap(), "second");
    second.remove("f.txt", false).unwrap();
    assert_eq!(paths(&first, ""), vec!["f.txt"]);
}

#[test]
fn file_content_round_trips_through_append() {
    let conn = setup();
    let fs = bind(&conn, "root");

    fs.new_file("f.txt", Some("x"), &none()).unwrap();
    assert_eq!(fs.read_text("f.txt").unwrap(), "x");

    assert_eq!(fs.append("f.txt", "y").unwrap(), 2);
    let contents: Vec<String> = fs
        .read("f.txt")
        .unwrap()
        .into_iter()
        .map(|line| line.content)
        .collect();
    assert_eq!(contents, vec!["x", "y"]);
}

#[test]
fn recreating_file_keeps_content_and_updates_metadata() {
    let conn = setup();
    let fs = bind(&conn, "root");

    fs.new_file("f.txt", Some("original"), &none()).unwrap();
    fs.new_file("f.txt", Some("ignored"), &Annotation::parse("@@draft"))
        .unwrap();

    assert_eq!(fs.read_text("f.txt").unwrap(), "original");
    assert_eq!(fs.stat("f.txt").unwrap().tags, vec!["draft"]);
}

#[test]
fn append_to_empty_file_starts_at_line_one() {
    let conn = setup();
    let fs = bind(&conn, "root");

    fs.new_file("empty.txt", None, &none()).unwrap();
    assert!(fs.read("empty.txt").unwrap().is_empty());
    assert_eq!(fs.append("empty.txt", "first").unwrap(), 1);
}

#[test]
fn recursive_move_rewrites_whole_subtree() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.make_directory("a", &none()).unwrap();
    fs.new_file("a/x", Some("kept"), &Annotation::parse("@@t")).unwrap();
    fs.new_file("a/y/z", None, &none()).unwrap();
    fs.make_directory("ab", &none()).unwrap();

    let moved = fs.move_entry("a", "b").unwrap();

    assert_eq!(moved.name, "b");
    assert_eq!(paths(&fs, ""), vec!["ab", "b", "b/x", "b/y", "b/y/z"]);
    assert_eq!(fs.read_text("b/x").unwrap(), "kept");
    assert_eq!(fs.stat("b/x").unwrap().tags, vec!["t"]);
    assert_eq!(fs.stat("b/y/z").unwrap().entry.name, "z");
}

#[test]
fn move_creates_missing_destination_parents() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("f.txt", None, &none()).unwrap();

    fs.move_entry("f.txt", "archive/2024/f.txt").unwrap();

    assert_eq!(
        paths(&fs, ""),
        vec!["archive", "archive/2024", "archive/2024/f.txt"]
    );
}

#[test]
fn failing_move_leaves_tree_intact() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("a/x", None, &none()).unwrap();
    fs.new_file("b", None, &none()).unwrap();
    let before = paths(&fs, "");

    assert!(matches!(
        fs.move_entry("a", "b").unwrap_err(),
        FsError::DestinationExists(_)
    ));
    assert!(matches!(
        fs.move_entry("a", "a/inner").unwrap_err(),
        FsError::InvalidMove { .. }
    ));
    assert!(matches!(
        fs.move_entry("a", "b/inner").unwrap_err(),
        FsError::TypeConflict { .. }
    ));
    assert!(matches!(
        fs.move_entry("missing", "c").unwrap_err(),
        FsError::NotFound(_)
    ));

    assert_eq!(paths(&fs, ""), before);
}

#[test]
fn move_onto_itself_is_noop() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("a/x", None, &none()).unwrap();

    fs.move_entry("a", "./a/").unwrap();

    assert_eq!(paths(&fs, ""), vec!["a", "a/x"]);
}

#[test]
fn recursive_remove_deletes_subtree_lines_and_tags() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("a/x", Some("line"), &Annotation::parse("@@t")).unwrap();
    fs.new_file("a/y/z", Some("line"), &none()).unwrap();
    fs.new_file("a-b", None, &none()).unwrap();

    assert_eq!(fs.remove("a", true).unwrap(), 4);

    assert_eq!(paths(&fs, ""), vec!["a-b"]);
    let orphans: i64 = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM file_lines) + (SELECT COUNT(*) FROM file_tags);",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn non_recursive_remove_guards_directories() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("full/f", None, &none()).unwrap();
    fs.make_directory("empty", &none()).unwrap();
    let before = paths(&fs, "");

    assert!(matches!(
        fs.remove("full", false).unwrap_err(),
        FsError::NotEmpty(_)
    ));
    assert!(matches!(
        fs.remove("empty", false).unwrap_err(),
        FsError::IsDirectory(_)
    ));
    assert_eq!(paths(&fs, ""), before);

    assert_eq!(fs.remove("full/f", false).unwrap(), 1);
    assert!(matches!(fs.remove("", true).unwrap_err(), FsError::InvalidPath(_)));
}

#[test]
fn line_targeted_note_touches_only_that_line() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("f", Some("one"), &none()).unwrap();
    fs.append("f", "two").unwrap();

    fs.annotate("f", Some(2), &Annotation::parse("// second line"))
        .unwrap();

    let lines = fs.read("f").unwrap();
    assert_eq!(lines[0].note, None);
    assert_eq!(lines[1].note.as_deref(), Some("second line"));
    assert_eq!(fs.stat("f").unwrap().entry.note, None);
}

#[test]
fn line_annotation_creates_placeholder_and_tags_entry() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("f", None, &none()).unwrap();

    fs.annotate("f", Some(3), &Annotation::parse("::run fmt::"))
        .unwrap();
    fs.annotate("f", Some(3), &Annotation::parse("@@todo, later"))
        .unwrap();

    let lines = fs.read("f").unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].line_no, 3);
    assert_eq!(lines[0].content, "");
    assert_eq!(lines[0].control.as_deref(), Some("run fmt"));
    assert_eq!(fs.stat("f").unwrap().tags, vec!["later", "todo"]);
}

#[test]
fn annotate_validates_target() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.make_directory("d", &none()).unwrap();
    fs.new_file("f", None, &none()).unwrap();
    let note = Annotation::note("n");

    assert!(matches!(
        fs.annotate("missing", None, &note).unwrap_err(),
        FsError::NotFound(_)
    ));
    assert!(matches!(
        fs.annotate("d", Some(1), &note).unwrap_err(),
        FsError::KindMismatch {
            expected: EntryKind::File,
            ..
        }
    ));
    assert!(matches!(
        fs.annotate("f", Some(0), &note).unwrap_err(),
        FsError::InvalidLine(0)
    ));
}

#[test]
fn entry_annotation_keeps_unset_fields() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.make_directory("d", &Annotation::note("first")).unwrap();

    fs.annotate("d", None, &Annotation::control("sync")).unwrap();
    let entry = fs.annotate("d", None, &Annotation::tags(["x", "x"])).unwrap();

    assert_eq!(entry.note.as_deref(), Some("first"));
    assert_eq!(entry.control.as_deref(), Some("sync"));
    assert_eq!(fs.stat("d").unwrap().tags, vec!["x"]);
}

#[test]
fn type_conflicts_are_reported_both_ways() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("f", None, &none()).unwrap();
    fs.make_directory("d", &none()).unwrap();

    assert!(matches!(
        fs.make_directory("f", &none()).unwrap_err(),
        FsError::TypeConflict {
            existing: EntryKind::File,
            ..
        }
    ));
    assert!(matches!(
        fs.make_directory("f/below", &none()).unwrap_err(),
        FsError::TypeConflict { .. }
    ));
    assert!(matches!(
        fs.new_file("d", None, &none()).unwrap_err(),
        FsError::TypeConflict {
            existing: EntryKind::Dir,
            ..
        }
    ));
    assert_eq!(paths(&fs, ""), vec!["d", "f"]);
}

#[test]
fn read_and_append_require_files() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.make_directory("d", &none()).unwrap();

    assert!(matches!(
        fs.read("nope").unwrap_err(),
        FsError::NotFound(_)
    ));
    assert!(matches!(
        fs.append("d", "x").unwrap_err(),
        FsError::KindMismatch { .. }
    ));
}

#[test]
fn listing_missing_path_fails_but_empty_root_lists() {
    let conn = setup();
    let fs = bind(&conn, "root");

    assert!(fs.list("").unwrap().is_empty());
    assert!(matches!(fs.list("ghost").unwrap_err(), FsError::NotFound(_)));
}

#[test]
fn list_immediate_returns_direct_children_only() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("a/b/c.txt", None, &none()).unwrap();
    fs.new_file("a/d.txt", None, &none()).unwrap();
    fs.new_file("top.txt", None, &none()).unwrap();

    let names = |base: &str| -> Vec<String> {
        fs.list_immediate(base)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    };
    assert_eq!(names(""), vec!["a", "top.txt"]);
    assert_eq!(names("a"), vec!["b", "d.txt"]);
}

#[test]
fn parent_escape_is_rejected() {
    let conn = setup();
    let fs = bind(&conn, "root");

    assert!(matches!(
        fs.make_directory("../outside", &none()).unwrap_err(),
        FsError::InvalidPath(_)
    ));
    assert!(matches!(
        fs.new_file("", None, &none()).unwrap_err(),
        FsError::InvalidPath(_)
    ));
}

#[test]
fn export_serializes_entries_with_lines_and_tags() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.new_file("docs/readme.md", Some("# Title"), &Annotation::parse("@@doc"))
        .unwrap();
    fs.annotate("docs/readme.md", Some(1), &Annotation::note("heading"))
        .unwrap();

    let json = serde_json::to_value(fs.export().unwrap()).unwrap();

    assert_eq!(
        json,
        serde_json::json!([
            { "path": "docs", "kind": "dir" },
            {
                "path": "docs/readme.md",
                "kind": "file",
                "tags": ["doc"],
                "lines": [
                    { "line_no": 1, "content": "# Title", "note": "heading", "control": null }
                ]
            }
        ])
    );
}

#[test]
fn rebinding_same_root_reuses_project_row() {
    let conn = setup();
    let first = bind(&conn, "/same/root");
    let second = bind(&conn, "/same/root");

    assert_eq!(first.project_id(), second.project_id());
    let repo = SqliteStoreRepository::try_new(&conn).unwrap();
    let project = repo.get_project(first.project_id()).unwrap().unwrap();
    assert_eq!(project.root, "/same/root");
}

#[test]
fn moving_the_root_is_invalid() {
    let conn = setup();
    let fs = bind(&conn, "root");
    fs.make_directory("a", &none()).unwrap();

    assert!(matches!(
        fs.move_entry("", "a/b").unwrap_err(),
        FsError::InvalidMove { .. }
    ));
    assert!(matches!(
        fs.move_entry("a", "/").unwrap_err(),
        FsError::InvalidMove { .. }
    ));
}

#[test]
fn rejected_entry_insert_surfaces_as_store_error() {
    let conn = setup();
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         CREATE TABLE files_new (
           id INTEGER PRIMARY KEY,
           project_id INTEGER NOT NULL,
           path TEXT NOT NULL,
           name TEXT NOT NULL CHECK (name <> 'blocked'),
           type TEXT NOT NULL CHECK (type IN ('dir', 'file')),
           note TEXT,
           aicom TEXT,
           created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
           UNIQUE (project_id, path),
           FOREIGN KEY (project_id) REFERENCES projects(id)
         );
         DROP TABLE files;
         ALTER TABLE files_new RENAME TO files;
         PRAGMA foreign_keys = ON;",
    )
    .unwrap();
    let fs = bind(&conn, "root");

    assert!(matches!(
        fs.make_directory("blocked", &none()).unwrap_err(),
        FsError::Store(StoreError::Db(_))
    ));
    assert!(matches!(
        fs.new_file("ok/blocked", None, &none()).unwrap_err(),
        FsError::Store(StoreError::Db(_))
    ));
    assert!(paths(&fs, "").is_empty());
    fs.make_directory("allowed", &none()).unwrap();
}

#[test]
fn root_is_not_addressable_as_an_entry() {
    let conn = setup();
    let fs = bind(&conn, "root");

    for raw in ["", "/", "a/.."] {
        assert!(matches!(
            fs.make_directory(raw, &none()).unwrap_err(),
            FsError::InvalidPath(PathError::Root)
        ));
        assert!(matches!(
            fs.stat(raw).unwrap_err(),
            FsError::InvalidPath(PathError::Root)
        ));
    }
    assert!(matches!(
        fs.remove("/", true).unwrap_err(),
        FsError::InvalidPath(PathError::Root)
    ));
}
