use cursor_chat_export::export::{self, ExportSummary};
use cursor_chat_export::ledger::{LEDGER_FILE, Ledger, TrackedState};
use cursor_chat_export::utils::ExportConfig;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// A global `state.vscdb` with two good sessions and one malformed bubble.
fn create_fixture() -> (PathBuf, TempDir) {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("state.vscdb");
    let conn = Connection::open(&path).expect("open fixture");
    conn.execute_batch(
        "CREATE TABLE cursorDiskKV (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
         CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);",
    )
    .expect("create tables");

    let rows = [
        (
            "composerData:A",
            r#"{"composerId":"A","name":"Foo","createdAt":100,"lastUpdatedAt":200}"#,
        ),
        // Inserted out of order; timestamps decide.
        (
            "bubbleId:A:2",
            r#"{"type":2,"text":"hello","createdAt":200,"tokenCount":{"inputTokens":3,"outputTokens":4}}"#,
        ),
        ("bubbleId:A:1", r#"{"type":1,"text":"hi","createdAt":100}"#),
        (
            "composerData:B",
            r#"{"composerId":"B","name":"Second chat","createdAt":1700000000000}"#,
        ),
        (
            "bubbleId:B:1",
            r#"{"type":1,"text":"question","createdAt":1700000000000}"#,
        ),
        (
            "bubbleId:B:2",
            r#"{"type":2,"text":"answer","createdAt":1700000005000}"#,
        ),
        ("bubbleId:C:1", "{ this is not json"),
        ("checkpointId:A:1", "{}"),
    ];
    for (key, value) in rows {
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)",
            params![key, value.as_bytes()],
        )
        .expect("insert row");
    }
    (path, dir)
}

fn config(db_path: &Path, target: &Path) -> ExportConfig {
    ExportConfig {
        target_dir: target.to_path_buf(),
        db_path: db_path.to_path_buf(),
        workspace_dbs: Vec::new(),
        since: None,
        quiet: true,
    }
}

fn markdown_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read target dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".md"))
        .collect();
    names.sort();
    names
}

fn run(db_path: &Path, target: &Path) -> ExportSummary {
    export::execute(&config(db_path, target)).expect("export run")
}

#[test]
fn test_malformed_record_does_not_fail_run() {
    let (db, _db_dir) = create_fixture();
    let out = tempdir().expect("create output dir");

    let summary = run(&db, out.path());

    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped_records, 1);
    assert_eq!(summary.failed, 0);
    let files = markdown_files(out.path());
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| f.starts_with("1970-01-01-foo-")));
    assert!(files.iter().any(|f| f.starts_with("2023-11-14-second-chat-")));
}

#[test]
fn test_messages_are_ordered_by_timestamp() {
    let (db, _db_dir) = create_fixture();
    let out = tempdir().expect("create output dir");
    run(&db, out.path());

    let foo = markdown_files(out.path())
        .into_iter()
        .find(|f| f.starts_with("1970-01-01-foo-"))
        .expect("foo exported");
    let text = fs::read_to_string(out.path().join(foo)).expect("read export");
    let user = text.find("## User").expect("user header");
    let assistant = text.find("## Assistant").expect("assistant header");
    assert!(user < assistant);
    assert!(text.contains("title: Foo"));
    assert!(text.contains("*Tokens: 3 in / 4 out*"));
    assert!(!text.contains("question"));
}

#[test]
fn test_rerun_is_idempotent() {
    let (db, _db_dir) = create_fixture();
    let out = tempdir().expect("create output dir");

    run(&db, out.path());
    let before: Vec<String> = markdown_files(out.path())
        .iter()
        .map(|f| fs::read_to_string(out.path().join(f)).expect("read export"))
        .collect();

    let summary = run(&db, out.path());
    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.exported(), 0);
    assert_eq!(summary.backed_up, 0);

    let after: Vec<String> = markdown_files(out.path())
        .iter()
        .map(|f| fs::read_to_string(out.path().join(f)).expect("read export"))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_hand_edit_is_backed_up_once() {
    let (db, _db_dir) = create_fixture();
    let out = tempdir().expect("create output dir");
    run(&db, out.path());

    let foo = markdown_files(out.path())
        .into_iter()
        .find(|f| f.starts_with("1970-01-01-foo-"))
        .expect("foo exported");
    let path = out.path().join(&foo);
    let original = fs::read_to_string(&path).expect("read export");
    fs::write(&path, format!("{original}\nMy own notes.\n")).expect("edit export");

    let status = Ledger::load(out.path())
        .expect("load ledger")
        .status()
        .expect("status");
    let edited = status.iter().find(|s| s.file == foo).expect("foo tracked");
    assert_eq!(edited.state, TrackedState::Modified);

    let summary = run(&db, out.path());
    assert_eq!(summary.backed_up, 1);
    assert_eq!(summary.unchanged, 1);

    let files = markdown_files(out.path());
    let backups: Vec<&String> = files.iter().filter(|f| f.contains(".modified_")).collect();
    assert_eq!(backups.len(), 1);
    let stem = foo.trim_end_matches(".md");
    assert!(backups[0].starts_with(&format!("{stem}.modified_")));
    let saved = fs::read_to_string(out.path().join(backups[0])).expect("read backup");
    assert!(saved.ends_with("My own notes.\n"));
    assert_eq!(fs::read_to_string(&path).expect("read export"), original);
}

#[test]
fn test_ledger_is_written_next_to_exports() {
    let (db, _db_dir) = create_fixture();
    let out = tempdir().expect("create output dir");
    run(&db, out.path());

    assert!(out.path().join(LEDGER_FILE).exists());
    let ledger = Ledger::load(out.path()).expect("load ledger");
    assert_eq!(ledger.len(), 2);
    assert!(
        ledger
            .status()
            .expect("status")
            .iter()
            .all(|s| s.state == TrackedState::Tracked)
    );
}

#[test]
fn test_workspace_metadata_overrides_title() {
    let (db, db_dir) = create_fixture();
    let ws_path = db_dir.path().join("workspace.vscdb");
    {
        let conn = Connection::open(&ws_path).expect("open workspace fixture");
        conn.execute_batch("CREATE TABLE cursorDiskKV (key TEXT, value BLOB);")
            .expect("create table");
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)",
            params![
                "composerData:A",
                r#"{"composerId":"A","name":"Renamed","createdAt":100,"lastUpdatedAt":999}"#
                    .as_bytes()
            ],
        )
        .expect("insert row");
        // Fragments in workspace databases are ignored.
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)",
            params!["bubbleId:A:9", r#"{"type":1,"text":"stray"}"#.as_bytes()],
        )
        .expect("insert row");
    }

    let out = tempdir().expect("create output dir");
    let mut cfg = config(&db, out.path());
    cfg.workspace_dbs = vec![ws_path, db_dir.path().join("missing.vscdb")];
    let summary = export::execute(&cfg).expect("export run");
    assert_eq!(summary.created, 2);

    let files = markdown_files(out.path());
    let renamed = files
        .iter()
        .find(|f| f.starts_with("1970-01-01-renamed-"))
        .expect("renamed export");
    let text = fs::read_to_string(out.path().join(renamed)).expect("read export");
    assert!(!text.contains("stray"));
}
