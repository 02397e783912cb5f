//! Export ledger: which files this tool wrote, and what they contained.
//!
//! Each exported file's SHA-256 is recorded at write time. On the next run the
//! on-disk checksum is compared against that record to tell machine output
//! apart from hand edits, and hand-edited files are backed up before they are
//! overwritten.

use crate::renderer::RenderedDocument;
use crate::utils::{backup_stamp, sha256_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub const LEDGER_FILE: &str = ".export-ledger.json";
const LEDGER_VERSION: u32 = 1;

/// What the ledger knows about one exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub checksum: String,
    pub session_id: String,
    pub last_exported_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    files: BTreeMap<String, ExportRecord>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to back up {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to save ledger {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a target path stands relative to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    /// Nothing on disk, so nothing to protect.
    Unknown,
    /// On-disk content is exactly what was last exported.
    Unmodified { on_disk: String },
    /// On-disk content differs from the last export, or the file was never
    /// recorded and so cannot be assumed to be machine output.
    Modified { on_disk: String },
}

impl FileState {
    pub fn on_disk(&self) -> Option<&str> {
        match self {
            FileState::Unknown => None,
            FileState::Unmodified { on_disk } | FileState::Modified { on_disk } => Some(on_disk),
        }
    }
}

/// Three-way classification of a target path.
pub fn classify(recorded: Option<&ExportRecord>, on_disk: Option<String>) -> FileState {
    match (recorded, on_disk) {
        (_, None) => FileState::Unknown,
        (Some(record), Some(sum)) if record.checksum == sum => {
            FileState::Unmodified { on_disk: sum }
        }
        (_, Some(sum)) => FileState::Modified { on_disk: sum },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    Updated,
    /// New content equals what is on disk; nothing written.
    Unchanged,
    /// A hand-edited file was copied aside, then overwritten.
    BackedUp { backup: PathBuf },
}

/// Per-entry state for `--status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    Tracked,
    Modified,
    Missing,
}

impl TrackedState {
    pub fn label(self) -> &'static str {
        match self {
            TrackedState::Tracked => "tracked",
            TrackedState::Modified => "modified",
            TrackedState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub file: String,
    pub session_id: String,
    pub last_exported_at: DateTime<Utc>,
    pub state: TrackedState,
}

#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    entries: BTreeMap<String, ExportRecord>,
    dirty: bool,
}

impl Ledger {
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Load the ledger for `dir`. A missing ledger file is an empty ledger.
    pub fn load(dir: &Path) -> Result<Self, LedgerError> {
        let mut ledger = Self::empty(dir);
        let path = ledger.path();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ledger),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };
        let file: LedgerFile =
            serde_json::from_slice(&bytes).map_err(|source| LedgerError::Parse {
                path: path.clone(),
                source,
            })?;
        if file.version != LEDGER_VERSION {
            warn!(
                "Ledger {} has version {}, expected {}",
                path.display(),
                file.version,
                LEDGER_VERSION
            );
        }
        ledger.entries = file.files;
        Ok(ledger)
    }

    /// Like [`Ledger::load`], but a corrupt ledger is moved aside and replaced
    /// by an empty one. Every existing file then counts as modified, so nothing
    /// is overwritten without a backup.
    pub fn load_or_reset(dir: &Path, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        match Self::load(dir) {
            Err(LedgerError::Parse { path, source }) => {
                let aside = path.with_file_name(format!(
                    "{}.corrupt_{}",
                    LEDGER_FILE,
                    backup_stamp(now)
                ));
                warn!(
                    "Ledger {} is unreadable ({}); moving it to {}",
                    path.display(),
                    source,
                    aside.display()
                );
                fs::rename(&path, &aside).map_err(|source| LedgerError::Backup {
                    path: path.clone(),
                    source,
                })?;
                Ok(Self::empty(dir))
            }
            other => other,
        }
    }

    pub fn get(&self, file: &str) -> Option<&ExportRecord> {
        self.entries.get(file)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ExportRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `doc` into the ledger's directory under its suggested name.
    ///
    /// Any error leaves both the target file and the ledger as they were.
    pub fn commit(
        &mut self,
        doc: &RenderedDocument,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, LedgerError> {
        let path = self.dir.join(&doc.filename);
        let new_sum = sha256_hex(doc.text.as_bytes());

        let existing = read_existing(&path)?;
        let state = classify(
            self.entries.get(&doc.filename),
            existing.as_deref().map(sha256_hex),
        );

        let outcome = if state.on_disk() == Some(new_sum.as_str()) {
            CommitOutcome::Unchanged
        } else {
            match state {
                FileState::Unknown => {
                    write_atomic(&path, doc.text.as_bytes())?;
                    CommitOutcome::Created
                }
                FileState::Unmodified { .. } => {
                    write_atomic(&path, doc.text.as_bytes())?;
                    CommitOutcome::Updated
                }
                FileState::Modified { .. } => {
                    let previous = existing.as_deref().unwrap_or_default();
                    let backup = write_backup(&path, previous, now)?;
                    debug!("Backed up {} to {}", path.display(), backup.display());
                    write_atomic(&path, doc.text.as_bytes())?;
                    CommitOutcome::BackedUp { backup }
                }
            }
        };

        self.entries.insert(
            doc.filename.clone(),
            ExportRecord {
                checksum: new_sum,
                session_id: doc.session_id.clone(),
                last_exported_at: now,
            },
        );
        self.dirty = true;
        Ok(outcome)
    }

    /// Rewrite the ledger file if anything changed since it was loaded.
    pub fn persist(&mut self) -> Result<(), LedgerError> {
        if !self.dirty {
            return Ok(());
        }
        let path = self.path();
        let file = LedgerFile {
            version: LEDGER_VERSION,
            files: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| LedgerError::Persist {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        write_atomic(&path, &json).map_err(|e| match e {
            LedgerError::Write { path, source } => LedgerError::Persist { path, source },
            other => other,
        })?;
        self.dirty = false;
        Ok(())
    }

    /// Compare every recorded file against what is on disk now.
    pub fn status(&self) -> Result<Vec<StatusEntry>, LedgerError> {
        self.entries
            .iter()
            .map(|(file, record)| {
                let on_disk = read_existing(&self.dir.join(file))?.map(|b| sha256_hex(&b));
                let state = match on_disk {
                    None => TrackedState::Missing,
                    Some(sum) if sum == record.checksum => TrackedState::Tracked,
                    Some(_) => TrackedState::Modified,
                };
                Ok(StatusEntry {
                    file: file.clone(),
                    session_id: record.session_id.clone(),
                    last_exported_at: record.last_exported_at,
                    state,
                })
            })
            .collect()
    }
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>, LedgerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LedgerError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// `<stem>.modified_<YYYYMMDD_HHMMSS>.md` next to the original.
pub fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.modified_{}.md", stem, backup_stamp(now)))
}

/// Never replaces an existing backup.
fn write_backup(path: &Path, content: &[u8], now: DateTime<Utc>) -> Result<PathBuf, LedgerError> {
    let backup = backup_path(path, now);
    let result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&backup)
        .and_then(|mut f| {
            f.write_all(content)?;
            f.sync_all()
        });
    match result {
        Ok(()) => Ok(backup),
        Err(source) => {
            if source.kind() != io::ErrorKind::AlreadyExists {
                let _ = fs::remove_file(&backup);
            }
            Err(LedgerError::Backup {
                path: backup,
                source,
            })
        }
    }
}

/// Write to a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), LedgerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let wrap = |source: io::Error| LedgerError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(wrap)?;
    tmp.write_all(content).map_err(wrap)?;
    tmp.as_file().sync_all().map_err(wrap)?;
    tmp.persist(path).map_err(|e| wrap(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(text: &str) -> RenderedDocument {
        RenderedDocument {
            session_id: "A".into(),
            filename: "2024-01-01-foo-12345678.md".into(),
            text: text.into(),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn backups(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains(".modified_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn classify_is_three_way() {
        let record = ExportRecord {
            checksum: "aaa".into(),
            session_id: "A".into(),
            last_exported_at: at(0),
        };
        assert_eq!(classify(Some(&record), None), FileState::Unknown);
        assert_eq!(classify(None, None), FileState::Unknown);
        assert_eq!(
            classify(Some(&record), Some("aaa".into())),
            FileState::Unmodified {
                on_disk: "aaa".into()
            }
        );
        assert_eq!(
            classify(Some(&record), Some("bbb".into())),
            FileState::Modified {
                on_disk: "bbb".into()
            }
        );
        assert_eq!(
            classify(None, Some("bbb".into())),
            FileState::Modified {
                on_disk: "bbb".into()
            }
        );
    }

    #[test]
    fn first_export_creates_file_and_entry() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::empty(dir.path());
        let outcome = ledger.commit(&doc("v1"), at(10)).unwrap();
        assert_eq!(outcome, CommitOutcome::Created);
        let path = dir.path().join("2024-01-01-foo-12345678.md");
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
        let record = ledger.get("2024-01-01-foo-12345678.md").unwrap();
        assert_eq!(record.checksum, sha256_hex(b"v1"));
        assert_eq!(record.session_id, "A");
        assert!(backups(dir.path()).is_empty());
    }

    #[test]
    fn untouched_file_is_overwritten_without_backup() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::empty(dir.path());
        ledger.commit(&doc("v1"), at(10)).unwrap();
        let outcome = ledger.commit(&doc("v2"), at(20)).unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
        assert!(backups(dir.path()).is_empty());
        assert_eq!(
            ledger.get("2024-01-01-foo-12345678.md").unwrap().last_exported_at,
            at(20)
        );
    }

    #[test]
    fn identical_content_is_a_no_op_but_refreshes_timestamp() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::empty(dir.path());
        ledger.commit(&doc("v1"), at(10)).unwrap();
        let outcome = ledger.commit(&doc("v1"), at(30)).unwrap();
        assert_eq!(outcome, CommitOutcome::Unchanged);
        assert!(backups(dir.path()).is_empty());
        assert_eq!(
            ledger.get("2024-01-01-foo-12345678.md").unwrap().last_exported_at,
            at(30)
        );
    }

    #[test]
    fn hand_edited_file_is_backed_up_before_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01-foo-12345678.md");
        let mut ledger = Ledger::empty(dir.path());
        ledger.commit(&doc("v1"), at(10)).unwrap();
        fs::write(&path, "v1 plus my notes").unwrap();

        let outcome = ledger.commit(&doc("v2"), at(1_700_000_000)).unwrap();
        let CommitOutcome::BackedUp { backup } = outcome else {
            panic!("expected a backup, got {outcome:?}");
        };
        assert_eq!(
            backup.file_name().unwrap().to_string_lossy(),
            "2024-01-01-foo-12345678.modified_20231114_221320.md"
        );
        assert_eq!(fs::read_to_string(&backup).unwrap(), "v1 plus my notes");
        assert_eq!(fs::read_to_string(&path).unwrap(), "v2");
        assert_eq!(backups(dir.path()).len(), 1);
    }

    #[test]
    fn failed_backup_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01-foo-12345678.md");
        let mut ledger = Ledger::empty(dir.path());
        ledger.commit(&doc("v1"), at(10)).unwrap();
        fs::write(&path, "edited").unwrap();
        // Occupy the backup name so the backup cannot be created.
        fs::write(backup_path(&path, at(50)), "older backup").unwrap();

        let err = ledger.commit(&doc("v2"), at(50)).unwrap_err();
        assert!(matches!(err, LedgerError::Backup { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited");
        assert_eq!(
            fs::read_to_string(backup_path(&path, at(50))).unwrap(),
            "older backup"
        );
        assert_eq!(
            ledger.get("2024-01-01-foo-12345678.md").unwrap().checksum,
            sha256_hex(b"v1")
        );
    }

    #[test]
    fn untracked_existing_file_is_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01-foo-12345678.md");
        fs::write(&path, "someone else's file").unwrap();
        let mut ledger = Ledger::empty(dir.path());
        let outcome = ledger.commit(&doc("v1"), at(10)).unwrap();
        assert!(matches!(outcome, CommitOutcome::BackedUp { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::empty(dir.path());
        ledger.commit(&doc("v1"), at(10)).unwrap();
        ledger.persist().unwrap();

        let json = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();
        assert!(json.contains("\"sessionId\": \"A\""));
        assert!(json.contains("\"lastExportedAt\""));

        let reloaded = Ledger::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.get("2024-01-01-foo-12345678.md"),
            ledger.get("2024-01-01-foo-12345678.md")
        );
    }

    #[test]
    fn corrupt_ledger_is_moved_aside() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LEDGER_FILE), "{ nope").unwrap();
        assert!(matches!(
            Ledger::load(dir.path()),
            Err(LedgerError::Parse { .. })
        ));
        let ledger = Ledger::load_or_reset(dir.path(), at(1_700_000_000)).unwrap();
        assert!(ledger.is_empty());
        assert!(
            dir.path()
                .join(format!("{}.corrupt_20231114_221320", LEDGER_FILE))
                .exists()
        );
    }

    #[test]
    fn status_reports_tracked_modified_and_missing() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::empty(dir.path());
        for (name, text) in [("a.md", "a"), ("b.md", "b"), ("c.md", "c")] {
            let d = RenderedDocument {
                session_id: name.into(),
                filename: name.into(),
                text: text.into(),
            };
            ledger.commit(&d, at(10)).unwrap();
        }
        fs::write(dir.path().join("b.md"), "edited").unwrap();
        fs::remove_file(dir.path().join("c.md")).unwrap();

        let states: Vec<(String, TrackedState)> = ledger
            .status()
            .unwrap()
            .into_iter()
            .map(|s| (s.file, s.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("a.md".to_string(), TrackedState::Tracked),
                ("b.md".to_string(), TrackedState::Modified),
                ("c.md".to_string(), TrackedState::Missing),
            ]
        );
    }
}
