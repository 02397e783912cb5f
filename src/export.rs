use crate::assembler::{self, ConversationThread};
use crate::decoder::{self, RawEntry, Record, StoreKey};
use crate::ledger::{CommitOutcome, Ledger};
use crate::renderer;
use crate::store;
use crate::utils::{ExportConfig, format_instant};
use chrono::Utc;
use eyre::{Result, WrapErr};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Counts reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub backed_up: usize,
    pub failed: usize,
    /// Threads left out by the time filter.
    pub filtered: usize,
    /// Records the decoder could not use.
    pub skipped_records: usize,
    /// Sessions with metadata but no messages.
    pub empty_sessions: usize,
    pub duplicates: usize,
    pub recovered: usize,
}

impl ExportSummary {
    pub fn exported(&self) -> usize {
        self.created + self.updated + self.backed_up
    }

    pub fn line(&self) -> String {
        let mut summary = format!(
            "Done. {} created, {} updated, {} unchanged, {} backed up.",
            self.created, self.updated, self.unchanged, self.backed_up
        );
        if self.skipped_records > 0 {
            summary.push_str(&format!(" Skipped {} record(s).", self.skipped_records));
        }
        if self.empty_sessions > 0 {
            summary.push_str(&format!(" Dropped {} empty session(s).", self.empty_sessions));
        }
        if self.duplicates > 0 {
            summary.push_str(&format!(" Ignored {} duplicate message(s).", self.duplicates));
        }
        if self.recovered > 0 {
            summary.push_str(&format!(" Recovered {} untitled session(s).", self.recovered));
        }
        if self.filtered > 0 {
            summary.push_str(&format!(" Filtered out {} thread(s).", self.filtered));
        }
        if self.failed > 0 {
            summary.push_str(&format!(" Completed with {} error(s).", self.failed));
        }
        summary
    }
}

/// Run one export from `config.db_path` into `config.target_dir`.
pub fn execute(config: &ExportConfig) -> Result<ExportSummary> {
    fs::create_dir_all(&config.target_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.target_dir.display()
        )
    })?;

    // Every connection is closed by the time this returns.
    let entries = collect_entries(config)?;
    let summary = export_entries(entries, config)?;

    if !config.quiet {
        eprintln!("{}", summary.line());
    }
    Ok(summary)
}

/// Global rows first, then session metadata from each workspace database.
fn collect_entries(config: &ExportConfig) -> Result<Vec<RawEntry>> {
    let mut entries = store::read_db(&config.db_path)?;
    for path in &config.workspace_dbs {
        match store::read_db(path) {
            Ok(rows) => entries.extend(rows.into_iter().filter(|e| {
                matches!(
                    decoder::parse_key(&e.key),
                    StoreKey::ComposerData { .. } | StoreKey::ComposerIndex
                )
            })),
            Err(e) => debug!("Skipping workspace database: {:#}", e),
        }
    }
    Ok(entries)
}

/// Decode, assemble, render and commit `entries` against the ledger in
/// `config.target_dir`.
pub fn export_entries(entries: Vec<RawEntry>, config: &ExportConfig) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();

    let records = decoder::decode_entries(entries).filter_map(|result| match result {
        Ok(Record::Unrecognized { key }) => {
            debug!("Ignoring unrecognized key {}", key);
            None
        }
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping record {}: {}", e.key(), e);
            summary.skipped_records += 1;
            None
        }
    });
    let assembly = assembler::assemble(records);

    for warning in &assembly.warnings {
        warn!("{}", warning);
    }
    summary.empty_sessions = assembly.empty_sessions();
    summary.duplicates = assembly.duplicates();
    summary.recovered = assembly.recovered();

    let threads: Vec<ConversationThread> = assembly
        .threads
        .into_iter()
        .filter(|thread| match config.since {
            Some(since) if thread.started_at().is_none_or(|start| start < since) => {
                debug!("Filtered out session {}", thread.session_id);
                summary.filtered += 1;
                false
            }
            _ => true,
        })
        .collect();
    info!("Exporting {} thread(s)", threads.len());

    let now = Utc::now();
    let mut ledger = Ledger::load_or_reset(&config.target_dir, now)
        .wrap_err("Failed to load export ledger")?;
    let mut written = HashSet::new();

    for thread in &threads {
        let doc = match renderer::render(thread) {
            Ok(doc) => doc,
            Err(e) => {
                error!("{}", e);
                summary.failed += 1;
                continue;
            }
        };
        if !written.insert(doc.filename.clone()) {
            error!(
                "Session {} maps to {} which another session already wrote",
                doc.session_id, doc.filename
            );
            summary.failed += 1;
            continue;
        }
        match ledger.commit(&doc, now) {
            Ok(CommitOutcome::Created) => {
                debug!("Created {}", doc.filename);
                summary.created += 1;
            }
            Ok(CommitOutcome::Updated) => {
                debug!("Updated {}", doc.filename);
                summary.updated += 1;
            }
            Ok(CommitOutcome::Unchanged) => {
                debug!("Unchanged {}", doc.filename);
                summary.unchanged += 1;
            }
            Ok(CommitOutcome::BackedUp { backup }) => {
                warn!(
                    "{} was edited by hand; previous content saved to {}",
                    doc.filename,
                    backup.display()
                );
                summary.backed_up += 1;
            }
            Err(e) => {
                error!("Session {}: {}", doc.session_id, e);
                summary.failed += 1;
            }
        }
    }

    ledger.persist().wrap_err("Failed to save export ledger")?;
    Ok(summary)
}

/// Print one line per ledger entry: file, last export time, session, state.
pub fn print_status(target_dir: &Path) -> Result<()> {
    let ledger = Ledger::load(target_dir).wrap_err("Failed to load export ledger")?;
    if ledger.is_empty() {
        println!("No exports recorded in {}", target_dir.display());
        return Ok(());
    }
    for entry in ledger.status()? {
        println!(
            "{:<9} {}  {}  {}",
            entry.state.label(),
            format_instant(entry.last_exported_at),
            entry.session_id,
            entry.file
        );
    }
    Ok(())
}
