//! Thread assembly.
//!
//! Fragments are grouped by the session id embedded in their storage key and
//! nothing else. Session metadata timestamps are never consulted for grouping
//! or for bounding a session; they only feed the document header.

use crate::decoder::{MessageFragment, MetadataSource, Record, SessionMetadata};
use crate::importer::MessageRequestContext;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Placeholder titles are cut to this many characters.
pub const MAX_DERIVED_TITLE_CHARS: usize = 80;

const FALLBACK_TITLE: &str = "Untitled conversation";

/// The ordered view of every fragment of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationThread {
    pub session_id: String,
    pub title: String,
    /// No metadata record existed; the title was derived from the first message.
    pub recovered: bool,
    pub metadata: Option<SessionMetadata>,
    /// Ascending by timestamp, ties in storage order.
    pub fragments: Vec<MessageFragment>,
}

impl ConversationThread {
    /// Earliest fragment timestamp.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.fragments.iter().filter_map(|f| f.timestamp).min()
    }

    /// Latest fragment timestamp.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.fragments.iter().filter_map(|f| f.timestamp).max()
    }
}

/// Non-fatal findings while assembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyWarning {
    #[error("duplicate fragment {fragment_id} in session {session_id}, keeping first")]
    DuplicateFragment {
        session_id: String,
        fragment_id: String,
    },
    #[error("session {session_id} has no metadata, title recovered from first message")]
    MissingMetadata { session_id: String },
    #[error("session {session_id} has metadata but no messages")]
    EmptySession { session_id: String },
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub threads: Vec<ConversationThread>,
    pub warnings: Vec<AssemblyWarning>,
}

impl Assembly {
    pub fn empty_sessions(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, AssemblyWarning::EmptySession { .. }))
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, AssemblyWarning::DuplicateFragment { .. }))
            .count()
    }

    pub fn recovered(&self) -> usize {
        self.threads.iter().filter(|t| t.recovered).count()
    }
}

/// Build one thread per session id that owns at least one fragment.
///
/// Threads come out ordered by their first fragment timestamp, then session id.
pub fn assemble<I>(records: I) -> Assembly
where
    I: IntoIterator<Item = Record>,
{
    let mut metadata: HashMap<String, SessionMetadata> = HashMap::new();
    let mut partitions: BTreeMap<String, Vec<MessageFragment>> = BTreeMap::new();
    let mut contexts: HashMap<(String, String), MessageRequestContext> = HashMap::new();

    for record in records {
        match record {
            Record::Session(meta) => merge_metadata(&mut metadata, meta),
            Record::Fragment(fragment) => partitions
                .entry(fragment.session_id.clone())
                .or_default()
                .push(fragment),
            Record::RequestContext(ctx) => {
                contexts
                    .entry((ctx.session_id, ctx.fragment_id))
                    .or_insert(ctx.context);
            }
            Record::Unrecognized { .. } => {}
        }
    }

    let mut assembly = Assembly::default();

    for (session_id, fragments) in partitions {
        let mut fragments = dedupe(&session_id, fragments, &mut assembly.warnings);

        fragments.sort_by_key(|f| {
            (
                f.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                f.seq,
            )
        });

        for fragment in &mut fragments {
            if fragment.context.is_none() {
                fragment.context =
                    contexts.remove(&(session_id.clone(), fragment.fragment_id.clone()));
            }
        }

        let meta = metadata.remove(&session_id);
        let recovered = meta.is_none();
        if recovered {
            assembly.warnings.push(AssemblyWarning::MissingMetadata {
                session_id: session_id.clone(),
            });
        }
        let title = meta
            .as_ref()
            .map(|m| m.title.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| derive_title(&fragments));

        assembly.threads.push(ConversationThread {
            session_id,
            title,
            recovered,
            metadata: meta,
            fragments,
        });
    }

    // Whatever metadata is left had no fragments at all.
    let mut empty: Vec<String> = metadata.into_keys().collect();
    empty.sort();
    assembly.warnings.extend(
        empty
            .into_iter()
            .map(|session_id| AssemblyWarning::EmptySession { session_id }),
    );

    assembly.threads.sort_by(|a, b| {
        a.started_at()
            .cmp(&b.started_at())
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    assembly
}

/// Several sources may describe the same tab. The most recently updated one
/// wins; on a tie the tab's own row beats the index. Fields the winner lacks
/// are taken from the loser.
fn merge_metadata(metadata: &mut HashMap<String, SessionMetadata>, meta: SessionMetadata) {
    match metadata.entry(meta.session_id.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(meta);
        }
        Entry::Occupied(mut slot) => {
            let existing = slot.get_mut();
            let incoming_wins = match meta.last_updated_at.cmp(&existing.last_updated_at) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => {
                    meta.source == MetadataSource::Session
                        && existing.source == MetadataSource::Index
                }
            };
            if incoming_wins {
                let loser = std::mem::replace(existing, meta);
                fill_gaps(existing, loser);
            } else {
                fill_gaps(existing, meta);
            }
        }
    }
}

fn fill_gaps(winner: &mut SessionMetadata, loser: SessionMetadata) {
    if winner.title.is_empty() {
        winner.title = loser.title;
    }
    if winner.subtitle.is_none() {
        winner.subtitle = loser.subtitle;
    }
    if winner.created_at.is_none() {
        winner.created_at = loser.created_at;
    }
    if winner.context_files.is_empty() {
        winner.context_files = loser.context_files;
    }
}

/// Keep the first occurrence (in storage order) of every fragment id.
fn dedupe(
    session_id: &str,
    mut fragments: Vec<MessageFragment>,
    warnings: &mut Vec<AssemblyWarning>,
) -> Vec<MessageFragment> {
    fragments.sort_by_key(|f| f.seq);
    let mut seen = HashSet::new();
    fragments.retain(|f| {
        if seen.insert(f.fragment_id.clone()) {
            true
        } else {
            warnings.push(AssemblyWarning::DuplicateFragment {
                session_id: session_id.to_string(),
                fragment_id: f.fragment_id.clone(),
            });
            false
        }
    });
    fragments
}

/// First line of the first non-empty message, bounded in length.
pub fn derive_title(fragments: &[MessageFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.body.body_text())
        .find(|text| !text.trim().is_empty())
        .and_then(|text| {
            let line = text.lines().find(|l| !l.trim().is_empty())?.trim();
            Some(line.chars().take(MAX_DERIVED_TITLE_CHARS).collect::<String>())
        })
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}
