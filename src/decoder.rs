//! Key/value decoding.
//!
//! All knowledge of Cursor's key naming lives here. Raw `(key, value)` rows go
//! in, a closed set of typed [`Record`]s comes out. A bad row becomes a
//! [`DecodeError`] for that row alone; the iterator keeps going.

use crate::importer::{Bubble, ComposerData, ComposerIndex, MessageRequestContext};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

const COMPOSER_PREFIX: &str = "composerData:";
const BUBBLE_PREFIX: &str = "bubbleId:";
const REQUEST_CONTEXT_PREFIX: &str = "messageRequestContext:";
const COMPOSER_INDEX_KEY: &str = "composer.composerData";

/// One row as read from the store. `value` is `None` for SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl RawEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

/// Recognized key shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey<'a> {
    ComposerData {
        session_id: &'a str,
    },
    Bubble {
        session_id: &'a str,
        fragment_id: &'a str,
    },
    RequestContext {
        session_id: &'a str,
        fragment_id: &'a str,
    },
    ComposerIndex,
    /// A known prefix with missing id parts.
    Invalid,
    Unrecognized,
}

/// Classify a storage key. The fragment id is everything after the second colon.
pub fn parse_key(key: &str) -> StoreKey<'_> {
    if key == COMPOSER_INDEX_KEY {
        return StoreKey::ComposerIndex;
    }
    if let Some(session_id) = key.strip_prefix(COMPOSER_PREFIX) {
        return if session_id.is_empty() || session_id.contains(':') {
            StoreKey::Invalid
        } else {
            StoreKey::ComposerData { session_id }
        };
    }
    let (rest, is_bubble) = if let Some(rest) = key.strip_prefix(BUBBLE_PREFIX) {
        (rest, true)
    } else if let Some(rest) = key.strip_prefix(REQUEST_CONTEXT_PREFIX) {
        (rest, false)
    } else {
        return StoreKey::Unrecognized;
    };
    match rest.split_once(':') {
        Some((session_id, fragment_id)) if !session_id.is_empty() && !fragment_id.is_empty() => {
            if is_bubble {
                StoreKey::Bubble {
                    session_id,
                    fragment_id,
                }
            } else {
                StoreKey::RequestContext {
                    session_id,
                    fragment_id,
                }
            }
        }
        _ => StoreKey::Invalid,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// Where a metadata record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// The tab's own `composerData:<id>` row.
    Session,
    /// An entry of the `composer.composerData` index.
    Index,
}

/// Per-tab metadata. Timestamps are advisory UI state only.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub source: MetadataSource,
    pub title: String,
    pub subtitle: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub context_files: Vec<String>,
}

impl SessionMetadata {
    fn from_composer(session_id: &str, source: MetadataSource, data: ComposerData) -> Self {
        Self {
            session_id: session_id.to_string(),
            source,
            title: data.name.map(|n| n.trim().to_string()).unwrap_or_default(),
            subtitle: data.subtitle.filter(|s| !s.trim().is_empty()),
            created_at: data.created_at,
            last_updated_at: data.last_updated_at,
            context_files: data
                .context
                .map(|c| {
                    c.files
                        .into_iter()
                        .filter_map(|f| f.name.or(f.path))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// One stored message unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFragment {
    pub session_id: String,
    pub fragment_id: String,
    pub role: Role,
    /// Authoritative for ordering. `None` sorts as the Unix epoch.
    pub timestamp: Option<DateTime<Utc>>,
    /// Position of the row in the input sequence, used to break timestamp ties.
    pub seq: usize,
    pub body: Bubble,
    /// Filled in by the assembler from the matching request-context record.
    pub context: Option<MessageRequestContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub session_id: String,
    pub fragment_id: String,
    pub context: MessageRequestContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Session(SessionMetadata),
    Fragment(MessageFragment),
    RequestContext(RequestContext),
    Unrecognized { key: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed value for {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown role {code} for {key}")]
    UnknownRole { key: String, code: String },
    #[error("key {key} is missing its session or fragment id")]
    InvalidKey { key: String },
    #[error("no value stored for {key}")]
    EmptyValue { key: String },
}

impl DecodeError {
    pub fn key(&self) -> &str {
        match self {
            DecodeError::Malformed { key, .. }
            | DecodeError::UnknownRole { key, .. }
            | DecodeError::InvalidKey { key }
            | DecodeError::EmptyValue { key } => key,
        }
    }
}

/// Lazily decode a sequence of raw rows.
///
/// Rows are numbered in input order; that number becomes
/// [`MessageFragment::seq`]. The composer index row may expand into several
/// session records.
pub fn decode_entries<I>(entries: I) -> impl Iterator<Item = Result<Record, DecodeError>>
where
    I: IntoIterator<Item = RawEntry>,
{
    entries
        .into_iter()
        .enumerate()
        .flat_map(|(seq, entry)| decode_entry(seq, entry))
}

/// Decode a single row.
pub fn decode_entry(seq: usize, entry: RawEntry) -> Vec<Result<Record, DecodeError>> {
    let RawEntry { key, value } = entry;
    let parsed = parse_key(&key);
    let bytes = value.filter(|v| !v.is_empty());

    match (parsed, bytes) {
        (StoreKey::Unrecognized, _) => vec![Ok(Record::Unrecognized { key: key.clone() })],
        (StoreKey::Invalid, _) => vec![Err(DecodeError::InvalidKey { key: key.clone() })],
        (_, None) => vec![Err(DecodeError::EmptyValue { key: key.clone() })],
        (StoreKey::ComposerData { session_id }, Some(bytes)) => vec![
            parse_value::<ComposerData>(&key, &bytes).map(|data| {
                Record::Session(SessionMetadata::from_composer(
                    session_id,
                    MetadataSource::Session,
                    data,
                ))
            }),
        ],
        (StoreKey::ComposerIndex, Some(bytes)) => match parse_value::<ComposerIndex>(&key, &bytes) {
            Ok(index) => index
                .all_composers
                .into_iter()
                .filter_map(|data| {
                    let id = data.composer_id.clone().filter(|id| !id.is_empty())?;
                    Some(Ok(Record::Session(SessionMetadata::from_composer(
                        &id,
                        MetadataSource::Index,
                        data,
                    ))))
                })
                .collect(),
            Err(e) => vec![Err(e)],
        },
        (
            StoreKey::Bubble {
                session_id,
                fragment_id,
            },
            Some(bytes),
        ) => vec![decode_bubble(seq, &key, session_id, fragment_id, &bytes)],
        (
            StoreKey::RequestContext {
                session_id,
                fragment_id,
            },
            Some(bytes),
        ) => vec![
            parse_value::<MessageRequestContext>(&key, &bytes).map(|context| {
                Record::RequestContext(RequestContext {
                    session_id: session_id.to_string(),
                    fragment_id: fragment_id.to_string(),
                    context,
                })
            }),
        ],
    }
}

fn parse_value<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(|source| DecodeError::Malformed {
        key: key.to_string(),
        source,
    })
}

fn decode_bubble(
    seq: usize,
    key: &str,
    session_id: &str,
    fragment_id: &str,
    bytes: &[u8],
) -> Result<Record, DecodeError> {
    let bubble: Bubble = parse_value(key, bytes)?;
    let role = resolve_role(key, &bubble)?;
    Ok(Record::Fragment(MessageFragment {
        session_id: session_id.to_string(),
        fragment_id: fragment_id.to_string(),
        role,
        timestamp: bubble.created_at,
        seq,
        body: bubble,
        context: None,
    }))
}

/// Numeric `type` decides: 1 is the user, 2 the assistant. Bubbles from builds
/// without a numeric type fall back to the textual role fields.
fn resolve_role(key: &str, bubble: &Bubble) -> Result<Role, DecodeError> {
    match bubble.kind {
        Some(1) => return Ok(Role::User),
        Some(2) => return Ok(Role::Assistant),
        Some(other) => {
            return Err(DecodeError::UnknownRole {
                key: key.to_string(),
                code: other.to_string(),
            });
        }
        None => {}
    }

    let textual = [&bubble.role, &bubble.author_role, &bubble.sender]
        .into_iter()
        .flatten()
        .find(|r| !r.is_empty());
    match textual.map(|r| r.to_lowercase()).as_deref() {
        Some("user" | "human" | "client") => Ok(Role::User),
        Some("assistant" | "ai" | "agent" | "bot" | "model") => Ok(Role::Assistant),
        other => Err(DecodeError::UnknownRole {
            key: key.to_string(),
            code: other.unwrap_or("missing").to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(entries: Vec<RawEntry>) -> Vec<Result<Record, DecodeError>> {
        decode_entries(entries).collect()
    }

    #[test]
    fn parse_key_recognizes_all_shapes() {
        assert_eq!(
            parse_key("composerData:abc"),
            StoreKey::ComposerData { session_id: "abc" }
        );
        assert_eq!(
            parse_key("bubbleId:abc:b-1"),
            StoreKey::Bubble {
                session_id: "abc",
                fragment_id: "b-1"
            }
        );
        assert_eq!(
            parse_key("messageRequestContext:abc:b-1"),
            StoreKey::RequestContext {
                session_id: "abc",
                fragment_id: "b-1"
            }
        );
        assert_eq!(parse_key("composer.composerData"), StoreKey::ComposerIndex);
        assert_eq!(parse_key("bubbleId:abc"), StoreKey::Invalid);
        assert_eq!(parse_key("bubbleId::x"), StoreKey::Invalid);
        assert_eq!(parse_key("composerData:"), StoreKey::Invalid);
        assert_eq!(parse_key("checkpointId:abc:1"), StoreKey::Unrecognized);
    }

    #[test]
    fn bubble_type_maps_to_role() {
        let records = decode_all(vec![
            RawEntry::new("bubbleId:A:1", r#"{"type":1,"text":"hi","createdAt":100}"#),
            RawEntry::new("bubbleId:A:2", r#"{"type":2,"text":"hello","createdAt":200}"#),
        ]);
        let roles: Vec<Role> = records
            .into_iter()
            .map(|r| match r.unwrap() {
                Record::Fragment(f) => f.role,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn unknown_role_is_a_record_error() {
        let records = decode_all(vec![
            RawEntry::new("bubbleId:A:1", r#"{"type":3,"text":"?"}"#),
            RawEntry::new("bubbleId:A:2", r#"{"type":2,"text":"ok"}"#),
        ]);
        assert!(matches!(
            &records[0],
            Err(DecodeError::UnknownRole { code, .. }) if code == "3"
        ));
        assert!(matches!(&records[1], Ok(Record::Fragment(_))));
    }

    #[test]
    fn textual_role_fallback() {
        let records = decode_all(vec![RawEntry::new(
            "bubbleId:A:1",
            r#"{"role":"Human","text":"hi"}"#,
        )]);
        match &records[0] {
            Ok(Record::Fragment(f)) => assert_eq!(f.role, Role::User),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_value_does_not_stop_decoding() {
        let records = decode_all(vec![
            RawEntry::new("bubbleId:A:1", "{not json"),
            RawEntry::new("composerData:B", r#""just a string""#),
            RawEntry {
                key: "bubbleId:A:3".into(),
                value: None,
            },
            RawEntry::new("bubbleId:C:1", r#"{"type":1,"text":"fine"}"#),
        ]);
        assert_eq!(records.len(), 4);
        assert!(matches!(&records[0], Err(DecodeError::Malformed { key, .. }) if key == "bubbleId:A:1"));
        assert!(matches!(&records[1], Err(DecodeError::Malformed { .. })));
        assert!(matches!(&records[2], Err(DecodeError::EmptyValue { .. })));
        assert!(matches!(&records[3], Ok(Record::Fragment(f)) if f.session_id == "C" && f.seq == 3));
    }

    #[test]
    fn invalid_and_empty_rows_are_record_errors() {
        let records = decode_all(vec![
            RawEntry::new("bubbleId:A", r#"{"type":1}"#),
            RawEntry {
                key: "checkpointId:A:1".into(),
                value: None,
            },
            RawEntry::new("composerData:A", ""),
        ]);
        assert!(matches!(&records[0], Err(DecodeError::InvalidKey { key }) if key == "bubbleId:A"));
        assert!(matches!(&records[1], Ok(Record::Unrecognized { .. })));
        assert!(matches!(&records[2], Err(DecodeError::EmptyValue { .. })));
    }

    #[test]
    fn unrecognized_keys_are_skipped_not_failed() {
        let records = decode_all(vec![RawEntry::new("inlineDiffs-xyz", "[]")]);
        assert!(matches!(&records[0], Ok(Record::Unrecognized { key }) if key == "inlineDiffs-xyz"));
    }

    #[test]
    fn composer_metadata_and_index() {
        let records = decode_all(vec![
            RawEntry::new(
                "composerData:A",
                r#"{"name":"Foo","createdAt":1700000000000,"context":{"files":[{"name":"a.rs"}]}}"#,
            ),
            RawEntry::new(
                "composer.composerData",
                r#"{"allComposers":[{"composerId":"B","name":"Bar"},{"name":"no id"}]}"#,
            ),
        ]);
        let sessions: Vec<SessionMetadata> = records
            .into_iter()
            .map(|r| match r.unwrap() {
                Record::Session(s) => s,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title, "Foo");
        assert_eq!(sessions[0].source, MetadataSource::Session);
        assert_eq!(sessions[1].source, MetadataSource::Index);
        assert_eq!(sessions[0].context_files, vec!["a.rs".to_string()]);
        assert!(sessions[0].created_at.is_some());
        assert_eq!(sessions[1].session_id, "B");
    }

    #[test]
    fn request_context_is_keyed_by_session_and_fragment() {
        let records = decode_all(vec![RawEntry::new(
            "messageRequestContext:A:1",
            r#"{"files":[{"path":"src/lib.rs"}],"terminalFiles":["t1"]}"#,
        )]);
        match &records[0] {
            Ok(Record::RequestContext(ctx)) => {
                assert_eq!(ctx.session_id, "A");
                assert_eq!(ctx.fragment_id, "1");
                assert_eq!(ctx.context.terminal_files.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
