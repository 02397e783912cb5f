/// Type definitions for the JSON documents Cursor keeps in its `state.vscdb` SQLite files.
///
/// Storage layout: a flat key/value table, values are UTF-8 JSON.
///
/// Table schema (global and workspace databases):
/// ```sql
/// CREATE TABLE cursorDiskKV (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
/// CREATE TABLE ItemTable    (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
/// ```
///
/// Keys of interest:
/// - `composerData:<sessionId>`                        – `ComposerData`
/// - `bubbleId:<sessionId>:<bubbleId>`                 – `Bubble`
/// - `messageRequestContext:<sessionId>:<bubbleId>`    – `MessageRequestContext`
/// - `composer.composerData` (in `ItemTable`)          – `ComposerIndex`
///
/// Cursor changes these shapes between releases without notice. Every field is
/// optional and list elements that do not match the expected shape are dropped
/// instead of failing the whole value; only a value that is not a JSON object at
/// all is treated as malformed.
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Lenient field helpers
// ---------------------------------------------------------------------------

/// Deserialize a list, silently dropping elements that do not fit `T`.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Deserialize an optional field, mapping a wrongly-shaped value to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Parse the timestamp encodings Cursor uses: epoch milliseconds (number or
/// numeric string) and RFC 3339 strings.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)),
        _ => None,
    }
}

/// Render a scalar JSON value as plain text (strings without quotes).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Session metadata
// ---------------------------------------------------------------------------

/// Per-tab metadata stored under `composerData:<sessionId>`.
///
/// `created_at` / `last_updated_at` are UI state. They say nothing about which
/// bubbles belong to the session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerData {
    #[serde(default, deserialize_with = "lenient")]
    pub composer_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub subtitle: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub context: Option<ComposerContext>,
}

/// Files pinned to the composer tab.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComposerContext {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub files: Vec<NamedRef>,
}

/// The `ItemTable` row `composer.composerData`, an index of every tab.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerIndex {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub all_composers: Vec<ComposerData>,
}

// ---------------------------------------------------------------------------
// Bubbles (message fragments)
// ---------------------------------------------------------------------------

/// One stored message unit, `bubbleId:<sessionId>:<bubbleId>`.
///
/// `kind` is the numeric `type` field: 1 = user, 2 = assistant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bubble {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author_role: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub bubble_id: Option<String>,
    #[serde(default, deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub text: Option<Value>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub rich_text: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,

    #[serde(default, deserialize_with = "lenient")]
    pub thinking: Option<Thinking>,
    #[serde(default, deserialize_with = "lenient")]
    pub tool_former_data: Option<ToolFormerData>,

    #[serde(default, deserialize_with = "lenient_vec")]
    pub git_diffs: Vec<GitDiff>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub commits: Vec<Commit>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub pull_requests: Vec<PullRequest>,

    #[serde(default, deserialize_with = "lenient_vec")]
    pub lints: Vec<Lint>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub approximate_lint_errors: Vec<Lint>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub multi_file_linter_errors: Vec<Lint>,

    #[serde(default, deserialize_with = "lenient_vec")]
    pub human_changes: Vec<HumanChange>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub attached_folders: Vec<PathRef>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub attached_folders_new: Vec<PathRef>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub recently_viewed_files: Vec<PathRef>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub images: Vec<ImageRef>,

    #[serde(default, deserialize_with = "lenient_vec")]
    pub ai_web_search_results: Vec<WebSearchResult>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub docs_references: Vec<DocsReference>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub web_references: Vec<WebReference>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub context_pieces: Vec<Value>,

    #[serde(default, deserialize_with = "lenient")]
    pub is_agentic: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub token_count: Option<TokenCount>,
}

impl Bubble {
    /// The message text: first non-blank of `text`, `content`, `richText`, `message`,
    /// exactly as stored. Object-valued content is pretty-printed as JSON.
    pub fn body_text(&self) -> String {
        [&self.text, &self.content, &self.rich_text, &self.message]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                Value::String(s) => Some(s.clone()),
                Value::Object(_) | Value::Array(_) => {
                    serde_json::to_string_pretty(value).ok()
                }
                other => Some(other.to_string()),
            })
            .unwrap_or_default()
    }

    pub fn thinking_text(&self) -> String {
        self.thinking
            .as_ref()
            .and_then(|t| t.text.as_deref())
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// All lint findings, in the order the three storage fields list them.
    pub fn all_lints(&self) -> impl Iterator<Item = &Lint> {
        self.lints
            .iter()
            .chain(&self.approximate_lint_errors)
            .chain(&self.multi_file_linter_errors)
    }

    pub fn folders(&self) -> &[PathRef] {
        if self.attached_folders.is_empty() {
            &self.attached_folders_new
        } else {
            &self.attached_folders
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Thinking {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

/// Token counters recorded on assistant bubbles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenCount {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// The agent tool invocation attached to a bubble.
///
/// `raw_args` and `result` are usually JSON encoded as a string, but older
/// builds store them inline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFormerData {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default)]
    pub raw_args: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
}

fn embedded_json(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

impl ToolFormerData {
    pub fn tool_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Tool arguments from `rawArgs`, falling back to `params`.
    pub fn args(&self) -> Map<String, Value> {
        [self.raw_args.as_ref(), self.params.as_ref()]
            .into_iter()
            .filter_map(embedded_json)
            .find_map(|v| match v {
                Value::Object(map) if !map.is_empty() => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// The decoded tool result, if any.
    pub fn result_json(&self) -> Option<Value> {
        embedded_json(self.result.as_ref())
    }

    /// The result exactly as stored, for results that are not JSON.
    pub fn raw_result(&self) -> Option<&str> {
        match self.result.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GitDiff {
    #[serde(default, deserialize_with = "lenient")]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Commit {
    #[serde(default, deserialize_with = "lenient")]
    pub sha: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub number: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Lint {
    #[serde(default, deserialize_with = "lenient")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HumanChange {
    #[serde(default, deserialize_with = "lenient")]
    pub file: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
}

/// A folder or file reference stored either as a bare string or as an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PathRef {
    Path(String),
    Entry {
        #[serde(default, deserialize_with = "lenient")]
        path: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        file: Option<String>,
    },
}

impl PathRef {
    pub fn display(&self) -> Option<&str> {
        let shown = match self {
            PathRef::Path(p) => Some(p.as_str()),
            PathRef::Entry { path, name, file } => {
                path.as_deref().or(file.as_deref()).or(name.as_deref())
            }
        };
        shown.filter(|s| !s.is_empty())
    }
}

/// A file or rule reference that only carries a display name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamedRef {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Name(String),
    Entry {
        #[serde(default, deserialize_with = "lenient")]
        name: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        filename: Option<String>,
        #[serde(rename = "type", default, deserialize_with = "lenient")]
        kind: Option<String>,
        #[serde(rename = "mimeType", default, deserialize_with = "lenient")]
        mime_type: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebSearchResult {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub snippet: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub chunk: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocsReference {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebReference {
    #[serde(default, deserialize_with = "lenient")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// Context Cursor assembled for one request, `messageRequestContext:<sessionId>:<bubbleId>`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequestContext {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub files: Vec<NamedRef>,
    /// Either objects with `content`/`status` or JSON strings of the same.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub todos: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub terminal_files: Vec<Value>,
    /// Rule references; objects with `content` or `text`, or bare strings.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub cursor_rules: Vec<Value>,
}

impl MessageRequestContext {
    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.path.is_none())
            && self.todos.is_empty()
            && self.terminal_files.is_empty()
            && self.cursor_rules.is_empty()
    }
}
