//! Markdown rendering of assembled threads.
//!
//! Rendering is a pure function of the thread: no clock, no filesystem, no
//! hash-map iteration order. The same thread always produces the same bytes.

use crate::assembler::ConversationThread;
use crate::decoder::MessageFragment;
use crate::importer::{
    Bubble, ImageRef, MessageRequestContext, PathRef, ToolFormerData, value_text,
};
use crate::utils::{format_instant, sha256_hex};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use thiserror::Error;

/// Slugs are cut to this many characters.
pub const MAX_SLUG_LEN: usize = 60;
/// Hex characters of the session fingerprint kept in file names.
pub const FINGERPRINT_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub session_id: String,
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Error)]
#[error("failed to render session {session_id}: {source}")]
pub struct RenderError {
    pub session_id: String,
    #[source]
    pub source: io::Error,
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_activity: Option<DateTime<Utc>>,
    messages: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<TokenTotals>,
    #[serde(skip_serializing_if = "no_files")]
    context_files: &'a [String],
}

fn no_files(files: &&[String]) -> bool {
    files.is_empty()
}

#[derive(Serialize)]
struct TokenTotals {
    input: u64,
    output: u64,
    total: u64,
}

/// Render a thread into its document text and file name.
pub fn render(thread: &ConversationThread) -> Result<RenderedDocument, RenderError> {
    let mut buf = Vec::new();
    write_thread_markdown(&mut buf, thread)
        .and_then(|()| String::from_utf8(buf).map_err(io::Error::other))
        .map(|text| RenderedDocument {
            session_id: thread.session_id.clone(),
            filename: suggested_filename(thread),
            text,
        })
        .map_err(|source| RenderError {
            session_id: thread.session_id.clone(),
            source,
        })
}

/// `<YYYY-MM-DD>-<slug>-<fingerprint>.md`
pub fn suggested_filename(thread: &ConversationThread) -> String {
    format!(
        "{}-{}-{}.md",
        thread_date(thread).format("%Y-%m-%d"),
        title_slug(&thread.title),
        session_fingerprint(&thread.session_id)
    )
}

/// The date a thread is filed under: its first message, else the tab's
/// creation time, else the epoch.
pub fn thread_date(thread: &ConversationThread) -> DateTime<Utc> {
    thread
        .started_at()
        .or_else(|| thread.metadata.as_ref().and_then(|m| m.created_at))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn title_slug(title: &str) -> String {
    let raw_slug = slug::slugify(title);
    // slug output is ASCII-only, so byte == char
    let slug = raw_slug[..raw_slug.len().min(MAX_SLUG_LEN)].trim_end_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

pub fn session_fingerprint(session_id: &str) -> String {
    let mut hex = sha256_hex(session_id.as_bytes());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

fn token_totals(thread: &ConversationThread) -> Option<TokenTotals> {
    let (input, output) = thread
        .fragments
        .iter()
        .filter_map(|f| f.body.token_count)
        .fold((0u64, 0u64), |(i, o), t| {
            (
                i.saturating_add(t.input_tokens),
                o.saturating_add(t.output_tokens),
            )
        });
    (input > 0 || output > 0).then_some(TokenTotals {
        input,
        output,
        total: input.saturating_add(output),
    })
}

pub fn write_thread_markdown<W: Write>(
    writer: &mut W,
    thread: &ConversationThread,
) -> io::Result<()> {
    let meta = thread.metadata.as_ref();
    let fm = Frontmatter {
        title: &thread.title,
        session_id: &thread.session_id,
        subtitle: meta.and_then(|m| m.subtitle.as_deref()),
        started_at: thread.started_at(),
        last_activity: thread.last_activity(),
        messages: thread.fragments.len(),
        recovered: thread.recovered,
        tokens: token_totals(thread),
        context_files: meta.map(|m| m.context_files.as_slice()).unwrap_or(&[]),
    };

    writeln!(writer, "---")?;
    let yaml = serde_yaml::to_string(&fm).map_err(io::Error::other)?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "---")?;
    writeln!(writer)?;
    writeln!(writer, "# {}", thread.title)?;
    writeln!(writer)?;

    for fragment in &thread.fragments {
        if !has_content(fragment) {
            continue;
        }
        write_fragment(writer, fragment)?;
    }

    Ok(())
}

fn has_content(fragment: &MessageFragment) -> bool {
    let b = &fragment.body;
    !b.body_text().is_empty()
        || !b.thinking_text().is_empty()
        || b.tool_former_data
            .as_ref()
            .is_some_and(|t| !t.tool_name().is_empty())
        || fragment.context.as_ref().is_some_and(|c| !c.is_empty())
        || !b.git_diffs.is_empty()
        || !b.commits.is_empty()
        || !b.pull_requests.is_empty()
        || b.all_lints().next().is_some()
        || !b.human_changes.is_empty()
        || !b.folders().is_empty()
        || !b.recently_viewed_files.is_empty()
        || !b.images.is_empty()
        || !b.ai_web_search_results.is_empty()
        || !b.docs_references.is_empty()
        || !b.web_references.is_empty()
        || !b.context_pieces.is_empty()
        || b.token_count.is_some_and(|t| !t.is_empty())
}

fn write_fragment<W: Write>(w: &mut W, fragment: &MessageFragment) -> io::Result<()> {
    let when = fragment
        .timestamp
        .map(format_instant)
        .unwrap_or_else(|| "unknown time".to_string());
    writeln!(w, "## {} ({})", fragment.role.label(), when)?;
    writeln!(w)?;

    let bubble = &fragment.body;

    let thinking = bubble.thinking_text();
    if !thinking.is_empty() {
        writeln!(w, "**Thinking:**")?;
        writeln!(w)?;
        write_paragraph(w, &thinking)?;
    }

    let text = bubble.body_text();
    if !text.is_empty() {
        write_paragraph(w, &text)?;
    }

    if let Some(context) = &fragment.context {
        write_request_context(w, context)?;
    }
    write_attachments(w, bubble)?;

    if let Some(tool) = &bubble.tool_former_data
        && !tool.tool_name().is_empty()
    {
        writeln!(w, "**Tool call:**")?;
        writeln!(w)?;
        write_tool_call(w, tool)?;
        writeln!(w)?;
    }

    if let Some(tokens) = bubble.token_count.filter(|t| !t.is_empty()) {
        writeln!(
            w,
            "*Tokens: {} in / {} out*",
            tokens.input_tokens, tokens.output_tokens
        )?;
        writeln!(w)?;
    }

    Ok(())
}

/// Text as stored, followed by exactly one blank line.
fn write_paragraph<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    write!(w, "{}", text)?;
    if !text.ends_with('\n') {
        writeln!(w)?;
    }
    writeln!(w)
}

// ── Fenced blocks ────────────────────────────────────────────────────────────

/// A fence one backtick longer than any run inside `content`.
fn fence_for(content: &str) -> String {
    let mut longest = 0usize;
    let mut run = 0usize;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn write_block<W: Write>(w: &mut W, lang: &str, content: &str) -> io::Result<()> {
    let fence = fence_for(content);
    writeln!(w, "{fence}{lang}")?;
    writeln!(w, "{}", content.trim_end_matches('\n'))?;
    writeln!(w, "{fence}")
}

// ── Attachments ──────────────────────────────────────────────────────────────

fn write_section_header<W: Write>(w: &mut W, label: &str, count: usize) -> io::Result<()> {
    writeln!(w, "**{} ({}):**", label, count)?;
    writeln!(w)
}

fn write_request_context<W: Write>(w: &mut W, ctx: &MessageRequestContext) -> io::Result<()> {
    let files: Vec<&str> = ctx.files.iter().filter_map(|f| f.path.as_deref()).collect();
    if !files.is_empty() {
        write_section_header(w, "Files Referenced", files.len())?;
        for path in files {
            writeln!(w, "- `{}`", path)?;
        }
        writeln!(w)?;
    }

    if !ctx.todos.is_empty() {
        write_section_header(w, "TODOs", ctx.todos.len())?;
        for todo in &ctx.todos {
            writeln!(w, "- {}", todo_line(todo))?;
        }
        writeln!(w)?;
    }

    if !ctx.terminal_files.is_empty() {
        write_section_header(w, "Terminal Context", ctx.terminal_files.len())?;
        for file in &ctx.terminal_files {
            writeln!(w, "- {}", value_text(file))?;
        }
        writeln!(w)?;
    }

    if !ctx.cursor_rules.is_empty() {
        write_section_header(w, "Rules", ctx.cursor_rules.len())?;
        for rule in &ctx.cursor_rules {
            let text = match rule {
                Value::Object(map) => map
                    .get("content")
                    .or_else(|| map.get("text"))
                    .map(value_text)
                    .unwrap_or_default(),
                other => value_text(other),
            };
            if !text.is_empty() {
                writeln!(w, "- {}", text)?;
            }
        }
        writeln!(w)?;
    }
    Ok(())
}

/// A todo is either an object or a JSON string encoding one.
fn todo_line(todo: &Value) -> String {
    let parsed;
    let todo = match todo {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => {
                parsed = v;
                &parsed
            }
            _ => return s.clone(),
        },
        other => other,
    };
    match todo {
        Value::Object(map) => format!(
            "[{}] {}",
            map.get("status").map(value_text).unwrap_or_else(|| "unknown".into()),
            map.get("content").map(value_text).unwrap_or_else(|| "Unknown".into()),
        ),
        other => value_text(other),
    }
}

fn write_attachments<W: Write>(w: &mut W, b: &Bubble) -> io::Result<()> {
    if !b.git_diffs.is_empty() {
        write_section_header(w, "Git Diffs", b.git_diffs.len())?;
        for diff in &b.git_diffs {
            writeln!(w, "- {}", diff.path.as_deref().unwrap_or("Unknown"))?;
            if let Some(body) = diff.diff.as_deref().filter(|d| !d.is_empty()) {
                writeln!(w)?;
                write_block(w, "diff", body)?;
            }
        }
        writeln!(w)?;
    }

    if !b.commits.is_empty() {
        write_section_header(w, "Git Commits", b.commits.len())?;
        for commit in &b.commits {
            writeln!(
                w,
                "- {}: {}",
                commit.sha.as_deref().unwrap_or(""),
                commit.message.as_deref().unwrap_or("No message")
            )?;
        }
        writeln!(w)?;
    }

    if !b.pull_requests.is_empty() {
        write_section_header(w, "Pull Requests", b.pull_requests.len())?;
        for pr in &b.pull_requests {
            writeln!(
                w,
                "- PR #{}: {}",
                pr.number.as_ref().map(value_text).unwrap_or_default(),
                pr.title.as_deref().unwrap_or("No title")
            )?;
        }
        writeln!(w)?;
    }

    let lints: Vec<_> = b.all_lints().collect();
    if !lints.is_empty() {
        write_section_header(w, "Linting Issues", lints.len())?;
        for lint in lints {
            let mut line = format!(
                "- [{}] {}",
                lint.severity.as_deref().unwrap_or("error"),
                lint.message.as_deref().unwrap_or("Unknown")
            );
            if let Some(file) = lint.file.as_deref().filter(|f| !f.is_empty()) {
                line.push_str(&format!(" ({}", file));
                if let Some(n) = lint.line.as_ref().map(value_text).filter(|n| !n.is_empty()) {
                    line.push_str(&format!(":{}", n));
                }
                line.push(')');
            }
            writeln!(w, "{}", line)?;
        }
        writeln!(w)?;
    }

    if !b.human_changes.is_empty() {
        write_section_header(w, "Human Edits", b.human_changes.len())?;
        for change in &b.human_changes {
            writeln!(
                w,
                "- {}: {}",
                change.kind.as_deref().unwrap_or("edit"),
                change.file.as_deref().unwrap_or("Unknown")
            )?;
        }
        writeln!(w)?;
    }

    write_path_list(w, "Attached Folders", b.folders())?;
    write_path_list(w, "Recently Viewed Files", &b.recently_viewed_files)?;

    if !b.images.is_empty() {
        write_section_header(w, "Images", b.images.len())?;
        for image in &b.images {
            match image {
                ImageRef::Name(name) => writeln!(w, "- {}", name)?,
                ImageRef::Entry {
                    name,
                    filename,
                    kind,
                    mime_type,
                } => writeln!(
                    w,
                    "- {} ({})",
                    name.as_deref().or(filename.as_deref()).unwrap_or("Unnamed"),
                    kind.as_deref().or(mime_type.as_deref()).unwrap_or("unknown")
                )?,
            }
        }
        writeln!(w)?;
    }

    if b.is_agentic == Some(true) {
        writeln!(w, "**Mode:** Agentic")?;
        writeln!(w)?;
    }

    if !b.ai_web_search_results.is_empty() {
        write_section_header(w, "Web Search Results", b.ai_web_search_results.len())?;
        for (i, result) in b.ai_web_search_results.iter().enumerate() {
            writeln!(w, "{}. {}", i + 1, result.title.as_deref().unwrap_or("Untitled"))?;
            if let Some(url) = result.url.as_deref().filter(|s| !s.is_empty()) {
                writeln!(w, "   URL: {}", url)?;
            }
            if let Some(snippet) = result.snippet.as_deref().filter(|s| !s.is_empty()) {
                writeln!(w, "   Snippet: {}", snippet)?;
            }
            if let Some(chunk) = result.chunk.as_deref().filter(|s| !s.is_empty()) {
                writeln!(w, "   Content: {}", chunk)?;
            }
        }
        writeln!(w)?;
    }

    if !b.docs_references.is_empty() {
        write_section_header(w, "Docs", b.docs_references.len())?;
        for doc in &b.docs_references {
            match (doc.title.as_deref(), doc.url.as_deref()) {
                (Some(t), Some(u)) => writeln!(w, "- {} <{}>", t, u)?,
                (Some(t), None) => writeln!(w, "- {}", t)?,
                (None, Some(u)) => writeln!(w, "- <{}>", u)?,
                (None, None) => {}
            }
        }
        writeln!(w)?;
    }

    let web_refs: Vec<_> = b
        .web_references
        .iter()
        .filter(|r| r.url.is_some() || r.title.is_some())
        .collect();
    if !web_refs.is_empty() {
        write_section_header(w, "Web References", web_refs.len())?;
        for r in web_refs {
            match (r.title.as_deref(), r.url.as_deref()) {
                (Some(t), Some(u)) => writeln!(w, "- {} <{}>", t, u)?,
                (Some(t), None) => writeln!(w, "- {}", t)?,
                (None, Some(u)) => writeln!(w, "- <{}>", u)?,
                (None, None) => {}
            }
        }
        writeln!(w)?;
    }

    if !b.context_pieces.is_empty() {
        write_section_header(w, "Context Pieces", b.context_pieces.len())?;
        for piece in &b.context_pieces {
            let pretty = serde_json::to_string_pretty(piece).map_err(io::Error::other)?;
            write_block(w, "json", &pretty)?;
        }
        writeln!(w)?;
    }

    Ok(())
}

fn write_path_list<W: Write>(
    w: &mut W,
    label: &str,
    paths: &[PathRef],
) -> io::Result<()> {
    let shown: Vec<&str> = paths.iter().filter_map(|p| p.display()).collect();
    if shown.is_empty() {
        return Ok(());
    }
    write_section_header(w, label, shown.len())?;
    for path in shown {
        writeln!(w, "- {}", path)?;
    }
    writeln!(w)
}

// ── Tool calls ───────────────────────────────────────────────────────────────

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

fn or_unavailable(s: &str) -> &str {
    if s.is_empty() { "(args unavailable)" } else { s }
}

fn line_count(s: &str) -> usize {
    if s.is_empty() { 0 } else { s.split('\n').count() }
}

/// The stored tool result in full, minus the fields in `shown`.
fn write_tool_result<W: Write>(
    w: &mut W,
    tool: &ToolFormerData,
    shown: &[&str],
) -> io::Result<()> {
    let (lang, text) = match tool.result_json() {
        Some(Value::Object(mut map)) => {
            map.retain(|k, _| !shown.contains(&k.as_str()));
            if map.is_empty() {
                return Ok(());
            }
            let pretty =
                serde_json::to_string_pretty(&Value::Object(map)).map_err(io::Error::other)?;
            ("json", pretty)
        }
        Some(other) => (
            "json",
            serde_json::to_string_pretty(&other).map_err(io::Error::other)?,
        ),
        None => match tool.raw_result() {
            Some(raw) => ("", raw.to_string()),
            None => return Ok(()),
        },
    };
    writeln!(w)?;
    write_block(w, lang, &text)
}

fn write_tool_call<W: Write>(w: &mut W, tool: &ToolFormerData) -> io::Result<()> {
    let args = tool.args();
    let result = tool.result_json();
    let result_obj = result.as_ref().and_then(Value::as_object);
    let name = tool.tool_name();

    match name {
        "codebase_search" => {
            writeln!(w, "- Searched: {}", arg_str(&args, "query"))?;
            if let Some(dirs) = args.get("target_directories").and_then(Value::as_array)
                && !dirs.is_empty()
            {
                let dirs: Vec<String> = dirs.iter().map(value_text).collect();
                writeln!(w, "  - Scope: {}", dirs.join(", "))?;
            }
            let hits = result_obj
                .and_then(|r| r.get("codeResults"))
                .and_then(Value::as_array);
            if let Some(hits) = hits.filter(|h| !h.is_empty()) {
                writeln!(w, "  - Found {} result(s)", hits.len())?;
                for block in hits.iter().filter_map(|h| h.get("codeBlock")) {
                    let path = block
                        .get("relativeWorkspacePath")
                        .map(value_text)
                        .unwrap_or_default();
                    if path.is_empty() {
                        continue;
                    }
                    match (block.get("startLine"), block.get("endLine")) {
                        (Some(s), Some(e)) => {
                            writeln!(w, "  - {}:{}-{}", path, value_text(s), value_text(e))?
                        }
                        _ => writeln!(w, "  - {}", path)?,
                    }
                }
            }
        }
        "read_file" => {
            let path = arg_str(&args, "target_file");
            let mut line = format!("- Read file: {}", or_unavailable(path));
            let offset = args.get("offset").and_then(Value::as_i64);
            let limit = args.get("limit").and_then(Value::as_i64);
            if !path.is_empty() && (offset.is_some() || limit.is_some()) {
                let start = offset.unwrap_or(1);
                line.push_str(&format!(" (lines {}", start));
                if let Some(limit) = limit.filter(|l| *l > 0)
                    && let Some(end) = start.checked_add(limit - 1)
                {
                    line.push_str(&format!("-{}", end));
                }
                line.push(')');
            }
            writeln!(w, "{}", line)?;
        }
        "write" => {
            let path = arg_str(&args, "file_path");
            let contents = arg_str(&args, "contents");
            writeln!(w, "- Write file: {}", or_unavailable(path))?;
            if !path.is_empty() && !contents.is_empty() {
                writeln!(w, "  - {} lines written", line_count(contents))?;
                writeln!(w)?;
                write_block(w, "", contents)?;
            }
        }
        "search_replace" => {
            let path = arg_str(&args, "file_path");
            let old = arg_str(&args, "old_string");
            let new = arg_str(&args, "new_string");
            writeln!(w, "- Edit file: {}", or_unavailable(path))?;
            if !path.is_empty() && (!old.is_empty() || !new.is_empty()) {
                let mut diff = String::new();
                if !old.trim().is_empty() {
                    for l in old.split('\n') {
                        diff.push_str(&format!("-{}\n", l));
                    }
                }
                if !new.trim().is_empty() {
                    for l in new.split('\n') {
                        diff.push_str(&format!("+{}\n", l));
                    }
                }
                if !diff.is_empty() {
                    writeln!(w)?;
                    write_block(w, "diff", &diff)?;
                }
                let net = line_count(new) as i64 - line_count(old) as i64;
                if net != 0 {
                    writeln!(w, "  - Net change: {:+} line(s)", net)?;
                }
            }
            if args.get("replace_all").and_then(Value::as_bool) == Some(true) {
                writeln!(w, "  - Replace all occurrences")?;
            }
        }
        "run_terminal_cmd" => {
            let command = arg_str(&args, "command");
            let background = args.get("is_background").and_then(Value::as_bool) == Some(true);
            if command.is_empty() {
                writeln!(w, "- Run: (args unavailable)")?;
            } else {
                writeln!(
                    w,
                    "- Run: `{}`{}",
                    command,
                    if background { " (background)" } else { "" }
                )?;
            }
            let output = result_obj
                .and_then(|r| r.get("output"))
                .and_then(Value::as_str)
                .filter(|o| !o.trim().is_empty());
            if let Some(output) = output {
                writeln!(w)?;
                write_block(w, "text", output)?;
            }
            if let Some(code) = result_obj
                .and_then(|r| r.get("exitCode"))
                .and_then(Value::as_i64)
                .filter(|c| *c != 0)
            {
                writeln!(w, "  - Exit code: {}", code)?;
            }
        }
        "grep" => {
            let pattern = arg_str(&args, "pattern");
            let path = arg_str(&args, "path");
            let mut opts = Vec::new();
            if args.get("-i").and_then(Value::as_bool) == Some(true) {
                opts.push("-i".to_string());
            }
            if let Some(glob) = args.get("glob").and_then(Value::as_str) {
                opts.push(format!("--glob {}", glob));
            }
            let opts = if opts.is_empty() {
                String::new()
            } else {
                format!(" ({})", opts.join(" "))
            };
            if path.is_empty() {
                writeln!(w, "- Grep{}: '{}'", opts, pattern)?;
            } else {
                writeln!(w, "- Grep{}: '{}' in {}", opts, pattern, path)?;
            }
            match args.get("output_mode").and_then(Value::as_str) {
                Some("files_with_matches") => {
                    if let Some(files) = result_obj
                        .and_then(|r| r.get("files"))
                        .and_then(Value::as_array)
                        .filter(|f| !f.is_empty())
                    {
                        writeln!(w, "  - Found in {} file(s)", files.len())?;
                    }
                }
                Some("count") => writeln!(w, "  - Output: match counts")?,
                _ => {}
            }
        }
        "list_dir" => {
            writeln!(w, "- Listed directory: {}", arg_str(&args, "target_directory"))?;
            if let Some(globs) = args.get("ignore_globs").and_then(Value::as_array)
                && !globs.is_empty()
            {
                let globs: Vec<String> = globs.iter().map(value_text).collect();
                writeln!(w, "  - Ignoring: {}", globs.join(", "))?;
            }
        }
        "glob_file_search" => {
            writeln!(w, "- File search: {}", arg_str(&args, "glob_pattern"))?;
            let dir = arg_str(&args, "target_directory");
            if !dir.is_empty() {
                writeln!(w, "  - In: {}", dir)?;
            }
        }
        "delete_file" => {
            writeln!(w, "- Delete file: {}", arg_str(&args, "target_file"))?;
        }
        "edit_notebook" => {
            let cell = args.get("cell_idx").map(value_text).unwrap_or_default();
            let is_new = args.get("is_new_cell").and_then(Value::as_bool) == Some(true);
            writeln!(
                w,
                "- Edit notebook: {} ({})",
                arg_str(&args, "target_notebook"),
                if is_new {
                    format!("new cell at {}", cell)
                } else {
                    format!("cell {}", cell)
                }
            )?;
        }
        "todo_write" => {
            let todos = args
                .get("todos")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let merge = args.get("merge").and_then(Value::as_bool) == Some(true);
            writeln!(
                w,
                "- TODO: {} {} item(s)",
                if merge { "Update" } else { "Create" },
                todos.len()
            )?;
            for todo in todos.iter().filter(|t| t.is_object()) {
                writeln!(w, "  - {}", todo_line(todo))?;
            }
        }
        "web_search" => {
            writeln!(w, "- Web search: {}", arg_str(&args, "search_term"))?;
            if let Some(r) = result_obj {
                let refs = r
                    .get("references")
                    .and_then(Value::as_array)
                    .filter(|refs| !refs.is_empty());
                if let Some(refs) = refs {
                    writeln!(w, "  - {} result(s)", refs.len())?;
                    for (i, reference) in refs.iter().filter(|r| r.is_object()).enumerate() {
                        let title = reference
                            .get("title")
                            .map(value_text)
                            .unwrap_or_else(|| "Untitled".into());
                        writeln!(w, "  {}. {}", i + 1, title)?;
                        if let Some(chunk) = reference
                            .get("chunk")
                            .and_then(Value::as_str)
                            .filter(|c| !c.is_empty())
                        {
                            writeln!(w, "     {}", chunk)?;
                        }
                    }
                } else if r.get("rejected").and_then(Value::as_bool) == Some(true) {
                    writeln!(w, "  - Search was rejected/cancelled")?;
                }
            }
        }
        _ => {
            writeln!(w, "- {}", name)?;
            if !args.is_empty() {
                let pretty = serde_json::to_string_pretty(&Value::Object(args))
                    .map_err(io::Error::other)?;
                writeln!(w)?;
                write_block(w, "json", &pretty)?;
            }
        }
    }

    // Terminal output and exit code are printed by the layout above.
    let shown: &[&str] = if name == "run_terminal_cmd" {
        &["output", "exitCode"]
    } else {
        &[]
    };
    write_tool_result(w, tool, shown)?;

    if let Some(status) = tool.status.as_deref().filter(|s| !s.is_empty() && *s != "completed") {
        writeln!(w, "  - Status: {}", status)?;
    }
    Ok(())
}
