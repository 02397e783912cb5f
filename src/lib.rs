//! # cursor-chat-export
//!
//! A CLI tool that exports [Cursor](https://cursor.com) AI chat conversations to local
//! Markdown files, one file per conversation tab.
//!
//! ## What it does
//!
//! Cursor keeps chat history in a SQLite key/value table (`state.vscdb`). Every message
//! is its own row, keyed `bubbleId:<session>:<message>`, next to a `composerData:<session>`
//! row describing the tab. This tool reads those rows, groups messages by the session id
//! in their key, orders them by timestamp and writes each conversation as Markdown with
//! YAML frontmatter.
//!
//! The database is opened **read-only**, and closed before anything is written.
//!
//! ## Your edits are kept
//!
//! A ledger (`.export-ledger.json` in the target directory) records the checksum of
//! every file at the time it was written. If a file no longer matches, it was edited by
//! hand; it is copied to `<name>.modified_<YYYYMMDD_HHMMSS>.md` before being replaced.
//! Re-running with no new messages writes nothing.
//!
//! ## Usage
//!
//! ```sh
//! # Export all conversations to a directory
//! cursor-chat-export ~/notes/cursor-chats
//!
//! # Only conversations started after a point in time, with a custom DB path
//! cursor-chat-export ~/notes/cursor-chats --min-timestamp-ms 1700000000000 --db /path/to/state.vscdb
//!
//! # Which exported files have been edited since?
//! cursor-chat-export ~/notes/cursor-chats --status
//! ```
//!
//! Preferences can be persisted in `~/.config/cursor-chat-export/config.toml`.

pub mod assembler;
pub mod decoder;
pub mod export;
pub mod importer;
pub mod ledger;
pub mod renderer;
pub mod store;
pub mod utils;
