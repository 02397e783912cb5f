//! Read-only access to Cursor's `state.vscdb` files.

use crate::decoder::RawEntry;
use eyre::{Result, WrapErr};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DISK_KV_QUERY: &str = "SELECT key, value FROM cursorDiskKV \
     WHERE key LIKE 'composerData:%' \
        OR key LIKE 'bubbleId:%' \
        OR key LIKE 'messageRequestContext:%'";
const ITEM_TABLE_QUERY: &str =
    "SELECT key, value FROM ItemTable WHERE key = 'composer.composerData'";

/// Global storage database of a default Cursor install.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| {
        d.join("Cursor")
            .join("User")
            .join("globalStorage")
            .join("state.vscdb")
    })
}

/// Directory holding one subdirectory per workspace, each with its own database.
pub fn default_workspace_storage() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Cursor").join("User").join("workspaceStorage"))
}

/// Every `*/state.vscdb` under `dir`, sorted. A missing directory yields none.
pub fn workspace_db_paths(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        debug!("No workspace storage at {}", dir.display());
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = read
        .flatten()
        .map(|entry| entry.path().join("state.vscdb"))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    paths
}

pub fn open_db(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open database: {}", path.display()))
}

/// Read every conversation-related row. The item table index comes first so
/// that its metadata is overridden by per-session rows.
pub fn read_entries(conn: &Connection) -> Result<Vec<RawEntry>> {
    let mut entries = query_entries(conn, ITEM_TABLE_QUERY)?;
    entries.extend(query_entries(conn, DISK_KV_QUERY)?);
    Ok(entries)
}

/// Open `path`, read it, and close it again.
pub fn read_db(path: &Path) -> Result<Vec<RawEntry>> {
    let conn = open_db(path)?;
    let entries = read_entries(&conn)?;
    debug!("Read {} rows from {}", entries.len(), path.display());
    Ok(entries)
}

fn query_entries(conn: &Connection, sql: &str) -> Result<Vec<RawEntry>> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        // Older or partial databases lack one of the two tables.
        Err(e) if e.to_string().contains("no such table") => {
            debug!("Skipping query: {}", e);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).wrap_err("Failed to prepare query"),
    };
    let mut rows = stmt.query([]).wrap_err("Failed to execute query")?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next().wrap_err("Failed to read row")? {
        let key = match row.get_ref(0)? {
            ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            _ => continue,
        };
        let value = match row.get_ref(1)? {
            ValueRef::Text(v) | ValueRef::Blob(v) => Some(v.to_vec()),
            ValueRef::Null => None,
            ValueRef::Integer(i) => Some(i.to_string().into_bytes()),
            ValueRef::Real(f) => Some(f.to_string().into_bytes()),
        };
        entries.push(RawEntry { key, value });
    }
    Ok(entries)
}
