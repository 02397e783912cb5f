use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub target_dir: PathBuf,
    pub db_path: PathBuf,
    /// Additional databases read for session metadata only.
    pub workspace_dbs: Vec<PathBuf>,
    /// Only export threads whose first message is at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub quiet: bool,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `YYYY-MM-DD HH:MM:SS UTC`, used for message headers and the status report.
pub fn format_instant(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Compact stamp embedded in backup file names.
pub fn backup_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}
