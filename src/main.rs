use chrono::DateTime;
use clap::Parser;
use cursor_chat_export::{export, store, utils::ExportConfig};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Export Cursor AI chat history to Markdown files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to export markdown files.
    /// Defaults to ./cursor-chat-export if not set in config.
    #[arg(value_name = "TARGET_DIR")]
    target_dir: Option<PathBuf>,

    /// Path to Cursor's global state.vscdb.
    /// Auto-detected if omitted.
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/cursor-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not read session metadata from workspace databases.
    #[arg(long)]
    no_workspaces: bool,

    /// Only export conversations whose first message is at or after this
    /// Unix time in milliseconds.
    #[arg(long, value_name = "MS")]
    min_timestamp_ms: Option<i64>,

    /// List previously exported files and whether they were edited, then exit.
    #[arg(long)]
    status: bool,

    /// Print each warning and each file written, skipped or backed up.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the run summary.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    target_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    include_workspaces: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("cursor-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "cursor_chat_export=debug"
    } else {
        "cursor_chat_export=error"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve target_dir (CLI > Config > Default)
    let target_dir = cli
        .target_dir
        .or(file_cfg.target_dir)
        .unwrap_or_else(|| PathBuf::from("cursor-chat-export"));

    if cli.status {
        return export::print_status(&target_dir);
    }

    // 3. Resolve db_path (CLI > Config > Auto-detect)
    let db_path = cli
        .db
        .or(file_cfg.db_path)
        .or_else(store::default_db_path)
        .ok_or_else(|| {
            eyre!("Could not determine database path.\nUse --db to specify manually, or set db_path in config.toml.")
        })?;

    if !db_path.exists() {
        return Err(eyre!(
            "Database not found at: {}\nUse --db to specify the path manually.",
            db_path.display()
        ));
    }

    // 4. Workspace databases (CLI flag > Config > on)
    let include_workspaces = !cli.no_workspaces && file_cfg.include_workspaces.unwrap_or(true);
    let workspace_dbs = if include_workspaces {
        store::default_workspace_storage()
            .map(|dir| store::workspace_db_paths(&dir))
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let since = cli
        .min_timestamp_ms
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| eyre!("--min-timestamp-ms {} is out of range", ms))
        })
        .transpose()?;

    // 5. Build the Export Config
    let config = ExportConfig {
        target_dir,
        db_path,
        workspace_dbs,
        since,
        quiet: cli.quiet,
    };

    // 6. Run the export
    export::execute(&config)?;
    Ok(())
}
