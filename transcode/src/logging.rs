use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const LOG_DIR: &str = ".transcode";
const LOG_FILE: &str = "change_log.jsonl";
const MAX_ENTRIES: usize = 500;
const FILTER_ENV: &str = "TRANSCODE_LOG";

#[derive(Debug, Serialize)]
pub struct ChangeLogEntry<'a> {
    pub timestamp: &'a str,
    pub command: &'a str,
    pub path: &'a Path,
    pub action: &'a str,
    pub detail: &'a str,
}

/// Append-only record of what happened to each file.
///
/// Built once at startup and handed to every component by reference.
/// Writes are serialised, so conversions running in parallel can record
/// freely. Failing to write the log never fails the operation being logged.
#[derive(Debug)]
pub struct OutputLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl OutputLog {
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
        }
        Ok(Self {
            path: Some(dir.join(LOG_FILE)),
            lock: Mutex::new(()),
        })
    }

    /// A log that only forwards to `tracing`.
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, command: &str, path: &Path, action: &str, detail: &str) {
        info!(command, path = %path.display(), action, detail);
        let Some(log_path) = &self.path else {
            return;
        };
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = ChangeLogEntry {
            timestamp: &timestamp,
            command,
            path,
            action,
            detail,
        };
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = append_entry(log_path, &entry) {
            warn!(error = %format!("{err:#}"), "could not write change log");
        }
    }

    pub fn tail(&self, count: usize) -> Result<Vec<String>> {
        let Some(log_path) = &self.path else {
            return Ok(Vec::new());
        };
        if !log_path.exists() {
            return Ok(Vec::new());
        }
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lines = read_lines(log_path)?;
        let start = lines.len().saturating_sub(count);
        Ok(lines[start..].to_vec())
    }
}

fn append_entry(log_path: &Path, entry: &ChangeLogEntry<'_>) -> Result<()> {
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_path)
        .with_context(|| format!("opening {log_path:?}"))?;
    writeln!(file, "{json}")?;
    truncate_log(log_path)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {path:?}"))?;
    let reader = BufReader::new(file);
    Ok(reader.lines().collect::<Result<_, _>>()?)
}

fn truncate_log(path: &Path) -> Result<()> {
    let lines = read_lines(path)?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}

/// Installs the stderr `tracing` subscriber. The filter comes from
/// `TRANSCODE_LOG` and defaults to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
