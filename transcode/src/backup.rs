use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::convert::ConversionResult;
use crate::host::Services;

pub const BACKUP_SUFFIX: &str = ".bak";
pub const MAX_BACKUP_ATTEMPTS: usize = 100;
/// `.bak` plus `.bak.1` through `.bak.5` are considered when restoring.
const RESTORE_CANDIDATES: usize = 6;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("no backup found for {}", .0.display())]
    NoBackup(PathBuf),
    #[error("gave up after {attempts} backup slots for {}", .path.display())]
    Exhausted { path: PathBuf, attempts: usize },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        BackupError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoSummary {
    pub eligible: usize,
    pub restored: Vec<PathBuf>,
    pub failures: Vec<UndoFailure>,
    pub declined: bool,
}

/// Backup path for slot `index`: `file.bak`, then `file.bak.1`, `file.bak.2`, ...
pub fn backup_candidate(path: &Path, index: usize) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "transcode_file".into());
    name.push(BACKUP_SUFFIX);
    if index > 0 {
        name.push(format!(".{index}"));
    }
    path.with_file_name(name)
}

pub struct BackupManager<'a> {
    services: Services<'a>,
    auto_reopen: bool,
}

impl<'a> BackupManager<'a> {
    pub fn new(services: Services<'a>, auto_reopen: bool) -> Self {
        Self {
            services,
            auto_reopen,
        }
    }

    /// Copies the current bytes of `path` into the first free backup slot.
    /// A failed backup is reported and returns `false`; the caller carries
    /// on without undo for that file.
    pub fn create_backup(&self, path: &Path) -> bool {
        match self.try_create_backup(path) {
            Ok(backup) => {
                self.services.log.record(
                    "backup",
                    path,
                    "created",
                    &backup.display().to_string(),
                );
                true
            }
            Err(err @ BackupError::Exhausted { .. }) => {
                error!(path = %path.display(), "{err}");
                self.services.log.record("backup", path, "failed", &err.to_string());
                false
            }
            Err(err) => {
                warn!(path = %path.display(), "backup not created: {err}");
                self.services.log.record("backup", path, "failed", &err.to_string());
                false
            }
        }
    }

    pub fn try_create_backup(&self, path: &Path) -> Result<PathBuf, BackupError> {
        let storage = self.services.storage;
        let original = storage
            .read_bytes(path)
            .map_err(|err| BackupError::io("reading", path, err))?;

        for attempt in 0..MAX_BACKUP_ATTEMPTS {
            let candidate = backup_candidate(path, attempt);
            match storage.create_new(&candidate, &original) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(BackupError::io("creating backup", &candidate, err)),
            }
        }

        Err(BackupError::Exhausted {
            path: path.to_path_buf(),
            attempts: MAX_BACKUP_ATTEMPTS,
        })
    }

    /// The most recently modified of `.bak` and `.bak.1` through `.bak.5`.
    pub fn find_latest_backup(&self, path: &Path) -> Option<PathBuf> {
        let storage = self.services.storage;
        (0..RESTORE_CANDIDATES)
            .map(|idx| backup_candidate(path, idx))
            .filter_map(|candidate| {
                let modified = storage.modified(&candidate).ok()?;
                Some((modified, candidate))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, candidate)| candidate)
    }

    /// Restores `path` from its latest backup and deletes that backup.
    /// Returns the backup that was consumed.
    pub fn undo_conversion(&self, path: &Path) -> Result<PathBuf, BackupError> {
        let storage = self.services.storage;
        let backup = self
            .find_latest_backup(path)
            .ok_or_else(|| BackupError::NoBackup(path.to_path_buf()))?;
        let original = storage
            .read_bytes(&backup)
            .map_err(|err| BackupError::io("reading backup", &backup, err))?;
        storage
            .write_bytes(path, &original)
            .map_err(|err| BackupError::io("restoring", path, err))?;
        storage
            .delete_file(&backup)
            .map_err(|err| BackupError::io("removing backup", &backup, err))?;

        self.services
            .log
            .record("undo", path, "restored", &backup.display().to_string());
        if self.auto_reopen {
            if let Err(err) = self.services.host.reopen(path) {
                warn!(path = %path.display(), "reopen after undo failed: {err:#}");
            }
        }
        Ok(backup)
    }

    /// Restores every converted file of a batch that has a backup, after
    /// one confirmation.
    pub fn undo_batch(&self, results: &[ConversionResult]) -> Result<UndoSummary> {
        let eligible = eligible_for_undo(results).count();
        if eligible == 0 {
            return Ok(UndoSummary::default());
        }

        let message = format!("Restore {eligible} file(s) from their backups?");
        if !self.services.prompter.confirm(&message)? {
            return Ok(UndoSummary {
                eligible,
                declined: true,
                ..UndoSummary::default()
            });
        }
        Ok(self.restore_batch(results))
    }

    /// Restores every converted file of a batch that has a backup, one at a
    /// time, without asking.
    pub fn restore_batch(&self, results: &[ConversionResult]) -> UndoSummary {
        let mut summary = UndoSummary::default();
        for result in eligible_for_undo(results) {
            summary.eligible += 1;
            match self.undo_conversion(&result.file_path) {
                Ok(_) => summary.restored.push(result.file_path.clone()),
                Err(err) => summary.failures.push(UndoFailure {
                    path: result.file_path.clone(),
                    error: err.to_string(),
                }),
            }
        }
        summary
    }
}

fn eligible_for_undo(results: &[ConversionResult]) -> impl Iterator<Item = &ConversionResult> {
    results
        .iter()
        .filter(|result| result.success && !result.skipped && result.backup_created)
}

/// Every backup file under `root`, sorted.
pub fn find_backup_files(root: &Path, include_hidden: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        let relative = e.path().strip_prefix(root).unwrap_or(e.path());
        include_hidden || !has_hidden_component(relative)
    }) {
        let entry = entry?;
        if entry.file_type().is_file() {
            let path = entry.into_path();
            if is_backup_file(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => name
            .to_str()
            .map(|segment| segment.starts_with('.'))
            .unwrap_or(false),
        _ => false,
    })
}

/// Matches `name.bak` and `name.bak.N`.
pub fn is_backup_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    let Some((base, suffix)) = lower.rsplit_once(BACKUP_SUFFIX) else {
        return false;
    };
    if base.is_empty() {
        return false;
    }
    match suffix.strip_prefix('.') {
        None => suffix.is_empty(),
        Some(digits) => !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()),
    }
}
