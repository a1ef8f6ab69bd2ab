#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use transcode::codec::EncodingRsCodec;
use transcode::host::{CancellationToken, DocumentHost, ProgressReporter, Prompter};
use transcode::logging::OutputLog;
use transcode::storage::FsStorage;
use transcode::Services;

static STORAGE: FsStorage = FsStorage;
static CODEC: EncodingRsCodec = EncodingRsCodec;
static HOST: NoHost = NoHost;

pub struct NoHost;
impl DocumentHost for NoHost {}

pub fn services<'a>(prompter: &'a dyn Prompter, log: &'a OutputLog) -> Services<'a> {
    services_with_host(prompter, log, &HOST)
}

pub fn services_with_host<'a>(
    prompter: &'a dyn Prompter,
    log: &'a OutputLog,
    host: &'a dyn DocumentHost,
) -> Services<'a> {
    Services {
        storage: &STORAGE,
        codec: &CODEC,
        host,
        prompter,
        log,
    }
}

/// Remembers every file it was asked to reopen.
#[derive(Default)]
pub struct RecordingHost {
    reopened: Mutex<Vec<PathBuf>>,
}

impl RecordingHost {
    pub fn reopened(&self) -> Vec<PathBuf> {
        self.reopened.lock().unwrap().clone()
    }
}

impl DocumentHost for RecordingHost {
    fn reopen(&self, path: &Path) -> Result<()> {
        self.reopened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Answers confirmations from a script, then approves everything.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, message: &str) -> Result<bool> {
        self.asked.lock().unwrap().push(message.to_string());
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(true))
    }

    fn choose(&self, message: &str, _options: &[&str]) -> Result<Option<usize>> {
        self.asked.lock().unwrap().push(message.to_string());
        Ok(Some(0))
    }
}

/// Records every report; optionally requests cancellation after the
/// given number of reports.
#[derive(Default)]
pub struct RecordingProgress {
    reports: Mutex<Vec<(f64, String)>>,
    cancel_after: Option<usize>,
    token: CancellationToken,
}

impl RecordingProgress {
    pub fn cancelling_after(reports: usize) -> Self {
        Self {
            cancel_after: Some(reports),
            ..Self::default()
        }
    }

    pub fn percents(&self) -> Vec<f64> {
        self.reports.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.reports.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, percent: f64, message: &str) {
        let mut reports = self.reports.lock().unwrap();
        reports.push((percent, message.to_string()));
        if self.cancel_after == Some(reports.len()) {
            self.token.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub fn write_file(root: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, bytes).unwrap();
    path
}

/// Canonical temp root, so paths compare equal to discovered ones.
pub fn canonical_root(dir: &tempfile::TempDir) -> PathBuf {
    fs::canonicalize(dir.path()).unwrap()
}
