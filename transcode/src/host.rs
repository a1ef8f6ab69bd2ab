use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

use crate::codec::Codec;
use crate::encoding::EncodingName;
use crate::logging::OutputLog;
use crate::storage::ByteStorage;

/// Questions asked of the user. Never called from inside a running wave.
pub trait Prompter: Send + Sync {
    fn confirm(&self, message: &str) -> Result<bool>;

    /// Returns the index of the chosen option, or `None` when dismissed.
    fn choose(&self, message: &str, options: &[&str]) -> Result<Option<usize>>;
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: f64, message: &str);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// The application hosting the files, typically an editor.
pub trait DocumentHost: Send + Sync {
    /// Encoding the host already knows the document to be in.
    fn encoding_hint(&self, _path: &Path) -> Result<Option<EncodingName>> {
        Ok(None)
    }

    /// Ask the host to reload a file rewritten on disk.
    fn reopen(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Collaborators shared by the engine, the backup manager and the batch
/// orchestrator.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub storage: &'a dyn ByteStorage,
    pub codec: &'a dyn Codec,
    pub host: &'a dyn DocumentHost,
    pub prompter: &'a dyn Prompter,
    pub log: &'a OutputLog,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ApprovalDecision {
    Apply,
    Skip,
}

/// Reads answers from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str) -> Result<bool> {
        loop {
            print_prompt(&format!("{message} [y]es/[n]o: "))?;
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            match parse_approval(&input) {
                Some(ApprovalDecision::Apply) => return Ok(true),
                Some(ApprovalDecision::Skip) => return Ok(false),
                None => println!("Please enter y or n."),
            }
        }
    }

    fn choose(&self, message: &str, options: &[&str]) -> Result<Option<usize>> {
        println!("{message}");
        for (idx, option) in options.iter().enumerate() {
            println!("  {}) {option}", idx + 1);
        }
        loop {
            print_prompt("choice (empty to dismiss): ")?;
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            let trimmed = input.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match trimmed.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => println!("Please enter a number between 1 and {}.", options.len()),
            }
        }
    }
}

fn parse_approval(input: &str) -> Option<ApprovalDecision> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" | "" => Some(ApprovalDecision::Apply),
        "n" | "no" => Some(ApprovalDecision::Skip),
        _ => None,
    }
}

fn print_prompt(message: &str) -> Result<()> {
    print!("{message}");
    io::stdout().flush()?;
    Ok(())
}

/// Answers every question without asking: confirms, and picks the first
/// option of a choice.
#[derive(Debug, Default)]
pub struct AutoApprove;

impl Prompter for AutoApprove {
    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(true)
    }

    fn choose(&self, _message: &str, options: &[&str]) -> Result<Option<usize>> {
        Ok((!options.is_empty()).then_some(0))
    }
}

/// Progress bar on stderr, scaled to percent. Cancellation comes from the
/// shared token, which the CLI trips on Ctrl-C.
pub struct TerminalProgress {
    bar: ProgressBar,
    token: CancellationToken,
}

impl TerminalProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self::with_target(token, ProgressDrawTarget::stderr())
    }

    fn with_target(token: CancellationToken, target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), target);
        if let Ok(style) =
            ProgressStyle::with_template("  [{bar:30.cyan/dim}] {pos:>3}% {wide_msg}")
        {
            bar.set_style(style.progress_chars("━╸─"));
        }
        Self { bar, token }
    }
}

impl ProgressReporter for TerminalProgress {
    fn report(&self, percent: f64, message: &str) {
        self.bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
        self.bar.set_message(message.to_string());
        if percent >= 100.0 {
            self.bar.finish();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

#[derive(Debug, Default)]
pub struct SilentProgress {
    token: CancellationToken,
}

impl SilentProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl ProgressReporter for SilentProgress {
    fn report(&self, _percent: f64, _message: &str) {}

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Host backed by a fixed table of encoding hints, used by the CLI where no
/// editor is attached.
#[derive(Debug, Default, Clone)]
pub struct StaticHost {
    hints: BTreeMap<PathBuf, EncodingName>,
}

impl StaticHost {
    pub fn new(hints: BTreeMap<PathBuf, EncodingName>) -> Self {
        let hints = hints
            .into_iter()
            .map(|(path, encoding)| (canonical_or_same(&path), encoding))
            .collect();
        Self { hints }
    }
}

impl DocumentHost for StaticHost {
    fn encoding_hint(&self, path: &Path) -> Result<Option<EncodingName>> {
        Ok(self.hints.get(&canonical_or_same(path)).copied())
    }

    fn reopen(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "file rewritten on disk; reload it in open editors");
        Ok(())
    }
}

fn canonical_or_same(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
