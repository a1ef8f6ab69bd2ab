use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::convert::{
    ConversionEngine, ConversionResult, LARGE_FILE_CONFIRM_BYTES, LargeFilePolicy, Outcome,
};
use crate::encoding::EncodingName;
use crate::files::resolve_targets;
use crate::host::ProgressReporter;
use crate::report::describe_plan;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub total_files: usize,
    pub processed: usize,
    pub converted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub results: Vec<ConversionResult>,
}

impl BatchResult {
    fn record(&mut self, result: ConversionResult) {
        match result.outcome() {
            Outcome::Converted => self.converted += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.errors += 1,
        }
        self.results.push(result);
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results
            .iter()
            .filter(|result| result.outcome() == Outcome::Failed)
    }
}

/// Runs the conversion engine over many files in bounded parallel waves.
pub struct BatchOrchestrator<'a> {
    engine: &'a ConversionEngine<'a>,
    progress: &'a dyn ProgressReporter,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(engine: &'a ConversionEngine<'a>, progress: &'a dyn ProgressReporter) -> Self {
        Self { engine, progress }
    }

    /// Expands `paths` and `globs`, asks for confirmation, then converts
    /// every candidate. Per-file problems end up in the results; only setup
    /// failures are returned as errors.
    pub fn process_many(
        &self,
        paths: &[PathBuf],
        globs: &[String],
        source: Option<EncodingName>,
        target: EncodingName,
        label: &str,
    ) -> Result<BatchResult> {
        let services = self.engine.services();
        let settings = self.engine.settings();
        let candidates = resolve_targets(
            services.storage,
            self.engine.classifier(),
            paths,
            globs,
            settings.include_hidden,
        )?;
        if candidates.is_empty() {
            info!(label, "no files to convert");
            return Ok(BatchResult::default());
        }

        let plan = describe_plan(label, &candidates, source, target, settings);
        if !services.prompter.confirm(&plan)? {
            info!(label, "batch declined");
            return Ok(BatchResult::default());
        }
        let large_files = self.settle_large_files(&candidates)?;

        let wave_size = settings.concurrency.min(candidates.len()).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(wave_size)
            .thread_name(|idx| format!("transcode-{idx}"))
            .build()
            .context("starting conversion workers")?;

        let mut batch = BatchResult {
            total_files: candidates.len(),
            ..BatchResult::default()
        };
        for (index, wave) in candidates.chunks(wave_size).enumerate() {
            if self.progress.is_cancelled() {
                info!(label, processed = batch.processed, "batch cancelled");
                batch.cancelled = true;
                break;
            }

            debug!(wave = index + 1, files = wave.len(), "starting wave");
            let results: Vec<ConversionResult> = pool.install(|| {
                wave.par_iter()
                    .map(|path| self.engine.convert(path, source, target, large_files))
                    .collect()
            });
            batch.processed += wave.len();
            for result in results {
                batch.record(result);
            }

            let percent = batch.processed as f64 * 100.0 / batch.total_files as f64;
            let message = format!(
                "{label}: {}/{} files ({})",
                batch.processed,
                batch.total_files,
                representative_name(wave)
            );
            self.progress.report(percent, &message);
        }

        Ok(batch)
    }

    /// Asks once, before any wave starts, whether files above the
    /// confirmation size may be converted.
    fn settle_large_files(&self, candidates: &[PathBuf]) -> Result<LargeFilePolicy> {
        let storage = self.engine.services().storage;
        let large: Vec<(&PathBuf, u64)> = candidates
            .iter()
            .filter_map(|path| {
                let size = storage.stat_size(path).ok()?;
                (size > LARGE_FILE_CONFIRM_BYTES).then_some((path, size))
            })
            .collect();
        if large.is_empty() {
            // Nothing to ask about; a file that grows past the limit
            // mid-batch is skipped.
            return Ok(LargeFilePolicy::Declined);
        }

        for (path, size) in &large {
            warn!(path = %path.display(), size, "large file in batch");
        }
        let message = format!(
            "{} file(s) exceed {} MB. Convert them anyway?",
            large.len(),
            LARGE_FILE_CONFIRM_BYTES / (1024 * 1024)
        );
        let approved = self.engine.services().prompter.confirm(&message)?;
        Ok(if approved {
            LargeFilePolicy::Approved
        } else {
            LargeFilePolicy::Declined
        })
    }
}

fn representative_name(wave: &[PathBuf]) -> String {
    wave.last()
        .map(|path| display_name(path))
        .unwrap_or_default()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
