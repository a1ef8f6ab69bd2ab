use std::path::PathBuf;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::json;

use crate::backup::UndoSummary;
use crate::batch::BatchResult;
use crate::config::Settings;
use crate::convert::{ConversionResult, Outcome};
use crate::detect::DetectionResult;
use crate::encoding::EncodingName;

/// Failures listed in a batch summary before the remainder is counted.
const FAILURE_PREVIEW: usize = 5;
/// Candidate files listed in the confirmation prompt.
const PLAN_PREVIEW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Table,
    Json,
}

impl ReportFormat {
    pub fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(anyhow!(
                "unsupported format '{other}' (expected table or json)"
            )),
        }
    }
}

/// Text shown when asking whether a batch should run.
pub fn describe_plan(
    label: &str,
    candidates: &[PathBuf],
    source: Option<EncodingName>,
    target: EncodingName,
    settings: &Settings,
) -> String {
    let mut lines = vec![
        format!("{label}: {} file(s)", candidates.len()),
        format!(
            "encoding: {} -> {target}",
            source.map(EncodingName::canonical).unwrap_or("auto-detect")
        ),
        format!("concurrency: {}", settings.concurrency),
        format!(
            "backups: {}",
            if settings.create_backup { "yes" } else { "no" }
        ),
    ];
    if !settings.exclude_patterns.is_empty() {
        lines.push(format!("exclude globs: {:?}", settings.exclude_patterns));
    }
    for path in candidates.iter().take(PLAN_PREVIEW) {
        lines.push(format!("  - {}", path.display()));
    }
    if candidates.len() > PLAN_PREVIEW {
        lines.push(format!("  ... and {} more", candidates.len() - PLAN_PREVIEW));
    }
    lines.push("Proceed?".to_string());
    lines.join("\n")
}

pub fn format_result(result: &ConversionResult) -> String {
    let path = result.file_path.display();
    match result.outcome() {
        Outcome::Converted => {
            let backup = if result.backup_created {
                " (backup created)"
            } else {
                ""
            };
            format!("converted {path}: {}{backup}", result.detail())
        }
        Outcome::Skipped => format!("skipped {path}: {}", result.detail()),
        Outcome::Failed => format!("failed {path}: {}", result.detail()),
    }
}

pub fn format_batch_summary(batch: &BatchResult, detailed: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "processed {}/{} file(s): {} converted, {} skipped, {} failed{}",
        batch.processed,
        batch.total_files,
        batch.converted,
        batch.skipped,
        batch.errors,
        if batch.cancelled { " (cancelled)" } else { "" }
    )];

    if detailed {
        lines.extend(batch.results.iter().map(|r| format!("  {}", format_result(r))));
        return lines;
    }

    let failures: Vec<&ConversionResult> = batch.failures().collect();
    for failure in failures.iter().take(FAILURE_PREVIEW) {
        lines.push(format!("  {}", format_result(failure)));
    }
    if failures.len() > FAILURE_PREVIEW {
        lines.push(format!("  ... and {} more", failures.len() - FAILURE_PREVIEW));
    }
    lines
}

pub fn format_undo_summary(summary: &UndoSummary) -> Vec<String> {
    if summary.declined {
        return vec!["undo declined; files left as converted.".to_string()];
    }
    let mut lines = vec![format!(
        "restored {}/{} file(s)",
        summary.restored.len(),
        summary.eligible
    )];
    for failure in &summary.failures {
        lines.push(format!("  failed {}: {}", failure.path.display(), failure.error));
    }
    lines
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_detections(rows: &[(PathBuf, DetectionResult)], format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Table => {
            for (path, detection) in rows {
                println!(
                    "{:<14} {:>5.2}  {:<22} {}",
                    detection.encoding.canonical(),
                    detection.confidence,
                    detection.method.to_string(),
                    path.display()
                );
            }
        }
        ReportFormat::Json => {
            let rows: Vec<_> = rows
                .iter()
                .map(|(path, detection)| {
                    json!({
                        "path": path,
                        "encoding": detection.encoding,
                        "confidence": detection.confidence,
                        "method": detection.method,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string(&rows)?);
        }
    }
    Ok(())
}
