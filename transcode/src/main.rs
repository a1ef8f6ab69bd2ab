use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::slice;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use is_terminal::IsTerminal;
use tokio::signal;
use tracing::warn;

use transcode::backup::find_backup_files;
use transcode::codec::EncodingRsCodec;
use transcode::config::{Settings, SettingsOverrides, resolve_settings};
use transcode::files::resolve_targets;
use transcode::host::{
    AutoApprove, CancellationToken, ProgressReporter, Prompter, Services, SilentProgress,
    StaticHost, TerminalProgress, TerminalPrompter,
};
use transcode::logging::{LOG_DIR, OutputLog, init_tracing};
use transcode::report::{
    ReportFormat, format_batch_summary, format_result, format_undo_summary, print_detections,
    print_json, print_lines,
};
use transcode::storage::{ByteStorage, FsStorage};
use transcode::{
    BatchOrchestrator, ConversionEngine, ConversionResult, EncodingName, LargeFilePolicy, Outcome,
};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Convert(cmd) => handle_convert(cmd)?,
        Command::Batch(cmd) => handle_batch(cmd)?,
        Command::Detect(cmd) => handle_detect(cmd)?,
        Command::Undo(cmd) => handle_undo(cmd)?,
        Command::Cleanup(cmd) => handle_cleanup(cmd)?,
        Command::Log(cmd) => handle_log(cmd)?,
    }

    Ok(())
}

/// Everything a command needs, built once from the command line and the
/// settings file.
struct App {
    settings: Settings,
    log: OutputLog,
    storage: FsStorage,
    codec: EncodingRsCodec,
    host: StaticHost,
    prompter: Box<dyn Prompter>,
    token: CancellationToken,
    json: bool,
}

impl App {
    fn build(common: &CommonArgs) -> Result<Self> {
        let overrides = SettingsOverrides {
            concurrency: common.concurrency,
            no_backup: common.no_backup,
            show_detailed_results: common.detailed,
            exclude_patterns: common.exclude.clone(),
            include_hidden: common.include_hidden,
            hints: common.hints.clone(),
        };
        let settings = resolve_settings(common.config.as_deref(), &overrides)?;
        let log_dir = common
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(LOG_DIR));
        let log = OutputLog::open(&log_dir)?;
        let prompter: Box<dyn Prompter> = if common.auto_apply {
            Box::new(AutoApprove)
        } else {
            Box::new(TerminalPrompter)
        };

        Ok(Self {
            host: StaticHost::new(settings.hints.clone()),
            settings,
            log,
            storage: FsStorage,
            codec: EncodingRsCodec,
            prompter,
            token: CancellationToken::new(),
            json: common.json,
        })
    }

    fn services(&self) -> Services<'_> {
        Services {
            storage: &self.storage,
            codec: &self.codec,
            host: &self.host,
            prompter: self.prompter.as_ref(),
            log: &self.log,
        }
    }

    fn progress(&self) -> Box<dyn ProgressReporter> {
        if !self.json && io::stderr().is_terminal() {
            Box::new(TerminalProgress::new(self.token.clone()))
        } else {
            Box::new(SilentProgress::new(self.token.clone()))
        }
    }
}

fn handle_convert(cmd: ConvertCommand) -> Result<()> {
    let app = App::build(&cmd.common)?;
    let services = app.services();
    let engine = ConversionEngine::new(services, &app.settings)?;
    let result = engine.convert(&cmd.path, cmd.from.0, cmd.to, LargeFilePolicy::Ask);

    if app.json {
        print_json(&result)?;
    } else {
        println!("{}", format_result(&result));
    }

    if offers_undo(app.json, slice::from_ref(&result)) {
        let choice = services.prompter.choose(
            &format!("{} converted. Keep the change?", cmd.path.display()),
            &["Keep", "Undo"],
        )?;
        if choice == Some(1) {
            let backup = engine.backups().undo_conversion(&cmd.path)?;
            println!("restored {} from {}", cmd.path.display(), backup.display());
        }
    }
    Ok(())
}

fn handle_batch(cmd: BatchCommand) -> Result<()> {
    if cmd.paths.is_empty() && cmd.globs.is_empty() {
        bail!("no inputs; pass paths or --glob patterns");
    }
    let app = App::build(&cmd.common)?;
    let services = app.services();
    let engine = ConversionEngine::new(services, &app.settings)?;
    watch_interrupts(app.token.clone())?;
    let progress = app.progress();
    let orchestrator = BatchOrchestrator::new(&engine, progress.as_ref());
    let batch = orchestrator.process_many(
        &cmd.paths,
        &cmd.globs,
        cmd.from.0,
        cmd.to,
        "batch convert",
    )?;

    if app.json {
        print_json(&batch)?;
    } else if batch.total_files == 0 {
        println!("nothing converted.");
    } else {
        print_lines(&format_batch_summary(
            &batch,
            app.settings.show_detailed_results,
        ));
    }

    if offers_undo(app.json, &batch.results) {
        let choice = services
            .prompter
            .choose("Keep the converted files?", &["Keep", "Undo all"])?;
        if choice == Some(1) {
            let summary = engine.backups().restore_batch(&batch.results);
            print_lines(&format_undo_summary(&summary));
        }
    }
    Ok(())
}

/// Keep/undo is offered only when something can be restored, and never
/// after a JSON document has been printed.
fn offers_undo(json: bool, results: &[ConversionResult]) -> bool {
    !json
        && results
            .iter()
            .any(|r| r.outcome() == Outcome::Converted && r.backup_created)
}

/// First Ctrl-C cancels the batch before its next wave; a second one exits.
fn watch_interrupts(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting signal watcher")?;
    thread::Builder::new()
        .name("transcode-signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if signal::ctrl_c().await.is_err() {
                    return;
                }
                eprintln!("cancelling after the current wave; press Ctrl-C again to abort");
                token.cancel();
                if signal::ctrl_c().await.is_ok() {
                    process::exit(130);
                }
            });
        })
        .context("spawning signal watcher")?;
    Ok(())
}

fn handle_detect(cmd: DetectCommand) -> Result<()> {
    let format = ReportFormat::from_str(&cmd.format)?;
    let app = App::build(&cmd.common)?;
    let engine = ConversionEngine::new(app.services(), &app.settings)?;
    let files = resolve_targets(
        &app.storage,
        engine.classifier(),
        &cmd.paths,
        &cmd.globs,
        app.settings.include_hidden,
    )?;
    if files.is_empty() {
        println!("no files matched.");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(files.len());
    for path in files {
        match app.storage.read_bytes(&path) {
            Ok(bytes) => {
                let detection = engine.detector().detect(&bytes, Some(path.as_path()));
                rows.push((path, detection));
            }
            Err(err) => warn!(path = %path.display(), "unable to read: {err}"),
        }
    }
    print_detections(&rows, format)
}

fn handle_undo(cmd: UndoCommand) -> Result<()> {
    let app = App::build(&cmd.common)?;
    let engine = ConversionEngine::new(app.services(), &app.settings)?;
    let backup = engine
        .backups()
        .undo_conversion(&cmd.path)
        .with_context(|| format!("undoing conversion of {}", cmd.path.display()))?;
    println!("restored {} from {}", cmd.path.display(), backup.display());
    Ok(())
}

fn handle_cleanup(cmd: CleanupCommand) -> Result<()> {
    let app = App::build(&cmd.common)?;
    let root = fs::canonicalize(&cmd.root)
        .with_context(|| format!("resolving cleanup root {}", cmd.root.display()))?;
    if !root.is_dir() {
        bail!("cleanup root {} is not a directory", root.display());
    }
    let candidates = find_backup_files(&root, app.settings.include_hidden)?;
    if candidates.is_empty() {
        println!("no backup files found under {}", root.display());
        return Ok(());
    }
    println!("found {} backup file(s):", candidates.len());
    for path in &candidates {
        println!("  - {}", path.display());
    }
    if !cmd.apply {
        println!("dry-run: rerun with --apply to delete these backups.");
        return Ok(());
    }

    let services = app.services();
    let message = format!("Delete {} backup file(s)?", candidates.len());
    if !services.prompter.confirm(&message)? {
        println!("cleanup cancelled.");
        return Ok(());
    }
    let mut deleted = 0;
    for path in &candidates {
        match app.storage.delete_file(path) {
            Ok(()) => {
                deleted += 1;
                app.log.record("cleanup", path, "deleted", "");
            }
            Err(err) => {
                warn!(path = %path.display(), "unable to delete: {err}");
                app.log.record("cleanup", path, "failed", &err.to_string());
            }
        }
    }
    println!("deleted {deleted}/{} backup file(s).", candidates.len());
    Ok(())
}

fn handle_log(cmd: LogCommand) -> Result<()> {
    let log_dir = cmd.log_dir.unwrap_or_else(|| PathBuf::from(LOG_DIR));
    if !log_dir.exists() {
        println!("change log is empty.");
        return Ok(());
    }
    let log = OutputLog::open(&log_dir)?;
    let lines = log.tail(cmd.tail)?;
    if lines.is_empty() {
        println!("change log is empty.");
    }
    print_lines(&lines);
    Ok(())
}

fn parse_encoding(value: &str) -> Result<EncodingName, String> {
    value.parse().map_err(|err| format!("{err}"))
}

/// `--from` value: a concrete encoding, or `auto` to detect one.
#[derive(Debug, Clone, Copy)]
struct SourceEncoding(Option<EncodingName>);

fn parse_source(value: &str) -> Result<SourceEncoding, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(SourceEncoding(None));
    }
    parse_encoding(value).map(|encoding| SourceEncoding(Some(encoding)))
}

fn parse_hint(value: &str) -> Result<(PathBuf, EncodingName), String> {
    let Some((path, encoding)) = value.rsplit_once('=') else {
        return Err(format!("expected PATH=ENCODING, got '{value}'"));
    };
    if path.is_empty() {
        return Err(format!("missing path in '{value}'"));
    }
    Ok((PathBuf::from(path), parse_encoding(encoding)?))
}

#[derive(Debug, Parser)]
#[command(
    name = "transcode",
    version,
    about = "Detect text file encodings and convert them, with backups and undo"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a single file.
    Convert(ConvertCommand),
    /// Convert files and directory trees in parallel waves.
    Batch(BatchCommand),
    /// Report the detected encoding of files without changing them.
    Detect(DetectCommand),
    /// Restore a file from its most recent backup.
    Undo(UndoCommand),
    /// List or delete backup files under a directory.
    Cleanup(CleanupCommand),
    /// Show recent change log entries.
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    auto_apply: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    no_backup: bool,
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long = "hint", value_name = "PATH=ENCODING", value_parser = parse_hint)]
    hints: Vec<(PathBuf, EncodingName)>,
    #[arg(long = "include-hidden", action = ArgAction::SetTrue)]
    include_hidden: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    detailed: bool,
    #[arg(long = "log-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ConvertCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PATH", value_hint = ValueHint::FilePath)]
    path: PathBuf,
    #[arg(long = "to", value_name = "ENCODING", value_parser = parse_encoding)]
    to: EncodingName,
    #[arg(long = "from", value_name = "ENCODING", default_value = "auto", value_parser = parse_source)]
    from: SourceEncoding,
}

#[derive(Debug, Args)]
struct BatchCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PATH", value_hint = ValueHint::AnyPath)]
    paths: Vec<PathBuf>,
    #[arg(long = "glob", value_name = "GLOB")]
    globs: Vec<String>,
    #[arg(long = "to", value_name = "ENCODING", value_parser = parse_encoding)]
    to: EncodingName,
    #[arg(long = "from", value_name = "ENCODING", default_value = "auto", value_parser = parse_source)]
    from: SourceEncoding,
}

#[derive(Debug, Args)]
struct DetectCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PATH", value_hint = ValueHint::AnyPath)]
    paths: Vec<PathBuf>,
    #[arg(long = "glob", value_name = "GLOB")]
    globs: Vec<String>,
    #[arg(long, default_value = "table")]
    format: String,
}

#[derive(Debug, Args)]
struct UndoCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PATH", value_hint = ValueHint::FilePath)]
    path: PathBuf,
}

#[derive(Debug, Args)]
struct CleanupCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "root", value_name = "DIR", default_value = ".", value_hint = ValueHint::DirPath)]
    root: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    apply: bool,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long = "log-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]
    tail: usize,
}
