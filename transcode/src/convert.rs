use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::classify::FileClassifier;
use crate::codec::DecodeOptions;
use crate::config::Settings;
use crate::detect::{DetectionResult, EncodingDetector};
use crate::encoding::EncodingName;
use crate::host::Services;

pub const LARGE_FILE_WARN_BYTES: u64 = 50 * 1024 * 1024;
pub const LARGE_FILE_CONFIRM_BYTES: u64 = 100 * 1024 * 1024;

pub const SKIP_ALREADY_TARGET: &str = "already in target encoding";
pub const SKIP_LARGE_FILE: &str = "user cancelled due to large file size";

/// How files above the confirmation size are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeFilePolicy {
    /// Ask the prompter for this file.
    Ask,
    /// Already confirmed by the caller.
    Approved,
    /// Already declined by the caller.
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converted,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub file_path: PathBuf,
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_encoding: Option<EncodingName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_encoding: Option<EncodingName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub backup_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionResult>,
}

impl ConversionResult {
    fn pending(path: &Path, target: EncodingName) -> Self {
        Self {
            file_path: path.to_path_buf(),
            success: false,
            skipped: false,
            skip_reason: None,
            original_encoding: None,
            target_encoding: Some(target),
            file_size: None,
            backup_created: false,
            error: None,
            detection: None,
        }
    }

    fn skip(&mut self, reason: impl Into<String>) {
        self.skipped = true;
        self.skip_reason = Some(reason.into());
    }

    /// A skip counts as skipped whether or not it was a success.
    pub fn outcome(&self) -> Outcome {
        if self.skipped {
            Outcome::Skipped
        } else if self.success {
            Outcome::Converted
        } else {
            Outcome::Failed
        }
    }

    /// One-line description used by the change log and reports.
    pub fn detail(&self) -> String {
        match self.outcome() {
            Outcome::Skipped => self.skip_reason.clone().unwrap_or_default(),
            Outcome::Failed => self.error.clone().unwrap_or_else(|| "unknown error".into()),
            Outcome::Converted => format!(
                "{} -> {}",
                encoding_label(self.original_encoding),
                encoding_label(self.target_encoding)
            ),
        }
    }
}

fn encoding_label(encoding: Option<EncodingName>) -> &'static str {
    encoding.map(EncodingName::canonical).unwrap_or("?")
}

/// Converts one file at a time. Shared by reference across a wave.
pub struct ConversionEngine<'a> {
    services: Services<'a>,
    settings: &'a Settings,
    classifier: FileClassifier,
    detector: EncodingDetector<'a>,
    backups: BackupManager<'a>,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(services: Services<'a>, settings: &'a Settings) -> Result<Self> {
        Ok(Self {
            services,
            settings,
            classifier: FileClassifier::new(&settings.exclude_patterns)?,
            detector: EncodingDetector::new(services.codec, services.host),
            backups: BackupManager::new(services, settings.auto_reopen_files),
        })
    }

    pub fn services(&self) -> Services<'a> {
        self.services
    }

    pub fn settings(&self) -> &'a Settings {
        self.settings
    }

    pub fn classifier(&self) -> &FileClassifier {
        &self.classifier
    }

    pub fn detector(&self) -> &EncodingDetector<'a> {
        &self.detector
    }

    pub fn backups(&self) -> &BackupManager<'a> {
        &self.backups
    }

    /// Converts `path` to `target`. Never fails: every problem ends up in
    /// the returned result.
    pub fn convert(
        &self,
        path: &Path,
        source: Option<EncodingName>,
        target: EncodingName,
        large_file: LargeFilePolicy,
    ) -> ConversionResult {
        let mut result = ConversionResult::pending(path, target);

        let verdict = self.classifier.should_process(path);
        if !verdict.allow {
            result.skip(verdict.reason.unwrap_or_else(|| "excluded".into()));
        } else if let Err(err) = self.run(path, source, target, large_file, &mut result) {
            result.success = false;
            result.error = Some(format!("{err:#}"));
        }

        let action = match result.outcome() {
            Outcome::Converted => "converted",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        };
        self.services
            .log
            .record("convert", path, action, &result.detail());
        result
    }

    fn run(
        &self,
        path: &Path,
        source: Option<EncodingName>,
        target: EncodingName,
        large_file: LargeFilePolicy,
        result: &mut ConversionResult,
    ) -> Result<()> {
        let storage = self.services.storage;
        let codec = self.services.codec;

        let size = storage
            .stat_size(path)
            .with_context(|| format!("reading metadata for {}", path.display()))?;
        result.file_size = Some(size);
        if size > LARGE_FILE_WARN_BYTES {
            warn!(path = %path.display(), size, "converting a large file");
        }
        if size > LARGE_FILE_CONFIRM_BYTES && !self.approve_large_file(path, size, large_file)? {
            result.skip(SKIP_LARGE_FILE);
            return Ok(());
        }

        let bytes = storage
            .read_bytes(path)
            .with_context(|| format!("reading {}", path.display()))?;
        result.file_size = Some(bytes.len() as u64);

        let detection = match source {
            Some(encoding) => DetectionResult::manual(encoding),
            None => self.detector.detect(&bytes, Some(path)),
        };
        debug!(
            path = %path.display(),
            encoding = %detection.encoding,
            confidence = detection.confidence,
            method = %detection.method,
            "source encoding resolved"
        );
        result.original_encoding = Some(detection.encoding);
        result.detection = Some(detection);
        let source = detection.encoding;

        if self.is_noop(&bytes, source, target) {
            result.success = true;
            result.skip(SKIP_ALREADY_TARGET);
            return Ok(());
        }

        if self.settings.create_backup {
            result.backup_created = self.backups.create_backup(path);
        }

        let text = match codec.decode(&bytes, source, DecodeOptions::STRICT) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), "{err}; retrying without byte order mark");
                codec
                    .decode(&bytes, source, DecodeOptions::STRIP_BOM)
                    .with_context(|| format!("decoding {} as {source}", path.display()))?
            }
        };

        let text = if target.is_unicode() {
            text.as_str()
        } else {
            text.strip_prefix('\u{FEFF}').unwrap_or(&text)
        };
        let encoded = codec
            .encode(text, target)
            .with_context(|| format!("encoding {} as {target}", path.display()))?;

        storage
            .write_bytes(path, &encoded)
            .with_context(|| format!("writing {}", path.display()))?;
        result.success = true;
        info!(path = %path.display(), from = %source, to = %target, "converted");

        if self.settings.auto_reopen_files {
            if let Err(err) = self.services.host.reopen(path) {
                warn!(path = %path.display(), "reopen failed: {err:#}");
            }
        }
        Ok(())
    }

    /// Equal names, or ASCII data headed for an ASCII superset, count as a
    /// no-op only if the bytes survive a strict decode and re-encode in the
    /// target unchanged.
    fn is_noop(&self, bytes: &[u8], source: EncodingName, target: EncodingName) -> bool {
        let same_family =
            source == target || (source == EncodingName::Ascii && target.is_ascii_compatible());
        if !same_family {
            return false;
        }

        let codec = self.services.codec;
        let identical = codec
            .decode(bytes, target, DecodeOptions::STRICT)
            .ok()
            .and_then(|text| codec.encode(&text, target).ok())
            .is_some_and(|reencoded| reencoded == bytes);
        if !identical {
            debug!(%source, %target, "round trip differs; converting anyway");
        }
        identical
    }

    fn approve_large_file(&self, path: &Path, size: u64, policy: LargeFilePolicy) -> Result<bool> {
        match policy {
            LargeFilePolicy::Approved => Ok(true),
            LargeFilePolicy::Declined => Ok(false),
            LargeFilePolicy::Ask => {
                let message = format!(
                    "{} is {:.1} MB. Convert it anyway?",
                    path.display(),
                    size as f64 / (1024.0 * 1024.0)
                );
                self.services.prompter.confirm(&message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;
    use std::time::SystemTime;

    use super::*;
    use crate::codec::EncodingRsCodec;
    use crate::host::{AutoApprove, DocumentHost, Prompter};
    use crate::logging::OutputLog;
    use crate::storage::{ByteStorage, DirectoryEntry, EntryKind};

    /// In-memory storage whose reported sizes can be inflated.
    #[derive(Default)]
    struct MemStorage {
        files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
        fake_sizes: BTreeMap<PathBuf, u64>,
        fail_writes: bool,
    }

    impl MemStorage {
        fn with(path: &str, bytes: &[u8]) -> Self {
            let storage = MemStorage::default();
            storage.put(path, bytes);
            storage
        }

        fn put(&self, path: &str, bytes: &[u8]) {
            self.files
                .lock()
                .expect("lock")
                .insert(PathBuf::from(path), bytes.to_vec());
        }

        fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().expect("lock").get(Path::new(path)).cloned()
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
    }

    impl ByteStorage for MemStorage {
        fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.files
                .lock()
                .expect("lock")
                .get(path)
                .cloned()
                .ok_or_else(|| not_found(path))
        }

        fn write_bytes(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::other("disk full"));
            }
            self.files
                .lock()
                .expect("lock")
                .insert(path.to_path_buf(), data.to_vec());
            Ok(())
        }

        fn create_new(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            let mut files = self.files.lock().expect("lock");
            if files.contains_key(path) {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "exists"));
            }
            files.insert(path.to_path_buf(), data.to_vec());
            Ok(())
        }

        fn stat_size(&self, path: &Path) -> io::Result<u64> {
            if let Some(size) = self.fake_sizes.get(path) {
                return Ok(*size);
            }
            self.read_bytes(path).map(|bytes| bytes.len() as u64)
        }

        fn modified(&self, path: &Path) -> io::Result<SystemTime> {
            self.read_bytes(path).map(|_| SystemTime::UNIX_EPOCH)
        }

        fn kind(&self, path: &Path) -> io::Result<EntryKind> {
            self.read_bytes(path).map(|_| EntryKind::File)
        }

        fn list_directory(&self, _path: &Path) -> io::Result<Vec<DirectoryEntry>> {
            Ok(Vec::new())
        }

        fn delete_file(&self, path: &Path) -> io::Result<()> {
            self.files
                .lock()
                .expect("lock")
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| not_found(path))
        }
    }

    struct NoHost;
    impl DocumentHost for NoHost {}

    struct Decline;
    impl Prompter for Decline {
        fn confirm(&self, _message: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn choose(&self, _message: &str, _options: &[&str]) -> anyhow::Result<Option<usize>> {
            Ok(None)
        }
    }

    fn convert_with(
        storage: &MemStorage,
        prompter: &dyn Prompter,
        settings: &Settings,
        path: &str,
        source: Option<EncodingName>,
        target: EncodingName,
    ) -> ConversionResult {
        let log = OutputLog::disabled();
        let services = Services {
            storage,
            codec: &EncodingRsCodec,
            host: &NoHost,
            prompter,
            log: &log,
        };
        let engine = ConversionEngine::new(services, settings).expect("engine");
        engine.convert(Path::new(path), source, target, LargeFilePolicy::Ask)
    }

    fn convert(storage: &MemStorage, path: &str, target: EncodingName) -> ConversionResult {
        convert_with(storage, &AutoApprove, &Settings::default(), path, None, target)
    }

    #[test]
    fn big5_pair_converts_to_utf8_with_backup() {
        let storage = MemStorage::with("menu.txt", &[0xA4, 0xA4]);
        let result = convert(&storage, "menu.txt", EncodingName::Utf8);

        assert_eq!(result.outcome(), Outcome::Converted, "{result:?}");
        assert_eq!(result.original_encoding, Some(EncodingName::Big5));
        assert!(result.backup_created);
        assert_eq!(storage.get("menu.txt"), Some("中".as_bytes().to_vec()));
        assert_eq!(storage.get("menu.txt.bak"), Some(vec![0xA4, 0xA4]));
    }

    #[test]
    fn matching_encoding_is_a_noop_without_backup() {
        let storage = MemStorage::with("a.txt", "héllo wörld".as_bytes());
        for _ in 0..2 {
            let result = convert(&storage, "a.txt", EncodingName::Utf8);
            assert!(result.success && result.skipped);
            assert_eq!(result.skip_reason.as_deref(), Some(SKIP_ALREADY_TARGET));
            assert!(!result.backup_created);
        }
        assert!(storage.get("a.txt.bak").is_none());
    }

    #[test]
    fn ascii_content_is_already_in_any_ascii_superset() {
        let storage = MemStorage::with("plain.txt", b"just ascii here\n");
        let result = convert(&storage, "plain.txt", EncodingName::Windows1252);
        assert_eq!(result.skip_reason.as_deref(), Some(SKIP_ALREADY_TARGET));
    }

    #[test]
    fn stale_manual_source_falls_through_to_conversion() {
        // Declared utf-8 but the bytes are latin-1, so the round trip fails.
        let storage = MemStorage::with("x.txt", &[b'c', b'a', b'f', 0xE9]);
        let result = convert_with(
            &storage,
            &AutoApprove,
            &Settings::default(),
            "x.txt",
            Some(EncodingName::Utf8),
            EncodingName::Utf8,
        );
        assert_eq!(result.outcome(), Outcome::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("decoding"));
        assert_eq!(storage.get("x.txt"), Some(vec![b'c', b'a', b'f', 0xE9]));
        assert!(result.backup_created);
    }

    #[test]
    fn classification_rejects_become_skips() {
        let storage = MemStorage::with("logo.png", &[0x89, b'P', b'N', b'G']);
        let result = convert(&storage, "logo.png", EncodingName::Utf8);
        assert!(!result.success && result.skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("binary file type"));
        assert_eq!(result.file_size, None);
    }

    #[test]
    fn unmappable_text_fails_without_touching_the_file() {
        let storage = MemStorage::with("emoji.txt", "party 🎉".as_bytes());
        let result = convert(&storage, "emoji.txt", EncodingName::Big5);
        assert_eq!(result.outcome(), Outcome::Failed);
        assert_eq!(result.original_encoding, Some(EncodingName::Utf8));
        assert_eq!(storage.get("emoji.txt"), Some("party 🎉".as_bytes().to_vec()));
    }

    #[test]
    fn write_failures_are_reported_with_known_details() {
        let storage = MemStorage {
            fail_writes: true,
            ..MemStorage::with("w.txt", "日本語".as_bytes())
        };
        let result = convert(&storage, "w.txt", EncodingName::ShiftJis);
        assert_eq!(result.outcome(), Outcome::Failed);
        assert_eq!(result.file_size, Some("日本語".len() as u64));
        assert!(result.error.as_deref().unwrap_or("").contains("writing"));
    }

    #[test]
    fn byte_order_mark_is_dropped_for_legacy_targets() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("é".as_bytes());
        let storage = MemStorage::with("bom.txt", &bytes);
        let settings = Settings {
            create_backup: false,
            ..Settings::default()
        };
        let result = convert_with(
            &storage,
            &AutoApprove,
            &settings,
            "bom.txt",
            None,
            EncodingName::Iso8859_1,
        );
        assert_eq!(result.outcome(), Outcome::Converted, "{result:?}");
        assert_eq!(storage.get("bom.txt"), Some(vec![0xE9]));
        assert!(storage.get("bom.txt.bak").is_none());
    }

    #[test]
    fn declined_large_file_is_skipped_before_reading() {
        let mut storage = MemStorage::with("huge.log.txt", b"small really");
        storage
            .fake_sizes
            .insert(PathBuf::from("huge.log.txt"), LARGE_FILE_CONFIRM_BYTES + 1);
        let result = convert_with(
            &storage,
            &Decline,
            &Settings::default(),
            "huge.log.txt",
            None,
            EncodingName::Utf8,
        );
        assert!(result.skipped);
        assert_eq!(result.skip_reason.as_deref(), Some(SKIP_LARGE_FILE));
        assert_eq!(result.file_size, Some(LARGE_FILE_CONFIRM_BYTES + 1));
    }

    #[test]
    fn missing_files_fail_cleanly() {
        let storage = MemStorage::default();
        let result = convert(&storage, "gone.txt", EncodingName::Utf8);
        assert_eq!(result.outcome(), Outcome::Failed);
        assert!(result.error.is_some());
    }
}
