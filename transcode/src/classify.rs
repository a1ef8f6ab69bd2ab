use std::path::Path;

use anyhow::{Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

const UNSAVED_SCHEME: &str = "untitled:";

const BINARY_EXTENSIONS: &[&str] = &[
    // executables and object code
    "exe", "dll", "so", "dylib", "bin", "o", "obj", "a", "lib", "class", "pyc", "wasm",
    // archives and disk images
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war", "iso", "dmg",
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "tif", "tiff", "webp", "psd",
    // audio and video
    "mp3", "wav", "flac", "ogg", "aac", "m4a", "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm",
    // office documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
    // fonts and databases
    "ttf", "otf", "woff", "woff2", "db", "sqlite",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub allow: bool,
    pub reason: Option<String>,
}

impl Classification {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether a path should be converted at all, from its name alone.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    patterns: Vec<String>,
    excludes: Option<GlobSet>,
}

impl FileClassifier {
    pub fn new(exclude_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            patterns: exclude_patterns.to_vec(),
            excludes: build_exclude_globs(exclude_patterns)?,
        })
    }

    pub fn should_process(&self, path: &Path) -> Classification {
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return Classification::reject("unsaved file");
        };
        if path.to_string_lossy().starts_with(UNSAVED_SCHEME) {
            return Classification::reject("unsaved file");
        }

        if let Some(set) = &self.excludes {
            if let Some(&idx) = set.matches(&*file_name).first() {
                return Classification::reject(format!(
                    "matches exclude pattern '{}'",
                    self.patterns[idx]
                ));
            }
        }

        let is_binary = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let lower = ext.to_ascii_lowercase();
                BINARY_EXTENSIONS.contains(&lower.as_str())
            })
            .unwrap_or(false);
        if is_binary {
            return Classification::reject("binary file type");
        }

        Classification::allow()
    }
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).map_err(|err| anyhow!("invalid exclude glob '{pattern}': {err}"))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|err| anyhow!("unable to build exclude globs: {err}"))
}
