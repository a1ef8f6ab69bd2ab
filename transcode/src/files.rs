use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use glob::glob;
use tracing::debug;

use crate::backup::is_backup_file;
use crate::classify::FileClassifier;
use crate::logging::LOG_DIR;
use crate::storage::{ByteStorage, EntryKind, TEMP_PREFIX};

/// Expands explicit paths and glob patterns into the ordered, de-duplicated
/// list of files a batch will convert.
///
/// Directories are walked recursively and only files the classifier allows
/// are kept. Files named directly are kept regardless, so that a rejection
/// shows up as a skipped result instead of disappearing.
pub fn resolve_targets(
    storage: &dyn ByteStorage,
    classifier: &FileClassifier,
    explicit: &[PathBuf],
    globs: &[String],
    include_hidden: bool,
) -> Result<Vec<PathBuf>> {
    let walker = Walker {
        storage,
        classifier,
        include_hidden,
    };
    let mut files = Vec::new();

    for path in explicit {
        walker
            .append_path(path, &mut files)
            .with_context(|| format!("processing target {}", path.display()))?;
    }

    for pattern in globs {
        let matches =
            glob(pattern).map_err(|err| anyhow!("invalid glob pattern '{pattern}': {err}"))?;
        for entry in matches {
            let path =
                entry.map_err(|err| anyhow!("error reading matches for '{pattern}': {err}"))?;
            walker
                .append_path(&path, &mut files)
                .with_context(|| format!("processing match {}", path.display()))?;
        }
    }

    dedup_by_path(&mut files);
    Ok(files)
}

struct Walker<'a> {
    storage: &'a dyn ByteStorage,
    classifier: &'a FileClassifier,
    include_hidden: bool,
}

impl Walker<'_> {
    fn append_path(&self, path: &Path, acc: &mut Vec<PathBuf>) -> Result<()> {
        let canonical = canonicalize(path);
        let kind = self
            .storage
            .kind(&canonical)
            .with_context(|| format!("unable to read metadata for {}", canonical.display()))?;
        match kind {
            EntryKind::Directory => self.walk_directory(&canonical, acc),
            EntryKind::File => {
                acc.push(canonical);
                Ok(())
            }
            EntryKind::Other => {
                debug!(path = %canonical.display(), "not a regular file; ignored");
                Ok(())
            }
        }
    }

    fn walk_directory(&self, dir: &Path, acc: &mut Vec<PathBuf>) -> Result<()> {
        let mut entries = self
            .storage
            .list_directory(dir)
            .with_context(|| format!("listing {}", dir.display()))?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        for entry in entries {
            let name = entry.name.to_string_lossy();
            if is_tool_artifact(&name) || (!self.include_hidden && is_hidden(&name)) {
                continue;
            }
            let path = dir.join(&entry.name);
            match entry.kind {
                EntryKind::Directory => self.walk_directory(&path, acc)?,
                EntryKind::File => {
                    if is_backup_file(&path) {
                        continue;
                    }
                    let verdict = self.classifier.should_process(&path);
                    if verdict.allow {
                        acc.push(path);
                    } else {
                        debug!(
                            path = %path.display(),
                            reason = verdict.reason.as_deref().unwrap_or(""),
                            "excluded from walk"
                        );
                    }
                }
                EntryKind::Other => {}
            }
        }
        Ok(())
    }
}

/// The change log directory and staged writes are never conversion targets.
fn is_tool_artifact(name: &str) -> bool {
    name == LOG_DIR || name.starts_with(TEMP_PREFIX)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn canonicalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Keeps the first occurrence of every path, preserving order.
pub fn dedup_by_path(paths: &mut Vec<PathBuf>) {
    let mut seen = HashSet::new();
    paths.retain(|path| seen.insert(path.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorage;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    fn names(paths: &[PathBuf], root: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap_or(p)
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn dedup_keeps_first_appearance() {
        let mut paths = vec![
            PathBuf::from("b.txt"),
            PathBuf::from("a.txt"),
            PathBuf::from("b.txt"),
        ];
        dedup_by_path(&mut paths);
        assert_eq!(paths, vec![PathBuf::from("b.txt"), PathBuf::from("a.txt")]);
    }

    #[test]
    fn walk_filters_hidden_binary_and_backup_files() {
        let temp = tempdir().expect("temp dir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        write(&root.join("a.txt"), "a");
        write(&root.join("nested/b.md"), "b");
        write(&root.join("nested/logo.png"), "png");
        write(&root.join("a.txt.bak"), "old");
        write(&root.join(".git/config"), "hidden");
        write(&root.join("skip.min.js"), "x");

        let classifier = FileClassifier::new(&["*.min.js".to_string()]).expect("classifier");
        let files = resolve_targets(
            &FsStorage,
            &classifier,
            &[root.clone()],
            &[],
            false,
        )
        .expect("resolve");
        assert_eq!(names(&files, &root), vec!["a.txt", "nested/b.md"]);
    }

    #[test]
    fn hidden_walks_still_skip_the_change_log_and_staged_writes() {
        let temp = tempdir().expect("temp dir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        write(&root.join("a.txt"), "a");
        write(&root.join(".env"), "hidden");
        write(&root.join(".transcode/change_log.jsonl"), "{}");
        write(&root.join(".transcode-tmp-1-2-3"), "staged");

        let classifier = FileClassifier::new(&[]).expect("classifier");
        let files = resolve_targets(&FsStorage, &classifier, &[root.clone()], &[], true)
            .expect("resolve");
        assert_eq!(names(&files, &root), vec![".env", "a.txt"]);
    }

    #[test]
    fn explicit_files_bypass_classification() {
        let temp = tempdir().expect("temp dir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        let image = root.join("logo.png");
        write(&image, "png");

        let classifier = FileClassifier::new(&[]).expect("classifier");
        let files = resolve_targets(&FsStorage, &classifier, &[image.clone()], &[], false)
            .expect("resolve");
        assert_eq!(files, vec![image]);
    }

    #[test]
    fn overlapping_inputs_are_listed_once() {
        let temp = tempdir().expect("temp dir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        write(&root.join("one.txt"), "1");
        write(&root.join("two.txt"), "2");

        let classifier = FileClassifier::new(&[]).expect("classifier");
        let explicit = vec![root.join("two.txt"), root.clone(), root.join("two.txt")];
        let files =
            resolve_targets(&FsStorage, &classifier, &explicit, &[], false).expect("resolve");
        assert_eq!(names(&files, &root), vec!["two.txt", "one.txt"]);
    }

    #[test]
    fn glob_patterns_expand() {
        let temp = tempdir().expect("temp dir");
        let root = fs::canonicalize(temp.path()).expect("canonical root");
        write(&root.join("x.txt"), "x");
        write(&root.join("y.log"), "y");

        let classifier = FileClassifier::new(&[]).expect("classifier");
        let pattern = format!("{}/*.txt", root.display());
        let files =
            resolve_targets(&FsStorage, &classifier, &[], &[pattern], false).expect("resolve");
        assert_eq!(names(&files, &root), vec!["x.txt"]);
    }

    #[test]
    fn missing_targets_are_errors() {
        let temp = tempdir().expect("temp dir");
        let classifier = FileClassifier::new(&[]).expect("classifier");
        let missing = temp.path().join("nope.txt");
        assert!(resolve_targets(&FsStorage, &classifier, &[missing], &[], false).is_err());
    }
}
