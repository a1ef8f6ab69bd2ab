use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

/// File primitives the converter needs. Implementations must be usable from
/// several worker threads at once.
pub trait ByteStorage: Send + Sync {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces the file contents.
    fn write_bytes(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Writes a new file, failing with `ErrorKind::AlreadyExists` if the
    /// path is taken.
    fn create_new(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn stat_size(&self, path: &Path) -> io::Result<u64>;

    fn modified(&self, path: &Path) -> io::Result<SystemTime>;

    fn kind(&self, path: &Path) -> io::Result<EntryKind>;

    fn exists(&self, path: &Path) -> bool {
        self.kind(path).is_ok()
    }

    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirectoryEntry>>;

    fn delete_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl ByteStorage for FsStorage {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_bytes(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        write_via_temp(path, data)
    }

    fn create_new(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(data)?;
        file.sync_all()
    }

    fn stat_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|meta| meta.len())
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn kind(&self, path: &Path) -> io::Result<EntryKind> {
        let meta = fs::metadata(path)?;
        Ok(kind_of(meta.file_type()))
    }

    fn list_directory(&self, path: &Path) -> io::Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirectoryEntry {
                name: entry.file_name(),
                kind: kind_of(entry.file_type()?),
            });
        }
        Ok(entries)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

// Symlinks are reported as `Other` so directory walks never follow them.
fn kind_of(file_type: fs::FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

/// Prefix of the sibling files writes are staged through.
pub const TEMP_PREFIX: &str = ".transcode-tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_via_temp(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        "{TEMP_PREFIX}{}-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}
