//! Download archives.
//!
//! Two append-only logs record finished downloads: one global log for the
//! whole library and one `.song_ids` sidecar per output directory. Each line
//! is `id \t timestamp \t name \t parent tag \t path`.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{Error, FileSystemError, Result};

/// File name of a directory-scoped archive.
pub const DIR_ARCHIVE_NAME: &str = ".song_ids";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One archived download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Catalog id.
    pub id: String,
    /// When the entry was written.
    pub timestamp: String,
    /// Display name.
    pub name: String,
    /// Name of the album or show the item belongs to.
    pub parent_tag: String,
    /// Output file.
    pub path: PathBuf,
}

impl ArchiveEntry {
    /// Entry stamped with the current local time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        parent_tag: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            name: name.into(),
            parent_tag: parent_tag.into(),
            path: path.into(),
        }
    }

    /// Parse one archive line. Lines with fewer than five fields are rejected.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
        let id = fields.next()?.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            timestamp: fields.next()?.to_string(),
            name: fields.next()?.to_string(),
            parent_tag: fields.next()?.to_string(),
            path: PathBuf::from(fields.next()?),
        })
    }

    /// Serialize to one line, without the newline. Tabs inside fields are replaced.
    pub fn to_line(&self) -> String {
        let clean = |s: &str| s.replace(['\t', '\n', '\r'], " ");
        format!(
            "{}\t{}\t{}\t{}\t{}",
            clean(&self.id),
            clean(&self.timestamp),
            clean(&self.name),
            clean(&self.parent_tag),
            clean(&self.path.to_string_lossy())
        )
    }
}

/// Which archive to consult.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveScope {
    /// The library-wide log.
    Global,
    /// The sidecar log of one output directory.
    Directory(PathBuf),
}

/// Reads and appends archive entries, caching each file after its first read.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    global_path: PathBuf,
    global_enabled: bool,
    directory_enabled: bool,
    cache: HashMap<PathBuf, Vec<ArchiveEntry>>,
}

impl ArchiveStore {
    /// Store with both archives enabled.
    pub fn new(global_path: impl Into<PathBuf>) -> Self {
        Self {
            global_path: global_path.into(),
            global_enabled: true,
            directory_enabled: true,
            cache: HashMap::new(),
        }
    }

    /// Store configured from the archive settings.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            global_path: config.global_archive_path(),
            global_enabled: !config.archive.disable_global,
            directory_enabled: !config.archive.disable_directory,
            cache: HashMap::new(),
        }
    }

    /// Whether the global archive is written.
    pub const fn global_enabled(&self) -> bool {
        self.global_enabled
    }

    /// Whether directory archives are read and written.
    pub const fn directory_enabled(&self) -> bool {
        self.directory_enabled
    }

    /// Location of the global archive.
    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    /// File backing `scope`.
    pub fn file_for(&self, scope: &ArchiveScope) -> PathBuf {
        match scope {
            ArchiveScope::Global => self.global_path.clone(),
            ArchiveScope::Directory(dir) => dir.join(DIR_ARCHIVE_NAME),
        }
    }

    /// All entries of `scope`, oldest first. A missing file is an empty archive.
    pub fn entries(&mut self, scope: &ArchiveScope) -> Result<&[ArchiveEntry]> {
        let file = self.file_for(scope);
        if !self.cache.contains_key(&file) {
            let entries = read_entries(&file)?;
            debug!(archive = %file.display(), count = entries.len(), "Archive loaded");
            self.cache.insert(file.clone(), entries);
        }
        Ok(self.cache.get(&file).map(Vec::as_slice).unwrap_or_default())
    }

    /// Archived path of `id` in `scope`.
    ///
    /// Relative paths in a directory archive resolve against that directory.
    /// Unreadable archives are logged and treated as empty.
    pub fn lookup(&mut self, scope: &ArchiveScope, id: &str) -> Option<PathBuf> {
        let path = match self.entries(scope) {
            Ok(entries) => entries.iter().find(|e| e.id == id).map(|e| e.path.clone()),
            Err(e) => {
                warn!(error = %e, "Failed to read archive");
                None
            }
        }?;
        match scope {
            ArchiveScope::Directory(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path),
        }
    }

    /// Whether `id` is archived in `scope`.
    pub fn contains(&mut self, scope: &ArchiveScope, id: &str) -> bool {
        self.lookup(scope, id).is_some()
    }

    /// Append `entry` to `scope`, creating the file and its directory as needed.
    pub fn append(&mut self, scope: &ArchiveScope, entry: ArchiveEntry) -> Result<()> {
        let file = self.file_for(scope);
        if let Some(parent) = file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;
        }
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
            .map_err(|e| write_failed(&file, &e))?;
        writeln!(handle, "{}", entry.to_line()).map_err(|e| write_failed(&file, &e))?;
        debug!(archive = %file.display(), id = %entry.id, "Archived download");
        if let Some(cached) = self.cache.get_mut(&file) {
            cached.push(entry);
        }
        Ok(())
    }
}

fn write_failed(path: &Path, e: &std::io::Error) -> Error {
    Error::FileSystem(FileSystemError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_entries(file: &Path) -> Result<Vec<ArchiveEntry>> {
    if !file.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(file).map_err(|e| {
        Error::FileSystem(FileSystemError::ReadFailed {
            path: file.to_path_buf(),
            reason: e.to_string(),
        })
    })?;
    Ok(text.lines().filter_map(ArchiveEntry::parse_line).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_format() {
        let entry = ArchiveEntry {
            id: "t1".into(),
            timestamp: "2024-01-01 10:00:00".into(),
            name: "Band - Song".into(),
            parent_tag: "Album".into(),
            path: PathBuf::from("/music/Band/Album/01 Song.ogg"),
        };
        let line = entry.to_line();
        assert_eq!(
            line,
            "t1\t2024-01-01 10:00:00\tBand - Song\tAlbum\t/music/Band/Album/01 Song.ogg"
        );
        assert_eq!(ArchiveEntry::parse_line(&line), Some(entry));
        assert_eq!(ArchiveEntry::parse_line("t1\tonly-two"), None);
    }

    #[test]
    fn test_append_and_lookup() {
        let dir = TempDir::new().unwrap();
        let mut store = ArchiveStore::new(dir.path().join("data").join(".song_archive"));
        assert!(!store.contains(&ArchiveScope::Global, "t1"));

        let path = dir.path().join("song.ogg");
        store
            .append(&ArchiveScope::Global, ArchiveEntry::new("t1", "Song", "Album", &path))
            .unwrap();
        assert_eq!(store.lookup(&ArchiveScope::Global, "t1"), Some(path.clone()));

        let mut reopened = ArchiveStore::new(dir.path().join("data").join(".song_archive"));
        assert_eq!(reopened.lookup(&ArchiveScope::Global, "t1"), Some(path));
    }

    #[test]
    fn test_directory_archive_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(DIR_ARCHIVE_NAME),
            "t9\t2020-01-01 00:00:00\tOld\tAlbum\t09 Old.ogg\n",
        )
        .unwrap();
        let mut store = ArchiveStore::new(dir.path().join("global"));
        let scope = ArchiveScope::Directory(dir.path().to_path_buf());
        assert_eq!(store.lookup(&scope, "t9"), Some(dir.path().join("09 Old.ogg")));
        assert!(!store.contains(&ArchiveScope::Global, "t9"));
    }

    #[test]
    fn test_from_config_flags() {
        let mut config = AppConfig::default();
        config.archive.disable_global = true;
        let store = ArchiveStore::from_config(&config);
        assert!(!store.global_enabled());
        assert!(store.directory_enabled());
    }
}
