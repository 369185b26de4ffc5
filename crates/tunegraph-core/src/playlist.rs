//! M3U8 export.
//!
//! Each requested container gets one playlist file listing its downloaded
//! items in catalog order. Requested single items are grouped per kind into
//! `<query label>_<kind plural>.m3u8`. The liked songs list is exported to
//! `Liked Songs.m3u8`; in incremental mode only the newly liked entries are
//! written and the previous export is appended after them unchanged.
//!
//! Entries take three lines: `#EXTINF:<seconds>, <label>`, the path, and a
//! blank line.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, FileSystemError, Result};
use crate::node::{NodeId, RootRole};
use crate::output::fix_filename;
use crate::query::Query;
use crate::tree::Catalog;

/// First line of every export.
pub const M3U8_HEADER: &str = "#EXTM3U";

/// File name of the liked songs export.
pub const LIKED_SONGS_FILE: &str = "Liked Songs.m3u8";

/// Path of `path` relative to the directory `base`.
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let shared = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in shared..base_parts.len() {
        relative.push("..");
    }
    for part in &path_parts[shared..] {
        relative.push(part);
    }
    relative
}

/// Deepest directory containing every path.
pub fn common_dir<'p>(paths: impl IntoIterator<Item = &'p Path>) -> Option<PathBuf> {
    let mut common: Option<PathBuf> = None;
    for path in paths {
        let dir = path.parent()?.to_path_buf();
        common = Some(match common {
            None => dir,
            Some(current) => current
                .components()
                .zip(dir.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    common
}

/// Lines of `path` after the header, without line terminators.
pub fn read_m3u8(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::FileSystem(FileSystemError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })?;
    let mut lines = text.lines().map(str::to_string).peekable();
    if lines.peek().is_some_and(|l| l.trim() == M3U8_HEADER) {
        lines.next();
    }
    Ok(lines.collect())
}

/// Write `entries` followed by the raw `append` lines, replacing any existing file.
pub fn write_m3u8(path: &Path, entries: &[String], append: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
    }
    let mut text = String::from(M3U8_HEADER);
    text.push('\n');
    for line in entries.iter().chain(append) {
        text.push_str(line);
        text.push('\n');
    }
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::write(path, text).map_err(|e| {
        Error::FileSystem(FileSystemError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

/// Index of the first item whose path matches the exported `entry`.
///
/// Exact matches are preferred over substring matches; a substring match is
/// accepted with a warning since it means the path format drifted.
pub fn find_sync_point(paths: &[Option<PathBuf>], entry: &str) -> Option<usize> {
    for (i, path) in paths.iter().enumerate() {
        let Some(path) = path else {
            continue;
        };
        let path = path.to_string_lossy();
        if path == entry {
            return Some(i);
        }
        if entry.contains(path.as_ref()) {
            warn!(entry, "Item path found inside an exported entry, playlist paths may be stale");
            return Some(i);
        }
        if path.contains(entry) {
            warn!(entry, "Exported entry found inside an item path, playlist may use relative paths");
            return Some(i);
        }
    }
    None
}

/// Downloaded items that have a file.
fn exported(catalog: &Catalog, items: &[NodeId]) -> Vec<NodeId> {
    items
        .iter()
        .copied()
        .filter(|&n| {
            let node = catalog.node(n);
            node.downloaded && node.filepath().is_some()
        })
        .collect()
}

fn entry_lines(catalog: &Catalog, items: &[NodeId], dir: &Path, relative: bool) -> Vec<String> {
    let mut lines = Vec::with_capacity(items.len() * 3);
    for &item in items {
        let node = catalog.node(item);
        let Some(path) = node.filepath() else {
            continue;
        };
        let label = if node.label.is_empty() { &node.name } else { &node.label };
        let shown = if relative {
            relative_path(path, dir)
        } else {
            path.clone()
        };
        lines.push(format!("#EXTINF:{}, {label}", node.duration_ms() / 1000));
        lines.push(shown.to_string_lossy().into_owned());
        lines.push(String::new());
    }
    lines
}

fn m3u8_dir(
    catalog: &Catalog,
    config: &AppConfig,
    items: &[NodeId],
    force_common: bool,
) -> Option<PathBuf> {
    if !force_common && let Some(location) = config.m3u8_location() {
        return Some(location);
    }
    common_dir(
        items
            .iter()
            .filter_map(|&n| catalog.node(n).filepath())
            .map(PathBuf::as_path),
    )
}

/// Write the playlist files of a finished (or interrupted) run.
///
/// Returns the files written. Containers without items and lists without any
/// downloaded file are skipped with a warning.
pub fn export_playlists(query: &Query, config: &AppConfig) -> Result<Vec<PathBuf>> {
    if query.catalog().role() == RootRole::LikedSongs {
        return export_liked_songs(query, config).map(|p| p.into_iter().collect());
    }

    let catalog = query.catalog();
    let relative = config.export.relative_paths;
    let mut written = Vec::new();
    for (kind, nodes) in query.requested() {
        let lists: Vec<(String, String, Vec<NodeId>)> = if kind.is_container() {
            nodes
                .iter()
                .map(|&n| {
                    let node = catalog.node(n);
                    (node.name.clone(), fix_filename(&node.name), catalog.leaves(n))
                })
                .collect()
        } else {
            vec![(
                kind.plural().to_string(),
                fix_filename(&format!("{}_{}", query.label(), kind.plural())),
                nodes.clone(),
            )]
        };

        for (label, file_name, items) in lists {
            if items.is_empty() {
                warn!(collection = %label, "Collection has no content, no playlist written");
                continue;
            }
            let items = exported(catalog, &items);
            let Some(dir) = m3u8_dir(catalog, config, &items, false) else {
                warn!(collection = %label, "No downloaded files, no playlist written");
                continue;
            };
            let path = dir.join(format!("{file_name}.m3u8"));
            write_m3u8(&path, &entry_lines(catalog, &items, &dir, relative), &[])?;
            info!(collection = %label, path = %path.display(), "Playlist written");
            written.push(path);
        }
    }
    Ok(written)
}

/// Export the liked songs list, incrementally when configured.
pub fn export_liked_songs(query: &Query, config: &AppConfig) -> Result<Option<PathBuf>> {
    let catalog = query.catalog();
    let liked: Vec<NodeId> = query
        .requested()
        .iter()
        .flat_map(|(_, nodes)| nodes.iter().copied())
        .collect();
    let incremental = config.export.liked_songs_incremental;
    let Some(dir) = m3u8_dir(catalog, config, &liked, incremental) else {
        warn!("No downloaded liked songs, no playlist written");
        return Ok(None);
    };
    let path = dir.join(LIKED_SONGS_FILE);

    let mut fresh = liked.as_slice();
    let mut append = Vec::new();
    if incremental && path.exists() {
        let previous = read_m3u8(&path)?;
        let paths: Vec<Option<PathBuf>> = liked
            .iter()
            .map(|&n| catalog.node(n).filepath().cloned())
            .collect();
        let mut synced = false;
        for (i, entry) in previous.iter().skip(1).step_by(3).enumerate() {
            if let Some(point) = find_sync_point(&paths, entry) {
                debug!(point, entry = i, "Liked songs sync point found");
                fresh = &liked[..point];
                append = previous[3 * i..].to_vec();
                synced = true;
                break;
            }
            if i == 0 {
                warn!("First exported liked song not found, searching deeper for a sync point");
            }
        }
        if !synced {
            warn!("No sync point found, rewriting liked songs playlist");
        }
    }

    let items = exported(catalog, fresh);
    let lines = entry_lines(catalog, &items, &dir, config.export.relative_paths);
    if lines.is_empty() && append.is_empty() {
        warn!("No downloaded liked songs, no playlist written");
        return Ok(None);
    }
    write_m3u8(&path, &lines, &append)?;
    info!(
        path = %path.display(),
        new = items.len(),
        kept = append.len() / 3,
        "Liked songs playlist written"
    );
    Ok(Some(path))
}
