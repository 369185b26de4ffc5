//! Library verification.
//!
//! Finds previously downloaded tracks under the root path by matching files
//! against the global archive, fetches their metadata again and rewrites the
//! tags of every file whose tags drifted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{ArchiveScope, ArchiveStore};
use crate::artwork::{CoverCache, embed_cover};
use crate::config::AppConfig;
use crate::error::Result;
use crate::identifier::{ContentId, ContentKind};
use crate::node::{NodeId, RootRole};
use crate::query::QueryEngine;
use crate::tags::{TagWriter, TrackTags};
use crate::tree::Catalog;

/// Extensions considered audio files.
pub const AUDIO_EXTENSIONS: [&str; 9] = [
    "mp3", "ogg", "m4a", "aac", "flac", "opus", "wav", "mp4", "copy",
];

/// Outcome of a verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Files matched to an archived track.
    pub found: usize,
    /// Files whose tags already matched.
    pub unchanged: usize,
    /// Files whose tags were rewritten.
    pub rewritten: usize,
    /// Files that could not be checked or rewritten.
    pub failed: usize,
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Audio files under `root` whose path, ignoring the extension, matches a
/// global archive entry. Keyed by track id; the first file wins per id.
pub fn find_archived_files(
    root: &Path,
    archive: &mut ArchiveStore,
) -> Result<BTreeMap<String, PathBuf>> {
    let archived: BTreeMap<PathBuf, String> = archive
        .entries(&ArchiveScope::Global)?
        .iter()
        .map(|entry| (entry.path.with_extension(""), entry.id.clone()))
        .collect();

    let mut found = BTreeMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(std::result::Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio(path) {
            continue;
        }
        if let Some(id) = archived.get(&path.with_extension("")) {
            found.entry(id.clone()).or_insert_with(|| path.to_path_buf());
        }
    }
    debug!(root = %root.display(), count = found.len(), "Archived files found");
    Ok(found)
}

/// Check every archived file under the root path and rewrite stale tags.
pub fn verify_library(
    engine: &QueryEngine<'_>,
    config: &AppConfig,
    archive: &mut ArchiveStore,
    tags: &dyn TagWriter,
) -> Result<VerifyReport> {
    let files = find_archived_files(&config.root_path, archive)?;
    let mut report = VerifyReport {
        found: files.len(),
        ..VerifyReport::default()
    };
    if files.is_empty() {
        warn!(root = %config.root_path.display(), "No archived tracks found to verify");
        return Ok(report);
    }

    let mut catalog = Catalog::new(RootRole::VerifyLibrary, RootRole::VerifyLibrary.display_name());
    let root = catalog.root();
    let tracks: Vec<(NodeId, PathBuf)> = files
        .into_iter()
        .map(|(id, path)| {
            let node = catalog.create_child(root, ContentId::new(ContentKind::Track, id));
            catalog.push_item(root, node);
            (node, path)
        })
        .collect();

    let nodes: Vec<NodeId> = tracks.iter().map(|(node, _)| *node).collect();
    let responses = engine.fetch_direct(&catalog, ContentKind::Track, &nodes);
    engine.parse_direct(&mut catalog, &nodes, &responses);
    engine.fetch_extra(&mut catalog);

    let strict = config.metadata.strict_library_verify;
    let mut covers = CoverCache::default();
    for (node, path) in tracks {
        catalog.set_downloaded(node, Some(path.clone()));
        if !catalog.node(node).has_metadata {
            warn!(path = %path.display(), "No metadata for archived track");
            report.failed += 1;
            continue;
        }
        let Some(expected) = TrackTags::from_catalog(&catalog, config, node) else {
            report.failed += 1;
            continue;
        };
        let on_file = match tags.read_tags(&path) {
            Ok(on_file) => on_file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read tags");
                report.failed += 1;
                continue;
            }
        };
        let stale = expected.mismatches(&on_file, strict);
        if stale.is_empty() {
            report.unchanged += 1;
            continue;
        }
        debug!(path = %path.display(), fields = ?stale, "Tags differ from catalog");
        match tags.write_tags(&path, &expected) {
            Ok(()) => {
                info!(path = %path.display(), fields = stale.len(), "Tags rewritten");
                report.rewritten += 1;
                if let Err(e) =
                    embed_cover(engine.api(), &mut covers, &catalog, config, tags, node, &path)
                {
                    warn!(path = %path.display(), error = %e, "Failed to save cover art");
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to rewrite tags");
                report.failed += 1;
            }
        }
    }

    info!(
        found = report.found,
        unchanged = report.unchanged,
        rewritten = report.rewritten,
        failed = report.failed,
        "Library verification finished"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, MockCatalogApi};
    use crate::archive::ArchiveEntry;
    use crate::tags::MockTagWriter;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (AppConfig, ArchiveStore) {
        let mut config = AppConfig::default().with_root(dir.path().join("music"));
        config.metadata.save_genres = false;
        config.metadata.disc_track_totals = false;
        let mut archive = ArchiveStore::new(dir.path().join("archive.tsv"));
        let song = config.root_path.join("Band/Blue/Band_Song.mp3");
        fs::create_dir_all(song.parent().unwrap()).unwrap();
        fs::write(&song, b"audio").unwrap();
        fs::write(config.root_path.join("Band/Blue/cover.jpg"), b"img").unwrap();
        archive
            .append(
                &ArchiveScope::Global,
                ArchiveEntry::new("t1", "Band - Song", "Blue", song.with_extension("ogg")),
            )
            .unwrap();
        (config, archive)
    }

    fn api_with_track() -> MockCatalogApi {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/tracks/t1"))
            .returning(|_, _| {
                let json = json!({"type": "track", "id": "t1", "uri": "spotify:track:t1",
                                  "name": "Song", "duration_ms": 1000, "artists": []});
                Ok(ApiResponse {
                    raw: json.to_string(),
                    json,
                })
            });
        api
    }

    #[test]
    fn test_find_archived_files_ignores_extension() {
        let dir = TempDir::new().unwrap();
        let (config, mut archive) = setup(&dir);
        let found = find_archived_files(&config.root_path, &mut archive).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found["t1"].ends_with("Band_Song.mp3"));
    }

    #[test]
    fn test_stale_tags_rewritten() {
        let dir = TempDir::new().unwrap();
        let (config, mut archive) = setup(&dir);
        let api = api_with_track();
        let engine = QueryEngine::new(&api, &config);
        let mut tags = MockTagWriter::new();
        tags.expect_read_tags().returning(|_| {
            Ok(TrackTags {
                title: "Old".into(),
                ..TrackTags::default()
            })
        });
        tags.expect_write_tags()
            .withf(|_, t| t.title == "Song")
            .times(1)
            .returning(|_, _| Ok(()));

        let report = verify_library(&engine, &config, &mut archive, &tags).unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.rewritten, 1);
    }

    #[test]
    fn test_rewritten_file_gets_album_cover() {
        let dir = TempDir::new().unwrap();
        let (config, mut archive) = setup(&dir);
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/tracks/t1"))
            .returning(|_, _| {
                let json = json!({"type": "track", "id": "t1", "uri": "spotify:track:t1",
                                  "name": "Song", "duration_ms": 1000, "artists": [],
                                  "album": {"type": "album", "id": "a1", "uri": "spotify:album:a1",
                                            "name": "Blue", "artists": [],
                                            "images": [{"url": "https://i.scdn.co/image/blue",
                                                        "width": 640, "height": 640}]}});
                Ok(ApiResponse {
                    raw: json.to_string(),
                    json,
                })
            });
        api.expect_open_url()
            .withf(|url| url == "https://i.scdn.co/image/blue")
            .times(1)
            .returning(|_| Ok(Box::new(std::io::Cursor::new(b"jpeg".to_vec()))));
        let engine = QueryEngine::new(&api, &config);
        let mut tags = MockTagWriter::new();
        tags.expect_read_tags().returning(|_| Ok(TrackTags::default()));
        tags.expect_write_tags().times(1).returning(|_, _| Ok(()));
        tags.expect_write_cover()
            .withf(|path, image| path.ends_with("Band_Song.mp3") && image == b"jpeg")
            .times(1)
            .returning(|_, _| Ok(()));

        let report = verify_library(&engine, &config, &mut archive, &tags).unwrap();
        assert_eq!(report.rewritten, 1);
    }

    #[test]
    fn test_matching_tags_left_alone() {
        let dir = TempDir::new().unwrap();
        let (config, mut archive) = setup(&dir);
        let api = api_with_track();
        let engine = QueryEngine::new(&api, &config);
        let mut tags = MockTagWriter::new();
        tags.expect_read_tags().returning(|_| {
            Ok(TrackTags {
                title: "Song".into(),
                track_id: Some("t1".into()),
                ..TrackTags::default()
            })
        });
        tags.expect_write_tags().never();

        let report = verify_library(&engine, &config, &mut archive, &tags).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.rewritten, 0);
    }
}
