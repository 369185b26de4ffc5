//! Cover art.
//!
//! Covers come from the album image of a track. They are embedded in the
//! tags and, when configured, saved as a jpg next to the audio file. Images
//! are fetched once per run and shared by every track of an album.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::api::{CatalogApi, fetch_bytes};
use crate::config::AppConfig;
use crate::error::{Error, FileSystemError, Result};
use crate::node::{NodeData, NodeId};
use crate::session::Session;
use crate::tags::{TagWriter, TrackTags};
use crate::tree::Catalog;

/// Name of the jpg written into album folders.
pub const ALBUM_COVER_FILE: &str = "cover.jpg";

/// Cover image URL of track `id`: the image of its album.
pub fn cover_url(catalog: &Catalog, id: NodeId) -> Option<&str> {
    let NodeData::Track(track) = &catalog.node(id).data else {
        return None;
    };
    match &catalog.node(track.album?).data {
        NodeData::Album(album) if !album.image_url.is_empty() => Some(&album.image_url),
        _ => None,
    }
}

/// Where the cover jpg of `path` goes: `cover.jpg` inside album folders,
/// otherwise the track's own name with a jpg extension.
pub fn cover_file_path(catalog: &Catalog, id: NodeId, path: &Path) -> PathBuf {
    let in_album = catalog
        .node(id)
        .parent()
        .is_some_and(|p| matches!(catalog.node(p).data, NodeData::Album(_)));
    if in_album {
        path.with_file_name(ALBUM_COVER_FILE)
    } else {
        path.with_extension("jpg")
    }
}

/// Images fetched during a run, keyed by URL.
#[derive(Debug, Default)]
pub struct CoverCache {
    images: BTreeMap<String, Vec<u8>>,
}

impl CoverCache {
    /// Image at `url`, fetched on first use.
    pub fn image(&mut self, api: &dyn CatalogApi, url: &str) -> Result<&[u8]> {
        let image = match self.images.entry(url.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(fetch_bytes(api, url)?),
        };
        Ok(image)
    }

    /// Number of images held.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether nothing was fetched yet.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Save the cover of track `id` for the file at `path`. Returns whether a
/// cover was found.
pub fn embed_cover(
    api: &dyn CatalogApi,
    covers: &mut CoverCache,
    catalog: &Catalog,
    config: &AppConfig,
    tags: &dyn TagWriter,
    id: NodeId,
    path: &Path,
) -> Result<bool> {
    let metadata = &config.metadata;
    if !metadata.embed_cover && !metadata.album_art_jpg_file {
        return Ok(false);
    }
    let Some(url) = cover_url(catalog, id) else {
        return Ok(false);
    };
    let image = covers.image(api, url)?;

    if metadata.album_art_jpg_file {
        let jpg = cover_file_path(catalog, id, path);
        if !jpg.exists() {
            fs::write(&jpg, image).map_err(|e| {
                Error::FileSystem(FileSystemError::WriteFailed {
                    path: jpg.clone(),
                    reason: e.to_string(),
                })
            })?;
            debug!(path = %jpg.display(), "Cover image saved");
        }
    }
    if metadata.embed_cover {
        tags.write_cover(path, image)?;
    }
    Ok(true)
}

impl Session<'_> {
    /// Write the tags of track `id` into `path`, then its cover art.
    /// Failures are logged and never fail the download.
    pub(crate) fn tag_file(&mut self, catalog: &Catalog, id: NodeId, path: &Path) {
        let Some(tags) = TrackTags::from_catalog(catalog, self.config, id) else {
            return;
        };
        let label = &catalog.node(id).label;
        if let Err(e) = self.tags.write_tags(path, &tags) {
            error!(item = %label, error = %e, "Failed to write tags");
            return;
        }
        let Some(api) = self.api else {
            return;
        };
        match embed_cover(api, &mut self.covers, catalog, self.config, self.tags, id, path) {
            Ok(true) => debug!(item = %label, "Cover art saved"),
            Ok(false) => {}
            Err(e) => warn!(item = %label, error = %e, "Failed to save cover art"),
        }
    }
}
