//! Download ordering and execution.
//!
//! With the optimized order, every downloadable leaf of the request is
//! flattened into one list, skippable items are dropped, and the rest is
//! sorted by duration and edge-interleaved (shortest, longest, next shortest,
//! ...). Otherwise the requested nodes are downloaded depth first in request
//! order. Downloads run one at a time with a pause between them.
//!
//! Playlist export and temp file cleanup run after the loop even when the run
//! was interrupted; the interruption is reported afterwards.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::api::{Endpoints, partner_audio_url};
use crate::archive::{ArchiveEntry, ArchiveScope};
use crate::error::{Error, FileSystemError, Result, StreamError};
use crate::identifier::{ContentId, ContentKind};
use crate::node::{NodeData, NodeId};
use crate::output::{UNKNOWN_EXTENSION, dedupe_path, output_path};
use crate::playlist;
use crate::query::Query;
use crate::session::{DownloadReport, Session};
use crate::stream::{open_with_fallback, write_stream};
use crate::transcode::{CodecParams, detect_extension, transcode};

/// Duration assumed per track of an album whose tracks were not all fetched.
pub const ESTIMATED_TRACK_MS: u64 = 195_000;

/// Extension of an untranscoded track stream.
const NATIVE_TRACK_EXTENSION: &str = "ogg";

/// Alternate picks from both ends: `[1, 2, 3, 4, 5, 6]` becomes `[1, 6, 2, 5, 3, 4]`.
pub fn edge_interleave<T>(items: Vec<T>) -> Vec<T> {
    let mut remaining: VecDeque<T> = items.into();
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut from_front = true;
    loop {
        let next = if from_front {
            remaining.pop_front()
        } else {
            remaining.pop_back()
        };
        let Some(item) = next else {
            break;
        };
        ordered.push(item);
        from_front = !from_front;
    }
    ordered
}

impl Session<'_> {
    /// Choose the download set and its order, and record it on the query.
    pub fn plan(&mut self, query: &mut Query) -> Vec<NodeId> {
        if !self.config.download.optimized_order {
            let order: Vec<NodeId> = query
                .requested()
                .iter()
                .flat_map(|(_, nodes)| nodes.iter().copied())
                .collect();
            query.set_downloadables(order.clone());
            return order;
        }

        let catalog = query.catalog();
        let mut candidates: Vec<NodeId> = catalog
            .sub_content()
            .iter()
            .copied()
            .filter(|&n| {
                let node = catalog.node(n);
                node.is_downloadable() && node.has_remote_id()
            })
            .collect();

        if self.config.download.download_parent_album {
            let mut albums = BTreeSet::new();
            let mut replaced = Vec::with_capacity(candidates.len());
            for node in candidates {
                let album = match &catalog.node(node).data {
                    NodeData::Track(track) => track
                        .album
                        .filter(|&a| catalog.node(a).has_remote_id()),
                    _ => None,
                };
                match album {
                    Some(album) => {
                        if albums.insert(album) {
                            replaced.push(album);
                        }
                    }
                    None => replaced.push(node),
                }
            }
            candidates = replaced;
            for &album in &albums {
                if let NodeData::Album(info) = &mut query.catalog_mut().node_mut(album).data
                    && info.duration_ms == 0
                {
                    let tracks: u64 = info.total_tracks.parse().unwrap_or(0);
                    info.duration_ms = tracks * ESTIMATED_TRACK_MS;
                }
            }
        }

        query.set_downloadables(candidates.clone());
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !self.check_skippable(query, candidate) {
                kept.push(candidate);
            }
        }
        kept.sort_by_key(|&n| query.catalog().node(n).duration_ms());
        let order = edge_interleave(kept);
        query.set_downloadables(order.clone());
        order
    }

    /// Download everything the plan selects.
    ///
    /// Per-item failures are logged and counted. On cancellation the loop
    /// stops, the export and cleanup still run, and `Error::Cancelled` is
    /// returned.
    pub fn run(&mut self, query: &mut Query) -> Result<DownloadReport> {
        self.report = DownloadReport::default();
        let order = self.plan(query);
        info!(items = order.len(), "Starting downloads");

        let mut outcome = Ok(());
        for id in order {
            if let Err(e) = self.download(query, id) {
                outcome = Err(e);
                break;
            }
        }
        self.report.cancelled = matches!(outcome, Err(Error::Cancelled));
        if self.report.cancelled {
            warn!("Download interrupted, finishing up");
        }

        if self.config.export.export_m3u8
            && let Err(e) = playlist::export_playlists(query, self.config)
        {
            error!(error = %e, "Failed to export playlists");
        }
        self.cleanup_temp_files();

        outcome?;
        info!(
            downloaded = self.report.downloaded,
            copied = self.report.copied,
            skipped = self.report.skipped,
            failed = self.report.failed,
            "Downloads finished"
        );
        Ok(self.report)
    }

    /// Download one node. Only cancellation is returned as an error.
    pub fn download(&mut self, query: &mut Query, id: NodeId) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let node = query.catalog().node(id);
        let (is_container, is_track, is_leaf) = (
            node.is_container(),
            node.kind() == Some(ContentKind::Track),
            node.is_downloadable(),
        );
        let result = if is_container {
            self.download_container(query, id)
        } else if is_track {
            self.download_track(query, id)
        } else if is_leaf {
            self.download_podcast_item(query, id)
        } else {
            Ok(())
        };
        match result {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                error!(
                    item = %query.catalog().node(id).label,
                    kind = ?e.kind(),
                    error = %e,
                    "Download failed"
                );
                self.report.failed += 1;
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn download_container(&mut self, query: &mut Query, id: NodeId) -> Result<()> {
        if self.check_skippable(query, id) {
            return Ok(());
        }
        let items = query.catalog().items(id).to_vec();
        let is_album = matches!(query.catalog().node(id).data, NodeData::Album(_));
        let order = if self.config.download.optimized_order && is_album {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if !self.check_skippable(query, item) {
                    kept.push(item);
                }
            }
            kept.sort_by_key(|&n| query.catalog().node(n).duration_ms());
            edge_interleave(kept)
        } else {
            items
        };
        debug!(
            container = %query.catalog().node(id).name,
            items = order.len(),
            "Downloading container"
        );
        for item in order {
            self.download(query, item)?;
        }
        Ok(())
    }

    fn download_track(&mut self, query: &mut Query, id: NodeId) -> Result<()> {
        let catalog = query.catalog();
        let node = catalog.node(id);
        if node.downloaded {
            return Ok(());
        }
        if self.config.download.download_parent_album
            && let NodeData::Track(track) = &node.data
            && let Some(album) = track.album
            && !matches!(
                node.parent().map(|p| &catalog.node(p).data),
                Some(NodeData::Album(_))
            )
            && catalog.node(album).has_remote_id()
            && !catalog.items(album).is_empty()
        {
            info!(
                item = %node.label,
                album = %catalog.node(album).name,
                "Downloading parent album instead"
            );
            return self.download_container(query, album);
        }
        let always_lyrics = self.config.lyrics.always_check;
        if always_lyrics {
            self.fetch_track_lyrics(query, id);
        }
        if self.check_skippable(query, id) {
            return Ok(());
        }

        let catalog = query.catalog();
        let node = catalog.node(id);
        let content = Self::content_of(query, id)?;
        let intended = output_path(catalog, self.config, id)
            .ok_or_else(|| Error::Stream(StreamError::Unsupported(node.uri())))?;
        let path = dedupe_path(&intended);
        let temp = self.temp_path(&path, &content);
        info!(item = %node.label, path = %path.display(), "Downloading");

        self.fetch_to_temp(&content, &temp)?;
        if !always_lyrics {
            self.fetch_track_lyrics(query, id);
        }
        let params = CodecParams::for_track(self.config, self.streams.is_premium());
        let path = self.finish_transcode(&temp, path, &params, NATIVE_TRACK_EXTENSION)?;

        self.tag_file(query.catalog(), id, &path);
        self.archive_download(query, id, &path, true);
        self.report.downloaded += 1;
        self.mark_downloaded(query, id, Some(path));
        self.pace();
        Ok(())
    }

    fn download_podcast_item(&mut self, query: &mut Query, id: NodeId) -> Result<()> {
        if query.catalog().node(id).downloaded || self.check_skippable(query, id) {
            return Ok(());
        }

        let catalog = query.catalog();
        let node = catalog.node(id);
        let content = Self::content_of(query, id)?;
        let mut intended = output_path(catalog, self.config, id)
            .ok_or_else(|| Error::Stream(StreamError::Unsupported(node.uri())))?;
        let temp = self.temp_path(&intended, &content);
        info!(item = %node.label, path = %intended.display(), "Downloading");

        self.fetch_episode_audio(query, id, &content, &temp)?;
        let native = detect_extension(self.transcoder, &temp);
        if intended.extension().is_some_and(|ext| ext == UNKNOWN_EXTENSION) {
            intended = intended.with_extension(&native);
        }
        if let Some(media) = query.catalog_mut().node_mut(id).media_mut() {
            media.extension = intended
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned());
        }
        let path = dedupe_path(&intended);
        let params = CodecParams::for_episode(self.config, self.streams.is_premium());
        let path = self.finish_transcode(&temp, path, &params, &native)?;

        self.archive_download(query, id, &path, false);
        self.report.downloaded += 1;
        self.mark_downloaded(query, id, Some(path));
        self.pace();
        Ok(())
    }

    fn content_of(query: &Query, id: NodeId) -> Result<ContentId> {
        let node = query.catalog().node(id);
        node.content()
            .cloned()
            .ok_or_else(|| Error::Stream(StreamError::Unsupported(node.uri())))
    }

    fn temp_path(&self, path: &Path, content: &ContentId) -> PathBuf {
        self.config.temp_dir().map_or_else(
            || path.with_extension("tmp"),
            |dir| dir.join(format!("tunegraph_{}_{}.tmp", std::process::id(), content.id())),
        )
    }

    fn fetch_to_temp(&mut self, content: &ContentId, temp: &Path) -> Result<()> {
        self.temp_files.push(temp.to_path_buf());
        let mut stream = open_with_fallback(self.streams, content, self.config.download.quality)?;
        let bytes = write_stream(&mut stream, temp, &self.cancel_flag)?;
        debug!(id = %content, bytes, "Stream fetched");
        Ok(())
    }

    /// Fetch an episode. Externally hosted episodes are read from the
    /// partner's audio URL, falling back to the catalog stream.
    fn fetch_episode_audio(
        &mut self,
        query: &Query,
        id: NodeId,
        content: &ContentId,
        temp: &Path,
    ) -> Result<()> {
        let catalog = query.catalog();
        let external = match &catalog.node(id).data {
            NodeData::Episode(e) => {
                e.externally_hosted
                    || e.show.is_some_and(|s| {
                        matches!(&catalog.node(s).data, NodeData::Show(show) if show.externally_hosted)
                    })
            }
            _ => false,
        };
        if !external {
            return self.fetch_to_temp(content, temp);
        }
        let Some(api) = self.api else {
            warn!(id = %content, "Externally hosted episode, no catalog access for its audio URL");
            return self.fetch_to_temp(content, temp);
        };

        let url = match partner_audio_url(api, &Endpoints::default(), content.id()) {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!(id = %content, "No partner audio URL, using catalog stream");
                return self.fetch_to_temp(content, temp);
            }
            Err(e) => {
                warn!(id = %content, error = %e, "Partner lookup failed, using catalog stream");
                return self.fetch_to_temp(content, temp);
            }
        };
        self.temp_files.push(temp.to_path_buf());
        let mut stream = api.open_url(&url)?;
        let bytes = write_stream(&mut stream, temp, &self.cancel_flag)?;
        debug!(id = %content, url = %url, bytes, "Externally hosted episode fetched");
        Ok(())
    }

    /// Transcode into `path`, or keep the untouched stream under `native` on failure.
    fn finish_transcode(
        &self,
        temp: &Path,
        path: PathBuf,
        params: &CodecParams,
        native: &str,
    ) -> Result<PathBuf> {
        match transcode(self.transcoder, temp, &path, params) {
            Ok(()) => Ok(path),
            Err(e) => {
                let kept = dedupe_path(&path.with_extension(native));
                warn!(
                    error = %e,
                    path = %kept.display(),
                    "Transcoding failed, keeping original stream"
                );
                fs::rename(temp, &kept).map_err(|e| {
                    Error::FileSystem(FileSystemError::CopyFailed {
                        from: temp.to_path_buf(),
                        to: kept.clone(),
                        reason: e.to_string(),
                    })
                })?;
                Ok(kept)
            }
        }
    }

    /// Append the finished download to the directory archive, and for tracks
    /// to the global archive, unless it is already listed there.
    fn archive_download(&mut self, query: &Query, id: NodeId, path: &Path, global: bool) {
        let catalog = query.catalog();
        let node = catalog.node(id);
        let (in_dir, in_global) = node
            .media()
            .map_or((false, false), |m| (m.in_dir_archive, m.in_global_archive));
        let parent = match &node.data {
            NodeData::Track(t) => t.album,
            NodeData::Episode(e) => e.show,
            NodeData::Chapter(c) => c.audiobook,
            _ => None,
        };
        let parent_tag = parent.map(|p| catalog.node(p).name.clone()).unwrap_or_default();
        let item_id = node.content().map(|c| c.id().to_string()).unwrap_or_default();
        let entry = ArchiveEntry::new(item_id, node.label.clone(), parent_tag, path);

        if self.archive.directory_enabled()
            && !in_dir
            && let Some(dir) = path.parent()
            && let Err(e) = self
                .archive
                .append(&ArchiveScope::Directory(dir.to_path_buf()), entry.clone())
        {
            warn!(error = %e, "Failed to update directory archive");
        }
        if global
            && self.archive.global_enabled()
            && !in_global
            && let Err(e) = self.archive.append(&ArchiveScope::Global, entry)
        {
            warn!(error = %e, "Failed to update global archive");
        }
    }

    fn pace(&self) {
        let pacing = self.config.pacing();
        if !pacing.is_zero() && !self.is_cancelled() {
            debug!(secs = pacing.as_secs(), "Pausing between downloads");
            thread::sleep(pacing);
        }
    }

    fn cleanup_temp_files(&mut self) {
        for temp in std::mem::take(&mut self.temp_files) {
            if !temp.exists() {
                continue;
            }
            match fs::remove_file(&temp) {
                Ok(()) => debug!(path = %temp.display(), "Removed leftover temp file"),
                Err(e) => warn!(path = %temp.display(), error = %e, "Failed to remove temp file"),
            }
        }
    }
}
