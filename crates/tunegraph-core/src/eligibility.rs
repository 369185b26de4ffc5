//! Skip decisions.
//!
//! Every node is checked at most once per run and the answer is cached on the
//! node. A leaf is skipped, in this order, when it was already downloaded in
//! this run, its name matches a skip pattern, it is unplayable or lacks
//! metadata, it belongs to a compilation album that should be skipped, its
//! file already exists, or its id is found in the directory archive and then
//! the global archive. A container is skipped when it was downloaded, when it
//! is a filtered album, or when all of its items are skipped.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::archive::ArchiveScope;
use crate::identifier::ContentKind;
use crate::node::{NodeData, NodeId};
use crate::output::{UNKNOWN_EXTENSION, file_exists, output_path};
use crate::query::Query;
use crate::session::Session;
use crate::tree::Catalog;

/// Why a node was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another occurrence was already downloaded in this run.
    DownloadedThisRun,
    /// The name matched a skip pattern.
    NameFiltered,
    /// The catalog marks the item unplayable, or no metadata could be fetched.
    Unplayable,
    /// The item belongs to a compilation album.
    Compilation,
    /// A file already exists at the output path.
    FileExists(PathBuf),
    /// The directory archive lists the item.
    DirectoryArchive(PathBuf),
    /// The global archive lists the item.
    GlobalArchive(PathBuf),
    /// Every item of the container was skipped.
    AllItemsSkipped,
}

impl SkipReason {
    /// File that satisfies the item, when the reason carries one.
    pub fn existing_path(&self) -> Option<&PathBuf> {
        match self {
            Self::FileExists(path) | Self::DirectoryArchive(path) | Self::GlobalArchive(path) => {
                Some(path)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DownloadedThisRun => write!(f, "already downloaded"),
            Self::NameFiltered => write!(f, "matches skip pattern"),
            Self::Unplayable => write!(f, "unavailable"),
            Self::Compilation => write!(f, "compilation album"),
            Self::FileExists(_) => write!(f, "file already exists"),
            Self::DirectoryArchive(_) => write!(f, "listed in directory archive"),
            Self::GlobalArchive(_) => write!(f, "previously downloaded"),
            Self::AllItemsSkipped => write!(f, "all items skipped"),
        }
    }
}

fn in_compilation(catalog: &Catalog, id: NodeId) -> bool {
    let NodeData::Track(track) = &catalog.node(id).data else {
        return false;
    };
    let album = track
        .album
        .or_else(|| catalog.node(id).parent())
        .map(|a| &catalog.node(a).data);
    matches!(album, Some(NodeData::Album(info)) if info.compilation)
}

impl Session<'_> {
    /// Whether `id` should be skipped. Cached on the node after the first answer.
    ///
    /// A container still waiting for its remaining items is never skipped and
    /// its answer is not cached.
    pub fn check_skippable(&mut self, query: &mut Query, id: NodeId) -> bool {
        if let Some(cached) = query.catalog().node(id).skippable {
            return cached;
        }

        let node = query.catalog().node(id);
        if node.is_container() && node.container().is_some_and(|c| c.needs_expansion) {
            debug!(node = %node.uri(), "Items not fully known, not skippable yet");
            return false;
        }

        let (is_leaf, is_container) = (node.is_downloadable(), node.is_container());
        let reason = if is_leaf {
            self.leaf_skip_reason(query, id)
        } else if is_container {
            self.container_skip_reason(query, id)
        } else {
            None
        };

        let label = query.catalog().node(id).label.clone();
        match &reason {
            Some(reason) => {
                info!(item = %label, reason = %reason, "Skipping");
                if reason != &SkipReason::DownloadedThisRun
                    && reason != &SkipReason::AllItemsSkipped
                {
                    self.report.skipped += 1;
                }
                if let Some(path) = reason.existing_path() {
                    self.mark_downloaded(query, id, Some(path.clone()));
                }
            }
            None => debug!(item = %label, "Not skippable"),
        }

        let skippable = reason.is_some();
        query.catalog_mut().node_mut(id).skippable = Some(skippable);
        skippable
    }

    fn leaf_skip_reason(&mut self, query: &mut Query, id: NodeId) -> Option<SkipReason> {
        let catalog = query.catalog();
        let node = catalog.node(id);
        if node.downloaded {
            return Some(SkipReason::DownloadedThisRun);
        }
        if let Some(kind) = node.kind()
            && self.filters.matches(kind, &node.name)
        {
            return Some(SkipReason::NameFiltered);
        }
        let playable = node.media().is_some_and(|m| m.is_playable);
        if !node.has_metadata || !playable || !node.has_remote_id() {
            return Some(SkipReason::Unplayable);
        }
        if self.config.download.skip_compilation_albums && in_compilation(catalog, id) {
            return Some(SkipReason::Compilation);
        }

        let Some(path) = output_path(catalog, self.config, id) else {
            debug!(item = %node.label, "No output path, existing files not checked");
            return None;
        };
        let item_id = node.content().map(|c| c.id().to_string()).unwrap_or_default();
        let is_track = node.kind() == Some(ContentKind::Track);
        let unknown_ext = path
            .extension()
            .is_some_and(|ext| ext == UNKNOWN_EXTENSION);

        let dir_scope = path.parent().map(|p| ArchiveScope::Directory(p.to_path_buf()));
        let dir_hit = match &dir_scope {
            Some(scope) if self.archive.directory_enabled() => self.archive.lookup(scope, &item_id),
            _ => None,
        };
        let global_hit = if is_track && self.archive.global_enabled() {
            self.archive.lookup(&ArchiveScope::Global, &item_id)
        } else {
            None
        };
        if let Some(media) = query.catalog_mut().node_mut(id).media_mut() {
            media.in_dir_archive = dir_hit.is_some();
            media.in_global_archive = global_hit.is_some();
        }

        let archive = &self.config.archive;
        if archive.skip_existing {
            if let Some(existing) = file_exists(&path, unknown_ext) {
                return Some(SkipReason::FileExists(existing));
            }
            if let Some(archived) = dir_hit {
                return Some(SkipReason::DirectoryArchive(archived));
            }
        }
        if archive.skip_previously_downloaded
            && let Some(archived) = global_hit
        {
            return Some(SkipReason::GlobalArchive(archived));
        }
        None
    }

    fn container_skip_reason(&mut self, query: &mut Query, id: NodeId) -> Option<SkipReason> {
        let catalog = query.catalog();
        let node = catalog.node(id);
        if node.downloaded {
            return Some(SkipReason::DownloadedThisRun);
        }
        if let NodeData::Album(album) = &node.data {
            if self.config.download.skip_compilation_albums && album.compilation {
                return Some(SkipReason::Compilation);
            }
            if self.filters.matches(ContentKind::Album, &node.name) {
                return Some(SkipReason::NameFiltered);
            }
        }

        let items = catalog.items(id).to_vec();
        let mut all_skipped = true;
        for item in items {
            all_skipped &= self.check_skippable(query, item);
        }
        all_skipped.then_some(SkipReason::AllItemsSkipped)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveEntry, ArchiveStore};
    use crate::config::AppConfig;
    use crate::identifier::ContentId;
    use crate::query::QuerySource;
    use crate::stream::MockContentStreamProvider;
    use crate::tags::MockTagWriter;
    use crate::transcode::MockTranscoder;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        config: AppConfig,
        streams: MockContentStreamProvider,
        transcoder: MockTranscoder,
        tags: MockTagWriter,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = AppConfig::default().with_root(dir.path().join("music"));
            config.archive.location = Some(dir.path().join("data"));
            config.output.single = "{artist} - {song_name}".into();
            config.download.format = "ogg".into();
            Self {
                _dir: dir,
                config,
                streams: MockContentStreamProvider::new(),
                transcoder: MockTranscoder::new(),
                tags: MockTagWriter::new(),
            }
        }

        fn session(&self) -> Session<'_> {
            Session::new(&self.config, &self.streams, &self.transcoder, &self.tags).unwrap()
        }
    }

    fn single_track(name: &str) -> (Query, NodeId) {
        let mut query = Query::with_label(QuerySource::LikedSongs, "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let track = catalog.create_child(root, ContentId::new(ContentKind::Track, "t1"));
        let artist = catalog.create_child(track, ContentId::new(ContentKind::Artist, "ar"));
        catalog.node_mut(artist).name = "Band".into();
        let node = catalog.node_mut(track);
        node.name = name.into();
        node.label = format!("Band - {name}");
        node.has_metadata = true;
        if let NodeData::Track(info) = &mut node.data {
            info.artists = vec![artist];
            info.media.is_playable = true;
        }
        catalog.push_item(root, track);
        (query, track)
    }

    #[test]
    fn test_playable_track_not_skipped_and_cached() {
        let fixture = Fixture::new();
        let mut session = fixture.session();
        let (mut query, track) = single_track("Song");
        assert!(!session.check_skippable(&mut query, track));
        assert_eq!(query.catalog().node(track).skippable, Some(false));
    }

    #[test]
    fn test_unplayable_and_filtered() {
        let mut fixture = Fixture::new();
        fixture.config.filters.regex_enabled = true;
        fixture.config.filters.track_skip = "live".into();
        let mut session = fixture.session();

        let (mut query, track) = single_track("Song (Live)");
        assert!(session.check_skippable(&mut query, track));

        let (mut query, track) = single_track("Song");
        if let Some(media) = query.catalog_mut().node_mut(track).media_mut() {
            media.is_playable = false;
        }
        assert!(session.check_skippable(&mut query, track));
        assert!(!query.catalog().node(track).downloaded);
    }

    #[test]
    fn test_existing_file_marks_downloaded() {
        let fixture = Fixture::new();
        let (mut query, track) = single_track("Song");
        let path = output_path(query.catalog(), &fixture.config, track).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"audio").unwrap();

        let mut session = fixture.session();
        assert!(session.check_skippable(&mut query, track));
        assert_eq!(query.catalog().node(track).filepath(), Some(&path));
        assert!(query.catalog().node(track).downloaded);
        assert_eq!(session.report().skipped, 1);
    }

    #[test]
    fn test_directory_archive_before_global() {
        let mut fixture = Fixture::new();
        fixture.config.archive.skip_previously_downloaded = true;
        let (mut query, track) = single_track("Song");
        let path = output_path(query.catalog(), &fixture.config, track).unwrap();
        let dir = path.parent().unwrap().to_path_buf();

        let mut store = ArchiveStore::from_config(&fixture.config);
        store
            .append(
                &ArchiveScope::Directory(dir.clone()),
                ArchiveEntry::new("t1", "Band - Song", "", dir.join("dir-copy.ogg")),
            )
            .unwrap();
        store
            .append(
                &ArchiveScope::Global,
                ArchiveEntry::new("t1", "Band - Song", "", "/elsewhere/global-copy.ogg"),
            )
            .unwrap();

        let mut session = fixture.session();
        assert!(session.check_skippable(&mut query, track));
        let node = query.catalog().node(track);
        assert_eq!(node.filepath(), Some(&dir.join("dir-copy.ogg")));
        assert!(node.media().unwrap().in_global_archive);
    }

    #[test]
    fn test_global_archive_needs_option() {
        let fixture = Fixture::new();
        let (mut query, track) = single_track("Song");
        let mut store = ArchiveStore::from_config(&fixture.config);
        store
            .append(
                &ArchiveScope::Global,
                ArchiveEntry::new("t1", "Band - Song", "", "/elsewhere/global-copy.ogg"),
            )
            .unwrap();

        let mut session = fixture.session();
        assert!(!session.check_skippable(&mut query, track));
        assert!(query.catalog().node(track).media().unwrap().in_global_archive);
    }

    #[test]
    fn test_container_is_and_of_items() {
        let fixture = Fixture::new();
        let mut session = fixture.session();
        let mut query = Query::with_label(QuerySource::SavedAlbums, "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let album = catalog.create_child(root, ContentId::new(ContentKind::Album, "a1"));
        catalog.node_mut(album).name = "Blue".into();
        let mut tracks = Vec::new();
        for (i, playable) in [(1, false), (2, true)] {
            let t = catalog.create_child(album, ContentId::new(ContentKind::Track, format!("t{i}")));
            let node = catalog.node_mut(t);
            node.name = format!("Song {i}");
            node.has_metadata = true;
            if let Some(media) = node.media_mut() {
                media.is_playable = playable;
            }
            catalog.push_item(album, t);
            tracks.push(t);
        }

        assert!(!session.check_skippable(&mut query, album));
        assert_eq!(query.catalog().node(tracks[0]).skippable, Some(true));
        assert_eq!(query.catalog().node(tracks[1]).skippable, Some(false));
    }

    #[test]
    fn test_episode_without_show_checks_existing_file() {
        let fixture = Fixture::new();
        let mut session = fixture.session();
        let mut query = Query::with_label(QuerySource::Urls(Default::default()), "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let episode = catalog.create_child(root, ContentId::new(ContentKind::Episode, "e1"));
        let node = catalog.node_mut(episode);
        node.name = "Pilot".into();
        node.label = "Pilot".into();
        node.has_metadata = true;

        let path = output_path(query.catalog(), &fixture.config, episode).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"audio").unwrap();

        assert!(session.check_skippable(&mut query, episode));
        assert_eq!(query.catalog().node(episode).filepath(), Some(&path));
    }

    #[test]
    fn test_unexpanded_container_not_cached() {
        let fixture = Fixture::new();
        let mut session = fixture.session();
        let mut query = Query::with_label(QuerySource::SavedAlbums, "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let album = catalog.create_child(root, ContentId::new(ContentKind::Album, "a1"));
        if let Some(container) = catalog.node_mut(album).container_mut() {
            container.needs_expansion = true;
        }
        assert!(!session.check_skippable(&mut query, album));
        assert_eq!(query.catalog().node(album).skippable, None);
    }

    #[test]
    fn test_compilation_album_skipped() {
        let mut fixture = Fixture::new();
        fixture.config.download.skip_compilation_albums = true;
        let mut session = fixture.session();
        let mut query = Query::with_label(QuerySource::SavedAlbums, "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let album = catalog.create_child(root, ContentId::new(ContentKind::Album, "a1"));
        if let NodeData::Album(info) = &mut catalog.node_mut(album).data {
            info.compilation = true;
        }
        assert!(session.check_skippable(&mut query, album));
    }
}
