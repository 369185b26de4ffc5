//! Catalog node model.
//!
//! A node is one occurrence of a catalog entity inside a request graph. Kind
//! specific fields live in [`NodeData`], a closed set of variants; fields
//! shared by every node (identity, parent, name, flags) live on [`Node`].
//! Relations to other nodes are stored as [`NodeId`] indices into the owning
//! [`Catalog`](crate::tree::Catalog) arena.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::identifier::{ContentId, ContentKind};

/// Index of a node inside its catalog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Raw arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// How a query root was built. Drives output templates and export names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootRole {
    /// Explicit URLs or URIs.
    #[default]
    Urls,
    /// The user's liked tracks.
    LikedSongs,
    /// The user's saved albums.
    SavedAlbums,
    /// The user's own and followed playlists.
    UserPlaylists,
    /// Artists the user follows.
    FollowedArtists,
    /// Re-verification of already downloaded files.
    VerifyLibrary,
}

impl RootRole {
    /// Display name of the root collection.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Urls => "Total Progress",
            Self::LikedSongs => "Liked Songs",
            Self::SavedAlbums => "Saved Albums",
            Self::UserPlaylists => "User Playlists",
            Self::FollowedArtists => "Followed Artists",
            Self::VerifyLibrary => "Verifiable Tracks",
        }
    }
}

/// Ordered child collection shared by every container kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    /// Contained items in catalog order.
    pub items: Vec<NodeId>,
    /// Kinds this container may hold.
    pub contains: Vec<ContentKind>,
    /// The server returned only part of the item list.
    pub needs_expansion: bool,
    /// Items are bare references that need their own bulk fetch.
    pub needs_recursion: bool,
    /// Items embedded in the container's own metadata response.
    pub preloaded: usize,
    /// Page size used when fetching more items.
    pub page_size: usize,
}

impl ContainerState {
    fn for_kind(kind: ContentKind) -> Self {
        let (contains, preloaded, page_size, needs_recursion) = match kind {
            ContentKind::Album => (vec![ContentKind::Track], 50, 50, false),
            ContentKind::Playlist => (vec![ContentKind::Track, ContentKind::Episode], 100, 100, false),
            ContentKind::Artist => (vec![ContentKind::Album], 0, 20, true),
            ContentKind::Show => (vec![ContentKind::Episode], 50, 50, false),
            ContentKind::Audiobook => (vec![ContentKind::Chapter], 50, 50, false),
            _ => (Vec::new(), 0, 50, false),
        };
        Self {
            items: Vec::new(),
            contains,
            needs_expansion: false,
            needs_recursion,
            preloaded,
            page_size,
        }
    }

    /// Append an item unless already present.
    pub fn push(&mut self, item: NodeId) {
        if !self.items.contains(&item) {
            self.items.push(item);
        }
    }
}

/// Download bookkeeping for a downloadable leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaState {
    /// Duration reported by the catalog.
    pub duration_ms: u64,
    /// Whether the catalog allows streaming this item.
    pub is_playable: bool,
    /// Found in the directory-scoped archive of its output folder.
    pub in_dir_archive: bool,
    /// Found in the global archive.
    pub in_global_archive: bool,
    /// Resolved output file, set once downloaded or matched.
    pub filepath: Option<PathBuf>,
    /// Output extension, without the dot. `None` until the codec is known.
    pub extension: Option<String>,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            is_playable: true,
            in_dir_archive: false,
            in_global_archive: false,
            filepath: None,
            extension: None,
        }
    }
}

/// Root of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInfo {
    /// How the request was built.
    pub role: RootRole,
    /// Top-level children.
    pub container: ContainerState,
}

/// Track fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Disc number.
    pub disc_number: String,
    /// Track number, zero padded to two digits.
    pub track_number: String,
    /// Parent album, when known.
    pub album: Option<NodeId>,
    /// Credited artists, first is the main artist.
    pub artists: Vec<NodeId>,
    /// Union of the artists' genres, sorted.
    pub genres: Vec<String>,
    /// When the track was added to a playlist or library.
    pub added_at: String,
    /// Who added the track to a playlist.
    pub added_by: String,
    /// Whether the playlist entry is a local file.
    pub is_local: bool,
    /// Fetched lyrics lines, with timestamps when synced.
    pub lyrics: Vec<String>,
    /// Download bookkeeping.
    pub media: MediaState,
}

/// Episode fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeInfo {
    /// Episode description.
    pub description: String,
    /// Explicit flag.
    pub explicit: bool,
    /// Hosted outside the catalog.
    pub externally_hosted: bool,
    /// Release date.
    pub release_date: String,
    /// Parent show, when known.
    pub show: Option<NodeId>,
    /// When the episode was added to a playlist.
    pub added_at: String,
    /// Who added the episode to a playlist.
    pub added_by: String,
    /// Download bookkeeping.
    pub media: MediaState,
}

/// Audiobook chapter fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterInfo {
    /// Chapter number.
    pub chapter_number: String,
    /// Parent audiobook, when known.
    pub audiobook: Option<NodeId>,
    /// Download bookkeeping.
    pub media: MediaState,
}

/// Album fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumInfo {
    /// Album type reported by the catalog (album, single, compilation).
    pub album_type: String,
    /// Release date.
    pub release_date: String,
    /// Release year, taken from the date.
    pub year: String,
    /// Total track count, zero padded to two digits.
    pub total_tracks: String,
    /// Total disc count, from the last track.
    pub total_discs: String,
    /// Compilation album.
    pub compilation: bool,
    /// Summed track durations, or an estimate.
    pub duration_ms: u64,
    /// Largest cover image.
    pub image_url: String,
    /// Record label.
    pub label: String,
    /// Album artists.
    pub artists: Vec<NodeId>,
    /// When the album was saved to the library.
    pub added_at: String,
    /// Tracks.
    pub container: ContainerState,
}

/// Playlist fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistInfo {
    /// Collaborative flag.
    pub collaborative: bool,
    /// Description.
    pub description: String,
    /// Largest cover image.
    pub image_url: String,
    /// Public flag.
    pub public: bool,
    /// Snapshot id of this version.
    pub snapshot_id: String,
    /// Owner.
    pub owner: Option<NodeId>,
    /// Tracks and episodes.
    pub container: ContainerState,
}

/// Artist fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistInfo {
    /// Genres.
    pub genres: Vec<String>,
    /// Follower count.
    pub followers: u64,
    /// Albums.
    pub container: ContainerState,
}

/// Show fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowInfo {
    /// Description.
    pub description: String,
    /// Explicit flag.
    pub explicit: bool,
    /// Hosted outside the catalog.
    pub externally_hosted: bool,
    /// Largest cover image.
    pub image_url: String,
    /// Publisher.
    pub publisher: String,
    /// Total episode count, zero padded to two digits.
    pub total_episodes: String,
    /// Episodes.
    pub container: ContainerState,
}

/// Audiobook fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudiobookInfo {
    /// Publisher.
    pub publisher: String,
    /// Authors.
    pub authors: Vec<String>,
    /// Chapters.
    pub container: ContainerState,
}

/// User fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// Display name.
    pub display_name: String,
}

/// Kind specific node data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// Request root.
    Query(QueryInfo),
    /// Track leaf.
    Track(TrackInfo),
    /// Episode leaf.
    Episode(EpisodeInfo),
    /// Chapter leaf.
    Chapter(ChapterInfo),
    /// Album container.
    Album(AlbumInfo),
    /// Playlist container.
    Playlist(PlaylistInfo),
    /// Artist container.
    Artist(ArtistInfo),
    /// Show container.
    Show(ShowInfo),
    /// Audiobook container.
    Audiobook(AudiobookInfo),
    /// User, neither container nor downloadable.
    User(UserInfo),
}

impl NodeData {
    /// Empty data for a freshly created node of `kind`.
    pub fn empty(kind: ContentKind) -> Self {
        let container = ContainerState::for_kind(kind);
        match kind {
            ContentKind::Track => Self::Track(TrackInfo::default()),
            ContentKind::Episode => Self::Episode(EpisodeInfo::default()),
            ContentKind::Chapter => Self::Chapter(ChapterInfo::default()),
            ContentKind::Album => Self::Album(AlbumInfo {
                container,
                ..AlbumInfo::default()
            }),
            ContentKind::Playlist => Self::Playlist(PlaylistInfo {
                container,
                ..PlaylistInfo::default()
            }),
            ContentKind::Artist => Self::Artist(ArtistInfo {
                container,
                ..ArtistInfo::default()
            }),
            ContentKind::Show => Self::Show(ShowInfo {
                container,
                ..ShowInfo::default()
            }),
            ContentKind::Audiobook => Self::Audiobook(AudiobookInfo {
                container,
                ..AudiobookInfo::default()
            }),
            ContentKind::User => Self::User(UserInfo::default()),
        }
    }
}

/// One occurrence of a catalog entity in a request graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) content: Option<ContentId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) siblings: BTreeSet<NodeId>,
    /// Display name.
    pub name: String,
    /// Label used in log lines, e.g. `Artist - Title`.
    pub label: String,
    /// Metadata has been parsed from a full response.
    pub has_metadata: bool,
    /// This node (or all of its items) has a file on disk.
    pub downloaded: bool,
    /// Cached skip decision. Set at most once.
    pub skippable: Option<bool>,
    /// Kind specific fields.
    pub data: NodeData,
}

impl Node {
    pub(crate) fn new(content: ContentId, parent: NodeId) -> Self {
        let data = NodeData::empty(content.kind());
        Self {
            content: Some(content),
            parent: Some(parent),
            children: Vec::new(),
            siblings: BTreeSet::new(),
            name: String::new(),
            label: String::new(),
            has_metadata: false,
            downloaded: false,
            skippable: None,
            data,
        }
    }

    pub(crate) fn root(role: RootRole, label: String) -> Self {
        Self {
            content: None,
            parent: None,
            children: Vec::new(),
            siblings: BTreeSet::new(),
            name: role.display_name().to_string(),
            label,
            has_metadata: true,
            downloaded: false,
            skippable: None,
            data: NodeData::Query(QueryInfo {
                role,
                container: ContainerState::default(),
            }),
        }
    }

    /// Catalog identifier. `None` only for the request root.
    pub const fn content(&self) -> Option<&ContentId> {
        self.content.as_ref()
    }

    /// Entity kind. `None` only for the request root.
    pub fn kind(&self) -> Option<ContentKind> {
        self.content.as_ref().map(ContentId::kind)
    }

    /// Identity key: the URI for catalog nodes, `query:<label>` for the root.
    pub fn uri(&self) -> String {
        self.content
            .as_ref()
            .map_or_else(|| format!("query:{}", self.label), ContentId::uri)
    }

    /// Parent node.
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Every node created beneath this one, including linked entities.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Identity-equal nodes found under other parents.
    pub const fn siblings(&self) -> &BTreeSet<NodeId> {
        &self.siblings
    }

    /// Whether this node holds an ordered item collection. The root counts.
    pub const fn is_container(&self) -> bool {
        self.container().is_some()
    }

    /// Whether this node is a downloadable leaf.
    pub const fn is_downloadable(&self) -> bool {
        self.media().is_some()
    }

    /// Container state, for containers and the root.
    pub const fn container(&self) -> Option<&ContainerState> {
        match &self.data {
            NodeData::Query(q) => Some(&q.container),
            NodeData::Album(a) => Some(&a.container),
            NodeData::Playlist(p) => Some(&p.container),
            NodeData::Artist(a) => Some(&a.container),
            NodeData::Show(s) => Some(&s.container),
            NodeData::Audiobook(a) => Some(&a.container),
            NodeData::Track(_) | NodeData::Episode(_) | NodeData::Chapter(_) | NodeData::User(_) => {
                None
            }
        }
    }

    /// Mutable container state.
    pub const fn container_mut(&mut self) -> Option<&mut ContainerState> {
        match &mut self.data {
            NodeData::Query(q) => Some(&mut q.container),
            NodeData::Album(a) => Some(&mut a.container),
            NodeData::Playlist(p) => Some(&mut p.container),
            NodeData::Artist(a) => Some(&mut a.container),
            NodeData::Show(s) => Some(&mut s.container),
            NodeData::Audiobook(a) => Some(&mut a.container),
            NodeData::Track(_) | NodeData::Episode(_) | NodeData::Chapter(_) | NodeData::User(_) => {
                None
            }
        }
    }

    /// Ordered items, empty for non-containers.
    pub fn items(&self) -> &[NodeId] {
        self.container().map(|c| c.items.as_slice()).unwrap_or_default()
    }

    /// Download bookkeeping, for downloadable leaves.
    pub const fn media(&self) -> Option<&MediaState> {
        match &self.data {
            NodeData::Track(t) => Some(&t.media),
            NodeData::Episode(e) => Some(&e.media),
            NodeData::Chapter(c) => Some(&c.media),
            _ => None,
        }
    }

    /// Mutable download bookkeeping.
    pub const fn media_mut(&mut self) -> Option<&mut MediaState> {
        match &mut self.data {
            NodeData::Track(t) => Some(&mut t.media),
            NodeData::Episode(e) => Some(&mut e.media),
            NodeData::Chapter(c) => Some(&mut c.media),
            _ => None,
        }
    }

    /// Resolved output file.
    pub fn filepath(&self) -> Option<&PathBuf> {
        self.media().and_then(|m| m.filepath.as_ref())
    }

    /// Duration used for download ordering.
    pub fn duration_ms(&self) -> u64 {
        match &self.data {
            NodeData::Album(a) => a.duration_ms,
            _ => self.media().map_or(0, |m| m.duration_ms),
        }
    }

    /// Whether this node may be queued for download: a catalog leaf with a remote id.
    pub fn has_remote_id(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_local())
    }

    /// Short multi-line summary for display.
    pub fn dashboard(&self) -> String {
        let mut out = String::new();
        let title = self.kind().map_or("Query", ContentKind::title);
        if let Some(content) = &self.content {
            let _ = writeln!(out, "{title} ID: {}", content.id());
        }
        let _ = write!(out, "{title} Name: {}", self.name);
        match &self.data {
            NodeData::Track(t) => {
                let _ = write!(out, "\nTrack Number: {}", t.track_number);
            }
            NodeData::Episode(e) => {
                let _ = write!(out, "\nRelease Date: {}", e.release_date);
            }
            NodeData::Album(a) => {
                let _ = write!(out, "\nAlbum Total Tracks: {}", a.total_tracks);
            }
            NodeData::Artist(a) if !a.genres.is_empty() => {
                let _ = write!(out, "\nGenres: {}", a.genres.join(", "));
            }
            NodeData::Show(s) => {
                let _ = write!(out, "\nTotal Episodes: {}", s.total_episodes);
            }
            NodeData::Playlist(p) => {
                let _ = write!(out, "\nItems: {}", p.container.items.len());
            }
            _ => {}
        }
        out
    }
}
