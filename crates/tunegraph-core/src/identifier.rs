//! Catalog identifiers and request parsing.
//!
//! Every catalog entity is addressed by a `(kind, id)` pair, written in the
//! catalog's native URI form `kind:id`. User requests are free-form lists of
//! share URLs or URIs (optionally read from a file) that get grouped by kind
//! in the order the query engine fetches them.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, FileSystemError, RequestError, Result};

/// Prefix of synthetic ids given to local (non-catalog) files.
pub const LOCAL_ID_PREFIX: &str = "local-";

static URL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^https?://open\.[A-Za-z0-9.-]+/(?:intl-[A-Za-z-]+/)?(track|episode|album|playlist|artist|show|user|chapter|audiobook)/([A-Za-z0-9]+)",
    )
    .ok()
});

static URI_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z]+:)?(track|episode|album|playlist|artist|show|user|chapter|audiobook):([A-Za-z0-9]+)$",
    )
    .ok()
});

/// Kind of catalog entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// A music track.
    Track,
    /// A podcast episode.
    Episode,
    /// An album of tracks.
    Album,
    /// A playlist of tracks and episodes.
    Playlist,
    /// An artist, containing albums.
    Artist,
    /// A podcast show, containing episodes.
    Show,
    /// A catalog user.
    User,
    /// An audiobook chapter.
    Chapter,
    /// An audiobook, containing chapters.
    Audiobook,
}

impl ContentKind {
    /// Kinds in the order their request groups are fetched.
    pub const FETCH_ORDER: [Self; 8] = [
        Self::Playlist,
        Self::Artist,
        Self::Album,
        Self::Audiobook,
        Self::Show,
        Self::Chapter,
        Self::Episode,
        Self::Track,
    ];

    /// Lowercase singular name, as used in URIs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Episode => "episode",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Artist => "artist",
            Self::Show => "show",
            Self::User => "user",
            Self::Chapter => "chapter",
            Self::Audiobook => "audiobook",
        }
    }

    /// Plural name, used for API paths and bulk response keys.
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Track => "tracks",
            Self::Episode => "episodes",
            Self::Album => "albums",
            Self::Playlist => "playlists",
            Self::Artist => "artists",
            Self::Show => "shows",
            Self::User => "users",
            Self::Chapter => "chapters",
            Self::Audiobook => "audiobooks",
        }
    }

    /// Maximum ids per bulk call. Zero means the kind is fetched one at a time.
    pub const fn bulk_limit(self) -> usize {
        match self {
            Self::Playlist | Self::User => 0,
            Self::Album => 20,
            Self::Track => 100,
            Self::Artist | Self::Audiobook | Self::Show | Self::Chapter | Self::Episode => 50,
        }
    }

    /// Whether nodes of this kind hold an ordered child collection.
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            Self::Album | Self::Playlist | Self::Artist | Self::Show | Self::Audiobook
        )
    }

    /// Whether nodes of this kind correspond to a downloadable file.
    pub const fn is_downloadable(self) -> bool {
        matches!(self, Self::Track | Self::Episode | Self::Chapter)
    }

    /// Display name with a leading capital.
    pub const fn title(self) -> &'static str {
        match self {
            Self::Track => "Track",
            Self::Episode => "Episode",
            Self::Album => "Album",
            Self::Playlist => "Playlist",
            Self::Artist => "Artist",
            Self::Show => "Show",
            Self::User => "User",
            Self::Chapter => "Chapter",
            Self::Audiobook => "Audiobook",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "track" => Ok(Self::Track),
            "episode" => Ok(Self::Episode),
            "album" => Ok(Self::Album),
            "playlist" => Ok(Self::Playlist),
            "artist" => Ok(Self::Artist),
            "show" => Ok(Self::Show),
            "user" => Ok(Self::User),
            "chapter" => Ok(Self::Chapter),
            "audiobook" => Ok(Self::Audiobook),
            other => Err(Error::Request(RequestError::InvalidIdentifier(
                other.to_string(),
            ))),
        }
    }
}

/// Compound catalog identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId {
    kind: ContentKind,
    id: String,
}

impl ContentId {
    /// Create an identifier for a remote catalog item.
    pub fn new(kind: ContentKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Create a synthetic identifier for a local file from its display name.
    ///
    /// Remote ids are base62, so the `local-` prefix keeps the two apart.
    pub fn local(kind: ContentKind, name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        Self::new(kind, format!("{LOCAL_ID_PREFIX}{hex}"))
    }

    /// Read an identifier out of a catalog object's `uri`/`id` fields.
    ///
    /// Local items carry URIs with extra colon-separated segments and no id;
    /// those fall back to a synthetic id from `name`.
    pub fn from_object(kind: ContentKind, uri: &str, id: Option<&str>, name: &str) -> Self {
        if let Some(parsed) = Self::parse(uri)
            && parsed.kind == kind
        {
            return parsed;
        }
        match id {
            Some(id) if !id.is_empty() && !id.contains(':') => Self::new(kind, id),
            _ => Self::local(kind, name),
        }
    }

    /// Parse a share URL or URI token.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let pattern = if token.starts_with("http") {
            URL_PATTERN.as_ref()?
        } else {
            URI_PATTERN.as_ref()?
        };
        let caps = pattern.captures(token)?;
        let kind = caps.get(1)?.as_str().parse().ok()?;
        Some(Self::new(kind, caps.get(2)?.as_str()))
    }

    /// Entity kind.
    pub const fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Bare id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// URI form, `kind:id`.
    pub fn uri(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Whether this id was synthesized for a local file.
    pub fn is_local(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A user request, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRequest {
    groups: BTreeMap<ContentKind, Vec<ContentId>>,
}

impl ParsedRequest {
    /// Parse whitespace-separated tokens. Unrecognized tokens are dropped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut request = Self::default();
        for token in text.split_whitespace() {
            match ContentId::parse(token) {
                Some(content) => request.push(content),
                None => warn!(token, "Dropping unrecognized identifier"),
            }
        }
        debug!(count = request.len(), "Request parsed");
        request
    }

    /// Read a request file: one or more tokens per line, `#` starts a comment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
        let body: String = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Self::parse(&body))
    }

    /// Add one identifier, ignoring repeats.
    pub fn push(&mut self, content: ContentId) {
        let group = self.groups.entry(content.kind()).or_default();
        if !group.contains(&content) {
            group.push(content);
        }
    }

    /// Identifiers requested for one kind.
    pub fn ids(&self, kind: ContentKind) -> &[ContentId] {
        self.groups.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Non-empty groups in fetch order.
    pub fn groups(&self) -> impl Iterator<Item = (ContentKind, &[ContentId])> {
        ContentKind::FETCH_ORDER
            .into_iter()
            .map(|kind| (kind, self.ids(kind)))
            .filter(|(_, ids)| !ids.is_empty())
    }

    /// Total number of distinct identifiers.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Whether nothing usable was requested.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail with [`RequestError::Empty`] when nothing was parsed.
    pub fn ensure_not_empty(self) -> Result<Self> {
        if self.is_empty() {
            return Err(Error::Request(RequestError::Empty));
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_share_url() {
        let id = ContentId::parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc")
            .unwrap();
        assert_eq!(id.kind(), ContentKind::Track);
        assert_eq!(id.id(), "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn test_parse_intl_url() {
        let id = ContentId::parse("https://open.spotify.com/intl-de/album/1DFixLWuPkv3KT3TnV35m3")
            .unwrap();
        assert_eq!(id.kind(), ContentKind::Album);
    }

    #[test]
    fn test_parse_uri_with_and_without_scheme() {
        let a = ContentId::parse("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap();
        let b = ContentId::parse("playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.uri(), "playlist:37i9dQZF1DXcBWIGoYBM5M");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ContentId::parse("hello").is_none());
        assert!(ContentId::parse("https://example.com/track/abc").is_none());
        assert!(ContentId::parse("spotify:local:Artist:Album:Song:200").is_none());
    }

    #[test]
    fn test_local_ids_are_stable_and_distinct() {
        let a = ContentId::local(ContentKind::Track, "My Song");
        let b = ContentId::local(ContentKind::Track, "My Song");
        let c = ContentId::local(ContentKind::Track, "Other Song");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_local());
        assert!(!ContentId::new(ContentKind::Track, "abc").is_local());
    }

    #[test]
    fn test_from_object_falls_back_to_local() {
        let local = ContentId::from_object(ContentKind::Album, "spotify:local:A:B:C:1", None, "B");
        assert!(local.is_local());
        let remote = ContentId::from_object(ContentKind::Album, "spotify:album:xyz", None, "B");
        assert_eq!(remote.id(), "xyz");
    }

    #[test]
    fn test_request_groups_in_fetch_order() {
        let request = ParsedRequest::parse(
            "spotify:track:t1 https://open.spotify.com/playlist/p1 bogus spotify:album:a1 spotify:track:t1",
        );
        let kinds: Vec<_> = request.groups().map(|(kind, _)| kind).collect();
        assert_eq!(
            kinds,
            vec![ContentKind::Playlist, ContentKind::Album, ContentKind::Track]
        );
        assert_eq!(request.len(), 3);
    }

    #[test]
    fn test_request_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request.txt");
        fs::write(
            &path,
            "# my list\nspotify:track:t1\nspotify:episode:e1 # trailing comment\n",
        )
        .unwrap();
        let request = ParsedRequest::from_file(&path).unwrap();
        assert_eq!(request.ids(ContentKind::Track).len(), 1);
        assert_eq!(request.ids(ContentKind::Episode).len(), 1);
    }

    #[test]
    fn test_empty_request_is_an_error() {
        let err = ParsedRequest::parse("nothing here").ensure_not_empty();
        assert!(matches!(err, Err(Error::Request(RequestError::Empty))));
    }

    #[test]
    fn test_bulk_limits() {
        assert_eq!(ContentKind::Playlist.bulk_limit(), 0);
        assert_eq!(ContentKind::Album.bulk_limit(), 20);
        assert_eq!(ContentKind::Track.bulk_limit(), 100);
        assert_eq!(ContentKind::Artist.bulk_limit(), 50);
    }
}
