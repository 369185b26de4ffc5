//! Track lyrics.
//!
//! Lyrics come back either unsynced or line synced. Synced lines are written
//! with an `[mm:ss.cc]` prefix. Every track gets one lrc file, named by the
//! lyrics filename template and placed in the lyrics directory, or next to
//! the track when none is configured.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{CatalogApi, Endpoints};
use crate::config::AppConfig;
use crate::error::{ApiError, Error, FileSystemError, Result};
use crate::model::LyricsResponse;
use crate::node::{NodeData, NodeId};
use crate::output::{output_path, track_path};
use crate::query::Query;
use crate::session::Session;
use crate::tree::Catalog;

/// How lyrics lines are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// Plain lines.
    Unsynced,
    /// Each line carries its start offset.
    LineSynced,
}

/// Lyrics of one track, one entry per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLyrics {
    /// Timing of the lines.
    pub sync: SyncType,
    /// Lines, prefixed with their timestamp when synced.
    pub lines: Vec<String>,
}

/// `[mm:ss.cc]` timestamp of an offset in milliseconds.
pub fn lrc_timestamp(ms: u64) -> String {
    let centis = ms / 10;
    format!(
        "[{:02}:{:02}.{:02}]",
        centis / 6000,
        centis / 100 % 60,
        centis % 100
    )
}

impl TrackLyrics {
    /// Read a lyrics response fetched from `url`.
    pub fn from_response(url: &str, json: &Value) -> Result<Self> {
        let response: LyricsResponse = serde_json::from_value(json.clone())?;
        let lyrics = response
            .lyrics
            .filter(|l| !l.lines.is_empty())
            .ok_or_else(|| {
                Error::Api(ApiError::MissingKey {
                    key: "lyrics".to_string(),
                    url: url.to_string(),
                })
            })?;
        let sync = match lyrics.sync_type.as_str() {
            "UNSYNCED" => SyncType::Unsynced,
            "LINE_SYNCED" => SyncType::LineSynced,
            other => {
                return Err(Error::Api(ApiError::ErrorResponse {
                    status: "unsupported".to_string(),
                    message: format!("Unsupported lyrics sync type {other:?}"),
                }));
            }
        };
        let lines = lyrics
            .lines
            .iter()
            .map(|line| match sync {
                SyncType::Unsynced => line.words.clone(),
                SyncType::LineSynced => format!("{}{}", lrc_timestamp(line.start_ms()), line.words),
            })
            .collect();
        Ok(Self { sync, lines })
    }
}

/// Fetch the lyrics of a track.
pub fn fetch_lyrics(
    api: &dyn CatalogApi,
    endpoints: &Endpoints,
    track_id: &str,
) -> Result<TrackLyrics> {
    let url = endpoints.lyrics(track_id);
    let response = api.fetch(&url, &[])?;
    TrackLyrics::from_response(&url, &response.json)
}

/// Identification lines at the top of an lrc file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrcHeader {
    /// Track title.
    pub title: String,
    /// Track artists, joined.
    pub artists: String,
    /// Album name.
    pub album: String,
    /// Track length.
    pub duration_ms: u64,
}

impl LrcHeader {
    /// Header for track `id`.
    pub fn for_track(catalog: &Catalog, config: &AppConfig, id: NodeId) -> Self {
        let node = catalog.node(id);
        let (artists, album) = match &node.data {
            NodeData::Track(track) => (
                track
                    .artists
                    .iter()
                    .map(|&a| catalog.node(a).name.clone())
                    .collect::<Vec<_>>()
                    .join(&config.metadata.artist_delimiter),
                track
                    .album
                    .map(|a| catalog.node(a).name.clone())
                    .unwrap_or_default(),
            ),
            _ => (String::new(), String::new()),
        };
        Self {
            title: node.name.clone(),
            artists,
            album,
            duration_ms: node.duration_ms(),
        }
    }

    fn lines(&self) -> [String; 5] {
        let seconds = self.duration_ms / 1000;
        [
            format!("[ti: {}]", self.title),
            format!("[ar: {}]", self.artists),
            format!("[al: {}]", self.album),
            format!("[length: {}:{:02}]", seconds / 60, seconds % 60),
            format!("[by: Tunegraph v{}]", env!("CARGO_PKG_VERSION")),
        ]
    }
}

/// Text of an lrc file.
pub fn lrc_contents(lyrics: &TrackLyrics, header: Option<&LrcHeader>) -> String {
    let mut text = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            text.push_str(&line);
            text.push('\n');
        }
        text.push('\n');
    }
    for line in &lyrics.lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// Where the lrc file of track `id` goes.
pub fn lrc_path(catalog: &Catalog, config: &AppConfig, id: NodeId) -> PathBuf {
    let named = track_path(catalog, config, id, Some(&config.lyrics.filename));
    let stem = named
        .file_stem()
        .map_or_else(|| "lyrics".to_string(), |s| s.to_string_lossy().into_owned());
    let dir = config
        .lyrics_dir()
        .or_else(|| output_path(catalog, config, id).and_then(|p| p.parent().map(Path::to_path_buf)))
        .unwrap_or_else(|| config.root_path.clone());
    dir.join(format!("{stem}.lrc"))
}

fn write_lrc(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
    }
    fs::write(path, contents).map_err(|e| {
        Error::FileSystem(FileSystemError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

impl Session<'_> {
    /// Fetch the lyrics of track `id`, save its lrc file and keep the lines
    /// on the node for tagging. Unavailable lyrics never fail the download.
    pub(crate) fn fetch_track_lyrics(&mut self, query: &mut Query, id: NodeId) {
        if !self.config.lyrics.enabled() {
            return;
        }
        let Some(api) = self.api else {
            return;
        };
        let catalog = query.catalog();
        let node = catalog.node(id);
        let NodeData::Track(track) = &node.data else {
            return;
        };
        if !track.lyrics.is_empty() {
            return;
        }
        let Some(track_id) = node
            .content()
            .filter(|c| !c.is_local())
            .map(|c| c.id().to_string())
        else {
            return;
        };

        let lyrics = match fetch_lyrics(api, &Endpoints::default(), &track_id) {
            Ok(lyrics) => lyrics,
            Err(e) => {
                info!(item = %node.label, error = %e, "Lyrics not available");
                return;
            }
        };
        let path = lrc_path(catalog, self.config, id);
        let header = self
            .config
            .lyrics
            .header
            .then(|| LrcHeader::for_track(catalog, self.config, id));
        match write_lrc(&path, &lrc_contents(&lyrics, header.as_ref())) {
            Ok(()) => debug!(item = %node.label, path = %path.display(), "Lyrics saved"),
            Err(e) => warn!(item = %node.label, error = %e, "Failed to save lyrics"),
        }

        if let NodeData::Track(track) = &mut query.catalog_mut().node_mut(id).data {
            track.lyrics = lyrics.lines;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, MockCatalogApi};
    use crate::identifier::{ContentId, ContentKind};
    use crate::query::QuerySource;
    use crate::stream::MockContentStreamProvider;
    use crate::tags::MockTagWriter;
    use crate::transcode::MockTranscoder;
    use serde_json::json;
    use tempfile::TempDir;

    fn synced() -> Value {
        json!({"lyrics": {"syncType": "LINE_SYNCED", "lines": [
            {"startTimeMs": "1000", "words": "Hello"},
            {"startTimeMs": "62550", "words": "World"}
        ]}})
    }

    fn song_query() -> (Query, NodeId) {
        let mut query = Query::with_label(QuerySource::Urls(Default::default()), "q");
        let catalog = query.catalog_mut();
        let root = catalog.root();
        let track = catalog.create_child(root, ContentId::new(ContentKind::Track, "t1"));
        let artist = catalog.create_child(track, ContentId::new(ContentKind::Artist, "ar"));
        let album = catalog.create_child(track, ContentId::new(ContentKind::Album, "a1"));
        catalog.node_mut(artist).name = "Band".into();
        catalog.node_mut(album).name = "Blue".into();
        let node = catalog.node_mut(track);
        node.name = "Song".into();
        node.label = "Band - Song".into();
        node.has_metadata = true;
        if let NodeData::Track(info) = &mut node.data {
            info.artists = vec![artist];
            info.album = Some(album);
            info.media.duration_ms = 185_000;
        }
        catalog.push_item(root, track);
        (query, track)
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(lrc_timestamp(0), "[00:00.00]");
        assert_eq!(lrc_timestamp(62_550), "[01:02.55]");
        assert_eq!(lrc_timestamp(3_599_999), "[59:59.99]");
    }

    #[test]
    fn test_synced_and_unsynced_responses() {
        let lyrics = TrackLyrics::from_response("url", &synced()).unwrap();
        assert_eq!(lyrics.sync, SyncType::LineSynced);
        assert_eq!(lyrics.lines, vec!["[00:01.00]Hello", "[01:02.55]World"]);

        let plain = json!({"lyrics": {"syncType": "UNSYNCED", "lines": [{"words": "Hello"}]}});
        let lyrics = TrackLyrics::from_response("url", &plain).unwrap();
        assert_eq!(lyrics.lines, vec!["Hello"]);

        assert!(TrackLyrics::from_response("url", &json!({})).is_err());
        let odd = json!({"lyrics": {"syncType": "SYLLABLE_SYNCED", "lines": [{"words": "x"}]}});
        assert!(TrackLyrics::from_response("url", &odd).is_err());
    }

    #[test]
    fn test_lrc_contents_with_header() {
        let (query, track) = song_query();
        let config = AppConfig::default();
        let header = LrcHeader::for_track(query.catalog(), &config, track);
        let lyrics = TrackLyrics::from_response("url", &synced()).unwrap();
        let text = lrc_contents(&lyrics, Some(&header));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[ti: Song]");
        assert_eq!(lines[1], "[ar: Band]");
        assert_eq!(lines[2], "[al: Blue]");
        assert_eq!(lines[3], "[length: 3:05]");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "[00:01.00]Hello");
        assert_eq!(lrc_contents(&lyrics, None).lines().count(), 2);
    }

    #[test]
    fn test_lrc_path_defaults_to_track_directory() {
        let (query, track) = song_query();
        let config = AppConfig::default().with_root("/music");
        let path = lrc_path(query.catalog(), &config, track);
        assert_eq!(path, PathBuf::from("/music/Band/Blue/Band_Song.lrc"));

        let mut config = config;
        config.lyrics.location = Some(PathBuf::from("./Lyrics"));
        config.lyrics.filename = "{song_name}".into();
        let path = lrc_path(query.catalog(), &config, track);
        assert_eq!(path, PathBuf::from("/music/Lyrics/Song.lrc"));
    }

    #[test]
    fn test_session_saves_lrc_and_keeps_lines() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default().with_root(dir.path().join("music"));
        config.archive.location = Some(dir.path().join("data"));
        config.lyrics.header = true;
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/color-lyrics/v2/track/t1"))
            .times(1)
            .returning(|_, _| {
                let json = synced();
                Ok(ApiResponse {
                    raw: json.to_string(),
                    json,
                })
            });
        let streams = MockContentStreamProvider::new();
        let transcoder = MockTranscoder::new();
        let tags = MockTagWriter::new();
        let mut session = Session::new(&config, &streams, &transcoder, &tags)
            .unwrap()
            .with_api(&api);

        let (mut query, track) = song_query();
        session.fetch_track_lyrics(&mut query, track);
        session.fetch_track_lyrics(&mut query, track);

        let path = lrc_path(query.catalog(), &config, track);
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("[ti: Song]\n"));
        assert!(text.ends_with("[01:02.55]World\n"));
        let NodeData::Track(info) = &query.catalog().node(track).data else {
            panic!("not a track");
        };
        assert_eq!(info.lyrics.len(), 2);
    }

    #[test]
    fn test_missing_lyrics_ignored() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default().with_root(dir.path().join("music"));
        let mut api = MockCatalogApi::new();
        api.expect_fetch().returning(|_, _| {
            Err(Error::Api(ApiError::ErrorResponse {
                status: "404".into(),
                message: "no lyrics".into(),
            }))
        });
        let streams = MockContentStreamProvider::new();
        let transcoder = MockTranscoder::new();
        let tags = MockTagWriter::new();
        let mut session = Session::new(&config, &streams, &transcoder, &tags)
            .unwrap()
            .with_api(&api);

        let (mut query, track) = song_query();
        session.fetch_track_lyrics(&mut query, track);
        assert!(!lrc_path(query.catalog(), &config, track).exists());
    }
}
