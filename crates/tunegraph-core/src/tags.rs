//! Audio file tags.
//!
//! [`TrackTags`] is the tag set a downloaded track should carry, built from
//! the catalog. A [`TagWriter`] stores and reads it back; the
//! [`Id3TagWriter`] implementation covers MP3 files through the `id3` crate.
//!
//! # Verification
//!
//! [`TrackTags::mismatches`] compares fetched tags with what a file holds.
//! Title, artists, album, album artists, genres, year, disc and track numbers
//! are always compared. Totals, the compilation flag and the track id are
//! only compared in strict mode; otherwise a file is only flagged when it is
//! missing some of them. Lyrics are never compared.

use std::path::Path;

use id3::frame::{ExtendedText, Lyrics, Picture, PictureType};
use id3::{Tag, TagLike, Version};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Error, FileSystemError, Result};
use crate::node::{NodeData, NodeId};
use crate::tree::Catalog;

const TRACK_ID_DESCRIPTION: &str = "trackid";
const COMPILATION_FRAME: &str = "TCMP";
const LYRICS_LANGUAGE: &str = "eng";
const COVER_MIME: &str = "image/jpeg";

/// Tags of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    /// Track title.
    pub title: String,
    /// Track artists, in credit order.
    pub artists: Vec<String>,
    /// Album name.
    pub album: String,
    /// Album artists.
    pub album_artists: Vec<String>,
    /// Genres.
    pub genres: Vec<String>,
    /// Release year.
    pub year: Option<i32>,
    /// Disc number.
    pub disc_number: Option<u32>,
    /// Track number on its disc.
    pub track_number: Option<u32>,
    /// Tracks on the album.
    pub total_tracks: Option<u32>,
    /// Discs on the album.
    pub total_discs: Option<u32>,
    /// Part of a compilation.
    pub compilation: bool,
    /// Catalog id.
    pub track_id: Option<String>,
    /// Lyrics text.
    pub lyrics: Option<String>,
}

fn number(text: &str) -> Option<u32> {
    text.trim().parse().ok().filter(|&n| n > 0)
}

impl TrackTags {
    /// Tags for track `id`. `None` when the node is not a track.
    pub fn from_catalog(catalog: &Catalog, config: &AppConfig, id: NodeId) -> Option<Self> {
        let node = catalog.node(id);
        let NodeData::Track(track) = &node.data else {
            return None;
        };
        let names = |ids: &[NodeId]| -> Vec<String> {
            ids.iter().map(|&a| catalog.node(a).name.clone()).collect()
        };

        let mut tags = Self {
            title: node.name.clone(),
            artists: names(&track.artists),
            disc_number: number(&track.disc_number),
            track_number: number(&track.track_number),
            track_id: node
                .content()
                .filter(|c| !c.is_local())
                .map(|c| c.id().to_string()),
            ..Self::default()
        };

        if config.metadata.save_genres {
            tags.genres = if config.metadata.all_genres {
                track.genres.clone()
            } else {
                track.genres.first().cloned().into_iter().collect()
            };
        }

        if config.lyrics.save_tags && !track.lyrics.is_empty() {
            tags.lyrics = Some(track.lyrics.join("\n"));
        }

        if let Some(album) = track.album {
            let album_node = catalog.node(album);
            tags.album = album_node.name.clone();
            if let NodeData::Album(info) = &album_node.data {
                tags.album_artists = names(&info.artists);
                tags.year = info.year.trim().parse().ok();
                tags.compilation = info.compilation;
                if config.metadata.disc_track_totals {
                    tags.total_tracks = number(&info.total_tracks);
                    tags.total_discs = number(&info.total_discs);
                }
            }
        }
        Some(tags)
    }

    fn unreliable_count(&self) -> usize {
        [
            self.total_tracks.is_some(),
            self.total_discs.is_some(),
            self.compilation,
            self.track_id.is_some(),
        ]
        .into_iter()
        .filter(|&present| present)
        .count()
    }

    /// Names of the fields where `on_file` differs from these tags.
    pub fn mismatches(&self, on_file: &Self, strict: bool) -> Vec<String> {
        let mut fields = Vec::new();
        let mut check = |name: &str, same: bool| {
            if !same {
                fields.push(name.to_string());
            }
        };
        check("title", self.title == on_file.title);
        check("artists", self.artists == on_file.artists);
        check("album", self.album == on_file.album);
        check("album_artists", self.album_artists == on_file.album_artists);
        check("genres", self.genres == on_file.genres);
        check("year", self.year == on_file.year);
        check("disc_number", self.disc_number == on_file.disc_number);
        check("track_number", self.track_number == on_file.track_number);

        if strict {
            check("total_tracks", self.total_tracks == on_file.total_tracks);
            check("total_discs", self.total_discs == on_file.total_discs);
            check("compilation", self.compilation == on_file.compilation);
            check("track_id", self.track_id == on_file.track_id);
        } else if self.unreliable_count() > on_file.unreliable_count() {
            fields.push("missing_fields".to_string());
        }
        fields
    }
}

/// Reads and writes tags on audio files.
#[cfg_attr(test, mockall::automock)]
pub trait TagWriter {
    /// Replace the tags of `path` with `tags`.
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()>;

    /// Tags currently stored in `path`. A file without tags reads as empty.
    fn read_tags(&self, path: &Path) -> Result<TrackTags>;

    /// Embed `image` as the front cover of `path`, keeping its other tags.
    fn write_cover(&self, path: &Path, image: &[u8]) -> Result<()>;
}

/// ID3v2.4 tagging for MP3 files.
#[derive(Debug, Clone)]
pub struct Id3TagWriter {
    artist_delimiter: String,
    genre_delimiter: String,
}

impl Id3TagWriter {
    /// Writer joining multi-valued fields with the given delimiters.
    pub fn new(artist_delimiter: impl Into<String>, genre_delimiter: impl Into<String>) -> Self {
        Self {
            artist_delimiter: artist_delimiter.into(),
            genre_delimiter: genre_delimiter.into(),
        }
    }

    /// Writer using the configured delimiters.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.metadata.artist_delimiter.clone(),
            config.metadata.genre_delimiter.clone(),
        )
    }

    fn ensure_supported(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(Error::FileSystem(FileSystemError::NotFound {
                path: path.to_path_buf(),
            }));
        }
        let is_mp3 = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
        if is_mp3 {
            Ok(())
        } else {
            Err(Error::Tagging(format!(
                "unsupported container: {}",
                path.display()
            )))
        }
    }

    /// Existing tag of `path`, `None` when the file has none.
    fn load(path: &Path) -> Result<Option<Tag>> {
        match Tag::read_from_path(path) {
            Ok(tag) => Ok(Some(tag)),
            Err(id3::Error {
                kind: id3::ErrorKind::NoTag,
                ..
            }) => {
                debug!("No ID3 tag found in: {}", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::Tagging(format!("{}: {e}", path.display()))),
        }
    }

    fn save(tag: &Tag, path: &Path) -> Result<()> {
        tag.write_to_path(path, Version::Id3v24)
            .map_err(|e| Error::Tagging(format!("{}: {e}", path.display())))
    }

    fn split(text: Option<&str>, delimiter: &str) -> Vec<String> {
        text.map(|t| {
            t.split(delimiter)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
    }
}

impl TagWriter for Id3TagWriter {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()> {
        Self::ensure_supported(path)?;
        debug!("Writing tags to: {}", path.display());

        let mut tag = Tag::new();
        tag.set_title(tags.title.as_str());
        if !tags.artists.is_empty() {
            tag.set_artist(tags.artists.join(&self.artist_delimiter));
        }
        if !tags.album.is_empty() {
            tag.set_album(tags.album.as_str());
        }
        if !tags.album_artists.is_empty() {
            tag.set_album_artist(tags.album_artists.join(&self.artist_delimiter));
        }
        if !tags.genres.is_empty() {
            tag.set_genre(tags.genres.join(&self.genre_delimiter));
        }
        if let Some(year) = tags.year {
            tag.set_year(year);
        }
        if let Some(disc) = tags.disc_number {
            tag.set_disc(disc);
        }
        if let Some(total) = tags.total_discs {
            tag.set_total_discs(total);
        }
        if let Some(track) = tags.track_number {
            tag.set_track(track);
        }
        if let Some(total) = tags.total_tracks {
            tag.set_total_tracks(total);
        }
        if tags.compilation {
            tag.set_text(COMPILATION_FRAME, "1");
        }
        if let Some(id) = &tags.track_id {
            tag.add_frame(ExtendedText {
                description: TRACK_ID_DESCRIPTION.to_string(),
                value: id.clone(),
            });
        }
        if let Some(text) = &tags.lyrics {
            tag.add_frame(Lyrics {
                lang: LYRICS_LANGUAGE.to_string(),
                description: String::new(),
                text: text.clone(),
            });
        }

        Self::save(&tag, path)
    }

    fn read_tags(&self, path: &Path) -> Result<TrackTags> {
        Self::ensure_supported(path)?;
        let Some(tag) = Self::load(path)? else {
            return Ok(TrackTags::default());
        };

        Ok(TrackTags {
            title: tag.title().unwrap_or_default().to_string(),
            artists: Self::split(tag.artist(), &self.artist_delimiter),
            album: tag.album().unwrap_or_default().to_string(),
            album_artists: Self::split(tag.album_artist(), &self.artist_delimiter),
            genres: Self::split(tag.genre(), &self.genre_delimiter),
            year: tag.year(),
            disc_number: tag.disc(),
            track_number: tag.track(),
            total_tracks: tag.total_tracks(),
            total_discs: tag.total_discs(),
            compilation: tag
                .get(COMPILATION_FRAME)
                .and_then(|f| f.content().text())
                .is_some_and(|t| t == "1"),
            track_id: tag
                .extended_texts()
                .find(|t| t.description == TRACK_ID_DESCRIPTION)
                .map(|t| t.value.clone()),
            lyrics: tag.lyrics().next().map(|l| l.text.clone()),
        })
    }

    fn write_cover(&self, path: &Path, image: &[u8]) -> Result<()> {
        Self::ensure_supported(path)?;
        debug!(path = %path.display(), bytes = image.len(), "Embedding cover");
        let mut tag = Self::load(path)?.unwrap_or_default();
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type: COVER_MIME.to_string(),
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data: image.to_vec(),
        });
        Self::save(&tag, path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identifier::{ContentId, ContentKind};
    use crate::node::RootRole;
    use std::fs;
    use tempfile::TempDir;

    fn sample() -> TrackTags {
        TrackTags {
            title: "Song".into(),
            artists: vec!["A".into(), "B".into()],
            album: "Blue".into(),
            album_artists: vec!["A".into()],
            genres: vec!["jazz".into()],
            year: Some(1999),
            disc_number: Some(1),
            track_number: Some(3),
            total_tracks: Some(10),
            total_discs: Some(1),
            compilation: false,
            track_id: Some("t1".into()),
            lyrics: Some("[00:01.00]Hello\n".into()),
        }
    }

    #[test]
    fn test_from_catalog() {
        let mut catalog = Catalog::new(RootRole::Urls, "q");
        let root = catalog.root();
        let album = catalog.create_child(root, ContentId::new(ContentKind::Album, "a1"));
        let track = catalog.create_child(album, ContentId::new(ContentKind::Track, "t1"));
        let artist = catalog.create_child(track, ContentId::new(ContentKind::Artist, "ar"));
        catalog.node_mut(album).name = "Blue".into();
        if let NodeData::Album(info) = &mut catalog.node_mut(album).data {
            info.year = "1999".into();
            info.total_tracks = "10".into();
            info.total_discs = "1".into();
            info.artists = vec![artist];
        }
        catalog.node_mut(artist).name = "A".into();
        catalog.node_mut(track).name = "Song".into();
        if let NodeData::Track(info) = &mut catalog.node_mut(track).data {
            info.album = Some(album);
            info.artists = vec![artist];
            info.track_number = "03".into();
            info.disc_number = "1".into();
            info.genres = vec!["jazz".into(), "soul".into()];
            info.lyrics = vec!["[00:01.00]Hello".into(), "[00:02.50]World".into()];
        }

        let config = AppConfig::default();
        let tags = TrackTags::from_catalog(&catalog, &config, track).unwrap();
        assert_eq!(tags.title, "Song");
        assert_eq!(tags.album_artists, vec!["A".to_string()]);
        assert_eq!(tags.track_number, Some(3));
        assert_eq!(tags.total_tracks, Some(10));
        assert_eq!(tags.genres, vec!["jazz".to_string()]);
        assert_eq!(tags.track_id.as_deref(), Some("t1"));
        assert_eq!(tags.lyrics.as_deref(), Some("[00:01.00]Hello\n[00:02.50]World"));

        let mut config = AppConfig::default();
        config.metadata.all_genres = true;
        config.metadata.disc_track_totals = false;
        config.lyrics.save_tags = false;
        let tags = TrackTags::from_catalog(&catalog, &config, track).unwrap();
        assert_eq!(tags.genres.len(), 2);
        assert_eq!(tags.total_tracks, None);
        assert_eq!(tags.lyrics, None);

        assert!(TrackTags::from_catalog(&catalog, &config, album).is_none());
    }

    #[test]
    fn test_mismatches_strict_and_lenient() {
        let fetched = sample();
        assert!(fetched.mismatches(&fetched, true).is_empty());

        let mut on_file = fetched.clone();
        on_file.track_id = Some("other".into());
        assert_eq!(fetched.mismatches(&on_file, true), vec!["track_id".to_string()]);
        assert!(fetched.mismatches(&on_file, false).is_empty());

        on_file.total_tracks = None;
        assert_eq!(
            fetched.mismatches(&on_file, false),
            vec!["missing_fields".to_string()]
        );

        on_file.title = "Other".into();
        assert!(fetched.mismatches(&on_file, false).contains(&"title".to_string()));

        let mut without_lyrics = fetched.clone();
        without_lyrics.lyrics = None;
        assert!(fetched.mismatches(&without_lyrics, true).is_empty());
    }

    #[test]
    fn test_id3_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.mp3");
        fs::write(&path, b"audio").unwrap();

        let writer = Id3TagWriter::new(", ", ", ");
        writer.write_tags(&path, &sample()).unwrap();
        let read = writer.read_tags(&path).unwrap();
        assert_eq!(read.title, "Song");
        assert_eq!(read.artists, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(read.track_id.as_deref(), Some("t1"));
        assert_eq!(read.total_tracks, Some(10));
        assert_eq!(read.lyrics.as_deref(), Some("[00:01.00]Hello\n"));
    }

    #[test]
    fn test_cover_embedded_alongside_tags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.mp3");
        fs::write(&path, b"audio").unwrap();

        let writer = Id3TagWriter::new(", ", ", ");
        writer.write_tags(&path, &sample()).unwrap();
        writer.write_cover(&path, b"first").unwrap();
        writer.write_cover(&path, b"jpeg").unwrap();

        let tag = Tag::read_from_path(&path).unwrap();
        let covers: Vec<_> = tag.pictures().collect();
        assert_eq!(covers.len(), 1);
        assert_eq!(covers[0].data, b"jpeg");
        assert_eq!(covers[0].picture_type, PictureType::CoverFront);
        assert_eq!(writer.read_tags(&path).unwrap().title, "Song");
    }

    #[test]
    fn test_untagged_mp3_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.mp3");
        fs::write(&path, b"not really audio").unwrap();
        let read = Id3TagWriter::new(", ", ", ").read_tags(&path).unwrap();
        assert_eq!(read, TrackTags::default());
    }

    #[test]
    fn test_other_containers_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.ogg");
        fs::write(&path, b"ogg").unwrap();
        let writer = Id3TagWriter::new(", ", ", ");
        assert!(matches!(
            writer.write_tags(&path, &sample()),
            Err(Error::Tagging(_))
        ));
        assert!(writer.read_tags(&dir.path().join("missing.mp3")).is_err());
    }
}
