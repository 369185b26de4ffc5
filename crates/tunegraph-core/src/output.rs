//! Output path resolution.
//!
//! Track paths come from the configured template for the track's parent role,
//! with every placeholder value sanitized. Episodes and chapters live under
//! the podcast root as `<show>/<show> - <name>.<ext>`.

use std::path::{Path, PathBuf};

use crate::config::{AppConfig, OutputRole};
use crate::node::{NodeData, NodeId, RootRole};
use crate::transcode::extension_for_format;
use crate::tree::Catalog;

/// Extension used while an episode's real codec is still unknown.
pub const UNKNOWN_EXTENSION: &str = "copy";

/// Make `name` safe to use as a single path component.
pub fn fix_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    sanitized.trim().trim_matches('.').to_string()
}

/// Truncate a file name to `max` characters, keeping the extension.
fn limit_file_name(path: &Path, max: usize) -> PathBuf {
    if max == 0 {
        return path.to_path_buf();
    }
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return path.to_path_buf();
    };
    if stem.chars().count() <= max {
        return path.to_path_buf();
    }
    let short: String = stem.chars().take(max).collect();
    let short = short.trim_end().to_string();
    match path.extension() {
        Some(ext) => path.with_file_name(format!("{short}.{}", ext.to_string_lossy())),
        None => path.with_file_name(short),
    }
}

/// First free variant of `path`: `name.ext`, `name_1.ext`, `name_2.ext`, ...
pub fn dedupe_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Template placeholders and their sanitized values.
#[derive(Default)]
struct Placeholders {
    entries: Vec<(&'static [&'static str], String)>,
}

impl Placeholders {
    fn put(&mut self, aliases: &'static [&'static str], value: String) {
        self.entries.push((aliases, fix_filename(&value)));
    }

    fn apply(&self, template: &str) -> String {
        let mut text = template.to_string();
        for (aliases, value) in &self.entries {
            for alias in *aliases {
                text = text.replace(alias, value);
            }
        }
        text
    }
}

/// Output role of a track, chosen by its parent.
pub fn output_role(catalog: &Catalog, id: NodeId) -> OutputRole {
    let Some(parent) = catalog.node(id).parent() else {
        return OutputRole::Single;
    };
    match &catalog.node(parent).data {
        NodeData::Album(_) => OutputRole::Album,
        NodeData::Playlist(_) => OutputRole::Playlist,
        NodeData::Query(q) if q.role == RootRole::LikedSongs => OutputRole::LikedSongs,
        _ => OutputRole::Single,
    }
}

/// Intended output path of a downloadable node. `None` for other nodes.
pub fn output_path(catalog: &Catalog, config: &AppConfig, id: NodeId) -> Option<PathBuf> {
    match &catalog.node(id).data {
        NodeData::Track(_) => Some(track_path(catalog, config, id, None)),
        NodeData::Episode(e) => Some(podcast_path(
            catalog,
            config,
            id,
            e.show,
            e.media.extension.as_deref(),
        )),
        NodeData::Chapter(c) => Some(podcast_path(
            catalog,
            config,
            id,
            c.audiobook,
            c.media.extension.as_deref(),
        )),
        _ => None,
    }
}

/// Fill `template` (or the configured one) for a track.
pub fn track_path(
    catalog: &Catalog,
    config: &AppConfig,
    id: NodeId,
    template: Option<&str>,
) -> PathBuf {
    let node = catalog.node(id);
    let mut text = template.map_or_else(
        || config.output_template(output_role(catalog, id)),
        str::to_string,
    );

    let NodeData::Track(track) = &node.data else {
        return config.root_path.join(fix_filename(&node.name));
    };

    let artist_delimiter = &config.metadata.artist_delimiter;
    let names = |ids: &[NodeId]| -> Vec<String> {
        ids.iter().map(|&a| catalog.node(a).name.clone()).collect()
    };
    let track_artists = names(&track.artists);

    let album = track.album.map(|a| catalog.node(a));
    let album_info = album.and_then(|a| match &a.data {
        NodeData::Album(info) => Some(info),
        _ => None,
    });
    let album_artists = album_info.map(|a| names(&a.artists)).unwrap_or_default();

    let id_text = node.content().map(|c| c.id().to_string()).unwrap_or_default();
    let album_id = album
        .and_then(|a| a.content())
        .map(|c| c.id().to_string())
        .unwrap_or_default();

    let mut fill = Placeholders::default();
    fill.put(&["{id}", "{track_id}", "{song_id}"], id_text);
    fill.put(
        &["{name}", "{song_name}", "{track_name}", "{song_title}", "{track_title}"],
        node.name.clone(),
    );
    fill.put(
        &[
            "{track_number}",
            "{song_number}",
            "{track_num}",
            "{song_num}",
            "{album_number}",
            "{album_num}",
        ],
        track.track_number.clone(),
    );
    fill.put(&["{disc_number}", "{disc_num}"], track.disc_number.clone());
    fill.put(
        &["{artist}", "{track_artist}", "{song_artist}", "{main_artist}"],
        track_artists.first().cloned().unwrap_or_default(),
    );
    fill.put(
        &["{artists}", "{track_artists}", "{song_artists}"],
        track_artists.join(artist_delimiter),
    );
    fill.put(&["{album_id}"], album_id);
    fill.put(
        &["{album}", "{album_name}"],
        album.map(|a| a.name.clone()).unwrap_or_default(),
    );
    fill.put(
        &["{album_artist}"],
        album_artists.first().cloned().unwrap_or_default(),
    );
    fill.put(&["{album_artists}"], album_artists.join(artist_delimiter));
    fill.put(
        &["{date}", "{release_date}"],
        album_info.map(|a| a.release_date.clone()).unwrap_or_default(),
    );
    fill.put(
        &["{year}", "{release_year}"],
        album_info.map(|a| a.year.clone()).unwrap_or_default(),
    );

    if config.metadata.disc_track_totals {
        fill.put(
            &["{total_tracks}"],
            album_info.map(|a| a.total_tracks.clone()).unwrap_or_default(),
        );
        fill.put(
            &["{total_discs}"],
            album_info.map(|a| a.total_discs.clone()).unwrap_or_default(),
        );
    }

    if let Some(parent) = node.parent()
        && let NodeData::Playlist(playlist) = &catalog.node(parent).data
    {
        let parent_node = catalog.node(parent);
        let position = playlist
            .container
            .items
            .iter()
            .position(|&item| item == id)
            .map_or(0, |p| p + 1);
        fill.put(&["{playlist}"], parent_node.name.clone());
        fill.put(
            &["{playlist_id}"],
            parent_node.content().map(|c| c.id().to_string()).unwrap_or_default(),
        );
        fill.put(&["{playlist_number}", "{playlist_num}"], format!("{position:02}"));
    }

    text = fill.apply(&text);

    let ext = extension_for_format(&config.download.format).unwrap_or("ogg");
    let mut path = config.root_path.clone();
    for part in format!("{text}.{ext}").split(['/', '\\']) {
        let part = part.trim();
        if !part.is_empty() && part != "." && part != ".." {
            path.push(part);
        }
    }
    limit_file_name(&path, config.output.max_filename_length)
}

fn podcast_path(
    catalog: &Catalog,
    config: &AppConfig,
    id: NodeId,
    collection: Option<NodeId>,
    known_ext: Option<&str>,
) -> PathBuf {
    let node = catalog.node(id);
    let collection_name = collection
        .map(|c| catalog.node(c).name.clone())
        .unwrap_or_default();
    let ext = known_ext
        .or_else(|| extension_for_format(&config.download.format).filter(|_| {
            !config.download.format.eq_ignore_ascii_case("copy")
        }))
        .unwrap_or(UNKNOWN_EXTENSION);
    let file = format!(
        "{} - {}.{ext}",
        fix_filename(&collection_name),
        fix_filename(&node.name)
    );
    let path = config
        .root_podcast_path
        .join(fix_filename(&collection_name))
        .join(file);
    limit_file_name(&path, config.output.max_filename_length)
}

/// Whether `path` holds a non-empty file. With `any_extension`, files that
/// differ only by extension count too.
pub fn file_exists(path: &Path, any_extension: bool) -> Option<PathBuf> {
    if path.metadata().is_ok_and(|m| m.is_file() && m.len() > 0) {
        return Some(path.to_path_buf());
    }
    if !any_extension {
        return None;
    }
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let dir = path.parent()?;
    let entries = std::fs::read_dir(dir).ok()?;
    entries.flatten().map(|e| e.path()).find(|candidate| {
        candidate.file_stem().is_some_and(|s| s.to_string_lossy() == stem)
            && candidate.metadata().is_ok_and(|m| m.is_file() && m.len() > 0)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identifier::{ContentId, ContentKind};
    use tempfile::TempDir;

    fn sample() -> (Catalog, NodeId) {
        let mut catalog = Catalog::new(RootRole::Urls, "q");
        let root = catalog.root();
        let playlist = catalog.create_child(root, ContentId::new(ContentKind::Playlist, "p1"));
        catalog.node_mut(playlist).name = "Road Trip".to_string();
        let track = catalog.create_child(playlist, ContentId::new(ContentKind::Track, "t1"));
        catalog.push_item(playlist, track);
        let album = catalog.create_child(track, ContentId::new(ContentKind::Album, "a1"));
        catalog.node_mut(album).name = "Blue: Deluxe".to_string();
        let artist = catalog.create_child(track, ContentId::new(ContentKind::Artist, "ar1"));
        catalog.node_mut(artist).name = "AC/DC".to_string();
        let node = catalog.node_mut(track);
        node.name = "Song?".to_string();
        if let NodeData::Track(t) = &mut node.data {
            t.album = Some(album);
            t.artists = vec![artist];
            t.track_number = "07".to_string();
        }
        if let NodeData::Album(a) = &mut catalog.node_mut(album).data {
            a.artists = vec![artist];
            a.year = "1999".to_string();
        }
        (catalog, track)
    }

    #[test]
    fn test_fix_filename() {
        assert_eq!(fix_filename("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(fix_filename("  .hidden. "), "hidden");
        assert_eq!(fix_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_playlist_template() {
        let config = AppConfig::default().with_root("/music");
        let (catalog, track) = sample();
        let path = output_path(&catalog, &config, track).unwrap();
        assert_eq!(path, PathBuf::from("/music/Road Trip/01_AC_DC_Song_.ogg"));
    }

    #[test]
    fn test_custom_template_aliases() {
        let mut config = AppConfig::default().with_root("/music");
        config.download.format = "mp3".to_string();
        let (catalog, track) = sample();
        let path = track_path(
            &catalog,
            &config,
            track,
            Some("{main_artist}/{album_name} ({release_year})/{track_num} {song_title}"),
        );
        assert_eq!(
            path,
            PathBuf::from("/music/AC_DC/Blue_ Deluxe (1999)/07 Song_.mp3")
        );
    }

    #[test]
    fn test_max_filename_length() {
        let mut config = AppConfig::default().with_root("/music");
        config.output.max_filename_length = 4;
        let (catalog, track) = sample();
        let path = output_path(&catalog, &config, track).unwrap();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), "01_A.ogg");
    }

    #[test]
    fn test_episode_path_uses_placeholder_extension() {
        let config = AppConfig::default().with_root("/music");
        let mut catalog = Catalog::new(RootRole::Urls, "q");
        let root = catalog.root();
        let show = catalog.create_child(root, ContentId::new(ContentKind::Show, "s1"));
        catalog.node_mut(show).name = "Daily".to_string();
        let episode = catalog.create_child(show, ContentId::new(ContentKind::Episode, "e1"));
        catalog.node_mut(episode).name = "Monday".to_string();
        if let NodeData::Episode(e) = &mut catalog.node_mut(episode).data {
            e.show = Some(show);
        }
        let path = output_path(&catalog, &config, episode).unwrap();
        assert_eq!(
            path,
            config.root_podcast_path.join("Daily").join("Daily - Monday.copy")
        );
    }

    #[test]
    fn test_dedupe_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.ogg");
        assert_eq!(dedupe_path(&path), path);
        std::fs::write(&path, b"x").unwrap();
        std::fs::write(dir.path().join("song_1.ogg"), b"x").unwrap();
        assert_eq!(dedupe_path(&path), dir.path().join("song_2.ogg"));
    }

    #[test]
    fn test_file_exists_any_extension() {
        let dir = TempDir::new().unwrap();
        let wanted = dir.path().join("ep.copy");
        assert!(file_exists(&wanted, true).is_none());
        std::fs::write(dir.path().join("ep.mp3"), b"data").unwrap();
        assert!(file_exists(&wanted, false).is_none());
        assert_eq!(file_exists(&wanted, true), Some(dir.path().join("ep.mp3")));
        std::fs::write(dir.path().join("empty.ogg"), b"").unwrap();
        assert!(file_exists(&dir.path().join("empty.ogg"), false).is_none());
    }
}
