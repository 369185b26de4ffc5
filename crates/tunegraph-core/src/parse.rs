//! Metadata parsing into catalog nodes.
//!
//! Parsing merges: a field is only overwritten by a non-empty value, so a
//! partial object (a simplified album embedded in a track) never erases what
//! a full response already filled in. Nested entities are materialized
//! through [`Catalog::create_child`] and only parsed while they still lack
//! full metadata.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifier::{ContentId, ContentKind};
use crate::model::{
    AlbumObject, ArtistObject, AudiobookObject, ChapterObject, EpisodeObject, PlaylistItem,
    PlaylistObject, ShowObject, TrackObject, UserObject, largest_image, object_type, zfill2,
};
use crate::node::{NodeData, NodeId};
use crate::output::fix_filename;
use crate::tree::Catalog;

/// Populate node `id` from a catalog response.
pub fn parse_metadata(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let Some(kind) = catalog.node(id).kind() else {
        return Ok(());
    };
    match kind {
        ContentKind::Track => parse_track(catalog, id, value),
        ContentKind::Episode => parse_episode(catalog, id, value),
        ContentKind::Chapter => parse_chapter(catalog, id, value),
        ContentKind::Album => parse_album(catalog, id, value),
        ContentKind::Playlist => parse_playlist(catalog, id, value),
        ContentKind::Artist => parse_artist(catalog, id, value),
        ContentKind::Show => parse_show(catalog, id, value),
        ContentKind::Audiobook => parse_audiobook(catalog, id, value),
        ContentKind::User => parse_user(catalog, id, value),
    }
}

/// Materialize a nested object under `parent` and parse it if still needed.
///
/// Returns `None` for objects without any identity (no uri, id, or name).
pub fn link(
    catalog: &mut Catalog,
    parent: NodeId,
    kind: ContentKind,
    value: &Value,
) -> Result<Option<NodeId>> {
    let Some(content) = content_of(kind, value) else {
        debug!(kind = %kind, "Dropping nested object without identity");
        return Ok(None);
    };
    let node = catalog.create_child(parent, content);
    if !catalog.node(node).has_metadata {
        parse_metadata(catalog, node, value)?;
    }
    Ok(Some(node))
}

/// Materialize and append an item to container `parent`.
///
/// Mixed collections (playlists) pick the kind from the object's `type` field.
pub fn link_item(
    catalog: &mut Catalog,
    parent: NodeId,
    default_kind: ContentKind,
    value: &Value,
) -> Result<Option<NodeId>> {
    let kind = object_type(value)
        .and_then(|t| t.parse::<ContentKind>().ok())
        .unwrap_or(default_kind);
    let node = link(catalog, parent, kind, value)?;
    if let Some(node) = node {
        catalog.push_item(parent, node);
    }
    Ok(node)
}

/// Link the entries of a playlist page under `playlist`.
///
/// A malformed entry is logged and skipped; the rest of the page still links.
pub fn link_playlist_items(catalog: &mut Catalog, playlist: NodeId, items: &[Value]) {
    for (index, item) in items.iter().enumerate() {
        let entry = match decode::<PlaylistItem>(item) {
            Ok(item) => item.into_entry(),
            Err(e) => {
                warn!(
                    playlist = %catalog.node(playlist).uri(),
                    index,
                    error = %e,
                    "Skipping malformed playlist entry"
                );
                continue;
            }
        };
        if let Some(entry) = entry
            && let Err(e) = link_item(catalog, playlist, ContentKind::Track, &entry)
        {
            warn!(
                playlist = %catalog.node(playlist).uri(),
                index,
                error = %e,
                "Failed to link playlist entry"
            );
        }
    }
}

/// Identifier of a raw object.
pub fn content_of(kind: ContentKind, value: &Value) -> Option<ContentId> {
    let uri = str_field(value, "uri");
    let id = value.get("id").and_then(Value::as_str);
    let name = str_field(value, "name");
    if uri.is_empty() && id.is_none_or(str::is_empty) && name.is_empty() {
        return None;
    }
    Some(ContentId::from_object(kind, uri, id, name))
}

/// Recompute an album's disc count and duration from its current tracks.
pub fn refresh_album_totals(catalog: &mut Catalog, id: NodeId) {
    let tracks = catalog.items(id).to_vec();
    let duration: u64 = tracks.iter().map(|&t| catalog.node(t).duration_ms()).sum();
    let last_disc = tracks.last().and_then(|&t| match &catalog.node(t).data {
        NodeData::Track(track) => Some(track.disc_number.clone()),
        _ => None,
    });
    if let NodeData::Album(album) = &mut catalog.node_mut(id).data {
        album.duration_ms = duration;
        if let Some(disc) = last_disc {
            set(&mut album.total_discs, &disc);
        }
        album.container.needs_expansion = false;
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T> {
    Ok(serde_json::from_value(value.clone())?)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn set(target: &mut String, value: &str) {
    if !value.is_empty() {
        value.clone_into(target);
    }
}

fn set_opt(target: &mut String, value: Option<&str>) {
    if let Some(value) = value {
        set(target, value);
    }
}

fn user_id(value: Option<&Value>) -> Option<&str> {
    value.and_then(|v| v.get("id")).and_then(Value::as_str)
}

fn set_name_and_label(catalog: &mut Catalog, id: NodeId, name: &str, prefix: Option<&str>) {
    let node = catalog.node_mut(id);
    set(&mut node.name, name);
    let label = match prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{} - {}", fix_filename(prefix), fix_filename(&node.name))
        }
        _ => fix_filename(&node.name),
    };
    if !label.is_empty() {
        node.label = label;
    }
}

fn parent_kind(catalog: &Catalog, id: NodeId) -> Option<ContentKind> {
    catalog
        .node(id)
        .parent()
        .and_then(|p| catalog.node(p).kind())
}

fn link_all(
    catalog: &mut Catalog,
    parent: NodeId,
    kind: ContentKind,
    values: &[Value],
) -> Result<Vec<NodeId>> {
    let mut nodes = Vec::with_capacity(values.len());
    for value in values {
        if let Some(node) = link(catalog, parent, kind, value)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn parse_track(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: TrackObject = decode(value)?;
    let parent = catalog.node(id).parent();
    let from_album = parent_kind(catalog, id) == Some(ContentKind::Album);
    let from_playlist = parent_kind(catalog, id) == Some(ContentKind::Playlist);

    let album = match &obj.album {
        Some(album) => link(catalog, id, ContentKind::Album, album)?,
        None if from_album => parent,
        None => None,
    };
    let artists = link_all(catalog, id, ContentKind::Artist, &obj.artists)?;
    let main_artist = artists.first().map(|&a| catalog.node(a).name.clone());

    set_name_and_label(catalog, id, &obj.name, main_artist.as_deref());
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let NodeData::Track(track) = &mut node.data {
        if let Some(disc) = obj.disc_number {
            track.disc_number = disc.to_string();
        }
        if let Some(number) = obj.track_number {
            track.track_number = zfill2(number);
        }
        if album.is_some() {
            track.album = album;
        }
        if !artists.is_empty() {
            track.artists = artists;
        }
        set_opt(&mut track.added_at, obj.added_at.as_deref());
        if from_playlist {
            set_opt(&mut track.added_by, user_id(obj.added_by.as_ref()));
            track.is_local = obj.is_local.unwrap_or(track.is_local);
        }
        if obj.duration_ms > 0 {
            track.media.duration_ms = obj.duration_ms;
        }
        if let Some(playable) = obj.is_playable {
            track.media.is_playable = playable;
        }
    }
    Ok(())
}

fn parse_episode(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: EpisodeObject = decode(value)?;
    let show = match &obj.show {
        Some(show) => link(catalog, id, ContentKind::Show, show)?,
        None if parent_kind(catalog, id) == Some(ContentKind::Show) => catalog.node(id).parent(),
        None => None,
    };
    let show_name = show.map(|s| catalog.node(s).name.clone());
    let from_playlist = parent_kind(catalog, id) == Some(ContentKind::Playlist);

    set_name_and_label(catalog, id, &obj.name, show_name.as_deref());
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let NodeData::Episode(episode) = &mut node.data {
        set(&mut episode.description, &obj.description);
        set(&mut episode.release_date, &obj.release_date);
        episode.explicit |= obj.explicit;
        episode.externally_hosted |= obj.is_externally_hosted;
        if show.is_some() {
            episode.show = show;
        }
        if from_playlist {
            set_opt(&mut episode.added_at, obj.added_at.as_deref());
            set_opt(&mut episode.added_by, user_id(obj.added_by.as_ref()));
        }
        if obj.duration_ms > 0 {
            episode.media.duration_ms = obj.duration_ms;
        }
        if let Some(playable) = obj.is_playable {
            episode.media.is_playable = playable;
        }
    }
    Ok(())
}

fn parse_chapter(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: ChapterObject = decode(value)?;
    let audiobook = match &obj.audiobook {
        Some(book) => link(catalog, id, ContentKind::Audiobook, book)?,
        None if parent_kind(catalog, id) == Some(ContentKind::Audiobook) => {
            catalog.node(id).parent()
        }
        None => None,
    };
    let book_name = audiobook.map(|b| catalog.node(b).name.clone());

    set_name_and_label(catalog, id, &obj.name, book_name.as_deref());
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let NodeData::Chapter(chapter) = &mut node.data {
        if let Some(number) = obj.chapter_number {
            chapter.chapter_number = zfill2(number);
        }
        if audiobook.is_some() {
            chapter.audiobook = audiobook;
        }
        if obj.duration_ms > 0 {
            chapter.media.duration_ms = obj.duration_ms;
        }
        if let Some(playable) = obj.is_playable {
            chapter.media.is_playable = playable;
        }
    }
    Ok(())
}

fn parse_album(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: AlbumObject = decode(value)?;
    let artist_values: Vec<Value> = obj
        .artists
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    let artists = link_all(catalog, id, ContentKind::Artist, &artist_values)?;
    let main_artist = artists.first().map(|&a| catalog.node(a).name.clone());
    set_name_and_label(catalog, id, &obj.name, main_artist.as_deref());

    if let NodeData::Album(album) = &mut catalog.node_mut(id).data {
        set_opt(&mut album.album_type, obj.album_type.as_deref());
        set_opt(&mut album.release_date, obj.release_date.as_deref());
        if let Some(year) = album.release_date.split('-').next() {
            album.year = year.to_string();
        }
        if let Some(total) = obj.total_tracks.filter(|&t| t > 0) {
            album.total_tracks = zfill2(total);
        }
        set(&mut album.image_url, &largest_image(&obj.images));
        set_opt(&mut album.label, obj.label.as_deref());
        album.compilation = album.album_type == "compilation";
        set_opt(&mut album.added_at, obj.added_at.as_deref());
        if !artists.is_empty() {
            album.artists = artists;
        }
    }

    match obj.tracks {
        Some(tracks) => {
            for item in &tracks.items {
                link_item(catalog, id, ContentKind::Track, item)?;
            }
            let partial = tracks.next.is_some();
            catalog.node_mut(id).has_metadata = true;
            if partial {
                if let Some(container) = catalog.node_mut(id).container_mut() {
                    container.needs_expansion = true;
                }
            } else {
                refresh_album_totals(catalog, id);
            }
        }
        None => {
            let from_artist = parent_kind(catalog, id) == Some(ContentKind::Artist);
            if let Some(container) = catalog.node_mut(id).container_mut() {
                container.needs_expansion = from_artist;
            }
        }
    }
    Ok(())
}

fn parse_playlist(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: PlaylistObject = decode(value)?;
    let owner = match &obj.owner {
        Some(owner) => link(catalog, id, ContentKind::User, owner)?,
        None => None,
    };
    let owner_name = owner.map(|o| catalog.node(o).name.clone());
    set_name_and_label(catalog, id, &obj.name, owner_name.as_deref());

    if let NodeData::Playlist(playlist) = &mut catalog.node_mut(id).data {
        playlist.collaborative |= obj.collaborative;
        set_opt(&mut playlist.description, obj.description.as_deref());
        set(&mut playlist.image_url, &largest_image(&obj.images));
        playlist.public = obj.public.unwrap_or(playlist.public);
        set(&mut playlist.snapshot_id, &obj.snapshot_id);
        if owner.is_some() {
            playlist.owner = owner;
        }
    }

    let tracks = value.get("tracks");
    if let Some(items) = tracks.and_then(|t| t.get("items")).and_then(Value::as_array) {
        link_playlist_items(catalog, id, items);
    }
    let needs_expansion = match tracks.and_then(|t| t.get("next")) {
        None => true,
        Some(next) => !next.is_null(),
    };
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let Some(container) = node.container_mut() {
        container.needs_expansion = needs_expansion;
    }
    Ok(())
}

fn parse_artist(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: ArtistObject = decode(value)?;
    set_name_and_label(catalog, id, &obj.name, None);
    let node = catalog.node_mut(id);
    if let NodeData::Artist(artist) = &mut node.data {
        if let Some(genres) = obj.genres {
            artist.genres = genres;
            artist.followers = obj.followers.map_or(artist.followers, |f| f.total);
            node.has_metadata = true;
        }
        artist.container.needs_expansion = true;
    }
    Ok(())
}

fn parse_show(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: ShowObject = decode(value)?;
    set_name_and_label(catalog, id, &obj.name, Some(&obj.publisher));
    if let NodeData::Show(show) = &mut catalog.node_mut(id).data {
        set(&mut show.description, &obj.description);
        show.explicit |= obj.explicit;
        show.externally_hosted |= obj.is_externally_hosted;
        set(&mut show.image_url, &largest_image(&obj.images));
        set(&mut show.publisher, &obj.publisher);
        if let Some(total) = obj.total_episodes {
            show.total_episodes = zfill2(total);
        }
    }
    let needs_expansion = match &obj.episodes {
        Some(episodes) => {
            for item in &episodes.items {
                link_item(catalog, id, ContentKind::Episode, item)?;
            }
            episodes.next.is_some()
        }
        None => true,
    };
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let Some(container) = node.container_mut() {
        container.needs_expansion = needs_expansion;
    }
    Ok(())
}

fn parse_audiobook(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: AudiobookObject = decode(value)?;
    set_name_and_label(catalog, id, &obj.name, Some(&obj.publisher));
    if let NodeData::Audiobook(book) = &mut catalog.node_mut(id).data {
        set(&mut book.publisher, &obj.publisher);
        if !obj.authors.is_empty() {
            book.authors = obj.authors.into_iter().map(|a| a.name).collect();
        }
    }
    let needs_expansion = match &obj.chapters {
        Some(chapters) => {
            for item in &chapters.items {
                link_item(catalog, id, ContentKind::Chapter, item)?;
            }
            chapters.next.is_some()
        }
        None => true,
    };
    let node = catalog.node_mut(id);
    node.has_metadata = true;
    if let Some(container) = node.container_mut() {
        container.needs_expansion = needs_expansion;
    }
    Ok(())
}

fn parse_user(catalog: &mut Catalog, id: NodeId, value: &Value) -> Result<()> {
    let obj: UserObject = decode(value)?;
    let display_name = obj.display_name.unwrap_or_default();
    let fallback = obj.id.unwrap_or_default();
    let name = if display_name.is_empty() {
        fallback.as_str()
    } else {
        display_name.as_str()
    };
    set_name_and_label(catalog, id, name, None);
    let node = catalog.node_mut(id);
    if let NodeData::User(user) = &mut node.data {
        set(&mut user.display_name, &display_name);
    }
    if display_name.is_empty() {
        warn!(node = %node.uri(), "User object without display name");
    } else {
        node.has_metadata = true;
    }
    Ok(())
}
