//! Catalog API response objects.
//!
//! Every field is optional on the wire; missing fields deserialize to their
//! defaults so that partial objects (simplified album inside a track, local
//! files without ids) parse the same way as full ones. Field names follow
//! the wire format.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cover image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
}

/// Largest image url, empty when there is none.
pub fn largest_image(images: &[Image]) -> String {
    images
        .iter()
        .max_by_key(|img| img.width.unwrap_or(0))
        .map(|img| img.url.clone())
        .unwrap_or_default()
}

/// One page of a paginated collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paging<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
    pub total: Option<u64>,
}

impl<T> Default for Paging<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next: None,
            total: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Followers {
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserObject {
    pub id: Option<String>,
    pub uri: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtistObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    /// Present only on full artist objects.
    pub genres: Option<Vec<String>>,
    pub followers: Option<Followers>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlbumObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub album_type: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<u64>,
    pub images: Vec<Image>,
    pub label: Option<String>,
    pub artists: Vec<ArtistObject>,
    /// Set on saved-library entries.
    pub added_at: Option<String>,
    /// Embedded first page of tracks, full album objects only. Kept raw so
    /// each track goes through the track parser.
    pub tracks: Option<Paging<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub disc_number: Option<u64>,
    pub track_number: Option<u64>,
    pub duration_ms: u64,
    pub is_playable: Option<bool>,
    pub explicit: bool,
    pub album: Option<Value>,
    pub artists: Vec<Value>,
    /// Copied in from the wrapping playlist item.
    pub added_at: Option<String>,
    pub added_by: Option<Value>,
    pub is_local: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EpisodeObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub description: String,
    pub duration_ms: u64,
    pub explicit: bool,
    pub is_externally_hosted: bool,
    pub is_playable: Option<bool>,
    pub release_date: String,
    pub show: Option<Value>,
    pub added_at: Option<String>,
    pub added_by: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaylistObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub collaborative: bool,
    pub description: Option<String>,
    pub images: Vec<Image>,
    pub public: Option<bool>,
    pub snapshot_id: String,
    pub owner: Option<Value>,
}

/// Entry of a playlist's item list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaylistItem {
    pub added_at: Option<String>,
    pub added_by: Option<Value>,
    pub is_local: Option<bool>,
    /// Track or episode, `null` for removed entries.
    pub track: Option<Value>,
}

impl PlaylistItem {
    /// The wrapped track or episode with the playlist fields copied in.
    pub fn into_entry(self) -> Option<Value> {
        let mut entry = self.track?;
        let is_local = self.is_local.unwrap_or(false);
        let uri_present = entry
            .get("uri")
            .and_then(Value::as_str)
            .is_some_and(|uri| !uri.is_empty());
        if !uri_present && !is_local {
            return None;
        }
        if let Value::Object(map) = &mut entry {
            map.insert("added_at".to_string(), self.added_at.map_or(Value::Null, Value::String));
            map.insert("added_by".to_string(), self.added_by.unwrap_or(Value::Null));
            map.insert("is_local".to_string(), Value::Bool(is_local));
        }
        Some(entry)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShowObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub description: String,
    pub explicit: bool,
    pub is_externally_hosted: bool,
    pub images: Vec<Image>,
    pub publisher: String,
    pub total_episodes: Option<u64>,
    pub episodes: Option<Paging<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudiobookObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub publisher: String,
    pub authors: Vec<Author>,
    pub chapters: Option<Paging<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Author {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChapterObject {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub chapter_number: Option<u64>,
    pub duration_ms: u64,
    pub is_playable: Option<bool>,
    pub audiobook: Option<Value>,
}

/// Body of a lyrics response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LyricsResponse {
    pub lyrics: Option<LyricsObject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LyricsObject {
    pub sync_type: String,
    pub lines: Vec<LyricsLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LyricsLine {
    /// Sent as a string, read as either.
    pub start_time_ms: Value,
    pub words: String,
}

impl LyricsLine {
    /// Start offset in milliseconds, 0 when absent.
    pub fn start_ms(&self) -> u64 {
        match &self.start_time_ms {
            Value::String(text) => text.trim().parse().unwrap_or(0),
            Value::Number(n) => n.as_u64().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Name of the entity type carried in a raw object's `type` field.
pub fn object_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Zero pad a number to two digits.
pub fn zfill2(n: u64) -> String {
    format!("{n:02}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_album_parses() {
        let album: AlbumObject =
            serde_json::from_value(json!({"uri": "spotify:album:a1", "name": "Blue"})).unwrap();
        assert_eq!(album.name, "Blue");
        assert!(album.tracks.is_none());
        assert!(album.images.is_empty());
    }

    #[test]
    fn test_largest_image() {
        let images = vec![
            Image { url: "small".into(), width: Some(64) },
            Image { url: "big".into(), width: Some(640) },
        ];
        assert_eq!(largest_image(&images), "big");
        assert_eq!(largest_image(&[]), "");
    }

    #[test]
    fn test_playlist_item_copies_fields() {
        let item: PlaylistItem = serde_json::from_value(json!({
            "added_at": "2024-01-01T00:00:00Z",
            "added_by": {"id": "u1"},
            "is_local": false,
            "track": {"uri": "spotify:track:t1", "type": "track"}
        }))
        .unwrap();
        let entry = item.into_entry().unwrap();
        assert_eq!(entry["added_at"], "2024-01-01T00:00:00Z");
        assert_eq!(entry["is_local"], false);
    }

    #[test]
    fn test_removed_playlist_entry_is_dropped() {
        let item: PlaylistItem = serde_json::from_value(json!({"track": null})).unwrap();
        assert!(item.into_entry().is_none());
        let empty_uri: PlaylistItem =
            serde_json::from_value(json!({"track": {"uri": ""}, "is_local": false})).unwrap();
        assert!(empty_uri.into_entry().is_none());
    }

    #[test]
    fn test_null_local_flag_reads_as_remote() {
        let item: PlaylistItem = serde_json::from_value(json!({
            "is_local": null,
            "track": {"uri": "spotify:track:t1", "type": "track"}
        }))
        .unwrap();
        assert_eq!(item.into_entry().unwrap()["is_local"], false);
    }

    #[test]
    fn test_zfill() {
        assert_eq!(zfill2(3), "03");
        assert_eq!(zfill2(12), "12");
    }
}
