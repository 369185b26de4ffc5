//! Request resolution.
//!
//! A [`Query`] owns the catalog of one invocation. The [`QueryEngine`] moves
//! it through `parse -> fetch-direct -> expand/recurse -> fetch-extra`:
//! requested identifiers become root children, their metadata is fetched one
//! at a time or in bulk, partially returned containers are paginated to
//! completion, containers of bare references get their children bulk
//! fetched, and finally artist genres and parent albums are backfilled.

use std::collections::BTreeMap;

use chrono::Local;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{self, CatalogApi, Endpoints, PageRequest};
use crate::config::AppConfig;
use crate::error::Result;
use crate::identifier::{ContentKind, ParsedRequest};
use crate::node::{NodeData, NodeId, RootRole};
use crate::parse::{self, content_of, link_item, link_playlist_items, refresh_album_totals};
use crate::tree::Catalog;

/// Where the requested items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// Explicit URLs or URIs.
    Urls(ParsedRequest),
    /// The user's liked tracks.
    LikedSongs,
    /// The user's saved albums.
    SavedAlbums,
    /// The user's own and followed playlists.
    UserPlaylists,
    /// Artists the user follows.
    FollowedArtists,
}

/// Library endpoint and response shape of a user collection.
struct LibrarySource {
    path: &'static str,
    kind: ContentKind,
    /// Key wrapping the paging object.
    outer: Option<&'static str>,
    /// Key wrapping each entity inside a page item.
    inner: Option<&'static str>,
    params: &'static [(&'static str, &'static str)],
}

impl QuerySource {
    /// Root role for this source.
    pub const fn role(&self) -> RootRole {
        match self {
            Self::Urls(_) => RootRole::Urls,
            Self::LikedSongs => RootRole::LikedSongs,
            Self::SavedAlbums => RootRole::SavedAlbums,
            Self::UserPlaylists => RootRole::UserPlaylists,
            Self::FollowedArtists => RootRole::FollowedArtists,
        }
    }

    const fn library(&self) -> Option<LibrarySource> {
        match self {
            Self::Urls(_) => None,
            Self::LikedSongs => Some(LibrarySource {
                path: "tracks",
                kind: ContentKind::Track,
                outer: None,
                inner: Some("track"),
                params: &[],
            }),
            Self::SavedAlbums => Some(LibrarySource {
                path: "albums",
                kind: ContentKind::Album,
                outer: None,
                inner: Some("album"),
                params: &[],
            }),
            Self::UserPlaylists => Some(LibrarySource {
                path: "playlists",
                kind: ContentKind::Playlist,
                outer: None,
                inner: None,
                params: &[],
            }),
            Self::FollowedArtists => Some(LibrarySource {
                path: "following",
                kind: ContentKind::Artist,
                outer: Some("artists"),
                inner: None,
                params: &[("type", "artist")],
            }),
        }
    }
}

/// One invocation: the catalog, what was requested, and what will be downloaded.
#[derive(Debug, Clone)]
pub struct Query {
    catalog: Catalog,
    source: QuerySource,
    requested: Vec<(ContentKind, Vec<NodeId>)>,
    downloadables: Vec<NodeId>,
}

impl Query {
    /// New query labelled with the current local time.
    pub fn new(source: QuerySource) -> Self {
        let label = Local::now().format("%Y%m%d%H%M%S").to_string();
        Self::with_label(source, label)
    }

    /// New query with an explicit label.
    pub fn with_label(source: QuerySource, label: impl Into<String>) -> Self {
        Self {
            catalog: Catalog::new(source.role(), label),
            source,
            requested: Vec::new(),
            downloadables: Vec::new(),
        }
    }

    /// Query label, used to name exports of non-container requests.
    pub fn label(&self) -> &str {
        &self.catalog.node(self.catalog.root()).label
    }

    /// The catalog.
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog.
    pub const fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Request source.
    pub const fn source(&self) -> &QuerySource {
        &self.source
    }

    /// Requested top-level nodes, grouped by kind in fetch order.
    pub fn requested(&self) -> &[(ContentKind, Vec<NodeId>)] {
        &self.requested
    }

    /// Items selected for download, in run order.
    pub fn downloadables(&self) -> &[NodeId] {
        &self.downloadables
    }

    /// Replace the download set.
    pub fn set_downloadables(&mut self, downloadables: Vec<NodeId>) {
        self.downloadables = downloadables;
    }

    /// Whether `id` belongs to the download set, directly or through a selected container.
    pub fn is_downloadable(&self, id: NodeId) -> bool {
        self.downloadables.iter().any(|&d| {
            d == id || self.catalog.branch(id).contains(&d)
        })
    }

    pub(crate) fn push_requested(&mut self, kind: ContentKind, nodes: Vec<NodeId>) {
        let root = self.catalog.root();
        for &node in &nodes {
            self.catalog.push_item(root, node);
        }
        self.requested.push((kind, nodes));
    }
}

/// Drives metadata fetching for a [`Query`].
pub struct QueryEngine<'a> {
    api: &'a dyn CatalogApi,
    endpoints: Endpoints,
    config: &'a AppConfig,
}

impl<'a> QueryEngine<'a> {
    /// Engine using the default endpoints.
    pub fn new(api: &'a dyn CatalogApi, config: &'a AppConfig) -> Self {
        Self {
            api,
            endpoints: Endpoints::default(),
            config,
        }
    }

    /// Catalog access in use.
    pub const fn api(&self) -> &'a dyn CatalogApi {
        self.api
    }

    /// Resolve the whole request: direct metadata, expansion, recursion and extras.
    pub fn resolve(&self, query: &mut Query) -> Result<()> {
        match query.source.clone() {
            QuerySource::Urls(request) => {
                for (kind, nodes) in Self::create_direct_nodes(&mut query.catalog, &request) {
                    let responses = self.fetch_direct(&query.catalog, kind, &nodes);
                    let nodes = self.parse_direct(&mut query.catalog, &nodes, &responses);
                    query.push_requested(kind, nodes);
                }
            }
            source => {
                if let Some(library) = source.library() {
                    let (kind, nodes) = self.load_library(&mut query.catalog, &library)?;
                    query.push_requested(kind, nodes);
                }
            }
        }
        self.fetch_extra(&mut query.catalog);
        info!(
            nodes = query.catalog.len(),
            leaves = query.catalog.sub_content().len(),
            "Request resolved"
        );
        Ok(())
    }

    /// Create one root child per requested identifier, grouped in fetch order.
    pub fn create_direct_nodes(
        catalog: &mut Catalog,
        request: &ParsedRequest,
    ) -> Vec<(ContentKind, Vec<NodeId>)> {
        let root = catalog.root();
        request
            .groups()
            .map(|(kind, ids)| {
                let nodes = ids
                    .iter()
                    .map(|id| catalog.create_child(root, id.clone()))
                    .collect();
                (kind, nodes)
            })
            .collect()
    }

    /// Fetch metadata for nodes of one kind.
    ///
    /// Kinds without a bulk endpoint, and single items, are fetched one at a
    /// time; everything else goes through batched bulk calls. The result is
    /// aligned with `nodes`; failed items are `None`.
    pub fn fetch_direct(
        &self,
        catalog: &Catalog,
        kind: ContentKind,
        nodes: &[NodeId],
    ) -> Vec<Option<Value>> {
        if kind.bulk_limit() == 0 || nodes.len() == 1 {
            return nodes
                .iter()
                .map(|&node| {
                    let content = catalog.node(node).content()?;
                    let url = self.endpoints.item(content);
                    match api::fetch_item(self.api, &url) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!(node = %content, error = %e, "No metadata fetched");
                            None
                        }
                    }
                })
                .collect();
        }
        let ids: Vec<String> = nodes
            .iter()
            .filter_map(|&n| catalog.node(n).content().map(|c| c.id().to_string()))
            .collect();
        debug!(kind = %kind, count = ids.len(), "Fetching bulk metadata");
        api::fetch_bulk(
            self.api,
            &self.endpoints.collection(kind),
            &ids,
            kind.plural(),
            kind.bulk_limit(),
        )
    }

    /// Parse fetched responses, expand partial containers, and recurse into
    /// containers whose items are bare references.
    ///
    /// Returns the nodes that received metadata.
    pub fn parse_direct(
        &self,
        catalog: &mut Catalog,
        nodes: &[NodeId],
        responses: &[Option<Value>],
    ) -> Vec<NodeId> {
        for (&node, response) in nodes.iter().zip(responses) {
            self.parse_and_expand(catalog, node, response.as_ref());
        }

        let mut layer: Vec<NodeId> = nodes.to_vec();
        loop {
            let recursing: Vec<NodeId> = layer
                .iter()
                .copied()
                .filter(|&n| catalog.node(n).container().is_some_and(|c| c.needs_recursion))
                .collect();
            if recursing.is_empty() {
                break;
            }
            let children: Vec<NodeId> = recursing
                .iter()
                .flat_map(|&n| catalog.items(n).to_vec())
                .collect();
            if children.is_empty() {
                break;
            }

            let mut by_kind: BTreeMap<ContentKind, Vec<NodeId>> = BTreeMap::new();
            for &child in &children {
                if let Some(kind) = catalog.node(child).kind() {
                    by_kind.entry(kind).or_default().push(child);
                }
            }
            for (kind, group) in by_kind {
                debug!(kind = %kind, count = group.len(), "Recursing into children");
                let responses = self.fetch_direct(catalog, kind, &group);
                for (&child, response) in group.iter().zip(&responses) {
                    self.parse_and_expand(catalog, child, response.as_ref());
                }
            }
            layer = children;
        }

        nodes
            .iter()
            .copied()
            .filter(|&n| catalog.node(n).has_metadata || catalog.node(n).is_container())
            .collect()
    }

    fn parse_and_expand(&self, catalog: &mut Catalog, node: NodeId, response: Option<&Value>) {
        let Some(response) = response else {
            warn!(node = %catalog.node(node).uri(), "Missing metadata, item treated as unplayable");
            return;
        };
        if let Err(e) = parse::parse_metadata(catalog, node, response) {
            warn!(node = %catalog.node(node).uri(), error = %e, "Failed to parse metadata");
            return;
        }
        if catalog.node(node).container().is_some_and(|c| c.needs_expansion)
            && let Err(e) = self.grab_more_children(catalog, node)
        {
            warn!(node = %catalog.node(node).uri(), error = %e, "Failed to fetch remaining items");
        }
    }

    /// Fetch the items a container's own response left out.
    pub fn grab_more_children(&self, catalog: &mut Catalog, id: NodeId) -> Result<()> {
        let node = catalog.node(id);
        let (Some(kind), Some(content), Some(container)) =
            (node.kind(), node.content(), node.container())
        else {
            return Ok(());
        };
        let key = match kind {
            ContentKind::Album | ContentKind::Playlist => "tracks",
            ContentKind::Artist => "albums",
            ContentKind::Show => "episodes",
            ContentKind::Audiobook => "chapters",
            _ => return Ok(()),
        };
        let default_kind = container.contains.first().copied().unwrap_or(ContentKind::Track);
        let mut request = PageRequest::new(
            self.endpoints.children(content, key),
            container.page_size,
            container.items.len(),
        );
        if kind == ContentKind::Playlist {
            request = request.with_param("additional_types", "track,episode");
        }
        debug!(node = %content, offset = request.offset, "Fetching remaining items");

        let page = api::fetch_paginated(self.api, &request)?;
        if kind == ContentKind::Playlist {
            link_playlist_items(catalog, id, &page.items);
        } else {
            for item in &page.items {
                link_item(catalog, id, default_kind, item)?;
            }
        }

        if kind == ContentKind::Album {
            refresh_album_totals(catalog, id);
        } else if let Some(container) = catalog.node_mut(id).container_mut() {
            container.needs_expansion = false;
        }
        Ok(())
    }

    fn fetch_library_page(&self, library: &LibrarySource) -> Result<api::Page> {
        let mut request = PageRequest::new(self.endpoints.user(library.path), 50, 0);
        if let Some(outer) = library.outer {
            request = request.with_wrapper(outer);
        }
        for (key, value) in library.params {
            request = request.with_param(*key, *value);
        }
        api::fetch_paginated(self.api, &request)
    }

    fn load_library(
        &self,
        catalog: &mut Catalog,
        library: &LibrarySource,
    ) -> Result<(ContentKind, Vec<NodeId>)> {
        let entries = self.fetch_library_page(library)?.items;
        let root = catalog.root();
        let mut nodes = Vec::with_capacity(entries.len());
        let mut responses = Vec::with_capacity(entries.len());
        for entry in entries {
            let added_at = entry
                .get("added_at")
                .and_then(Value::as_str)
                .map(str::to_string);
            let mut object = match library.inner {
                Some(inner) => entry.get(inner).cloned().unwrap_or(Value::Null),
                None => entry,
            };
            let Some(content) = content_of(library.kind, &object) else {
                continue;
            };
            if let (Some(added_at), Value::Object(map)) = (added_at, &mut object) {
                map.insert("added_at".to_string(), Value::String(added_at));
            }
            nodes.push(catalog.create_child(root, content));
            responses.push(Some(object));
        }
        info!(kind = %library.kind, count = nodes.len(), "Library items fetched");
        let nodes = self.parse_direct(catalog, &nodes, &responses);
        Ok((library.kind, nodes))
    }

    /// Backfill artist genres and parent albums.
    pub fn fetch_extra(&self, catalog: &mut Catalog) {
        let tracks: Vec<NodeId> = catalog
            .sub_content()
            .iter()
            .copied()
            .filter(|&n| {
                let node = catalog.node(n);
                node.kind() == Some(ContentKind::Track) && node.has_remote_id()
            })
            .collect();

        if self.config.metadata.save_genres {
            self.fetch_genres(catalog, &tracks);
        }
        if self.config.metadata.disc_track_totals || self.config.download.download_parent_album {
            self.fetch_parent_albums(catalog, &tracks);
        }
    }

    fn fetch_genres(&self, catalog: &mut Catalog, tracks: &[NodeId]) {
        let mut pending: BTreeMap<String, NodeId> = BTreeMap::new();
        for &track in tracks {
            if let NodeData::Track(info) = &catalog.node(track).data {
                for &artist in &info.artists {
                    let node = catalog.node(artist);
                    if !node.has_metadata && node.has_remote_id()
                        && let Some(content) = node.content()
                    {
                        pending.entry(content.id().to_string()).or_insert(artist);
                    }
                }
            }
        }

        if !pending.is_empty() {
            let ids: Vec<String> = pending.keys().cloned().collect();
            debug!(count = ids.len(), "Fetching bulk genre information");
            let responses = api::fetch_bulk(
                self.api,
                &self.endpoints.collection(ContentKind::Artist),
                &ids,
                ContentKind::Artist.plural(),
                ContentKind::Artist.bulk_limit(),
            );
            for (id, response) in ids.iter().zip(responses) {
                let (Some(&artist), Some(response)) = (pending.get(id), response) else {
                    continue;
                };
                let mut targets = vec![artist];
                targets.extend(
                    catalog
                        .siblings(artist)
                        .filter(|&s| !catalog.node(s).has_metadata),
                );
                for target in targets {
                    if let Err(e) = parse::parse_metadata(catalog, target, &response) {
                        warn!(artist = %id, error = %e, "Failed to parse artist");
                    }
                    if let Some(container) = catalog.node_mut(target).container_mut() {
                        container.needs_expansion = false;
                    }
                }
            }
        }

        for &track in tracks {
            let artists = match &catalog.node(track).data {
                NodeData::Track(info) => info.artists.clone(),
                _ => continue,
            };
            let mut genres: Vec<String> = artists
                .iter()
                .filter_map(|&a| match &catalog.node(a).data {
                    NodeData::Artist(artist) => Some(artist.genres.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            genres.sort();
            genres.dedup();
            if let NodeData::Track(info) = &mut catalog.node_mut(track).data {
                info.genres = genres;
            }
        }
    }

    fn fetch_parent_albums(&self, catalog: &mut Catalog, tracks: &[NodeId]) {
        let mut pending: BTreeMap<String, NodeId> = BTreeMap::new();
        for &track in tracks {
            if let NodeData::Track(info) = &catalog.node(track).data
                && let Some(album) = info.album
            {
                let node = catalog.node(album);
                if !node.has_metadata && node.has_remote_id()
                    && let Some(content) = node.content()
                {
                    pending.entry(content.id().to_string()).or_insert(album);
                }
            }
        }
        if pending.is_empty() {
            return;
        }

        let ids: Vec<String> = pending.keys().cloned().collect();
        debug!(count = ids.len(), "Fetching bulk parent album information");
        let responses = api::fetch_bulk(
            self.api,
            &self.endpoints.collection(ContentKind::Album),
            &ids,
            ContentKind::Album.plural(),
            ContentKind::Album.bulk_limit(),
        );
        for (id, response) in ids.iter().zip(responses) {
            if let Some(&album) = pending.get(id) {
                self.parse_and_expand(catalog, album, response.as_ref());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, MockCatalogApi};
    use crate::identifier::ContentId;
    use serde_json::json;

    fn respond(json: Value) -> crate::error::Result<ApiResponse> {
        Ok(ApiResponse {
            raw: json.to_string(),
            json,
        })
    }

    fn config_without_extras() -> AppConfig {
        let mut config = AppConfig::default();
        config.metadata.save_genres = false;
        config.metadata.disc_track_totals = false;
        config
    }

    fn track_json(id: &str) -> Value {
        json!({"type": "track", "id": id, "uri": format!("spotify:track:{id}"), "name": id,
               "duration_ms": 1000, "is_playable": true, "artists": []})
    }

    #[test]
    fn test_single_track_fetched_directly() {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/tracks/t1"))
            .times(1)
            .returning(|_, _| respond(track_json("t1")));
        let config = config_without_extras();
        let engine = QueryEngine::new(&api, &config);
        let mut query = Query::with_label(
            QuerySource::Urls(ParsedRequest::parse("spotify:track:t1")),
            "q",
        );
        engine.resolve(&mut query).unwrap();

        assert_eq!(query.requested().len(), 1);
        let track = query.requested()[0].1[0];
        assert!(query.catalog().node(track).has_metadata);
        assert_eq!(query.catalog().items(query.catalog().root()), &[track]);
    }

    #[test]
    fn test_many_tracks_use_bulk() {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, params| {
                url.ends_with("/tracks") && params.iter().any(|(k, v)| k == "ids" && v == "t1,t2")
            })
            .times(1)
            .returning(|_, _| respond(json!({"tracks": [track_json("t1"), null]})));
        let config = config_without_extras();
        let engine = QueryEngine::new(&api, &config);
        let mut query = Query::with_label(
            QuerySource::Urls(ParsedRequest::parse("spotify:track:t1 spotify:track:t2")),
            "q",
        );
        engine.resolve(&mut query).unwrap();

        let catalog = query.catalog();
        let t2 = catalog.find("track:t2").unwrap();
        assert!(!catalog.node(t2).has_metadata);
        assert_eq!(query.requested()[0].1.len(), 1);
    }

    #[test]
    fn test_artist_recurses_into_albums() {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/artists/ar1"))
            .returning(|_, _| {
                respond(json!({"uri": "spotify:artist:ar1", "name": "Band", "genres": ["rock"]}))
            });
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/artists/ar1/albums"))
            .returning(|_, _| {
                respond(json!({
                    "items": [{"uri": "spotify:album:a1", "id": "a1", "name": "First"}],
                    "next": null
                }))
            });
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/albums/a1"))
            .returning(|_, _| {
                respond(json!({
                    "uri": "spotify:album:a1", "id": "a1", "name": "First",
                    "tracks": {"items": [track_json("t1")], "next": null}
                }))
            });
        let config = config_without_extras();
        let engine = QueryEngine::new(&api, &config);
        let mut query = Query::with_label(
            QuerySource::Urls(ParsedRequest::parse("spotify:artist:ar1")),
            "q",
        );
        engine.resolve(&mut query).unwrap();

        let catalog = query.catalog();
        let artist = catalog.find("artist:ar1").unwrap();
        let album = catalog.items(artist)[0];
        assert!(catalog.node(album).has_metadata);
        assert_eq!(catalog.leaves(artist).len(), 1);
        assert!(!catalog.node(artist).container().unwrap().needs_expansion);
    }

    #[test]
    fn test_liked_songs_record_added_at() {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/me/tracks"))
            .returning(|_, _| {
                respond(json!({
                    "items": [{"added_at": "2024-05-01T00:00:00Z", "track": track_json("t1")}],
                    "next": null
                }))
            });
        let config = config_without_extras();
        let engine = QueryEngine::new(&api, &config);
        let mut query = Query::with_label(QuerySource::LikedSongs, "q");
        engine.resolve(&mut query).unwrap();

        let catalog = query.catalog();
        let track = catalog.find("track:t1").unwrap();
        let NodeData::Track(info) = &catalog.node(track).data else {
            panic!("not a track");
        };
        assert_eq!(info.added_at, "2024-05-01T00:00:00Z");
        assert_eq!(catalog.role(), RootRole::LikedSongs);
    }

    #[test]
    fn test_genres_fanned_out_to_tracks() {
        let mut api = MockCatalogApi::new();
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/tracks/t1"))
            .returning(|_, _| {
                respond(json!({
                    "uri": "spotify:track:t1", "id": "t1", "name": "One",
                    "artists": [{"uri": "spotify:artist:ar1", "id": "ar1", "name": "Band"},
                                {"uri": "spotify:artist:ar2", "id": "ar2", "name": "Guest"}]
                }))
            });
        api.expect_fetch()
            .withf(|url, _| url.ends_with("/artists"))
            .times(1)
            .returning(|_, _| {
                respond(json!({"artists": [
                    {"uri": "spotify:artist:ar1", "id": "ar1", "name": "Band", "genres": ["rock", "pop"]},
                    {"uri": "spotify:artist:ar2", "id": "ar2", "name": "Guest", "genres": ["pop"]}
                ]}))
            });
        let mut config = config_without_extras();
        config.metadata.save_genres = true;
        let engine = QueryEngine::new(&api, &config);
        let mut query = Query::with_label(
            QuerySource::Urls(ParsedRequest::parse("spotify:track:t1")),
            "q",
        );
        engine.resolve(&mut query).unwrap();

        let catalog = query.catalog();
        let track = catalog.find("track:t1").unwrap();
        let NodeData::Track(info) = &catalog.node(track).data else {
            panic!("not a track");
        };
        assert_eq!(info.genres, vec!["pop".to_string(), "rock".to_string()]);
    }

    #[test]
    fn test_downloadable_membership_follows_branch() {
        let mut query = Query::with_label(QuerySource::Urls(ParsedRequest::default()), "q");
        let root = query.catalog().root();
        let album = query
            .catalog_mut()
            .create_child(root, ContentId::new(ContentKind::Album, "a1"));
        let track = query
            .catalog_mut()
            .create_child(album, ContentId::new(ContentKind::Track, "t1"));
        query.set_downloadables(vec![album]);
        assert!(query.is_downloadable(track));
        assert!(query.is_downloadable(album));
        assert!(!query.is_downloadable(root));
    }
}
