//! `Tunegraph` Core Library
//!
//! This crate provides the core functionality for the `Tunegraph` downloader:
//! - Request parsing for catalog URLs, URIs and request files
//! - A per-request catalog graph with deduplicated, cross-linked nodes
//! - Metadata resolution with bulk and paginated fetches
//! - Download eligibility with archive lookups and sibling file reuse
//! - Download scheduling, transcoding and tagging
//! - Lyrics files and embedded cover art
//! - M3U8 playlist export, including incremental liked songs exports
//!
//! # Error Handling
//!
//! Every fallible operation returns the crate [`Result`]. See the [`error`]
//! module for the error taxonomy.
//!
//! ```rust,ignore
//! use tunegraph_core::{AppConfig, Query, QueryEngine, QuerySource, ParsedRequest, Result};
//!
//! fn resolve(api: &dyn tunegraph_core::CatalogApi) -> Result<Query> {
//!     let config = AppConfig::load()?;
//!     let mut query = Query::new(QuerySource::Urls(ParsedRequest::parse("spotify:album:abc")));
//!     QueryEngine::new(api, &config).resolve(&mut query)?;
//!     Ok(query)
//! }
//! ```

pub mod api;
pub mod archive;
pub mod artwork;
pub mod completion;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod lyrics;
pub mod model;
pub mod node;
pub mod output;
pub mod parse;
pub mod playlist;
pub mod query;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod tags;
pub mod transcode;
pub mod tree;
pub mod verify;

pub use api::{
    ApiResponse, CatalogApi, DEFAULT_API_BASE, Endpoints, HttpCatalogApi, Page, PageRequest,
    fetch_bulk, fetch_bytes, fetch_item, fetch_paginated, partner_audio_url,
};
pub use archive::{ArchiveEntry, ArchiveScope, ArchiveStore, DIR_ARCHIVE_NAME};
pub use artwork::{CoverCache, cover_url, embed_cover};
pub use config::{
    AppConfig, ArchiveConfig, DownloadConfig, ExportConfig, FilterConfig, LyricsConfig,
    MetadataConfig, OutputConfig, OutputRole, QualityPreference, SkipFilters,
};
pub use eligibility::SkipReason;
pub use error::{
    ApiError, Error, ErrorKind, FileSystemError, RequestError, Result, StreamError,
};
pub use identifier::{ContentId, ContentKind, ParsedRequest};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, default_log_directory};
pub use lyrics::{LrcHeader, SyncType, TrackLyrics, fetch_lyrics, lrc_path};
pub use node::{Node, NodeData, NodeId, RootRole};
pub use output::{dedupe_path, file_exists, fix_filename, output_path};
pub use playlist::{LIKED_SONGS_FILE, export_liked_songs, export_playlists, read_m3u8};
pub use query::{Query, QueryEngine, QuerySource};
pub use scheduler::edge_interleave;
pub use session::{DownloadReport, Session};
pub use stream::{AudioStream, ContentStreamProvider};
pub use tags::{Id3TagWriter, TagWriter, TrackTags};
pub use transcode::{CodecParams, FfmpegTranscoder, Transcoder};
pub use tree::Catalog;
pub use verify::{VerifyReport, verify_library};
