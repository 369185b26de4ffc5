//! Application configuration.
//!
//! A single [`AppConfig`] value is built at startup (from a JSON file or from
//! defaults), validated once, and then passed by reference to every component.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::identifier::ContentKind;

/// Log levels accepted by the transcoding utility.
pub const TRANSCODER_LOG_LEVELS: [&str; 9] = [
    "trace", "debug", "verbose", "info", "warning", "error", "fatal", "panic", "quiet",
];

/// Stream quality preference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreference {
    /// Best quality the account allows.
    #[default]
    Auto,
    /// 96 kbps.
    Normal,
    /// 160 kbps.
    High,
    /// 320 kbps.
    VeryHigh,
    /// Lossless, where offered.
    Lossless,
}

impl QualityPreference {
    /// Bitrate hint handed to the transcoder, if the quality implies one.
    pub const fn bitrate(self, premium: bool) -> Option<&'static str> {
        match self {
            Self::Lossless => None,
            Self::VeryHigh => Some("320k"),
            Self::Auto if premium => Some("320k"),
            Self::Auto | Self::High => Some("160k"),
            Self::Normal => Some("96k"),
        }
    }
}

impl std::fmt::Display for QualityPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "very_high"),
            Self::Lossless => write!(f, "lossless"),
        }
    }
}

/// Which output template applies to a track, chosen by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRole {
    /// Directly requested track.
    Single,
    /// Track inside an album.
    Album,
    /// Track inside a playlist.
    Playlist,
    /// Track from the liked songs list.
    LikedSongs,
}

/// Output path templates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Template that overrides every other one when set.
    #[serde(default)]
    pub template: Option<String>,
    /// Template for directly requested tracks.
    #[serde(default = "default_output_single")]
    pub single: String,
    /// Template for album tracks.
    #[serde(default = "default_output_album")]
    pub album: String,
    /// Template for playlist tracks.
    #[serde(default = "default_output_playlist")]
    pub playlist: String,
    /// Template for liked songs.
    #[serde(default = "default_output_liked_songs")]
    pub liked_songs: String,
    /// Insert a `Disc N` directory for album tracks.
    #[serde(default)]
    pub split_album_discs: bool,
    /// Maximum filename length in characters, 0 for no limit.
    #[serde(default)]
    pub max_filename_length: usize,
}

fn default_output_single() -> String {
    "{artist}/{album}/{artist}_{song_name}".to_string()
}

fn default_output_album() -> String {
    "{artist}/{album}/{album_num}_{artist}_{song_name}".to_string()
}

fn default_output_playlist() -> String {
    "{playlist}/{playlist_num}_{artist}_{song_name}".to_string()
}

fn default_output_liked_songs() -> String {
    "Liked Songs/{artist}_{song_name}".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            template: None,
            single: default_output_single(),
            album: default_output_album(),
            playlist: default_output_playlist(),
            liked_songs: default_output_liked_songs(),
            split_album_discs: false,
            max_filename_length: 0,
        }
    }
}

/// Download behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Flatten, sort and edge-interleave the download set.
    #[serde(default = "default_true")]
    pub optimized_order: bool,
    /// Pause between consecutive downloads, in seconds.
    #[serde(default = "default_bulk_wait_secs")]
    pub bulk_wait_secs: u64,
    /// Directory for in-flight temp files; next to the output when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Download a track's whole parent album instead of the single track.
    #[serde(default)]
    pub download_parent_album: bool,
    /// Skip tracks from compilation albums.
    #[serde(default)]
    pub skip_compilation_albums: bool,
    /// Output format: aac, fdk_aac, mp3, ogg, opus, vorbis or copy.
    #[serde(default = "default_format")]
    pub format: String,
    /// Stream quality preference.
    #[serde(default)]
    pub quality: QualityPreference,
    /// Transcode bitrate, `auto` to follow the stream quality.
    #[serde(default = "default_bitrate")]
    pub transcode_bitrate: String,
    /// Extra arguments tried before the standard transcoder invocation.
    #[serde(default)]
    pub custom_transcoder_args: Vec<String>,
    /// Transcoder log level.
    #[serde(default = "default_transcoder_log_level")]
    pub transcoder_log_level: String,
    /// Retries for failed API calls.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_bulk_wait_secs() -> u64 {
    1
}

fn default_format() -> String {
    "copy".to_string()
}

fn default_bitrate() -> String {
    "auto".to_string()
}

fn default_transcoder_log_level() -> String {
    "error".to_string()
}

const fn default_retry_attempts() -> u32 {
    1
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            optimized_order: true,
            bulk_wait_secs: default_bulk_wait_secs(),
            temp_dir: None,
            download_parent_album: false,
            skip_compilation_albums: false,
            format: default_format(),
            quality: QualityPreference::default(),
            transcode_bitrate: default_bitrate(),
            custom_transcoder_args: Vec::new(),
            transcoder_log_level: default_transcoder_log_level(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

/// Name based skip patterns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterConfig {
    /// Apply the patterns below.
    #[serde(default)]
    pub regex_enabled: bool,
    /// Skip tracks whose name matches.
    #[serde(default)]
    pub track_skip: String,
    /// Skip episodes whose name matches.
    #[serde(default)]
    pub episode_skip: String,
    /// Skip albums whose name matches.
    #[serde(default)]
    pub album_skip: String,
}

/// Archive and duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Directory holding the global archive. Leading `.` means under the root path.
    #[serde(default)]
    pub location: Option<PathBuf>,
    /// Do not read or write the global archive.
    #[serde(default)]
    pub disable_global: bool,
    /// Do not read or write per-directory archives.
    #[serde(default)]
    pub disable_directory: bool,
    /// Skip items whose file exists or that a directory archive lists.
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    /// Skip items the global archive lists.
    #[serde(default)]
    pub skip_previously_downloaded: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            location: None,
            disable_global: false,
            disable_directory: false,
            skip_existing: true,
            skip_previously_downloaded: false,
        }
    }
}

/// Playlist export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    /// Write an m3u8 per requested collection.
    #[serde(default)]
    pub export_m3u8: bool,
    /// Directory for m3u8 files; the common directory of their entries when unset.
    #[serde(default)]
    pub location: Option<PathBuf>,
    /// Write entry paths relative to the m3u8 file.
    #[serde(default = "default_true")]
    pub relative_paths: bool,
    /// Update the liked songs m3u8 incrementally.
    #[serde(default = "default_true")]
    pub liked_songs_incremental: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_m3u8: false,
            location: None,
            relative_paths: true,
            liked_songs_incremental: true,
        }
    }
}

/// Metadata enrichment and tagging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Fetch artist genres.
    #[serde(default = "default_true")]
    pub save_genres: bool,
    /// Tag every genre instead of only the first.
    #[serde(default)]
    pub all_genres: bool,
    /// Separator between genres.
    #[serde(default = "default_delimiter")]
    pub genre_delimiter: String,
    /// Separator between artists.
    #[serde(default = "default_delimiter")]
    pub artist_delimiter: String,
    /// Fetch parent albums for disc and track totals.
    #[serde(default = "default_true")]
    pub disc_track_totals: bool,
    /// Compare every tag during library verification.
    #[serde(default = "default_true")]
    pub strict_library_verify: bool,
    /// Embed the album cover into tagged files.
    #[serde(default = "default_true")]
    pub embed_cover: bool,
    /// Also save the cover as a jpg beside the file.
    #[serde(default)]
    pub album_art_jpg_file: bool,
}

fn default_delimiter() -> String {
    ", ".to_string()
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            save_genres: true,
            all_genres: false,
            genre_delimiter: default_delimiter(),
            artist_delimiter: default_delimiter(),
            disc_track_totals: true,
            strict_library_verify: true,
            embed_cover: true,
            album_art_jpg_file: false,
        }
    }
}

/// Track lyrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LyricsConfig {
    /// Fetch lyrics for downloaded tracks.
    #[serde(default = "default_true")]
    pub download: bool,
    /// Fetch lyrics even for tracks that are skipped.
    #[serde(default)]
    pub always_check: bool,
    /// Directory for lrc files; the track's directory when unset.
    /// Leading `.` means under the root path.
    #[serde(default)]
    pub location: Option<PathBuf>,
    /// Template naming the lrc file, without extension.
    #[serde(default = "default_lyrics_filename")]
    pub filename: String,
    /// Start lrc files with title, artist, album and length tags.
    #[serde(default)]
    pub header: bool,
    /// Embed the lyrics into the track's tags.
    #[serde(default = "default_true")]
    pub save_tags: bool,
}

fn default_lyrics_filename() -> String {
    "{artist}_{song_name}".to_string()
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            download: true,
            always_check: false,
            location: None,
            filename: default_lyrics_filename(),
            header: false,
            save_tags: true,
        }
    }
}

impl LyricsConfig {
    /// Whether lyrics are fetched at all.
    pub const fn enabled(&self) -> bool {
        self.download || self.always_check
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Root directory for music.
    #[serde(default = "default_root_path")]
    pub root_path: PathBuf,
    /// Root directory for podcasts.
    #[serde(default = "default_root_podcast_path")]
    pub root_podcast_path: PathBuf,
    /// Output templates.
    #[serde(default)]
    pub output: OutputConfig,
    /// Download behavior.
    #[serde(default)]
    pub download: DownloadConfig,
    /// Skip patterns.
    #[serde(default)]
    pub filters: FilterConfig,
    /// Archives.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Playlist export.
    #[serde(default)]
    pub export: ExportConfig,
    /// Metadata.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Lyrics.
    #[serde(default)]
    pub lyrics: LyricsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            root_podcast_path: default_root_podcast_path(),
            output: OutputConfig::default(),
            download: DownloadConfig::default(),
            filters: FilterConfig::default(),
            archive: ArchiveConfig::default(),
            export: ExportConfig::default(),
            metadata: MetadataConfig::default(),
            lyrics: LyricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults rooted at `root`, with podcasts in a sibling folder.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.root_podcast_path = root.join("Podcasts");
        self.root_path = root;
        self
    }

    /// Load configuration from a JSON file, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to read config file: {e}"),
            })
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        let path = config_file_path();
        let config = Self::load_from(&path)?;
        if !path.exists()
            && let Err(e) = config.save_to(&path)
        {
            warn!("Failed to save default config: {}", e);
        }
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    reason: format!("Failed to create config directory: {e}"),
                })
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: format!("Failed to write config file: {e}"),
            })
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Normalize and check the configuration, compiling the skip patterns.
    ///
    /// This is the only fatal check of a run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid transcoder log level or
    /// an invalid skip pattern.
    pub fn validate(&mut self) -> Result<SkipFilters> {
        let mut level = self.download.transcoder_log_level.trim().to_ascii_lowercase();
        if level == "warn" {
            level = "warning".to_string();
        }
        if !TRANSCODER_LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Configuration(format!(
                "Transcoder log level \"{level}\" is not valid, select from: {}",
                TRANSCODER_LOG_LEVELS.join(", ")
            )));
        }
        self.download.transcoder_log_level = level;
        SkipFilters::compile(&self.filters)
    }

    /// Template for a track with the given parent role.
    pub fn output_template(&self, role: OutputRole) -> String {
        if let Some(template) = &self.output.template
            && !template.is_empty()
        {
            return template.clone();
        }
        let template = match role {
            OutputRole::Single => &self.output.single,
            OutputRole::Album => &self.output.album,
            OutputRole::Playlist => &self.output.playlist,
            OutputRole::LikedSongs => &self.output.liked_songs,
        };
        if self.output.split_album_discs && role == OutputRole::Album {
            let path = Path::new(template);
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            if let Some(name) = name {
                return parent
                    .join("Disc {disc_number}")
                    .join(name)
                    .to_string_lossy()
                    .into_owned();
            }
        }
        template.clone()
    }

    /// Location of the global archive file.
    pub fn global_archive_path(&self) -> PathBuf {
        let dir = self.archive.location.as_ref().map_or_else(
            || {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("tunegraph")
            },
            |location| self.resolve_under_root(location),
        );
        dir.join(".song_archive")
    }

    /// Directory for exported m3u8 files, when configured.
    pub fn m3u8_location(&self) -> Option<PathBuf> {
        self.export
            .location
            .as_ref()
            .map(|location| self.resolve_under_root(location))
    }

    /// Directory for lrc files, when configured.
    pub fn lyrics_dir(&self) -> Option<PathBuf> {
        self.lyrics
            .location
            .as_ref()
            .map(|location| self.resolve_under_root(location))
    }

    /// Directory for temp files, when configured.
    pub fn temp_dir(&self) -> Option<PathBuf> {
        self.download
            .temp_dir
            .as_ref()
            .map(|location| self.resolve_under_root(location))
    }

    /// Pause inserted between consecutive downloads.
    pub const fn pacing(&self) -> Duration {
        Duration::from_secs(self.download.bulk_wait_secs)
    }

    /// Paths starting with `.` are taken relative to the music root.
    fn resolve_under_root(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(".") {
            Ok(rest) => self.root_path.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Path to the default config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Compiled name patterns.
#[derive(Debug, Clone, Default)]
pub struct SkipFilters {
    track: Option<Regex>,
    episode: Option<Regex>,
    album: Option<Regex>,
}

impl SkipFilters {
    /// Compile the configured patterns. Empty patterns, or disabled filtering, compile to nothing.
    pub fn compile(config: &FilterConfig) -> Result<Self> {
        if !config.regex_enabled {
            return Ok(Self::default());
        }
        let build = |pattern: &str| -> Result<Option<Regex>> {
            if pattern.is_empty() {
                return Ok(None);
            }
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(Some)
                .map_err(|e| Error::Configuration(format!("Invalid skip pattern {pattern:?}: {e}")))
        };
        Ok(Self {
            track: build(&config.track_skip)?,
            episode: build(&config.episode_skip)?,
            album: build(&config.album_skip)?,
        })
    }

    /// Pattern for a kind.
    pub const fn pattern(&self, kind: ContentKind) -> Option<&Regex> {
        match kind {
            ContentKind::Track => self.track.as_ref(),
            ContentKind::Episode => self.episode.as_ref(),
            ContentKind::Album => self.album.as_ref(),
            _ => None,
        }
    }

    /// Whether `name` matches the pattern configured for `kind`.
    pub fn matches(&self, kind: ContentKind, name: &str) -> bool {
        self.pattern(kind).is_some_and(|re| re.is_match(name))
    }
}

/// Get the default music root.
#[must_use]
pub fn default_root_path() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Tunegraph Music")
}

/// Get the default podcast root.
#[must_use]
pub fn default_root_podcast_path() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Tunegraph Podcasts")
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("tunegraph")
        .join("config.json")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.archive.skip_existing);
        assert!(!config.archive.skip_previously_downloaded);
        assert!(config.download.optimized_order);
        assert!(!config.export.export_m3u8);
        assert!(config.export.liked_songs_incremental);
        assert_eq!(config.download.bulk_wait_secs, 1);
        assert_eq!(config.download.retry_attempts, 1);
        assert!(config.root_path.ends_with("Tunegraph Music"));
        assert!(config.lyrics.enabled());
        assert_eq!(config.lyrics.filename, "{artist}_{song_name}");
        assert!(config.metadata.embed_cover);
        assert!(!config.metadata.album_art_jpg_file);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig::default().with_root(dir.path().join("music"));
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"download": {"format": "mp3"}}"#).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.download.format, "mp3");
        assert!(loaded.download.optimized_order);
        assert_eq!(loaded.output.single, default_output_single());
    }

    #[test]
    fn test_invalid_log_level_is_fatal() {
        let mut config = AppConfig::default();
        config.download.transcoder_log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_warn_normalizes_to_warning() {
        let mut config = AppConfig::default();
        config.download.transcoder_log_level = "warn".to_string();
        config.validate().unwrap();
        assert_eq!(config.download.transcoder_log_level, "warning");
    }

    #[test]
    fn test_invalid_pattern_is_fatal() {
        let mut config = AppConfig::default();
        config.filters.regex_enabled = true;
        config.filters.track_skip = "(unclosed".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_skip_filters_match_by_kind() {
        let filters = SkipFilters::compile(&FilterConfig {
            regex_enabled: true,
            track_skip: "live|remix".to_string(),
            episode_skip: String::new(),
            album_skip: String::new(),
        })
        .unwrap();
        assert!(filters.matches(ContentKind::Track, "Song (Live)"));
        assert!(!filters.matches(ContentKind::Track, "Song"));
        assert!(!filters.matches(ContentKind::Episode, "Live episode"));
    }

    #[test]
    fn test_disabled_filters_never_match() {
        let filters = SkipFilters::compile(&FilterConfig {
            regex_enabled: false,
            track_skip: ".*".to_string(),
            ..FilterConfig::default()
        })
        .unwrap();
        assert!(!filters.matches(ContentKind::Track, "anything"));
    }

    #[test]
    fn test_split_discs_template() {
        let mut config = AppConfig::default();
        config.output.split_album_discs = true;
        let template = config.output_template(OutputRole::Album);
        assert_eq!(
            template,
            "{artist}/{album}/Disc {disc_number}/{album_num}_{artist}_{song_name}"
        );
        assert_eq!(config.output_template(OutputRole::Single), default_output_single());
    }

    #[test]
    fn test_global_template_overrides() {
        let mut config = AppConfig::default();
        config.output.template = Some("{artist}/{song_name}".to_string());
        assert_eq!(config.output_template(OutputRole::Playlist), "{artist}/{song_name}");
    }

    #[test]
    fn test_dot_locations_resolve_under_root() {
        let mut config = AppConfig::default().with_root("/music");
        config.archive.location = Some(PathBuf::from("./archive"));
        assert_eq!(
            config.global_archive_path(),
            PathBuf::from("/music/archive/.song_archive")
        );
    }

    #[test]
    fn test_quality_bitrates() {
        assert_eq!(QualityPreference::Auto.bitrate(true), Some("320k"));
        assert_eq!(QualityPreference::Auto.bitrate(false), Some("160k"));
        assert_eq!(QualityPreference::Lossless.bitrate(true), None);
    }
}
