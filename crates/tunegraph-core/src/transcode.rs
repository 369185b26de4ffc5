//! Audio conversion through an external transcoder.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Encoder for an output format. Unknown formats are stream copied.
pub fn codec_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "aac" => "aac",
        "fdk_aac" => "libfdk_aac",
        "mp3" => "libmp3lame",
        "opus" => "libopus",
        _ => "copy",
    }
}

/// File extension for an output format or a detected codec name.
pub fn extension_for_format(format: &str) -> Option<&'static str> {
    match format.to_ascii_lowercase().as_str() {
        "aac" | "fdk_aac" => Some("m4a"),
        "mp3" => Some("mp3"),
        "ogg" | "opus" | "vorbis" | "copy" => Some("ogg"),
        _ => None,
    }
}

/// Conversion settings derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    /// Encoder name, `copy` for a stream copy.
    pub codec: String,
    /// Target bitrate, ignored for stream copies.
    pub bitrate: Option<String>,
    /// Arguments tried before the standard invocation.
    pub custom_args: Vec<String>,
}

impl CodecParams {
    /// Track conversion settings.
    pub fn for_track(config: &AppConfig, premium: bool) -> Self {
        let codec = codec_for_format(&config.download.format).to_string();
        let configured = config.download.transcode_bitrate.trim();
        let bitrate = if configured.is_empty() || configured.eq_ignore_ascii_case("auto") {
            config.download.quality.bitrate(premium).map(str::to_string)
        } else {
            Some(configured.to_string())
        };
        Self {
            codec,
            bitrate,
            custom_args: config.download.custom_transcoder_args.clone(),
        }
    }

    /// Episode conversion settings. Episodes keep their source encoding unless
    /// a concrete format was asked for.
    pub fn for_episode(config: &AppConfig, premium: bool) -> Self {
        Self::for_track(config, premium)
    }

    /// Whether this is a plain stream copy.
    pub fn is_copy(&self) -> bool {
        self.codec == "copy"
    }

    /// Standard output arguments.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec!["-c:a".to_string(), self.codec.clone()];
        if !self.is_copy()
            && let Some(bitrate) = &self.bitrate
        {
            args.push("-b:a".to_string());
            args.push(bitrate.clone());
        }
        args
    }

    /// Custom arguments, appended to the standard ones unless stream copying.
    pub fn custom_output_args(&self) -> Option<Vec<String>> {
        if self.custom_args.is_empty() {
            return None;
        }
        if self.is_copy() {
            return Some(self.custom_args.clone());
        }
        let mut args = self.output_args();
        args.extend(self.custom_args.iter().cloned());
        Some(args)
    }
}

/// External audio transcoder.
#[cfg_attr(test, mockall::automock)]
pub trait Transcoder {
    /// Convert `input` into `output` with the given output arguments.
    fn convert(&self, input: &Path, output: &Path, args: &[String]) -> Result<()>;

    /// Name of the first audio codec in `path`.
    fn detect_codec(&self, path: &Path) -> Result<String>;
}

/// Convert `temp` into `output`, trying custom arguments first.
///
/// The temp file is removed on success and left in place on failure.
pub fn transcode(
    transcoder: &dyn Transcoder,
    temp: &Path,
    output: &Path,
    params: &CodecParams,
) -> Result<()> {
    let mut converted = false;
    if let Some(custom) = params.custom_output_args() {
        match transcoder.convert(temp, output, &custom) {
            Ok(()) => converted = true,
            Err(e) => warn!(error = %e, "Custom transcoder arguments failed, using defaults"),
        }
    }
    if !converted {
        transcoder.convert(temp, output, &params.output_args())?;
    }
    if temp.exists() {
        fs::remove_file(temp)?;
    }
    Ok(())
}

/// Probe the codec of `path` and map it to a file extension, `mp3` when unknown.
pub fn detect_extension(transcoder: &dyn Transcoder, path: &Path) -> String {
    match transcoder.detect_codec(path) {
        Ok(codec) => {
            let ext = extension_for_format(&codec).map_or_else(|| codec.clone(), str::to_string);
            debug!(codec = %codec, ext = %ext, "Detected audio codec");
            ext
        }
        Err(e) => {
            warn!(error = %e, "Codec analysis failed, assuming mp3");
            "mp3".to_string()
        }
    }
}

/// [`Transcoder`] running `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    inspector: PathBuf,
    log_level: String,
}

impl FfmpegTranscoder {
    /// Use the binaries found on `PATH`.
    pub fn new(log_level: impl Into<String>) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            inspector: PathBuf::from("ffprobe"),
            log_level: log_level.into(),
        }
    }

    /// Use the configured ffmpeg log level.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.download.transcoder_log_level.clone())
    }

    fn execute(&self, program: &Path, args: &[String]) -> Result<Output> {
        debug!("Executing command: {} {:?}", program.display(), args);
        let output = Command::new(program).args(args).output().map_err(|e| {
            Error::Transcode(format!("Failed to execute {}: {e}", program.display()))
        })?;
        if !output.status.success() {
            return Err(Error::Transcode(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

impl Transcoder for FfmpegTranscoder {
    fn convert(&self, input: &Path, output: &Path, args: &[String]) -> Result<()> {
        let mut all = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];
        all.extend(args.iter().cloned());
        all.push(output.to_string_lossy().into_owned());
        self.execute(&self.ffmpeg, &all).map(|_| ())
    }

    fn detect_codec(&self, path: &Path) -> Result<String> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-show_entries".to_string(),
            "stream=codec_name".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let output = self.execute(&self.inspector, &args)?;
        parse_codec_name(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::Transcode(format!("No audio codec found in {}", path.display())))
    }
}

fn parse_codec_name(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("codec_name="))
        .map(|codec| codec.trim().to_string())
        .filter(|codec| !codec.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::QualityPreference;
    use tempfile::TempDir;

    #[test]
    fn test_format_maps() {
        assert_eq!(codec_for_format("fdk_aac"), "libfdk_aac");
        assert_eq!(codec_for_format("vorbis"), "copy");
        assert_eq!(codec_for_format("wav"), "copy");
        assert_eq!(extension_for_format("aac"), Some("m4a"));
        assert_eq!(extension_for_format("OPUS"), Some("ogg"));
        assert_eq!(extension_for_format("flac"), None);
    }

    #[test]
    fn test_bitrate_follows_quality() {
        let mut config = AppConfig::default();
        config.download.format = "mp3".to_string();
        config.download.quality = QualityPreference::High;
        let params = CodecParams::for_track(&config, true);
        assert_eq!(params.output_args(), vec!["-c:a", "libmp3lame", "-b:a", "160k"]);

        config.download.transcode_bitrate = "256k".to_string();
        let params = CodecParams::for_track(&config, true);
        assert_eq!(params.bitrate.as_deref(), Some("256k"));
    }

    #[test]
    fn test_copy_ignores_bitrate() {
        let params = CodecParams::for_track(&AppConfig::default(), true);
        assert_eq!(params.output_args(), vec!["-c:a", "copy"]);
    }

    #[test]
    fn test_custom_args_tried_first() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.tmp");
        fs::write(&temp, b"audio").unwrap();
        let output = dir.path().join("a.mp3");

        let mut config = AppConfig::default();
        config.download.format = "mp3".to_string();
        config.download.custom_transcoder_args = vec!["-ar".to_string(), "44100".to_string()];
        let params = CodecParams::for_track(&config, false);

        let mut transcoder = MockTranscoder::new();
        let mut seq = mockall::Sequence::new();
        transcoder
            .expect_convert()
            .withf(|_, _, args| args.iter().any(|a| a == "44100"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(Error::Transcode("bad args".into())));
        transcoder
            .expect_convert()
            .withf(|_, _, args| !args.iter().any(|a| a == "44100"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        transcode(&transcoder, &temp, &output, &params).unwrap();
        assert!(!temp.exists());
    }

    #[test]
    fn test_failed_conversion_keeps_temp() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.tmp");
        fs::write(&temp, b"audio").unwrap();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_convert()
            .returning(|_, _, _| Err(Error::Transcode("missing".into())));
        let params = CodecParams::for_track(&AppConfig::default(), false);
        assert!(transcode(&transcoder, &temp, &dir.path().join("a.ogg"), &params).is_err());
        assert!(temp.exists());
    }

    #[test]
    fn test_detect_extension() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_detect_codec()
            .returning(|_| Ok("vorbis".to_string()));
        assert_eq!(detect_extension(&transcoder, Path::new("x")), "ogg");

        let mut failing = MockTranscoder::new();
        failing
            .expect_detect_codec()
            .returning(|_| Err(Error::Transcode("no ffprobe".into())));
        assert_eq!(detect_extension(&failing, Path::new("x")), "mp3");
    }

    #[test]
    fn test_log_level_from_config() {
        let mut config = AppConfig::default();
        config.download.transcoder_log_level = "error".into();
        assert_eq!(FfmpegTranscoder::from_config(&config).log_level, "error");
    }

    #[test]
    fn test_parse_codec_name() {
        assert_eq!(parse_codec_name("codec_name=mp3\r\n"), Some("mp3".to_string()));
        assert_eq!(parse_codec_name(""), None);
    }
}
