//! Structured logging setup.
//!
//! Console output is human readable; an optional rolling file gets JSON lines.
//! Library code only emits `tracing` events, the binary decides where they go.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, FileSystemError, Result};

/// Log file rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// One file per hour.
    Hourly,
    /// One file per day.
    Daily,
    /// A single file.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Logging options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files. No file output when `None`.
    pub log_directory: Option<PathBuf>,
    /// Log file name prefix.
    pub log_file_prefix: String,
    /// Maximum level printed to the console.
    pub console_level: Level,
    /// Maximum level written to the file.
    pub file_level: Level,
    /// File rotation.
    pub rotation: LogRotation,
    /// Colored console output.
    pub console_ansi: bool,
    /// Print module targets on the console.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_directory: Some(default_log_directory()),
            log_file_prefix: "tunegraph".to_string(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            rotation: LogRotation::Daily,
            console_ansi: true,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose console, no file.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            log_directory: None,
            console_level: Level::DEBUG,
            include_target: true,
            ..Self::default()
        }
    }

    /// Only warnings and errors on the console.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            console_level: Level::WARN,
            ..Self::default()
        }
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_directory(mut self, path: PathBuf) -> Self {
        self.log_directory = Some(path);
        self
    }

    /// Disable file output.
    #[must_use]
    pub fn without_file(mut self) -> Self {
        self.log_directory = None;
        self
    }

    /// Set the console level.
    #[must_use]
    pub const fn with_console_level(mut self, level: Level) -> Self {
        self.console_level = level;
        self
    }

    /// Set the rotation frequency.
    #[must_use]
    pub const fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Console filter: `RUST_LOG` wins, otherwise the crate at `console_level`.
    fn console_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        build_filter(self.console_level)
    }
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let console_layer = fmt::layer()
        .with_ansi(config.console_ansi)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_filter(config.console_filter()?);

    let (file_layer, file_guard) = match &config.log_directory {
        Some(dir) => {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    Error::FileSystem(FileSystemError::CreateDirFailed {
                        path: dir.clone(),
                        reason: e.to_string(),
                    })
                })?;
            }
            let appender =
                RollingFileAppender::new(config.rotation.into(), dir, &config.log_file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .json()
                .with_filter(build_filter(config.file_level)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Configuration(format!("Logging already initialized: {e}")))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default directory for log files.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunegraph")
        .join("logs")
}

fn build_filter(level: Level) -> Result<EnvFilter> {
    let directive = format!("warn,tunegraph={0},tunegraph_core={0}", level_to_directive(level));
    EnvFilter::try_new(&directive)
        .map_err(|e| Error::Configuration(format!("Invalid log filter {directive:?}: {e}")))
}

const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_writes_file() {
        let config = LoggingConfig::default();
        assert!(config.log_directory.is_some());
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_presets() {
        assert!(LoggingConfig::debug().log_directory.is_none());
        assert_eq!(LoggingConfig::quiet().console_level, Level::WARN);
        let config = LoggingConfig::default()
            .without_file()
            .with_console_level(Level::ERROR)
            .with_rotation(LogRotation::Hourly);
        assert!(config.log_directory.is_none());
        assert_eq!(config.console_level, Level::ERROR);
        assert_eq!(config.rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_filters_build() {
        assert!(build_filter(Level::TRACE).is_ok());
        assert!(build_filter(Level::ERROR).is_ok());
    }

    #[test]
    fn test_default_log_directory() {
        let dir = default_log_directory();
        assert!(dir.ends_with("tunegraph/logs"));
    }
}
