//! Error types for Tunegraph core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tunegraph core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// File system operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Remote catalog API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Content stream could not be opened.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The user request could not be understood.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Configuration error. Always fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transcoding utility failed.
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// Tag reading or writing failed.
    #[error("Tagging failed: {0}")]
    Tagging(String),

    /// The run was interrupted by the user.
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid regular expression.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

/// File system errors.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// File or directory not found.
    #[error("Path not found: {path}")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// Failed to read a file.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path being read.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to write a file.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path being written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to create a directory.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to copy or move a file.
    #[error("Failed to copy {from} to {to}: {reason}")]
    CopyFailed {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// Remote catalog API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request itself failed.
    #[error("Request to {url} failed: {reason}")]
    RequestFailed {
        /// Requested URL.
        url: String,
        /// Underlying reason.
        reason: String,
    },

    /// The API answered with an error object or an empty body.
    #[error("API error {status}: {message}")]
    ErrorResponse {
        /// Status reported by the API.
        status: String,
        /// Message reported by the API.
        message: String,
    },

    /// All retries were used up.
    #[error("Retry limit exceeded for {url} after {attempts} attempts: {last}")]
    RetryLimitExceeded {
        /// Requested URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last observed failure.
        last: String,
    },

    /// A response lacked the expected key.
    #[error("Key \"{key}\" not found in response from {url}")]
    MissingKey {
        /// Expected key.
        key: String,
        /// Requested URL.
        url: String,
    },
}

/// Content stream acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The requested audio quality is not available for this item.
    #[error("Preferred quality {quality} not available")]
    QualityUnavailable {
        /// Requested quality.
        quality: String,
    },

    /// Decryption key negotiation failed. Not retried within a run.
    #[error("Failed fetching audio key for {id}: {reason}")]
    KeyNegotiation {
        /// Item id.
        id: String,
        /// Provider message.
        reason: String,
    },

    /// Connection failure while opening the stream.
    #[error("Connection error while fetching stream: {0}")]
    Connection(String),

    /// The item kind has no stream.
    #[error("No stream available for {0}")]
    Unsupported(String),
}

/// User request errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A token could not be read as a catalog identifier.
    #[error("Unrecognized identifier: {0}")]
    InvalidIdentifier(String),

    /// Nothing usable was requested.
    #[error("Request contains no catalog identifiers")]
    Empty,
}

/// Coarse error classification used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Filesystem problem.
    FileSystem,
    /// Network or API problem.
    Network,
    /// Stream acquisition problem.
    Stream,
    /// Bad input or configuration.
    Input,
    /// Transcoding or tagging problem.
    Media,
    /// User interruption.
    Cancelled,
}

impl Error {
    /// Whether retrying the same call could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::RequestFailed { .. } | ApiError::ErrorResponse { .. })
                | Self::Stream(StreamError::Connection(_))
        )
    }

    /// Coarse classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FileSystem(_) | Self::Io(_) => ErrorKind::FileSystem,
            Self::Api(_) | Self::Serialization(_) => ErrorKind::Network,
            Self::Stream(_) => ErrorKind::Stream,
            Self::Request(_) | Self::Configuration(_) | Self::Regex(_) => ErrorKind::Input,
            Self::Transcode(_) | Self::Tagging(_) => ErrorKind::Media,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
