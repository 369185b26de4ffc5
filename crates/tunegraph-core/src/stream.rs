//! Audio stream acquisition.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::QualityPreference;
use crate::error::{Error, FileSystemError, Result, StreamError};
use crate::identifier::ContentId;

/// Raw audio bytes of one item.
pub type AudioStream = Box<dyn Read + Send>;

const CHUNK_SIZE: usize = 64 * 1024;

/// Source of decrypted audio for catalog items.
#[cfg_attr(test, mockall::automock)]
pub trait ContentStreamProvider {
    /// Open the audio stream of `content` at `quality`.
    fn open_stream(
        &self,
        content: &ContentId,
        quality: QualityPreference,
    ) -> std::result::Result<AudioStream, StreamError>;

    /// Whether the account may stream the highest qualities.
    fn is_premium(&self) -> bool;
}

/// Open a stream, falling back once to [`QualityPreference::Auto`] when the
/// requested quality is unavailable.
pub fn open_with_fallback(
    provider: &dyn ContentStreamProvider,
    content: &ContentId,
    quality: QualityPreference,
) -> std::result::Result<AudioStream, StreamError> {
    match provider.open_stream(content, quality) {
        Err(StreamError::QualityUnavailable { quality: requested })
            if quality != QualityPreference::Auto =>
        {
            warn!(id = %content, quality = %requested, "Quality unavailable, falling back to auto");
            provider.open_stream(content, QualityPreference::Auto)
        }
        other => other,
    }
}

/// Copy `stream` into `temp`, checking `cancel` between chunks.
///
/// Returns the number of bytes written. On cancellation the partial file is
/// left in place for cleanup.
pub fn write_stream(stream: &mut dyn Read, temp: &Path, cancel: &AtomicBool) -> Result<u64> {
    if let Some(parent) = temp.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
    }
    let file = File::create(temp).map_err(|e| {
        Error::FileSystem(FileSystemError::WriteFailed {
            path: temp.to_path_buf(),
            reason: e.to_string(),
        })
    })?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    let mut total = 0_u64;
    loop {
        if cancel.load(Ordering::SeqCst) {
            writer.flush()?;
            return Err(Error::Cancelled);
        }
        let read = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Stream(StreamError::Connection(e.to_string()))),
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    writer.flush()?;
    debug!(path = %temp.display(), bytes = total, "Stream written");
    Ok(total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identifier::ContentKind;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_quality_fallback_once() {
        let mut provider = MockContentStreamProvider::new();
        provider
            .expect_open_stream()
            .withf(|_, q| *q == QualityPreference::VeryHigh)
            .times(1)
            .returning(|_, _| {
                Err(StreamError::QualityUnavailable {
                    quality: "very_high".into(),
                })
            });
        provider
            .expect_open_stream()
            .withf(|_, q| *q == QualityPreference::Auto)
            .times(1)
            .returning(|_, _| Ok(Box::new(Cursor::new(vec![1, 2, 3]))));

        let content = ContentId::new(ContentKind::Track, "t1");
        assert!(open_with_fallback(&provider, &content, QualityPreference::VeryHigh).is_ok());
    }

    #[test]
    fn test_key_failure_not_retried() {
        let mut provider = MockContentStreamProvider::new();
        provider.expect_open_stream().times(1).returning(|c, _| {
            Err(StreamError::KeyNegotiation {
                id: c.id().to_string(),
                reason: "denied".into(),
            })
        });
        let content = ContentId::new(ContentKind::Track, "t1");
        let result = open_with_fallback(&provider, &content, QualityPreference::High);
        assert!(matches!(result, Err(StreamError::KeyNegotiation { .. })));
    }

    #[test]
    fn test_write_stream() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("nested").join("a.tmp");
        let mut data = Cursor::new(vec![7_u8; 100_000]);
        let cancel = AtomicBool::new(false);
        assert_eq!(write_stream(&mut data, &temp, &cancel).unwrap(), 100_000);
        assert_eq!(fs::metadata(&temp).unwrap().len(), 100_000);
    }

    #[test]
    fn test_write_stream_cancelled() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.tmp");
        let mut data = Cursor::new(vec![7_u8; 10]);
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            write_stream(&mut data, &temp, &cancel),
            Err(Error::Cancelled)
        ));
    }
}
