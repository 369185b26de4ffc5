//! Download session.
//!
//! A [`Session`] bundles the configuration and the collaborators used while
//! deciding what to download and while downloading it. Eligibility checks,
//! sibling completion and the scheduler are implemented on it in their own
//! modules.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::CatalogApi;
use crate::archive::ArchiveStore;
use crate::artwork::CoverCache;
use crate::config::{AppConfig, SkipFilters};
use crate::error::Result;
use crate::stream::ContentStreamProvider;
use crate::tags::TagWriter;
use crate::transcode::Transcoder;

/// Outcome counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Items streamed and written.
    pub downloaded: usize,
    /// Items satisfied by copying a sibling's file.
    pub copied: usize,
    /// Items skipped by eligibility checks.
    pub skipped: usize,
    /// Items that failed.
    pub failed: usize,
    /// Whether the run was interrupted.
    pub cancelled: bool,
}

/// State shared by every step of a download run.
pub struct Session<'a> {
    pub(crate) config: &'a AppConfig,
    pub(crate) filters: SkipFilters,
    pub(crate) archive: ArchiveStore,
    pub(crate) streams: &'a dyn ContentStreamProvider,
    pub(crate) transcoder: &'a dyn Transcoder,
    pub(crate) tags: &'a dyn TagWriter,
    pub(crate) api: Option<&'a dyn CatalogApi>,
    pub(crate) covers: CoverCache,
    pub(crate) cancel_flag: Arc<AtomicBool>,
    pub(crate) report: DownloadReport,
    pub(crate) temp_files: Vec<PathBuf>,
}

impl<'a> Session<'a> {
    /// Build a session. Compiles the skip filters, so an invalid pattern fails here.
    pub fn new(
        config: &'a AppConfig,
        streams: &'a dyn ContentStreamProvider,
        transcoder: &'a dyn Transcoder,
        tags: &'a dyn TagWriter,
    ) -> Result<Self> {
        Ok(Self {
            config,
            filters: SkipFilters::compile(&config.filters)?,
            archive: ArchiveStore::from_config(config),
            streams,
            transcoder,
            tags,
            api: None,
            covers: CoverCache::default(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            report: DownloadReport::default(),
            temp_files: Vec::new(),
        })
    }

    /// Use a different archive store.
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveStore) -> Self {
        self.archive = archive;
        self
    }

    /// Catalog access for lyrics, cover art and externally hosted episodes.
    /// Without it those steps are skipped.
    #[must_use]
    pub fn with_api(mut self, api: &'a dyn CatalogApi) -> Self {
        self.api = Some(api);
        self
    }

    /// Share an existing cancel flag, e.g. one set by a signal handler.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = flag;
        self
    }

    /// Handle that interrupts the run when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation.
    pub fn reset_cancel(&self) {
        self.cancel_flag.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Configuration in use.
    pub const fn config(&self) -> &AppConfig {
        self.config
    }

    /// Archive store in use.
    pub const fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Counters of the current run.
    pub const fn report(&self) -> DownloadReport {
        self.report
    }
}
