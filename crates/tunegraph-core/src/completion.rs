//! Download completion and sibling propagation.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::node::{NodeData, NodeId};
use crate::output::{dedupe_path, output_path};
use crate::query::Query;
use crate::session::Session;

/// Where a copied sibling file goes: its own output path with the source's extension.
fn copy_target(intended: &Path, source: &Path) -> PathBuf {
    match source.extension() {
        Some(ext) => intended.with_extension(ext),
        None => intended.to_path_buf(),
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
    }
    fs::copy(from, to).map_err(|e| {
        Error::FileSystem(FileSystemError::CopyFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason: e.to_string(),
        })
    })?;
    Ok(())
}

impl Session<'_> {
    /// Mark `id` downloaded at `path` and satisfy its siblings from the same file.
    ///
    /// A sibling inside the parent album being downloaded in place of single
    /// tracks shares the file. Any other sibling in the download set gets a
    /// copy at its own output path, retagged for its own position. Siblings
    /// outside the download set are left alone, and a missing source file
    /// leaves them undownloaded.
    pub fn mark_downloaded(&mut self, query: &mut Query, id: NodeId, path: Option<PathBuf>) {
        query.catalog_mut().set_downloaded(id, path.clone());

        let catalog = query.catalog();
        if !catalog.node(id).is_downloadable() {
            return;
        }
        let Some(source) = path else {
            return;
        };
        let parent_uri = catalog.node(id).parent().map(|p| catalog.node(p).uri());
        let lyrics = match &catalog.node(id).data {
            NodeData::Track(track) => track.lyrics.clone(),
            _ => Vec::new(),
        };
        let siblings: Vec<NodeId> = catalog.siblings(id).collect();

        for sibling in siblings {
            let catalog = query.catalog();
            let node = catalog.node(sibling);
            if node.downloaded || !node.is_downloadable() {
                continue;
            }

            if self.config.download.download_parent_album
                && let NodeData::Track(track) = &node.data
                && let Some(album) = track.album
                && parent_uri.as_deref() == Some(catalog.node(album).uri().as_str())
            {
                debug!(item = %node.label, "Downloaded as part of its album");
                self.mark_downloaded(query, sibling, Some(source.clone()));
                continue;
            }

            if !query.is_downloadable(sibling) {
                continue;
            }
            if !source.exists() {
                warn!(
                    item = %node.label,
                    path = %source.display(),
                    "Sibling file missing, item will be downloaded on a later run"
                );
                continue;
            }
            let Some(intended) = output_path(catalog, self.config, sibling) else {
                continue;
            };
            let intended = copy_target(&intended, &source);
            if intended == source {
                self.mark_downloaded(query, sibling, Some(source.clone()));
                continue;
            }

            let target = dedupe_path(&intended);
            if let Err(e) = copy_file(&source, &target) {
                warn!(item = %node.label, error = %e, "Failed to copy sibling file");
                continue;
            }
            info!(
                item = %node.label,
                from = %source.display(),
                to = %target.display(),
                "Copied from sibling"
            );
            if let NodeData::Track(track) = &mut query.catalog_mut().node_mut(sibling).data
                && track.lyrics.is_empty()
            {
                track.lyrics.clone_from(&lyrics);
            }
            self.tag_file(query.catalog(), sibling, &target);
            self.report.copied += 1;
            self.mark_downloaded(query, sibling, Some(target));
        }
    }
}
