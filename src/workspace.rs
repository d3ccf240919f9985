//! Per-attempt temporary workspaces
//!
//! Every link attempt gets a uniquely named directory with `download/` and
//! `extract/` inside. The directory is removed when the [`Workspace`] is dropped,
//! whatever the outcome of the attempt.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Scoped scratch directory for one link attempt
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    download: PathBuf,
    extract: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `parent`
    pub fn create(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("release-").tempdir_in(parent)?;
        let download = dir.path().join("download");
        let extract = dir.path().join("extract");
        std::fs::create_dir(&download)?;
        std::fs::create_dir(&extract)?;
        debug!(path = ?dir.path(), "workspace created");

        Ok(Self {
            dir,
            download,
            extract,
        })
    }

    /// Workspace root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where downloads and tool fetches land
    pub fn download_dir(&self) -> &Path {
        &self.download
    }

    /// Where archives are unpacked
    pub fn extract_dir(&self) -> &Path {
        &self.extract
    }
}
