use super::{append_line, field};
use crate::error::Result;
use crate::types::Release;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADER: &str = "# Releases downloaded successfully\n# Format: post_id|band|album\n# Do not edit manually\n\n";

/// Append-only record of acquired releases, keyed by post id
#[derive(Debug)]
pub struct CompletedLedger {
    path: PathBuf,
    post_ids: HashSet<String>,
}

impl CompletedLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger
    ///
    /// Comment lines are ignored. Only the first field is read, so legacy lines
    /// holding just the post id are honoured as well.
    pub fn open(path: &Path) -> Result<Self> {
        let mut post_ids = HashSet::new();
        if path.exists() {
            for line in std::fs::read_to_string(path)?.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(id) = line.split('|').next().map(str::trim).filter(|id| !id.is_empty()) {
                    post_ids.insert(id.to_string());
                }
            }
        }
        debug!(?path, entries = post_ids.len(), "loaded completion ledger");

        Ok(Self {
            path: path.to_path_buf(),
            post_ids,
        })
    }

    /// Whether the post id has been acquired
    pub fn contains(&self, post_id: &str) -> bool {
        self.post_ids.contains(&field(post_id))
    }

    /// Record an acquired release; a post id already present is not written twice
    pub fn record(&mut self, release: &Release) -> Result<()> {
        if self.contains(&release.post_id) {
            return Ok(());
        }
        let line = format!(
            "{}|{}|{}",
            field(&release.post_id),
            field(&release.band),
            field(&release.album)
        );
        append_line(&self.path, Some(HEADER), &line)?;
        self.post_ids.insert(field(&release.post_id));
        Ok(())
    }

    /// Number of recorded releases
    pub fn len(&self) -> usize {
        self.post_ids.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.post_ids.is_empty()
    }

    /// Delete the ledger file and forget every entry
    pub fn reset(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        self.post_ids.clear();
        info!(path = ?self.path, "completion ledger reset");
        Ok(())
    }
}
