use crate::error::{Error, Result};
use crate::types::Release;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Releases parked until the Mega cooldown passes, oldest first
///
/// Persisted as a JSON array after every change; an empty queue has no file.
#[derive(Debug)]
pub struct PendingQueue {
    path: PathBuf,
    entries: VecDeque<Release>,
}

impl PendingQueue {
    /// Load the queue at `path`; a missing file is an empty queue
    ///
    /// # Errors
    /// * `Error::Ledger` when the file is not a JSON array of releases
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                VecDeque::new()
            } else {
                serde_json::from_str::<VecDeque<Release>>(&content).map_err(|e| Error::Ledger {
                    path: path.to_path_buf(),
                    line: e.line(),
                    reason: e.to_string(),
                })?
            }
        } else {
            VecDeque::new()
        };
        debug!(?path, entries = entries.len(), "loaded pending queue");

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Park a release at the back of the queue, replacing an older entry for it
    pub fn push(&mut self, release: Release) -> Result<()> {
        self.entries.retain(|r| r.post_id != release.post_id);
        info!(post_id = %release.post_id, links = release.download_links.len(), "release parked until cooldown passes");
        self.entries.push_back(release);
        self.persist()
    }

    /// Remove the entry for `post_id`, returning it
    pub fn remove(&mut self, post_id: &str) -> Result<Option<Release>> {
        let Some(index) = self.entries.iter().position(|r| r.post_id == post_id) else {
            return Ok(None);
        };
        let removed = self.entries.remove(index);
        self.persist()?;
        Ok(removed)
    }

    /// Snapshot of the queued releases, oldest first
    pub fn snapshot(&self) -> Vec<Release> {
        self.entries.iter().cloned().collect()
    }

    /// Whether `post_id` is queued
    pub fn contains(&self, post_id: &str) -> bool {
        self.entries.iter().any(|r| r.post_id == post_id)
    }

    /// Number of queued releases
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the queue to disk (atomically), deleting the file when empty
    pub fn persist(&self) -> Result<()> {
        if self.entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
