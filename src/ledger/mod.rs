//! Persistent run state
//!
//! Three files make repeated runs idempotent:
//! - [`CompletedLedger`] - `post_id|band|album`, one line per acquired release
//! - [`FailedLedger`] - `band_id|band|post_id|album|date|reason`, one line per exhausted release
//! - [`PendingQueue`] - JSON array of releases deferred by the Mega cooldown
//!
//! Both ledgers are append-only text; `#` lines and blank lines are ignored on load.

mod completed;
mod failed;
mod pending;

pub use completed::CompletedLedger;
pub use failed::FailedLedger;
pub use pending::PendingQueue;

use crate::config::PathsConfig;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Entry counts of the three state files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Completion ledger entries
    pub completed: usize,
    /// Failure ledger entries
    pub failed: usize,
    /// Pending queue entries
    pub pending: usize,
}

/// The completion ledger, failure ledger and pending queue of one destination
#[derive(Debug)]
pub struct Ledgers {
    /// Acquired releases
    pub completed: CompletedLedger,
    /// Failed bands
    pub failed: FailedLedger,
    /// Cooldown-deferred releases
    pub pending: PendingQueue,
}

impl Ledgers {
    /// Open every state file named in `paths`
    pub fn open(paths: &PathsConfig) -> Result<Self> {
        Ok(Self {
            completed: CompletedLedger::open(&paths.completed_ledger)?,
            failed: FailedLedger::open(&paths.failed_ledger)?,
            pending: PendingQueue::open(&paths.pending_queue)?,
        })
    }

    /// Current entry counts
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            completed: self.completed.len(),
            failed: self.failed.len(),
            pending: self.pending.len(),
        }
    }
}

// Ledger fields are `|`-separated and line-based.
pub(crate) fn field(value: &str) -> String {
    value
        .trim()
        .replace('|', "/")
        .replace(['\r', '\n'], " ")
}

pub(crate) fn append_line(path: &Path, header: Option<&str>, line: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let fresh = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if fresh && let Some(header) = header {
        file.write_all(header.as_bytes())?;
    }
    writeln!(file, "{line}")?;
    file.flush()?;
    Ok(())
}
