use super::ReleaseProcessor;
use crate::error::{Error, Result};
use crate::types::{Disposition, Release, RunStats};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Read the input list of release records
pub fn load_releases(path: &Path) -> Result<Vec<Release>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("failed to read releases from {}: {}", path.display(), e),
        key: Some("paths.input".to_string()),
    })?;
    Ok(serde_json::from_str(&content)?)
}

impl ReleaseProcessor {
    /// Process `releases` in order, draining the pending queue whenever the cooldown
    /// has passed
    ///
    /// With a `limit`, only the first `limit` releases that carry links are taken.
    /// Each release considered lands in exactly one counter of the returned stats.
    pub async fn run(&mut self, releases: &[Release], limit: Option<usize>) -> Result<RunStats> {
        let selected: Vec<&Release> = match limit {
            Some(n) => releases
                .iter()
                .filter(|r| !r.download_links.is_empty())
                .take(n)
                .collect(),
            None => releases.iter().collect(),
        };

        info!(
            releases = selected.len(),
            completed = self.ledgers.completed.len(),
            pending = self.ledgers.pending.len(),
            "starting run"
        );

        let mut stats = RunStats::default();
        let mut seen = Seen::default();

        self.drain_pending(&mut stats, &mut seen).await?;

        for release in selected {
            if self.is_shutting_down() {
                warn!("shutdown requested, stopping before next release");
                break;
            }
            if !seen.all.insert(release.post_id.clone()) {
                continue;
            }

            let disposition = self.process_release(release).await?;
            seen.tally(&mut stats, &release.post_id, &disposition);
            self.pace(&disposition).await;

            self.drain_pending(&mut stats, &mut seen).await?;
        }

        self.flush()?;
        info!(
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            partial = stats.partial,
            pending = stats.pending,
            "run finished"
        );
        Ok(stats)
    }

    /// Retry parked releases, oldest first, while the cooldown is not active
    ///
    /// Releases deferred earlier in this run are retried too; a release that hits the
    /// cooldown again goes back to the queue.
    async fn drain_pending(&mut self, stats: &mut RunStats, seen: &mut Seen) -> Result<()> {
        if self.ledgers.pending.is_empty() || self.cooldown.is_active() {
            return Ok(());
        }

        for release in self.ledgers.pending.snapshot() {
            if self.is_shutting_down() || self.cooldown.is_active() {
                break;
            }
            if !seen.all.insert(release.post_id.clone())
                && !seen.deferred.contains(&release.post_id)
            {
                continue;
            }

            info!(post_id = %release.post_id, release = %release, "retrying deferred release");
            let disposition = self.process_release(&release).await?;
            seen.tally(stats, &release.post_id, &disposition);
            self.pace(&disposition).await;
        }
        Ok(())
    }

    async fn pace(&self, disposition: &Disposition) {
        let idle = matches!(
            disposition,
            Disposition::AlreadyProcessed { .. } | Disposition::NoLinks
        );
        let delay = self.config.download.release_delay;
        if !idle && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Post ids considered during one run
#[derive(Debug, Default)]
struct Seen {
    all: HashSet<String>,
    /// Currently counted under `pending` in the run's stats
    deferred: HashSet<String>,
}

impl Seen {
    /// Count `disposition` once per release: a retried release moves out of `pending`
    fn tally(&mut self, stats: &mut RunStats, post_id: &str, disposition: &Disposition) {
        if self.deferred.remove(post_id) {
            stats.pending = stats.pending.saturating_sub(1);
        }
        stats.record(disposition);
        if matches!(disposition, Disposition::Deferred) {
            self.deferred.insert(post_id.to_string());
        }
    }
}
