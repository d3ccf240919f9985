use super::{append_line, field};
use crate::error::Result;
use crate::types::Release;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only record of bands whose releases exhausted every link
///
/// A band appearing here suppresses all of its releases in later runs.
#[derive(Debug)]
pub struct FailedLedger {
    path: PathBuf,
    bands: HashSet<String>,
    entries: usize,
}

impl FailedLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger
    pub fn open(path: &Path) -> Result<Self> {
        let mut bands = HashSet::new();
        let mut entries = 0;
        if path.exists() {
            for line in std::fs::read_to_string(path)?.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                entries += 1;
                if let Some(key) = line.split('|').next().map(str::trim).filter(|k| !k.is_empty()) {
                    bands.insert(key.to_string());
                }
            }
        }
        debug!(?path, bands = bands.len(), "loaded failure ledger");

        Ok(Self {
            path: path.to_path_buf(),
            bands,
            entries,
        })
    }

    /// Whether the band of `release` already failed
    pub fn band_failed(&self, release: &Release) -> bool {
        self.bands.contains(&field(release.failure_key()))
    }

    /// Record an exhausted release against its band
    pub fn record(&mut self, release: &Release, at: DateTime<Utc>, reason: &str) -> Result<()> {
        let key = release.failure_key().trim().to_string();
        let line = format!(
            "{}|{}|{}|{}|{}|{}",
            field(&key),
            field(&release.band),
            field(&release.post_id),
            field(&release.album),
            at.format("%Y-%m-%d %H:%M:%S"),
            field(reason)
        );
        append_line(&self.path, None, &line)?;
        warn!(band = %release.band, band_key = %key, reason, "band recorded as failed");
        self.bands.insert(field(&key));
        self.entries += 1;
        Ok(())
    }

    /// Number of ledger lines
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::release;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn line_layout_and_band_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.txt");
        let mut ledger = FailedLedger::open(&path).unwrap();

        let mut first = release("10", "Cryptic", "One");
        first.band_id = "B7".into();
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 1).unwrap();
        ledger.record(&first, at, "page_parse_failure").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "B7|Cryptic|10|One|2024-03-09 08:05:01|page_parse_failure\n"
        );

        let mut sibling = release("11", "Cryptic", "Two");
        sibling.band_id = "B7".into();
        assert!(ledger.band_failed(&sibling));
        assert!(FailedLedger::open(&path).unwrap().band_failed(&sibling));
    }

    #[test]
    fn missing_band_id_is_keyed_by_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.txt");
        let mut ledger = FailedLedger::open(&path).unwrap();

        let mut orphan = release("3", "Nameless", "X");
        orphan.band_id = String::new();
        ledger.record(&orphan, Utc::now(), "http_status").unwrap();

        let reopened = FailedLedger::open(&path).unwrap();
        assert!(reopened.band_failed(&orphan));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn separator_in_band_name_matches_before_and_after_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed.txt");
        let mut ledger = FailedLedger::open(&path).unwrap();

        let mut piped = release("4", "Fire|Ice", "Both");
        piped.band_id = String::new();
        ledger.record(&piped, Utc::now(), "page_parse_failure").unwrap();

        let mut sibling = release("5", "Fire|Ice", "Again");
        sibling.band_id = String::new();
        assert!(ledger.band_failed(&sibling));
        assert!(FailedLedger::open(&path).unwrap().band_failed(&sibling));
    }
}
