use super::{Resolution, Resolver};
use crate::cooldown::Cooldown;
use crate::error::ResolveError;
use crate::tools::{ExternalTools, ToolFetch, first_line, is_quota_message};
use crate::types::{BackendKind, Link};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Whether a Mega URL carries its decryption key (`#key` or legacy `#!id!key`)
pub fn has_key(url: &str) -> bool {
    url.contains('#') || url.contains('!')
}

/// Mega through the external fetch tool
///
/// A quota message or a timeout starts the shared cooldown; while it is active
/// the tool is not invoked at all.
pub struct MegaResolver {
    tools: Arc<dyn ExternalTools>,
    cooldown: Arc<Cooldown>,
    timeout: Duration,
}

impl MegaResolver {
    /// Resolver bounded by `timeout` per fetch
    pub fn new(tools: Arc<dyn ExternalTools>, cooldown: Arc<Cooldown>, timeout: Duration) -> Self {
        Self {
            tools,
            cooldown,
            timeout,
        }
    }
}

#[async_trait]
impl Resolver for MegaResolver {
    async fn resolve(&self, link: &Link, workdir: &Path) -> Result<Resolution, ResolveError> {
        let backend = BackendKind::Mega;
        let url = link.url.trim();

        if !has_key(url) {
            return Err(ResolveError::InvalidUrl {
                url: url.to_string(),
                reason: "mega link without decryption key".to_string(),
            });
        }

        if let Some(until) = self.cooldown.active_until() {
            return Err(ResolveError::QuotaExceeded {
                backend,
                until: Some(until),
                message: "cooldown active".to_string(),
            });
        }

        match self.tools.fetch_via_tool(url, workdir, self.timeout).await {
            ToolFetch::Fetched(path) => {
                info!(?path, "mega fetch complete");
                Ok(Resolution::Local(path))
            }
            ToolFetch::Failed { stderr, code } if is_quota_message(&stderr) => {
                let until = self.cooldown.trigger();
                warn!(?code, %until, "mega reported a transfer quota");
                Err(ResolveError::QuotaExceeded {
                    backend,
                    until: Some(until),
                    message: first_line(&stderr),
                })
            }
            ToolFetch::Failed { stderr, code } => {
                warn!(?code, stderr = %first_line(&stderr), "mega fetch failed");
                Err(ResolveError::Tool {
                    backend,
                    reason: first_line(&stderr),
                })
            }
            ToolFetch::TimedOut => {
                let until = self.cooldown.trigger();
                warn!(timeout = ?self.timeout, %until, "mega fetch timed out, assuming throttling");
                Err(ResolveError::Timeout {
                    backend,
                    after: self.timeout,
                })
            }
            ToolFetch::Missing => Err(ResolveError::Tool {
                backend,
                reason: "megadl is not installed".to_string(),
            }),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::ManualClock;
    use crate::test_helpers::FakeTools;
    use crate::types::Signal;
    use chrono::{TimeZone, Utc};

    fn setup(fetch: ToolFetch) -> (Arc<FakeTools>, Arc<Cooldown>, Arc<ManualClock>, MegaResolver) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cooldown = Arc::new(Cooldown::new(clock.clone(), Duration::from_secs(3600)));
        let tools = Arc::new(FakeTools::fetching(fetch));
        let resolver = MegaResolver::new(tools.clone(), cooldown.clone(), Duration::from_secs(10));
        (tools, cooldown, clock, resolver)
    }

    #[tokio::test]
    async fn fetched_file_is_local_resolution() {
        let (_, cooldown, _, resolver) = setup(ToolFetch::Fetched("/tmp/w/Album.zip".into()));

        let resolution = resolver
            .resolve(&Link::new("https://mega.nz/file/AbC#key"), Path::new("/tmp/w"))
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Local("/tmp/w/Album.zip".into()));
        assert!(!cooldown.is_active());
    }

    #[tokio::test]
    async fn quota_message_starts_cooldown_and_defers() {
        let (tools, cooldown, _, resolver) = setup(ToolFetch::Failed {
            code: Some(1),
            stderr: "ERROR: Download failed: Bandwidth limit exceeded".into(),
        });

        let err = resolver
            .resolve(&Link::new("https://mega.nz/file/AbC#key"), Path::new("/tmp"))
            .await
            .unwrap_err();

        assert_eq!(err.signal(), Signal::RetryLater);
        assert!(cooldown.is_active());

        // No further tool run while the cooldown holds.
        let again = resolver
            .resolve(&Link::new("https://mega.nz/file/Other#key"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert_eq!(again.signal(), Signal::RetryLater);
        assert_eq!(tools.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn cooldown_expiry_allows_tool_again() {
        let (tools, cooldown, clock, resolver) = setup(ToolFetch::TimedOut);

        let err = resolver
            .resolve(&Link::new("https://mega.nz/#!AbC!key"), Path::new("/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { backend: BackendKind::Mega, .. }));
        assert!(cooldown.is_active());

        clock.advance(Duration::from_secs(3601));
        let _ = resolver
            .resolve(&Link::new("https://mega.nz/#!AbC!key"), Path::new("/tmp"))
            .await;
        assert_eq!(tools.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn other_failures_are_hard() {
        let (_, cooldown, _, resolver) = setup(ToolFetch::Failed {
            code: Some(1),
            stderr: "ERROR: File not found\n".into(),
        });

        let err = resolver
            .resolve(&Link::new("https://mega.nz/file/AbC#key"), Path::new("/tmp"))
            .await
            .unwrap_err();

        assert_eq!(err.signal(), Signal::HardFail);
        assert_eq!(err.code(), "tool_failed");
        assert!(!cooldown.is_active());
    }

    #[tokio::test]
    async fn keyless_link_never_reaches_tool() {
        let (tools, _, _, resolver) = setup(ToolFetch::Missing);

        let err = resolver
            .resolve(&Link::new("https://mega.nz/file/AbC"), Path::new("/tmp"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "invalid_url");
        assert_eq!(tools.fetch_calls(), 0);
    }
}
