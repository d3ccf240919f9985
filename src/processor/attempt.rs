use super::ReleaseProcessor;
use super::state::LinkOutcome;
use crate::classify::classify;
use crate::error::{Error, Result};
use crate::inspect::correct_extension;
use crate::organize::organize;
use crate::resolver::Resolution;
use crate::retry::download_with_retry;
use crate::types::{BackendKind, Event, Link, Release, Signal};
use crate::workspace::Workspace;
use std::path::PathBuf;
use tracing::{debug, info, warn};

impl ReleaseProcessor {
    /// Try the links in listed order until one is organized
    pub(super) async fn attempt_links(&self, release: &Release, name: &str) -> Vec<LinkOutcome> {
        let mut outcomes: Vec<LinkOutcome> = Vec::with_capacity(release.download_links.len());

        for link in &release.download_links {
            let attempted_before = outcomes
                .last()
                .is_some_and(|o| !matches!(o, LinkOutcome::CooldownSkipped { .. }));
            if attempted_before && !self.config.download.link_delay.is_zero() {
                tokio::time::sleep(self.config.download.link_delay).await;
            }

            let outcome = self.attempt_link(release, link, name).await;
            let won = matches!(outcome, LinkOutcome::Succeeded(_));
            outcomes.push(outcome);
            if won {
                break;
            }
        }
        outcomes
    }

    async fn attempt_link(&self, release: &Release, link: &Link, name: &str) -> LinkOutcome {
        let backend = classify(&link.url);

        if backend == BackendKind::Mega
            && let Some(until) = self.cooldown.active_until()
        {
            info!(post_id = %release.post_id, %until, "mega cooldown active, skipping link");
            self.emit(Event::LinkSkipped {
                post_id: release.post_id.clone(),
                until,
            });
            return LinkOutcome::CooldownSkipped { until };
        }

        info!(post_id = %release.post_id, %backend, url = %link.url, "trying link");
        self.emit(Event::LinkAttempt {
            post_id: release.post_id.clone(),
            backend,
            url: link.url.clone(),
        });

        let workspace = match Workspace::create(&self.config.paths.temp_dir) {
            Ok(ws) => ws,
            Err(e) => return self.link_failed(release, backend, &e),
        };

        match self.acquire(release, link, name, &workspace).await {
            Ok(destination) => LinkOutcome::Succeeded(destination),
            Err(e) => self.link_failed(release, backend, &e),
        }
    }

    /// Resolve, download, inspect, extract and organize one link
    async fn acquire(
        &self,
        release: &Release,
        link: &Link,
        name: &str,
        workspace: &Workspace,
    ) -> Result<PathBuf> {
        let download_dir = workspace.download_dir();

        let file = match self.resolvers.resolve(link, download_dir).await? {
            Resolution::Direct { url, referer } => {
                debug!(post_id = %release.post_id, %url, "resolved direct URL");
                download_with_retry(&self.retry, || {
                    self.fetcher.fetch(&url, download_dir, referer.as_deref())
                })
                .await?
            }
            Resolution::Local(path) => path,
        };

        let inspection = correct_extension(&file)?;
        let source = if inspection.needs_extraction() {
            self.extractor
                .extract(
                    &inspection.path,
                    inspection.kind,
                    workspace.extract_dir(),
                    link.password(),
                )
                .await?;
            workspace.extract_dir()
        } else {
            debug!(path = ?inspection.path, kind = %inspection.kind, "not an archive, keeping as payload");
            download_dir
        };

        organize(source, name, &self.config.paths.destination).await
    }

    fn link_failed(&self, release: &Release, backend: BackendKind, e: &Error) -> LinkOutcome {
        let code = e.error_code().to_string();
        warn!(post_id = %release.post_id, %backend, error = %e, "link attempt failed");
        self.emit(Event::LinkFailed {
            post_id: release.post_id.clone(),
            backend,
            code: code.clone(),
        });

        if e.is_partial() {
            return LinkOutcome::Partial { code };
        }
        match e.signal() {
            Signal::RetryLater => {
                if let Some(until) = self.cooldown.active_until() {
                    self.emit(Event::CooldownStarted { until });
                }
                LinkOutcome::RetryLater { code }
            }
            Signal::Ok | Signal::HardFail => LinkOutcome::Failed { code },
        }
    }
}
