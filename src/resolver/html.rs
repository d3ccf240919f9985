use super::browser::BrowserFallback;
use super::rules::{apply_rules, rules_for};
use super::{Resolution, Resolver, is_html, request_error};
use crate::error::ResolveError;
use crate::types::{BackendKind, Link};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Share-page scraper for hosts whose direct URL is embedded in static HTML
///
/// Runs the host's rule table over the fetched page. When no rule matches and a
/// browser is available, the page is rendered and searched again.
pub struct StaticHtmlResolver {
    kind: BackendKind,
    client: reqwest::Client,
    page_timeout: Duration,
    browser: Option<Arc<dyn BrowserFallback>>,
}

impl StaticHtmlResolver {
    /// Scraper for `kind`
    pub fn new(
        kind: BackendKind,
        client: reqwest::Client,
        page_timeout: Duration,
        browser: Option<Arc<dyn BrowserFallback>>,
    ) -> Self {
        Self {
            kind,
            client,
            page_timeout,
            browser,
        }
    }
}

#[async_trait]
impl Resolver for StaticHtmlResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let page_url = url::Url::parse(link.url.trim()).map_err(|e| ResolveError::InvalidUrl {
            url: link.url.clone(),
            reason: e.to_string(),
        })?;

        debug!(backend = %self.kind, url = %page_url, "fetching share page");
        let response = self
            .client
            .get(page_url.clone())
            .timeout(self.page_timeout)
            .send()
            .await
            .map_err(|e| request_error(self.kind, self.page_timeout, e))?;

        if !response.status().is_success() {
            return Err(ResolveError::PageParseFailure {
                backend: self.kind,
                reason: format!("share page returned HTTP {}", response.status().as_u16()),
            });
        }

        // Some shares redirect straight to the file.
        if !is_html(&response) {
            info!(backend = %self.kind, url = %response.url(), "share link served the file directly");
            return Ok(Resolution::direct(response.url().to_string()));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(self.kind, self.page_timeout, e))?;

        if let Some(found) = apply_rules(rules_for(self.kind), &body, &final_url) {
            info!(backend = %self.kind, rule = found.rule, "direct link extracted from share page");
            return Ok(Resolution::Direct {
                url: found.url,
                referer: Some(final_url.to_string()),
            });
        }

        let Some(browser) = &self.browser else {
            return Err(ResolveError::PageParseFailure {
                backend: self.kind,
                reason: "no extraction rule matched".to_string(),
            });
        };

        warn!(backend = %self.kind, url = %final_url, "no rule matched static page, rendering in browser");
        let url = browser.find_download(final_url.as_str(), self.kind).await?;
        Ok(Resolution::Direct {
            url,
            referer: Some(final_url.to_string()),
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingBrowser {
        calls: AtomicUsize,
        answer: Option<String>,
    }

    #[async_trait]
    impl BrowserFallback for CountingBrowser {
        async fn find_download(
            &self,
            _page_url: &str,
            kind: BackendKind,
        ) -> Result<String, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().ok_or(ResolveError::PageParseFailure {
                backend: kind,
                reason: "nothing clickable".into(),
            })
        }
    }

    fn resolver(browser: Option<Arc<dyn BrowserFallback>>) -> StaticHtmlResolver {
        StaticHtmlResolver::new(
            BackendKind::Mediafire,
            reqwest::Client::new(),
            Duration::from_secs(5),
            browser,
        )
    }

    #[tokio::test]
    async fn extracts_link_from_share_page() {
        let server = MockServer::start().await;
        let html = r#"<html><a aria-label="Download file" href="/files/Album.zip">Download</a></html>"#;
        Mock::given(method("GET"))
            .and(path("/file/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"))
            .mount(&server)
            .await;

        let link = Link::new(format!("{}/file/abc", server.uri()));
        let resolution = resolver(None).resolve(&link, Path::new("/tmp")).await.unwrap();

        assert_eq!(
            resolution,
            Resolution::Direct {
                url: format!("{}/files/Album.zip", server.uri()),
                referer: Some(format!("{}/file/abc", server.uri())),
            }
        );
    }

    #[tokio::test]
    async fn unmatched_page_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>file removed</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let link = Link::new(format!("{}/file/gone", server.uri()));
        let err = resolver(None).resolve(&link, Path::new("/tmp")).await.unwrap_err();

        assert_eq!(err.code(), "page_parse_failure");
    }

    #[tokio::test]
    async fn browser_fallback_runs_only_after_rules_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>js app</html>", "text/html"))
            .mount(&server)
            .await;

        let browser = Arc::new(CountingBrowser {
            calls: AtomicUsize::new(0),
            answer: Some("https://cdn.example.org/rendered.zip".into()),
        });
        let link = Link::new(format!("{}/file/js", server.uri()));
        let resolution = resolver(Some(browser.clone()))
            .resolve(&link, Path::new("/tmp"))
            .await
            .unwrap();

        assert_eq!(browser.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(resolution, Resolution::Direct { url, .. } if url.ends_with("rendered.zip")));
    }

    #[tokio::test]
    async fn non_html_response_is_the_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![b'P', b'K', 3, 4], "application/zip"),
            )
            .mount(&server)
            .await;

        let link = Link::new(format!("{}/file/raw", server.uri()));
        let resolution = resolver(None).resolve(&link, Path::new("/tmp")).await.unwrap();

        assert_eq!(resolution, Resolution::direct(format!("{}/file/raw", server.uri())));
    }

    #[tokio::test]
    async fn http_error_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let link = Link::new(format!("{}/file/x", server.uri()));
        let err = resolver(None).resolve(&link, Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, ResolveError::PageParseFailure { .. }));
    }
}
