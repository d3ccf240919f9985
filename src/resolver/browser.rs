use super::rules::{absolute_url, apply_rules, rules_for};
use crate::config::ToolsConfig;
use crate::error::ResolveError;
use crate::types::BackendKind;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    EventDownloadWillBegin, SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use scraper::{Html, Selector};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Last-resort resolution by rendering a share page
#[async_trait]
pub trait BrowserFallback: Send + Sync {
    /// Render `page_url` and return the download URL it leads to
    async fn find_download(&self, page_url: &str, kind: BackendKind) -> Result<String, ResolveError>;
}

/// Elements that hosts label as their download control, most specific first
const DOWNLOAD_SELECTORS: &[&str] = &[
    "a#downloadButton",
    "a[download]",
    "a[aria-label*=\"Download\"]",
    "a[aria-label*=\"download\"]",
    "a[id*=\"download\"]",
    "a[class*=\"download\"]",
    "a[href*=\"/download\"]",
    "button[id*=\"download\"]",
    "button[class*=\"download\"]",
    "form[id*=\"download\"]",
];

/// How long a navigation may take to turn into a download on its own
const NAVIGATION_GRACE: Duration = Duration::from_secs(3);
/// How long a click may take to start a download
const CLICK_GRACE: Duration = Duration::from_secs(5);

/// Chromium-compatible browser driven headlessly over the DevTools protocol
///
/// Downloads are captured as events instead of being written out: a page that
/// starts one (on load or after a click on a download element) resolves to the
/// download's URL. Otherwise the rendered DOM is searched. Runs one page at a time;
/// the browser process is torn down when the navigation bound is exceeded.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    binary: PathBuf,
    timeout: Duration,
    user_agent: String,
}

impl HeadlessBrowser {
    /// Browser from the configured path, or the first Chromium found on PATH
    pub fn from_config(tools: &ToolsConfig, user_agent: &str) -> Option<Self> {
        let binary = match &tools.browser_path {
            Some(path) => Some(path.clone()),
            None if tools.search_path => [
                "chromium",
                "chromium-browser",
                "google-chrome",
                "google-chrome-stable",
            ]
            .iter()
            .find_map(|name| which::which(name).ok()),
            None => None,
        }?;

        Some(Self {
            binary,
            timeout: tools.browser_timeout,
            user_agent: user_agent.to_string(),
        })
    }

    async fn launch(&self, kind: BackendKind) -> Result<(Browser, tokio::task::JoinHandle<()>), ResolveError> {
        let config = BrowserConfig::builder()
            .chrome_executable(&self.binary)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.user_agent))
            .request_timeout(self.timeout)
            .build()
            .map_err(|e| tool_error(kind, "invalid browser configuration", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| tool_error(kind, "failed to launch browser", e))?;
        let pump = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok((browser, pump))
    }

    async fn drive(
        &self,
        browser: &Browser,
        page_url: &str,
        kind: BackendKind,
        download_dir: &Path,
    ) -> Result<String, ResolveError> {
        let base = url::Url::parse(page_url).map_err(|e| ResolveError::InvalidUrl {
            url: page_url.to_string(),
            reason: e.to_string(),
        })?;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(download_dir.to_string_lossy())
            .events_enabled(true)
            .build()
            .map_err(|e| tool_error(kind, "invalid download behavior", e))?;
        browser
            .execute(behavior)
            .await
            .map_err(|e| tool_error(kind, "failed to capture downloads", e))?;
        let mut downloads = browser
            .event_listener::<EventDownloadWillBegin>()
            .await
            .map_err(|e| tool_error(kind, "failed to listen for downloads", e))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| tool_error(kind, "failed to open page", e))?;

        // Navigating straight into a file aborts the navigation but still starts a download
        if let Err(e) = page.goto(page_url).await {
            debug!(url = page_url, error = %e, "navigation did not complete");
        }
        if let Some(url) = next_download(&mut downloads, NAVIGATION_GRACE).await {
            info!(backend = %kind, url = %url, "page started a download");
            return Ok(url);
        }

        let dom = page
            .content()
            .await
            .map_err(|e| tool_error(kind, "failed to read rendered page", e))?;
        if let Some(url) = find_download_target(&dom, kind, &base) {
            return Ok(url);
        }

        for selector in DOWNLOAD_SELECTORS {
            let Ok(element) = page.find_element(*selector).await else {
                continue;
            };
            debug!(selector, "clicking download element");
            if let Err(e) = element.click().await {
                debug!(selector, error = %e, "click failed");
                continue;
            }
            if let Some(url) = next_download(&mut downloads, CLICK_GRACE).await {
                info!(backend = %kind, selector, url = %url, "click started a download");
                return Ok(url);
            }
            // The click may have revealed the link instead
            if let Ok(dom) = page.content().await
                && let Some(url) = find_download_target(&dom, kind, &base)
            {
                return Ok(url);
            }
        }

        Err(ResolveError::PageParseFailure {
            backend: kind,
            reason: "rendered page has no download target".to_string(),
        })
    }
}

#[async_trait]
impl BrowserFallback for HeadlessBrowser {
    async fn find_download(&self, page_url: &str, kind: BackendKind) -> Result<String, ResolveError> {
        info!(backend = %kind, url = page_url, "rendering share page headlessly");

        let download_dir = tempfile::tempdir()
            .map_err(|e| tool_error(kind, "failed to create download directory", e))?;

        let outcome = tokio::time::timeout(self.timeout, async {
            let (mut browser, pump) = self.launch(kind).await?;
            let result = self.drive(&browser, page_url, kind, download_dir.path()).await;
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser did not close cleanly");
            }
            let _ = browser.wait().await;
            pump.abort();
            result
        })
        .await;

        outcome.map_err(|_| ResolveError::Timeout {
            backend: kind,
            after: self.timeout,
        })?
    }
}

/// Wait up to `wait` for a download that the HTTP engine can fetch
async fn next_download(
    downloads: &mut EventStream<EventDownloadWillBegin>,
    wait: Duration,
) -> Option<String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let event = tokio::time::timeout_at(deadline, downloads.next()).await.ok()??;
        match fetchable_download(&event.url) {
            Some(url) => return Some(url),
            None => debug!(url = %event.url, "ignoring download without a fetchable URL"),
        }
    }
}

/// Downloads started from `blob:` or `data:` URLs exist only inside the page
fn fetchable_download(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn tool_error(kind: BackendKind, context: &str, e: impl Display) -> ResolveError {
    ResolveError::Tool {
        backend: kind,
        reason: format!("{}: {}", context, e),
    }
}

/// Search a rendered DOM for the download URL
///
/// The host's rule table is tried first; then the download-labelled elements.
pub fn find_download_target(dom: &str, kind: BackendKind, page_url: &url::Url) -> Option<String> {
    if let Some(found) = apply_rules(rules_for(kind), dom, page_url) {
        return Some(found.url);
    }

    let document = Html::parse_document(dom);
    for raw in DOWNLOAD_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            let target = element
                .value()
                .attr("href")
                .or_else(|| element.value().attr("action"));
            if let Some(url) = target.and_then(|t| absolute_url(t, page_url)) {
                debug!(selector = raw, url = %url, "download element found");
                return Some(url);
            }
        }
    }
    None
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> url::Url {
        url::Url::parse("https://icedrive.net/s/AbCd").unwrap()
    }

    #[test]
    fn every_selector_parses() {
        for raw in DOWNLOAD_SELECTORS {
            assert!(Selector::parse(raw).is_ok(), "selector {raw}");
        }
    }

    #[test]
    fn finds_labelled_download_element() {
        let dom = r##"<html><body>
            <a href="#" class="nav">Home</a>
            <a class="btn btn-download" href="/dl/file?id=7">Download</a>
        </body></html>"##;

        assert_eq!(
            find_download_target(dom, BackendKind::Icedrive, &page()).as_deref(),
            Some("https://icedrive.net/dl/file?id=7")
        );
    }

    #[test]
    fn rule_table_wins_over_selectors() {
        let dom = r#"<script>var cfg = {"download_url":"https:\/\/cdn.icedrive.io\/f\/1"};</script>
            <a download href="/other">x</a>"#;

        assert_eq!(
            find_download_target(dom, BackendKind::Icedrive, &page()).as_deref(),
            Some("https://cdn.icedrive.io/f/1")
        );
    }

    #[test]
    fn nothing_clickable_yields_none() {
        let dom = "<html><body><a href=\"#\">Login</a></body></html>";
        assert!(find_download_target(dom, BackendKind::Icedrive, &page()).is_none());
    }

    #[test]
    fn only_http_downloads_are_fetchable() {
        assert_eq!(
            fetchable_download("https://cdn.icedrive.io/f/1?token=x").as_deref(),
            Some("https://cdn.icedrive.io/f/1?token=x")
        );
        assert_eq!(
            fetchable_download("http://files.example.org/a.zip").as_deref(),
            Some("http://files.example.org/a.zip")
        );
        assert!(fetchable_download("blob:https://icedrive.net/7f3c").is_none());
        assert!(fetchable_download("data:application/zip;base64,UEsDBA==").is_none());
        assert!(fetchable_download("not a url").is_none());
    }

    #[test]
    fn button_elements_are_clickable_targets() {
        let dom = r#"<html><body><button id="download-btn">Download</button></body></html>"#;
        let document = Html::parse_document(dom);
        let matched = DOWNLOAD_SELECTORS
            .iter()
            .filter(|raw| document.select(&Selector::parse(raw).unwrap()).next().is_some())
            .count();
        assert_eq!(matched, 1);
        // Nothing to read without clicking
        assert!(find_download_target(dom, BackendKind::Icedrive, &page()).is_none());
    }

    #[tokio::test]
    async fn missing_browser_binary_is_a_tool_error() {
        let tools = ToolsConfig {
            browser_path: Some(PathBuf::from("/nonexistent/chromium-for-tests")),
            browser_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let browser = HeadlessBrowser::from_config(&tools, "ua").unwrap();

        let err = browser
            .find_download("https://icedrive.net/s/AbCd", BackendKind::Icedrive)
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Tool { backend: BackendKind::Icedrive, .. }));
    }

    #[test]
    fn unconfigured_browser_is_absent() {
        let tools = ToolsConfig {
            search_path: false,
            ..Default::default()
        };
        assert!(HeadlessBrowser::from_config(&tools, "ua").is_none());
    }
}
