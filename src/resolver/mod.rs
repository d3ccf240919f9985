//! Backend resolvers
//!
//! One strategy per [`BackendKind`], each turning a share link into either a direct
//! URL for the download engine or a file already fetched into the workspace.
//!
//! - [`StaticHtmlResolver`] scrapes share pages through the per-host rule tables in
//!   [`rules`], with an optional headless-browser fallback
//! - [`YandexResolver`], [`PcloudResolver`] and [`WetransferResolver`] call the hosts'
//!   public APIs
//! - [`DriveResolver`] performs the Google Drive confirmation round-trip
//! - [`MegaResolver`] runs the external fetch tool under the shared cooldown
//! - [`DeadResolver`] rejects hosts that no longer exist without touching the network

mod api;
mod browser;
mod gdrive;
mod html;
mod mega;
pub mod rules;

pub use api::{PcloudResolver, WetransferResolver, YandexResolver};
pub use browser::{BrowserFallback, HeadlessBrowser, find_download_target};
pub use gdrive::{DriveResolver, drive_file_id};
pub use html::StaticHtmlResolver;
pub use mega::{MegaResolver, has_key};

use crate::classify::classify;
use crate::config::Config;
use crate::cooldown::Cooldown;
use crate::error::ResolveError;
use crate::tools::ExternalTools;
use crate::types::{BackendKind, Link};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a resolver produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A URL the download engine can stream
    Direct {
        /// Direct file URL
        url: String,
        /// Page the URL was found on, sent as Referer
        referer: Option<String>,
    },
    /// The resolver fetched the file itself
    Local(PathBuf),
}

impl Resolution {
    /// Direct URL without a referer
    pub fn direct(url: impl Into<String>) -> Self {
        Resolution::Direct {
            url: url.into(),
            referer: None,
        }
    }
}

/// Resolution strategy for one backend kind
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `link`; `workdir` receives files for resolvers that fetch directly
    async fn resolve(&self, link: &Link, workdir: &Path) -> Result<Resolution, ResolveError>;
}

/// Direct links need no resolution beyond a syntax check
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectResolver;

#[async_trait]
impl Resolver for DirectResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let url = url::Url::parse(link.url.trim()).map_err(|e| ResolveError::InvalidUrl {
            url: link.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolveError::InvalidUrl {
                url: link.url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        Ok(Resolution::direct(url.to_string()))
    }
}

/// Hosts that shut down; fails without any network call
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadResolver;

#[async_trait]
impl Resolver for DeadResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        Err(ResolveError::UnsupportedBackend {
            backend: BackendKind::Dead,
            url: link.url.clone(),
        })
    }
}

/// Resolver lookup by backend kind
#[derive(Clone, Default)]
pub struct ResolverSet {
    resolvers: HashMap<BackendKind, Arc<dyn Resolver>>,
}

impl ResolverSet {
    /// No resolvers; every link resolves to `UnsupportedBackend`
    pub fn empty() -> Self {
        Self::default()
    }

    /// The full production set
    pub fn standard(
        client: reqwest::Client,
        config: &Config,
        cooldown: Arc<Cooldown>,
        tools: Arc<dyn ExternalTools>,
        browser: Option<Arc<dyn BrowserFallback>>,
    ) -> Self {
        let page_timeout = config.download.page_timeout;
        let mut set = Self::empty()
            .with(BackendKind::Direct, Arc::new(DirectResolver))
            .with(BackendKind::Dead, Arc::new(DeadResolver))
            .with(
                BackendKind::GoogleDrive,
                Arc::new(DriveResolver::new(client.clone(), page_timeout)),
            )
            .with(
                BackendKind::YandexDisk,
                Arc::new(YandexResolver::new(client.clone(), page_timeout)),
            )
            .with(
                BackendKind::Pcloud,
                Arc::new(PcloudResolver::new(client.clone(), page_timeout)),
            )
            .with(
                BackendKind::Wetransfer,
                Arc::new(WetransferResolver::new(client.clone(), page_timeout)),
            )
            .with(
                BackendKind::Mega,
                Arc::new(MegaResolver::new(tools, cooldown, config.mega.timeout)),
            );

        for kind in [
            BackendKind::Mediafire,
            BackendKind::Workupload,
            BackendKind::Krakenfiles,
            BackendKind::Icedrive,
            BackendKind::Mailru,
            BackendKind::VkDoc,
        ] {
            set = set.with(
                kind,
                Arc::new(StaticHtmlResolver::new(
                    kind,
                    client.clone(),
                    page_timeout,
                    browser.clone(),
                )),
            );
        }
        set
    }

    /// Register (or replace) the resolver for `kind`
    pub fn with(mut self, kind: BackendKind, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.insert(kind, resolver);
        self
    }

    /// Resolver registered for `kind`
    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.get(&kind)
    }

    /// Classify `link` and run the matching resolver
    pub async fn resolve(&self, link: &Link, workdir: &Path) -> Result<Resolution, ResolveError> {
        let kind = classify(&link.url);
        match self.get(kind) {
            Some(resolver) => resolver.resolve(link, workdir).await,
            None => Err(ResolveError::UnsupportedBackend {
                backend: kind,
                url: link.url.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for ResolverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.resolvers.keys().map(BackendKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ResolverSet").field("kinds", &kinds).finish()
    }
}

/// Map a reqwest failure onto the resolver taxonomy
pub(crate) fn request_error(
    backend: BackendKind,
    after: std::time::Duration,
    e: reqwest::Error,
) -> ResolveError {
    if e.is_timeout() {
        ResolveError::Timeout { backend, after }
    } else {
        ResolveError::Request {
            backend,
            reason: e.to_string(),
        }
    }
}

/// Whether a response carries an HTML page rather than a file
pub(crate) fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}
