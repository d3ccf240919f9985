use super::rules::compile;
use super::{Resolution, Resolver, is_html, request_error};
use crate::error::ResolveError;
use crate::types::{BackendKind, Link};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const DRIVE_BASE: &str = "https://drive.google.com";

/// Confirmation round-trips before giving up on the large-file interstitial
const MAX_CONFIRM_ROUNDS: usize = 3;

static FILE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"/file/d/([A-Za-z0-9_-]+)", r"[?&]id=([A-Za-z0-9_-]+)"]
        .iter()
        .filter_map(|p| compile(p))
        .collect()
});

static CONFIRM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"name="confirm"\s+value="([^"]+)""#,
        r"confirm=([0-9A-Za-z_-]+)",
    ]
    .iter()
    .filter_map(|p| compile(p))
    .collect()
});

static UUID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"name="uuid"\s+value="([^"]+)""#));

static FORM_ACTION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"<form[^>]*id="download-form"[^>]*action="([^"]+)""#));

/// File id of a Drive share URL
///
/// Accepts `/file/d/{id}/...`, `open?id={id}` and `uc?id={id}` forms; folders are
/// rejected because they cannot be fetched as one file.
pub fn drive_file_id(url: &str) -> Result<String, ResolveError> {
    if url.contains("/drive/folders/") || url.contains("/folderview") {
        return Err(ResolveError::UnsupportedBackend {
            backend: BackendKind::GoogleDrive,
            url: url.to_string(),
        });
    }
    FILE_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ResolveError::InvalidUrl {
            url: url.to_string(),
            reason: "no drive file id".to_string(),
        })
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Interstitial {
    confirm: Option<String>,
    uuid: Option<String>,
    action: Option<String>,
}

fn read_interstitial(body: &str, cookies: &[String]) -> Interstitial {
    let capture = |re: &Regex| re.captures(body).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());

    let confirm = CONFIRM_PATTERNS
        .iter()
        .find_map(capture)
        .or_else(|| cookies.iter().find_map(|c| warning_cookie(c)));

    Interstitial {
        confirm,
        uuid: UUID_PATTERN.as_ref().and_then(capture),
        action: FORM_ACTION_PATTERN
            .as_ref()
            .and_then(capture)
            .map(|a| super::rules::unescape(&a)),
    }
}

// `download_warning_<suffix>=<token>; Path=/...`
fn warning_cookie(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.starts_with("download_warning") && !value.is_empty()).then(|| value.to_string())
}

/// Google Drive with the large-file confirmation round-trip
pub struct DriveResolver {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl DriveResolver {
    /// Resolver against drive.google.com
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self::with_base(client, timeout, DRIVE_BASE)
    }

    /// Resolver against another host
    pub fn with_base(client: reqwest::Client, timeout: Duration, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Resolver for DriveResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let backend = BackendKind::GoogleDrive;
        let file_id = drive_file_id(&link.url)?;

        let mut endpoint = format!("{}/uc", self.base);
        let mut interstitial = Interstitial::default();

        for round in 0..=MAX_CONFIRM_ROUNDS {
            let mut query: Vec<(&str, &str)> = vec![("export", "download"), ("id", file_id.as_str())];
            if let Some(confirm) = &interstitial.confirm {
                query.push(("confirm", confirm.as_str()));
            }
            if let Some(uuid) = &interstitial.uuid {
                query.push(("uuid", uuid.as_str()));
            }

            debug!(%endpoint, round, "requesting drive export");
            let response = self
                .client
                .get(&endpoint)
                .query(&query)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| request_error(backend, self.timeout, e))?;

            if !response.status().is_success() {
                return Err(ResolveError::PageParseFailure {
                    backend,
                    reason: format!("export returned HTTP {}", response.status().as_u16()),
                });
            }

            if !is_html(&response) {
                info!(%file_id, rounds = round, "drive export resolved");
                return Ok(Resolution::direct(response.url().to_string()));
            }

            let cookies: Vec<String> = response
                .headers()
                .get_all(reqwest::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect();
            let body = response
                .text()
                .await
                .map_err(|e| request_error(backend, self.timeout, e))?;

            let next = read_interstitial(&body, &cookies);
            if next.confirm.is_none() {
                warn!(%file_id, "drive interstitial without confirmation token");
                break;
            }
            if let Some(action) = &next.action
                && action.starts_with("http")
            {
                endpoint = action.clone();
            }
            interstitial = next;
        }

        Err(ResolveError::ConfirmationRequired { file_id })
    }
}
