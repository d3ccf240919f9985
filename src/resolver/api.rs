use super::{Resolution, Resolver, request_error};
use crate::error::ResolveError;
use crate::types::{BackendKind, Link};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const YANDEX_API: &str = "https://cloud-api.yandex.net";
const PCLOUD_APIS: &[&str] = &["https://api.pcloud.com", "https://eapi.pcloud.com"];
const WETRANSFER_API: &str = "https://wetransfer.com";

fn parse_failure(backend: BackendKind, reason: impl Into<String>) -> ResolveError {
    ResolveError::PageParseFailure {
        backend,
        reason: reason.into(),
    }
}

#[derive(Debug, Deserialize)]
struct YandexDownload {
    href: Option<String>,
    error: Option<String>,
    description: Option<String>,
}

/// Yandex Disk through the public resources API
pub struct YandexResolver {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl YandexResolver {
    /// Resolver against the public API
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self::with_api_base(client, timeout, YANDEX_API)
    }

    /// Resolver against another API host
    pub fn with_api_base(client: reqwest::Client, timeout: Duration, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Resolver for YandexResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let backend = BackendKind::YandexDisk;
        let endpoint = format!(
            "{}/v1/disk/public/resources/download?public_key={}",
            self.api_base,
            urlencoding::encode(link.url.trim())
        );
        debug!(%endpoint, "querying yandex public API");

        let response = self
            .client
            .get(&endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(backend, self.timeout, e))?;
        let status = response.status();
        let body: YandexDownload = response
            .json()
            .await
            .map_err(|e| parse_failure(backend, format!("unreadable API response: {}", e)))?;

        match body.href {
            Some(href) if status.is_success() => {
                info!("yandex disk link resolved through API");
                Ok(Resolution::direct(href))
            }
            _ => Err(parse_failure(
                backend,
                format!(
                    "API returned HTTP {}: {} {}",
                    status.as_u16(),
                    body.error.unwrap_or_default(),
                    body.description.unwrap_or_default()
                )
                .trim()
                .to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PcloudDownload {
    result: i64,
    #[serde(default)]
    hosts: Vec<String>,
    path: Option<String>,
    error: Option<String>,
}

/// pCloud through `getpublinkdownload`, trying the US then the EU API host
pub struct PcloudResolver {
    client: reqwest::Client,
    api_bases: Vec<String>,
    timeout: Duration,
}

impl PcloudResolver {
    /// Resolver against both public API regions
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self::with_api_bases(client, timeout, PCLOUD_APIS)
    }

    /// Resolver against other API hosts, tried in order
    pub fn with_api_bases(client: reqwest::Client, timeout: Duration, api_bases: &[&str]) -> Self {
        Self {
            client,
            api_bases: api_bases
                .iter()
                .map(|b| b.trim_end_matches('/').to_string())
                .collect(),
            timeout,
        }
    }
}

/// The `code` query parameter of a pCloud share link
pub(crate) fn pcloud_code(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl Resolver for PcloudResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let backend = BackendKind::Pcloud;
        let code = pcloud_code(&link.url).ok_or_else(|| ResolveError::InvalidUrl {
            url: link.url.clone(),
            reason: "missing share code".to_string(),
        })?;

        let mut last_error = parse_failure(backend, "no API host answered");
        for base in &self.api_bases {
            let endpoint = format!(
                "{}/getpublinkdownload?code={}",
                base,
                urlencoding::encode(&code)
            );
            let response = match self.client.get(&endpoint).timeout(self.timeout).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = request_error(backend, self.timeout, e);
                    continue;
                }
            };
            let body: PcloudDownload = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = parse_failure(backend, format!("unreadable API response: {}", e));
                    continue;
                }
            };

            match (body.result, body.hosts.first(), body.path) {
                (0, Some(host), Some(path)) => {
                    info!(api = %base, "pcloud link resolved through API");
                    return Ok(Resolution::direct(format!("https://{}{}", host, path)));
                }
                (result, _, _) => {
                    // Shares live in one region; the other answers with an error code.
                    debug!(api = %base, result, "pcloud API declined");
                    last_error = parse_failure(
                        backend,
                        format!(
                            "API result {}: {}",
                            result,
                            body.error.unwrap_or_else(|| "no download host".to_string())
                        ),
                    );
                }
            }
        }
        Err(last_error)
    }
}

#[derive(Debug, Deserialize)]
struct WetransferDownload {
    direct_link: Option<String>,
    message: Option<String>,
}

/// WeTransfer through its download endpoint
pub struct WetransferResolver {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl WetransferResolver {
    /// Resolver against wetransfer.com
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self::with_api_base(client, timeout, WETRANSFER_API)
    }

    /// Resolver against another host
    pub fn with_api_base(client: reqwest::Client, timeout: Duration, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

/// Transfer id, recipient id and security hash from a `/downloads/...` URL
pub(crate) fn wetransfer_parts(url: &str) -> Option<(String, Option<String>, String)> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let start = segments.iter().position(|s| *s == "downloads")?;
    match &segments[start + 1..] {
        [id, hash] => Some((id.to_string(), None, hash.to_string())),
        [id, recipient, hash, ..] => Some((id.to_string(), Some(recipient.to_string()), hash.to_string())),
        _ => None,
    }
}

#[async_trait]
impl Resolver for WetransferResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> Result<Resolution, ResolveError> {
        let backend = BackendKind::Wetransfer;

        // Short we.tl links redirect to the full /downloads/ URL.
        let full_url = if wetransfer_parts(&link.url).is_some() {
            link.url.clone()
        } else {
            let response = self
                .client
                .get(link.url.trim())
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| request_error(backend, self.timeout, e))?;
            response.url().to_string()
        };

        let (transfer_id, recipient_id, security_hash) =
            wetransfer_parts(&full_url).ok_or_else(|| ResolveError::InvalidUrl {
                url: link.url.clone(),
                reason: "not a transfer download URL".to_string(),
            })?;

        let mut payload = serde_json::json!({
            "security_hash": security_hash,
            "intent": "entire_transfer",
        });
        if let Some(recipient) = recipient_id {
            payload["recipient_id"] = serde_json::Value::String(recipient);
        }

        let endpoint = format!("{}/api/v4/transfers/{}/download", self.api_base, transfer_id);
        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(backend, self.timeout, e))?;
        let status = response.status();
        let body: WetransferDownload = response
            .json()
            .await
            .map_err(|e| parse_failure(backend, format!("unreadable API response: {}", e)))?;

        match body.direct_link {
            Some(direct) if status.is_success() => {
                info!(%transfer_id, "wetransfer link resolved through API");
                Ok(Resolution::direct(direct))
            }
            _ => Err(parse_failure(
                backend,
                format!(
                    "API returned HTTP {}: {}",
                    status.as_u16(),
                    body.message.unwrap_or_default()
                ),
            )),
        }
    }
}
