//! Download engine
//!
//! Streams a resolved URL into the attempt workspace. A transfer that breaks off is
//! reported as [`DownloadError::Partial`] and its file removed, so a retry always
//! starts from zero; HTML answers and implausibly small files are rejected outright.

use crate::config::DownloadConfig;
use crate::error::{DownloadError, Error, Result};
use crate::resolver::rules::compile;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Capability interface over the download engine
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` into `dest_dir` and return the written file
    async fn fetch(&self, url: &str, dest_dir: &Path, referer: Option<&str>) -> Result<PathBuf>;
}

/// Build the HTTP client shared by resolvers and the download engine
pub fn build_client(config: &DownloadConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(Error::Network)
}

/// reqwest-backed streaming downloader
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
    min_file_size: u64,
}

impl HttpFetcher {
    /// Fetcher with the configured stall bound and minimum size
    pub fn new(client: reqwest::Client, config: &DownloadConfig) -> Self {
        Self {
            client,
            read_timeout: config.read_timeout,
            min_file_size: config.min_file_size,
        }
    }

    async fn stream_to(
        &self,
        url: &str,
        mut response: reqwest::Response,
        path: &Path,
    ) -> std::result::Result<u64, DownloadError> {
        let write_err = |e: std::io::Error| DownloadError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
        let mut received: u64 = 0;

        loop {
            let chunk = match tokio::time::timeout(self.read_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    return Err(DownloadError::Partial {
                        url: url.to_string(),
                        received,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(DownloadError::Partial {
                        url: url.to_string(),
                        received,
                        reason: format!("no data for {:?}", self.read_timeout),
                    });
                }
            };
            file.write_all(&chunk).await.map_err(write_err)?;
            received += chunk.len() as u64;
        }

        file.flush().await.map_err(write_err)?;
        Ok(received)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path, referer: Option<&str>) -> Result<PathBuf> {
        debug!(url, ?dest_dir, "starting download");

        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }
        let response = request.send().await.map_err(|e| DownloadError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.contains("text/html") {
            return Err(DownloadError::NotAFile {
                url: url.to_string(),
                content_type,
            }
            .into());
        }

        let filename = derive_filename(
            header_str(&response, reqwest::header::CONTENT_DISPOSITION).as_deref(),
            response.url(),
            &content_type,
        );
        let expected = response.content_length();

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(&filename);

        let received = match self.stream_to(url, response, &path).await {
            Ok(received) => received,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                warn!(url, error = %e, "download interrupted");
                return Err(e.into());
            }
        };

        if let Some(expected) = expected
            && received < expected
        {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(DownloadError::Partial {
                url: url.to_string(),
                received,
                reason: format!("stream ended at {} of {} bytes", received, expected),
            }
            .into());
        }

        if received < self.min_file_size {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(DownloadError::TooSmall {
                path,
                size: received,
                min: self.min_file_size,
            }
            .into());
        }

        info!(url, ?path, bytes = received, "download complete");
        Ok(path)
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

static DISPOSITION_EXTENDED: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"(?i)filename\*\s*=\s*(?:[\w-]+)?'[^']*'([^;]+)"#));
static DISPOSITION_PLAIN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"(?i)filename\s*=\s*(?:"([^"]+)"|([^;]+))"#));

/// File name from a `Content-Disposition` value (RFC 5987 form preferred)
pub fn filename_from_disposition(disposition: &str) -> Option<String> {
    if let Some(caps) = DISPOSITION_EXTENDED.as_ref().and_then(|re| re.captures(disposition))
        && let Some(raw) = caps.get(1)
        && let Ok(decoded) = urlencoding::decode(raw.as_str().trim().trim_matches('"'))
    {
        return Some(decoded.into_owned());
    }

    let caps = DISPOSITION_PLAIN.as_ref()?.captures(disposition)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    let decoded = urlencoding::decode(raw).map(|d| d.into_owned()).unwrap_or_else(|_| raw.to_string());
    (!decoded.is_empty()).then_some(decoded)
}

/// Extension implied by a content type
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim();
    Some(match mime {
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/x-rar-compressed" | "application/vnd.rar" | "application/x-rar" => "rar",
        "application/x-7z-compressed" => "7z",
        "application/x-tar" => "tar",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/x-bzip2" => "bz2",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/aac" => "aac",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/x-ms-wma" => "wma",
        _ => return None,
    })
}

fn has_known_extension(name: &str) -> bool {
    crate::inspect::current_extension(Path::new(name)).is_some_and(|ext| {
        crate::inspect::claims_archive(&ext) || crate::organize::AUDIO_EXTENSIONS.contains(&ext.as_str())
    })
}

/// Name for a downloaded file
///
/// Content-Disposition first, then the last URL path segment, then `download`. An
/// extension implied by the content type is appended when the name has no known one.
pub fn derive_filename(disposition: Option<&str>, url: &url::Url, content_type: &str) -> String {
    let from_url = || {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
    };

    let raw = disposition
        .and_then(filename_from_disposition)
        .or_else(from_url)
        .unwrap_or_else(|| "download".to_string());

    let mut name = crate::organize::sanitize_name(&raw);
    if name.is_empty() {
        name = "download".to_string();
    }

    if !has_known_extension(&name)
        && let Some(ext) = extension_for_content_type(content_type)
    {
        name = format!("{name}.{ext}");
    }
    name
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(min_file_size: u64) -> HttpFetcher {
        let config = DownloadConfig {
            min_file_size,
            read_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        HttpFetcher::new(build_client(&config).unwrap(), &config)
    }

    #[test]
    fn disposition_forms() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="Old Grave - Ashes.zip""#).as_deref(),
            Some("Old Grave - Ashes.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename*=UTF-8''%C3%81lbum%20X.rar").as_deref(),
            Some("Álbum X.rar")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=plain.7z; size=10").as_deref(),
            Some("plain.7z")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn filename_fallbacks() {
        let url = url::Url::parse("https://cdn.example.org/files/Some%20Album.rar?x=1").unwrap();
        assert_eq!(derive_filename(None, &url, "application/octet-stream"), "Some Album.rar");

        let bare = url::Url::parse("https://cdn.example.org/").unwrap();
        assert_eq!(derive_filename(None, &bare, "application/zip"), "download.zip");
        assert_eq!(derive_filename(None, &bare, "application/octet-stream"), "download");

        let odd = url::Url::parse("https://cdn.example.org/get/12345").unwrap();
        assert_eq!(derive_filename(None, &odd, "audio/mpeg"), "12345.mp3");
    }

    #[tokio::test]
    async fn streams_file_to_disk() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/a.zip"))
            .and(header("referer", "https://host.example/page"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/zip"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let path = fetcher(1024)
            .fetch(
                &format!("{}/a.zip", server.uri()),
                dir.path(),
                Some("https://host.example/page"),
            )
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("a.zip"));
        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn html_response_is_not_a_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = fetcher(0)
            .fetch(&format!("{}/x.zip", server.uri()), dir.path(), None)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "not_a_file");
        assert!(!err.is_partial());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn tiny_file_is_discarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 100], "application/zip"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = fetcher(10 * 1024)
            .fetch(&format!("{}/x.zip", server.uri()), dir.path(), None)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "too_small");
        assert!(!dir.path().join("x.zip").exists());
    }

    /// Raw HTTP server that sends the headers and `sent` bytes of body, then waits
    /// for `hold` and drops the connection
    async fn serve_truncated(
        content_length: usize,
        sent: usize,
        hold: Duration,
    ) -> std::net::SocketAddr {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
                content_length
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&vec![9u8; sent]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(hold).await;
        });
        addr
    }

    #[tokio::test]
    async fn connection_closed_mid_body_is_partial() {
        let addr = serve_truncated(100_000, 20_000, Duration::ZERO).await;

        let dir = TempDir::new().unwrap();
        let err = fetcher(0)
            .fetch(&format!("http://{}/a.zip", addr), dir.path(), None)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "partial_download");
        assert!(err.is_partial());
        assert!(!dir.path().join("a.zip").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stalled_body_is_partial() {
        let addr = serve_truncated(100_000, 20_000, Duration::from_secs(10)).await;
        let config = DownloadConfig {
            min_file_size: 0,
            read_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(build_client(&config).unwrap(), &config);

        let dir = TempDir::new().unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/a.zip", addr), dir.path(), None)
            .await
            .unwrap_err();

        assert!(err.is_partial());
        assert!(matches!(
            err,
            Error::Download(DownloadError::Partial { received: 20_000, .. })
        ));
        assert!(!dir.path().join("a.zip").exists());
    }

    #[tokio::test]
    async fn http_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let err = fetcher(0)
            .fetch(&format!("{}/x.zip", server.uri()), dir.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Download(DownloadError::HttpStatus { status: 403, .. })
        ));
    }
}
