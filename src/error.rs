//! Error types for release-dl
//!
//! The top-level [`Error`] wraps three domain enums that follow the pipeline:
//! - [`ResolveError`] - turning a share link into something fetchable
//! - [`DownloadError`] - streaming the resolved URL to disk
//! - [`PostProcessError`] - signature checks, extraction and organization
//!
//! Each error maps to a stable machine-readable code (written into the failure
//! ledger) and to the link-level [`Signal`] the release processor acts on.

use crate::types::{BackendKind, Signal};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for release-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for release-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "destination")
        key: Option<String>,
    },

    /// Share link resolution failed
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Post-processing error (inspect, extract, organize)
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// A ledger or queue file could not be parsed
    #[error("malformed ledger {path} at line {line}: {reason}")]
    Ledger {
        /// Ledger file
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What was wrong with the line
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (unrar, 7z, megadl, browser)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unknown format, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A repeated termination request abandoned the release in flight
    #[error("run interrupted; release {post_id} was abandoned mid-flight")]
    Interrupted {
        /// Post id of the abandoned release, empty when none had started
        post_id: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while resolving a share link into a direct URL or local file
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The link is malformed or lacks a required part (key, file id, ...)
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// What is missing or wrong
        reason: String,
    },

    /// No resolver exists for this backend, or the host is gone
    #[error("unsupported backend {backend} for {url}")]
    UnsupportedBackend {
        /// Backend the URL was classified as
        backend: BackendKind,
        /// Offending URL
        url: String,
    },

    /// The share page or API response did not yield a direct URL
    #[error("{backend}: no direct link found ({reason})")]
    PageParseFailure {
        /// Backend being resolved
        backend: BackendKind,
        /// Why nothing was extracted
        reason: String,
    },

    /// Google Drive kept answering with its large-file interstitial
    #[error("google drive confirmation unresolved for file {file_id}")]
    ConfirmationRequired {
        /// Drive file id
        file_id: String,
    },

    /// The host reported a bandwidth or transfer quota condition
    #[error("{backend}: quota exceeded ({message})")]
    QuotaExceeded {
        /// Throttling backend
        backend: BackendKind,
        /// Cooldown deadline that was set in response
        until: Option<DateTime<Utc>>,
        /// Host message
        message: String,
    },

    /// The attempt exceeded its time bound
    #[error("{backend}: timed out after {after:?}")]
    Timeout {
        /// Backend being resolved
        backend: BackendKind,
        /// Bound that was exceeded
        after: Duration,
    },

    /// HTTP request to the host failed
    #[error("{backend}: request failed: {reason}")]
    Request {
        /// Backend being resolved
        backend: BackendKind,
        /// Underlying failure
        reason: String,
    },

    /// An external fetch tool failed for a reason other than throttling
    #[error("{backend}: tool failed: {reason}")]
    Tool {
        /// Backend being resolved
        backend: BackendKind,
        /// First line of the tool's error output
        reason: String,
    },
}

impl ResolveError {
    /// Link-level signal for this failure
    ///
    /// Quota conditions defer the link. Timeouts defer only for Mega, where they are
    /// taken as host-wide throttling; for every other host they are hard failures.
    pub fn signal(&self) -> Signal {
        match self {
            ResolveError::QuotaExceeded { .. } => Signal::RetryLater,
            ResolveError::Timeout {
                backend: BackendKind::Mega,
                ..
            } => Signal::RetryLater,
            _ => Signal::HardFail,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::InvalidUrl { .. } => "invalid_url",
            ResolveError::UnsupportedBackend { .. } => "unsupported_backend",
            ResolveError::PageParseFailure { .. } => "page_parse_failure",
            ResolveError::ConfirmationRequired { .. } => "confirmation_required",
            ResolveError::QuotaExceeded { .. } => "quota_exceeded",
            ResolveError::Timeout { .. } => "timeout",
            ResolveError::Request { .. } => "request_failed",
            ResolveError::Tool { .. } => "tool_failed",
        }
    }
}

/// Download engine errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code
        status: u16,
    },

    /// The response is an HTML page, not a file
    #[error("{url} returned {content_type} instead of a file")]
    NotAFile {
        /// Requested URL
        url: String,
        /// Reported content type
        content_type: String,
    },

    /// The completed file is too small to be real content
    #[error("{path} is only {size} bytes (minimum {min})")]
    TooSmall {
        /// Discarded file
        path: PathBuf,
        /// Received bytes
        size: u64,
        /// Minimum accepted size
        min: u64,
    },

    /// The stream broke off mid-transfer
    #[error("partial download of {url} after {received} bytes: {reason}")]
    Partial {
        /// Requested URL
        url: String,
        /// Bytes written before the failure
        received: u64,
        /// Underlying failure
        reason: String,
    },

    /// The request could not be sent or answered
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// The response body could not be written to disk
    #[error("failed to write {path}: {reason}")]
    Write {
        /// Destination file
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

impl DownloadError {
    /// Whether this is a mid-transfer failure worth retrying on the same URL
    pub fn is_partial(&self) -> bool {
        matches!(self, DownloadError::Partial { .. })
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::NotAFile { .. } => "not_a_file",
            DownloadError::TooSmall { .. } => "too_small",
            DownloadError::Partial { .. } => "partial_download",
            DownloadError::Request { .. } => "request_failed",
            DownloadError::Write { .. } => "write_failed",
        }
    }
}

/// Post-processing errors (signature checks, extraction, organization)
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// The extension claims an archive format the signature bytes do not confirm
    #[error("{path} claims .{claimed} but its signature says {actual}")]
    SignatureMismatch {
        /// Inspected file
        path: PathBuf,
        /// Extension found on the file
        claimed: String,
        /// What the signature bytes indicate
        actual: String,
    },

    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// The payload contains no audio file
    #[error("no audio files found under {path}")]
    NoAudioFound {
        /// Directory that was searched
        path: PathBuf,
    },

    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path being moved
        source_path: PathBuf,
        /// The destination path
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// No free destination name could be found
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The path where the collision occurred
        path: PathBuf,
        /// The reason for the collision
        reason: String,
    },

    /// Invalid path encountered during post-processing
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

impl PostProcessError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            PostProcessError::SignatureMismatch { .. } => "signature_mismatch",
            PostProcessError::ExtractionFailed { .. } => "extraction_failed",
            PostProcessError::NoAudioFound { .. } => "no_audio_found",
            PostProcessError::MoveFailed { .. } => "move_failed",
            PostProcessError::FileCollision { .. } => "file_collision",
            PostProcessError::InvalidPath { .. } => "invalid_path",
        }
    }
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Resolve(e) => e.code(),
            Error::Download(e) => e.code(),
            Error::PostProcess(e) => e.code(),
            Error::Ledger { .. } => "ledger_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Interrupted { .. } => "interrupted",
            Error::Other(_) => "internal_error",
        }
    }

    /// Link-level signal for this error
    pub fn signal(&self) -> Signal {
        match self {
            Error::Resolve(e) => e.signal(),
            _ => Signal::HardFail,
        }
    }

    /// Whether this error is a mid-transfer download failure
    pub fn is_partial(&self) -> bool {
        matches!(self, Error::Download(e) if e.is_partial())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_and_mega_timeout_defer() {
        let quota = ResolveError::QuotaExceeded {
            backend: BackendKind::Mega,
            until: None,
            message: "bandwidth limit".into(),
        };
        assert_eq!(quota.signal(), Signal::RetryLater);

        let mega_timeout = ResolveError::Timeout {
            backend: BackendKind::Mega,
            after: Duration::from_secs(1800),
        };
        assert_eq!(mega_timeout.signal(), Signal::RetryLater);
    }

    #[test]
    fn timeouts_on_other_hosts_are_hard_failures() {
        let timeout = ResolveError::Timeout {
            backend: BackendKind::Mediafire,
            after: Duration::from_secs(30),
        };
        assert_eq!(timeout.signal(), Signal::HardFail);
        assert_eq!(Error::from(timeout).signal(), Signal::HardFail);
    }

    #[test]
    fn error_codes_follow_nested_variants() {
        let cases: Vec<(Error, &str)> = vec![
            (
                ResolveError::ConfirmationRequired {
                    file_id: "abc".into(),
                }
                .into(),
                "confirmation_required",
            ),
            (
                DownloadError::Partial {
                    url: "u".into(),
                    received: 10,
                    reason: "reset".into(),
                }
                .into(),
                "partial_download",
            ),
            (
                PostProcessError::NoAudioFound {
                    path: PathBuf::from("/tmp/x"),
                }
                .into(),
                "no_audio_found",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                "io_error",
            ),
            (Error::NotSupported("tar.xz".into()), "not_supported"),
            (
                Error::Interrupted {
                    post_id: "40".into(),
                },
                "interrupted",
            ),
        ];

        for (error, code) in cases {
            assert_eq!(error.error_code(), code, "error: {error}");
        }
    }

    #[test]
    fn only_partial_download_is_partial() {
        let partial: Error = DownloadError::Partial {
            url: "u".into(),
            received: 0,
            reason: "eof".into(),
        }
        .into();
        let html: Error = DownloadError::NotAFile {
            url: "u".into(),
            content_type: "text/html".into(),
        }
        .into();

        assert!(partial.is_partial());
        assert!(!html.is_partial());
    }
}
