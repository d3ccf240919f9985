//! Shared fakes and fixtures for unit tests.

use crate::download::Fetcher;
use crate::error::{DownloadError, ResolveError, Result};
use crate::resolver::{Resolution, Resolver};
use crate::tools::{ArchiveTool, ExternalTools, ToolFetch};
use crate::types::{Link, Release};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Release with the given identity and no links; `band_id` mirrors the band name.
pub(crate) fn release(post_id: &str, band: &str, album: &str) -> Release {
    Release {
        post_id: post_id.to_string(),
        band: band.to_string(),
        album: album.to_string(),
        year: None,
        release_type: None,
        band_id: band.to_string(),
        download_links: Vec::new(),
        extra: Default::default(),
    }
}

/// Release carrying the given link URLs in order.
pub(crate) fn release_with_links(post_id: &str, band: &str, album: &str, urls: &[&str]) -> Release {
    let mut release = release(post_id, band, album);
    release.download_links = urls.iter().map(|u| Link::new(*u)).collect();
    release
}

/// In-memory ZIP archive holding the given entries (stored, no compression).
pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ::zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Scripted stand-in for the archivers and the Mega fetch tool.
pub(crate) struct FakeTools {
    fetch: ToolFetch,
    fetch_payload: Option<(String, Vec<u8>)>,
    first_fetch: Mutex<Option<ToolFetch>>,
    unpack_ok: bool,
    unpack_output: Option<String>,
    fetch_calls: AtomicUsize,
    unpack_calls: Mutex<Vec<(ArchiveTool, PathBuf, Option<String>)>>,
}

impl FakeTools {
    /// Every fetch returns `fetch`; every unpack reports failure.
    pub(crate) fn fetching(fetch: ToolFetch) -> Self {
        Self {
            fetch,
            fetch_payload: None,
            first_fetch: Mutex::new(None),
            unpack_ok: false,
            unpack_output: None,
            fetch_calls: AtomicUsize::new(0),
            unpack_calls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch writes `name` into the destination and reports it.
    pub(crate) fn fetching_file(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            fetch_payload: Some((name.to_string(), bytes)),
            ..Self::fetching(ToolFetch::Missing)
        }
    }

    /// Every unpack reports `ok`; fetches report a missing tool.
    pub(crate) fn unpacking(ok: bool) -> Self {
        Self {
            unpack_ok: ok,
            ..Self::fetching(ToolFetch::Missing)
        }
    }

    /// Successful unpacks also create `name` in the destination.
    pub(crate) fn with_unpack_output(mut self, name: &str) -> Self {
        self.unpack_output = Some(name.to_string());
        self
    }

    /// The first fetch returns `fetch`; later ones behave as configured.
    pub(crate) fn with_first_fetch(self, fetch: ToolFetch) -> Self {
        *self.first_fetch.lock().unwrap() = Some(fetch);
        self
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn unpack_calls(&self) -> Vec<(ArchiveTool, PathBuf, Option<String>)> {
        self.unpack_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalTools for FakeTools {
    async fn unpack(
        &self,
        format: ArchiveTool,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
    ) -> Result<bool> {
        self.unpack_calls.lock().unwrap().push((
            format,
            archive.to_path_buf(),
            password.map(str::to_string),
        ));
        if self.unpack_ok
            && let Some(name) = &self.unpack_output
        {
            std::fs::create_dir_all(dest)?;
            std::fs::write(dest.join(name), b"unpacked")?;
        }
        Ok(self.unpack_ok)
    }

    async fn fetch_via_tool(&self, _url: &str, dest: &Path, _timeout: Duration) -> ToolFetch {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(first) = self.first_fetch.lock().unwrap().take() {
            return first;
        }
        if let Some((name, bytes)) = &self.fetch_payload {
            std::fs::create_dir_all(dest).unwrap();
            let path = dest.join(name);
            std::fs::write(&path, bytes).unwrap();
            return ToolFetch::Fetched(path);
        }
        self.fetch.clone()
    }
}

type ResolveFn = dyn Fn(&Link) -> std::result::Result<Resolution, ResolveError> + Send + Sync;

/// Resolver answering from a closure and counting calls.
pub(crate) struct FakeResolver {
    answer: Box<ResolveFn>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub(crate) fn new(
        answer: impl Fn(&Link) -> std::result::Result<Resolution, ResolveError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            answer: Box::new(answer),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every link resolves to its own URL.
    pub(crate) fn passthrough() -> Self {
        Self::new(|link| Ok(Resolution::direct(link.url.clone())))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, link: &Link, _workdir: &Path) -> std::result::Result<Resolution, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.answer)(link)
    }
}

type FetchFn = dyn Fn(&str, &Path) -> Result<PathBuf> + Send + Sync;

/// Download engine answering from a closure and counting calls.
pub(crate) struct FakeFetcher {
    answer: Box<FetchFn>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn new(answer: impl Fn(&str, &Path) -> Result<PathBuf> + Send + Sync + 'static) -> Self {
        Self {
            answer: Box::new(answer),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every fetch writes `bytes` as `name`.
    pub(crate) fn serving(name: &str, bytes: Vec<u8>) -> Self {
        let name = name.to_string();
        Self::new(move |_, dir| {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(&name);
            std::fs::write(&path, &bytes)?;
            Ok(path)
        })
    }

    /// Every fetch breaks off mid-transfer.
    pub(crate) fn interrupted() -> Self {
        Self::new(|url, _| {
            Err(DownloadError::Partial {
                url: url.to_string(),
                received: 512,
                reason: "connection reset".to_string(),
            }
            .into())
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path, _referer: Option<&str>) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.answer)(url, dest_dir)
    }
}
