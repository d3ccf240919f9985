//! Organizer
//!
//! Files an extracted or downloaded payload under the destination root as
//! `Band - Album (Year) [Type]`, refusing payloads without audio.

use crate::error::{Error, PostProcessError, Result};
use crate::resolver::rules::compile;
use crate::types::Release;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions counted as audio when validating a payload
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "ogg", "m4a", "aac", "wma", "opus", "ape", "wv", "aiff", "aif", "alac",
    "mpc",
];

/// Maximum number of " (n)" suffixes tried before giving up
const MAX_SUFFIX_ATTEMPTS: u32 = 9999;

// Control characters other than tab, LF and CR; those are whitespace and get collapsed.
static ILLEGAL_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r#"[<>:"/\\|?*\x00-\x08\x0b\x0c\x0e-\x1f]"#));
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"\s+"));

/// Strip filesystem-illegal characters, collapse whitespace and drop trailing dots
pub fn sanitize_name(name: &str) -> String {
    let stripped = match ILLEGAL_CHARS.as_ref() {
        Some(re) => re.replace_all(name, "").into_owned(),
        None => name.to_string(),
    };
    let collapsed = match WHITESPACE.as_ref() {
        Some(re) => re.replace_all(&stripped, " ").into_owned(),
        None => stripped,
    };
    collapsed.trim().trim_end_matches('.').trim_end().to_string()
}

/// Destination folder name for a release
pub fn canonical_name(release: &Release) -> String {
    let band = sanitize_name(&release.band);
    let album = sanitize_name(&release.album);

    let mut name = match release.year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
        Some(year) => format!("{band} - {album} ({year})"),
        None => format!("{band} - {album}"),
    };

    if !release.is_album()
        && let Some(release_type) = release.release_type.as_deref()
    {
        name.push_str(&format!(" [{}]", sanitize_name(release_type)));
    }
    name
}

/// Whether any file under `dir` carries an audio extension
pub fn contains_audio(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .any(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        })
}

/// First free path among `path`, `path (1)`, `path (2)`, ...
pub fn unique_destination(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::PostProcess(PostProcessError::InvalidPath {
            path: path.to_path_buf(),
            reason: "destination has no usable name".to_string(),
        })
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for n in 1..=MAX_SUFFIX_ATTEMPTS {
        let candidate = parent.join(format!("{name} ({n})"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::PostProcess(PostProcessError::FileCollision {
        path: path.to_path_buf(),
        reason: format!("no free name after {} attempts", MAX_SUFFIX_ATTEMPTS),
    }))
}

/// Move the payload in `source` to `dest_root/name`, returning the folder created
///
/// A lone wrapping subdirectory is moved in place of `source` itself.
///
/// # Errors
/// * `PostProcessError::NoAudioFound` when nothing under `source` is audio
/// * `PostProcessError::MoveFailed` when the payload could not be moved
pub async fn organize(source: &Path, name: &str, dest_root: &Path) -> Result<PathBuf> {
    if !fs::try_exists(source).await.unwrap_or(false) {
        return Err(Error::PostProcess(PostProcessError::InvalidPath {
            path: source.to_path_buf(),
            reason: "payload directory does not exist".to_string(),
        }));
    }

    let scan_root = source.to_path_buf();
    let has_audio = tokio::task::spawn_blocking(move || contains_audio(&scan_root))
        .await
        .unwrap_or(false);
    if !has_audio {
        return Err(Error::PostProcess(PostProcessError::NoAudioFound {
            path: source.to_path_buf(),
        }));
    }

    fs::create_dir_all(dest_root).await?;
    let destination = unique_destination(&dest_root.join(name))?;
    let payload = single_subdirectory(source).await?.unwrap_or_else(|| source.to_path_buf());

    debug!(?payload, ?destination, "moving payload into library");
    move_dir(&payload, &destination).await.map_err(|e| {
        Error::PostProcess(PostProcessError::MoveFailed {
            source_path: payload.clone(),
            dest_path: destination.clone(),
            reason: e.to_string(),
        })
    })?;

    info!(?destination, "release organized");
    Ok(destination)
}

async fn single_subdirectory(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut only = None;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        count += 1;
        if count > 1 {
            return Ok(None);
        }
        if entry.file_type().await?.is_dir() {
            only = Some(entry.path());
        }
    }
    Ok(only)
}

async fn move_dir(source: &Path, destination: &Path) -> std::io::Result<()> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            warn!(?source, ?destination, "rename crosses filesystems, copying instead");
            copy_tree(source, destination).await?;
            fs::remove_dir_all(source).await
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18)
}

fn copy_tree<'a>(
    source: &'a Path,
    destination: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(destination).await?;
        let mut entries = fs::read_dir(source).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = destination.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                copy_tree(&entry.path(), &target).await?;
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
            }
        }
        Ok(())
    })
}
