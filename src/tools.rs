//! External tool capability
//!
//! Archivers and the Mega fetch tool sit behind [`ExternalTools`] so the pipeline never
//! spawns processes directly. [`CliTools`] is the subprocess implementation; tests
//! substitute their own.

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Archive formats handed to external archivers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveTool {
    /// ZIP through 7z (fallback when the in-process reader fails)
    Zip,
    /// RAR through unrar
    Rar,
    /// 7z through 7z
    SevenZip,
}

/// Outcome of running the Mega fetch tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFetch {
    /// The tool exited successfully and produced this file
    Fetched(PathBuf),
    /// The tool exited with an error
    Failed {
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },
    /// The tool did not finish within its bound and was killed
    TimedOut,
    /// The tool is not installed
    Missing,
}

/// Capability interface over external binaries
#[async_trait]
pub trait ExternalTools: Send + Sync {
    /// Unpack `archive` into `dest`; `Ok(false)` means the tool ran and reported failure
    async fn unpack(
        &self,
        format: ArchiveTool,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
    ) -> Result<bool>;

    /// Fetch a Mega share into `dest` with the dedicated tool, bounded by `timeout`
    async fn fetch_via_tool(&self, url: &str, dest: &Path, timeout: Duration) -> ToolFetch;
}

/// A required binary that could not be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    /// Binary name
    pub binary: &'static str,
    /// What it is needed for
    pub purpose: &'static str,
}

/// Subprocess-backed tools
#[derive(Debug, Clone)]
pub struct CliTools {
    unrar: Option<PathBuf>,
    sevenzip: Option<PathBuf>,
    megadl: Option<PathBuf>,
    extract_timeout: Duration,
}

impl CliTools {
    /// Locate binaries from explicit config paths or PATH
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            unrar: locate(config.unrar_path.as_ref(), "unrar", config.search_path),
            sevenzip: locate(config.sevenzip_path.as_ref(), "7z", config.search_path)
                .or_else(|| locate(None, "7za", config.search_path)),
            megadl: locate(config.megadl_path.as_ref(), "megadl", config.search_path),
            extract_timeout: config.extract_timeout,
        }
    }

    /// Required binaries that are not available
    pub fn missing(&self) -> Vec<MissingTool> {
        let mut missing = Vec::new();
        if self.unrar.is_none() {
            missing.push(MissingTool {
                binary: "unrar",
                purpose: ".rar archives",
            });
        }
        if self.sevenzip.is_none() {
            missing.push(MissingTool {
                binary: "7z",
                purpose: ".7z archives and modern .zip compression",
            });
        }
        if self.megadl.is_none() {
            missing.push(MissingTool {
                binary: "megadl",
                purpose: "Mega links (megatools)",
            });
        }
        missing
    }

    async fn run_archiver(&self, binary: &Path, args: Vec<OsString>) -> Result<bool> {
        debug!(?binary, ?args, "running archiver");
        let output = tokio::time::timeout(
            self.extract_timeout,
            Command::new(binary)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    warn!(
                        ?binary,
                        code = ?output.status.code(),
                        stderr = %first_line(&String::from_utf8_lossy(&output.stderr)),
                        "archiver reported failure"
                    );
                }
                Ok(output.status.success())
            }
            Ok(Err(e)) => Err(Error::ExternalTool(format!(
                "failed to execute {}: {}",
                binary.display(),
                e
            ))),
            Err(_) => {
                warn!(?binary, timeout = ?self.extract_timeout, "archiver timed out");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ExternalTools for CliTools {
    async fn unpack(
        &self,
        format: ArchiveTool,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
    ) -> Result<bool> {
        let binary = match format {
            ArchiveTool::Rar => self.unrar.as_ref(),
            ArchiveTool::Zip | ArchiveTool::SevenZip => self.sevenzip.as_ref(),
        }
        .ok_or_else(|| {
            Error::NotSupported(format!("no archiver installed for {:?} archives", format))
        })?;

        tokio::fs::create_dir_all(dest).await?;
        let args = unpack_args(format, archive, dest, password);
        self.run_archiver(binary, args).await
    }

    async fn fetch_via_tool(&self, url: &str, dest: &Path, timeout: Duration) -> ToolFetch {
        let Some(binary) = &self.megadl else {
            return ToolFetch::Missing;
        };
        if let Err(e) = tokio::fs::create_dir_all(dest).await {
            return ToolFetch::Failed {
                code: None,
                stderr: e.to_string(),
            };
        }

        info!(url, "fetching with megadl");
        let output = tokio::time::timeout(
            timeout,
            Command::new(binary)
                .arg("--path")
                .arg(dest)
                .arg("--print-names")
                .arg(url)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match fetched_file(&stdout, dest) {
                    Some(path) => ToolFetch::Fetched(path),
                    None => ToolFetch::Failed {
                        code: Some(0),
                        stderr: "tool reported success but produced no file".to_string(),
                    },
                }
            }
            Ok(Ok(output)) => ToolFetch::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => ToolFetch::Missing,
            Ok(Err(e)) => ToolFetch::Failed {
                code: None,
                stderr: e.to_string(),
            },
            Err(_) => ToolFetch::TimedOut,
        }
    }
}

fn locate(explicit: Option<&PathBuf>, name: &str, search_path: bool) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.clone()),
        None if search_path => which::which(name).ok(),
        None => None,
    }
}

/// Command-line arguments for an archiver run
///
/// unrar gets `-p-` when no password is known so it never prompts.
pub fn unpack_args(
    format: ArchiveTool,
    archive: &Path,
    dest: &Path,
    password: Option<&str>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    match format {
        ArchiveTool::Rar => {
            args.push("x".into());
            args.push("-y".into());
            match password {
                Some(pw) => args.push(format!("-p{pw}").into()),
                None => args.push("-p-".into()),
            }
            args.push(archive.into());
            let mut dest_arg = dest.as_os_str().to_owned();
            dest_arg.push(std::path::MAIN_SEPARATOR_STR);
            args.push(dest_arg);
        }
        ArchiveTool::Zip | ArchiveTool::SevenZip => {
            args.push("x".into());
            args.push("-y".into());
            let mut out = OsString::from("-o");
            out.push(dest.as_os_str());
            args.push(out);
            if let Some(pw) = password {
                args.push(format!("-p{pw}").into());
            }
            args.push(archive.into());
        }
    }
    args
}

/// File the fetch tool produced
///
/// Uses the last printed name when it exists in `dest`, otherwise the first regular
/// file found there.
pub fn fetched_file(stdout: &str, dest: &Path) -> Option<PathBuf> {
    if let Some(name) = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty()) {
        let candidate = dest.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        let bare = Path::new(name);
        if bare.is_absolute() && bare.is_file() {
            return Some(bare.to_path_buf());
        }
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dest)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files.into_iter().next()
}

/// Whether tool output describes a bandwidth or transfer quota condition
pub fn is_quota_message(stderr: &str) -> bool {
    const PHRASES: &[&str] = &[
        "bandwidth",
        "quota",
        "limit exceeded",
        "transfer limit",
        "over limit",
        "rate limit",
        "too many requests",
        "509",
        "eoverquota",
    ];
    let lower = stderr.to_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

/// First non-empty line, truncated for logs and ledger entries
pub fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .chars()
        .take(160)
        .collect()
}
