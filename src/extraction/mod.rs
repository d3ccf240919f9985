//! Archive extraction
//!
//! Dispatches on the kind the inspector detected, never on the file name. ZIP is read
//! in-process and falls back to 7z for compression methods the reader lacks; RAR and
//! 7z always go through the external archivers; the tar family is unpacked natively.

mod tar;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use self::tar::TarExtractor;
pub use self::zip::ZipExtractor;

use crate::error::{Error, PostProcessError, Result};
use crate::inspect::FileKind;
use crate::tools::{ArchiveTool, ExternalTools};
use std::path::Path;
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tracing::{info, warn};

/// Unified archive extraction dispatcher
#[derive(Clone)]
pub struct Extractor {
    tools: Arc<dyn ExternalTools>,
}

impl Extractor {
    /// Extractor delegating RAR, 7z and the ZIP fallback to `tools`
    pub fn new(tools: Arc<dyn ExternalTools>) -> Self {
        Self { tools }
    }

    /// Unpack `archive` into `dest`
    ///
    /// # Errors
    /// * `PostProcessError::ExtractionFailed` when every applicable extractor failed
    /// * `Error::NotSupported` when `kind` is not an archive
    pub async fn extract(
        &self,
        archive: &Path,
        kind: FileKind,
        dest: &Path,
        password: Option<&str>,
    ) -> Result<()> {
        info!(?archive, %kind, has_password = password.is_some(), "extracting archive");

        match kind {
            FileKind::Zip => self.extract_zip(archive, dest, password).await,
            FileKind::Rar => self.extract_external(ArchiveTool::Rar, archive, dest, password).await,
            FileKind::SevenZip => {
                self.extract_external(ArchiveTool::SevenZip, archive, dest, password)
                    .await
            }
            FileKind::Tar | FileKind::TarGz | FileKind::TarBz2 => {
                let archive_owned = archive.to_path_buf();
                let dest_owned = dest.to_path_buf();
                spawn_blocking(move || TarExtractor::try_extract(&archive_owned, kind, &dest_owned))
                    .await
                    .map_err(|e| task_failed(archive, e))?
            }
            other => Err(Error::NotSupported(format!(
                "{} is not an archive: {}",
                archive.display(),
                other
            ))),
        }
    }

    async fn extract_zip(&self, archive: &Path, dest: &Path, password: Option<&str>) -> Result<()> {
        let archive_owned = archive.to_path_buf();
        let dest_owned = dest.to_path_buf();
        let password_owned = password.map(str::to_string);

        let native = spawn_blocking(move || {
            ZipExtractor::try_extract(&archive_owned, password_owned.as_deref(), &dest_owned)
        })
        .await
        .map_err(|e| task_failed(archive, e))?;

        match native {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(?archive, error = %e, "in-process ZIP extraction failed, falling back to 7z");
                self.extract_external(ArchiveTool::Zip, archive, dest, password)
                    .await
                    .map_err(|fallback| {
                        Error::PostProcess(PostProcessError::ExtractionFailed {
                            archive: archive.to_path_buf(),
                            reason: format!("{}; 7z fallback: {}", e, fallback),
                        })
                    })
            }
        }
    }

    async fn extract_external(
        &self,
        format: ArchiveTool,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
    ) -> Result<()> {
        let failed = |reason: String| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive.to_path_buf(),
                reason,
            })
        };

        match self.tools.unpack(format, archive, dest, password).await {
            Ok(true) => {
                info!(?archive, ?format, "external extraction successful");
                Ok(())
            }
            Ok(false) => Err(failed(format!("{:?} archiver reported failure", format))),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}

fn task_failed(archive: &Path, e: tokio::task::JoinError) -> Error {
    Error::PostProcess(PostProcessError::ExtractionFailed {
        archive: archive.to_path_buf(),
        reason: format!("extraction task panicked: {}", e),
    })
}
