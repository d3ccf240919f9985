use crate::error::{Error, PostProcessError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// In-process extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Open a ZIP entry by index, decrypting it when a password is known
    fn open_zip_entry<'a>(
        archive: &'a mut zip::ZipArchive<std::fs::File>,
        index: usize,
        password: Option<&str>,
        archive_path: &Path,
    ) -> Result<zip::read::ZipFile<'a>> {
        let failed = |reason: String| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason,
            })
        };

        match password {
            None => archive
                .by_index(index)
                .map_err(|e| failed(format!("failed to read ZIP entry: {}", e))),
            Some(password) => archive
                .by_index_decrypt(index, password.as_bytes())
                .map_err(|e| failed(format!("failed to read ZIP entry: {}", e)))?
                .map_err(|_| failed("wrong ZIP password".to_string())),
        }
    }

    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(name = file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut outfile = std::fs::File::create(&file_path)?;
        std::io::copy(&mut file, &mut outfile).map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to extract {}: {}", file_path.display(), e),
            })
        })?;

        Ok(Some(file_path))
    }

    /// Extract a ZIP archive with an optional password
    ///
    /// Fails on compression methods the in-process reader does not implement; the
    /// caller falls back to 7z in that case.
    pub fn try_extract(
        archive_path: &Path,
        password: Option<&str>,
        dest_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        debug!(
            ?archive_path,
            has_password = password.is_some(),
            ?dest_path,
            "attempting ZIP extraction"
        );

        std::fs::create_dir_all(dest_path)?;
        let file = std::fs::File::open(archive_path)?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to read ZIP archive: {}", e),
            })
        })?;

        let mut extracted_files = Vec::new();
        for i in 0..archive.len() {
            let file = Self::open_zip_entry(&mut archive, i, password, archive_path)?;
            if let Some(file_path) = Self::extract_zip_entry(file, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}
