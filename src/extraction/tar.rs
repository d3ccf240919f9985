use crate::error::{Error, PostProcessError, Result};
use crate::inspect::FileKind;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Native extractor for the tar family
pub struct TarExtractor;

impl TarExtractor {
    /// Unpack a tar, tar.gz or tar.bz2 archive into `dest_path`
    ///
    /// Entries that would land outside `dest_path` are skipped by the tar reader.
    pub fn try_extract(archive_path: &Path, kind: FileKind, dest_path: &Path) -> Result<()> {
        debug!(?archive_path, %kind, ?dest_path, "attempting tar extraction");
        std::fs::create_dir_all(dest_path)?;

        let file = std::fs::File::open(archive_path)?;
        let reader: Box<dyn Read> = match kind {
            FileKind::Tar => Box::new(file),
            FileKind::TarGz => Box::new(GzDecoder::new(file)),
            FileKind::TarBz2 => Box::new(BzDecoder::new(file)),
            other => {
                return Err(Error::NotSupported(format!(
                    "{} is not a tar archive",
                    other
                )));
            }
        };

        tar::Archive::new(reader).unpack(dest_path).map_err(|e| {
            Error::PostProcess(PostProcessError::ExtractionFailed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to unpack tar: {}", e),
            })
        })?;

        info!(?archive_path, %kind, "tar extraction successful");
        Ok(())
    }
}
