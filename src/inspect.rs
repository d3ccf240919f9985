//! Archive inspector
//!
//! Decides what a downloaded file really is from its leading bytes, independent of
//! the name the host gave it, and renames the file when the two disagree. Hosts
//! routinely serve RAR archives as `.zip` and audio files without an extension.

use crate::error::{PostProcessError, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNIFF_LEN: usize = 512;
const TAR_MAGIC_OFFSET: usize = 257;

/// File type detected from signature bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// ZIP archive
    Zip,
    /// RAR archive (v4 or v5)
    Rar,
    /// 7-Zip archive
    SevenZip,
    /// Uncompressed tar
    Tar,
    /// gzip-compressed tar
    TarGz,
    /// bzip2-compressed tar
    TarBz2,
    /// MPEG audio
    Mp3,
    /// FLAC
    Flac,
    /// Ogg container
    Ogg,
    /// RIFF/WAVE
    Wav,
    /// AAC in ADTS framing
    Aac,
    /// MP4-family audio
    M4a,
    /// ASF/WMA
    Wma,
    /// No known signature
    Unknown,
}

impl FileKind {
    /// Canonical extension (without the leading dot)
    pub fn extension(&self) -> Option<&'static str> {
        Some(match self {
            FileKind::Zip => "zip",
            FileKind::Rar => "rar",
            FileKind::SevenZip => "7z",
            FileKind::Tar => "tar",
            FileKind::TarGz => "tar.gz",
            FileKind::TarBz2 => "tar.bz2",
            FileKind::Mp3 => "mp3",
            FileKind::Flac => "flac",
            FileKind::Ogg => "ogg",
            FileKind::Wav => "wav",
            FileKind::Aac => "aac",
            FileKind::M4a => "m4a",
            FileKind::Wma => "wma",
            FileKind::Unknown => return None,
        })
    }

    /// Whether this kind is unpacked by the extractor
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            FileKind::Zip
                | FileKind::Rar
                | FileKind::SevenZip
                | FileKind::Tar
                | FileKind::TarGz
                | FileKind::TarBz2
        )
    }

    /// Whether this kind is an audio container
    pub fn is_audio(&self) -> bool {
        !self.is_archive() && *self != FileKind::Unknown
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("unknown"))
    }
}

/// Result of inspecting a downloaded file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inspection {
    /// Location of the file after any rename
    pub path: PathBuf,
    /// What the signature says
    pub kind: FileKind,
}

impl Inspection {
    /// Whether the file should go through the extractor
    pub fn needs_extraction(&self) -> bool {
        self.kind.is_archive()
    }
}

/// Classify a byte prefix
///
/// `prefix` should hold the first [`SNIFF_LEN`] bytes of the file (fewer for short files).
pub fn detect_bytes(prefix: &[u8]) -> FileKind {
    if prefix.starts_with(b"PK\x03\x04")
        || prefix.starts_with(b"PK\x05\x06")
        || prefix.starts_with(b"PK\x07\x08")
        || prefix.starts_with(b"PK\x01\x02")
    {
        return FileKind::Zip;
    }
    if prefix.starts_with(b"Rar!\x1a\x07") {
        return FileKind::Rar;
    }
    if prefix.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return FileKind::SevenZip;
    }
    if has_tar_magic(prefix) {
        return FileKind::Tar;
    }
    if prefix.starts_with(&[0x1F, 0x8B]) {
        return sniff_compressed_tar(GzDecoder::new(prefix), FileKind::TarGz);
    }
    if prefix.starts_with(b"BZh") {
        return sniff_compressed_tar(BzDecoder::new(prefix), FileKind::TarBz2);
    }
    if prefix.starts_with(b"fLaC") {
        return FileKind::Flac;
    }
    if prefix.starts_with(b"OggS") {
        return FileKind::Ogg;
    }
    if prefix.len() >= 12 && &prefix[..4] == b"RIFF" && &prefix[8..12] == b"WAVE" {
        return FileKind::Wav;
    }
    if prefix.len() >= 8 && &prefix[4..8] == b"ftyp" {
        return FileKind::M4a;
    }
    if prefix.starts_with(&[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]) {
        return FileKind::Wma;
    }
    if prefix.starts_with(b"ID3") {
        return FileKind::Mp3;
    }
    if prefix.len() >= 2 && prefix[0] == 0xFF && prefix[1] & 0xF0 == 0xF0 && prefix[1] & 0x06 == 0 {
        return FileKind::Aac;
    }
    if prefix.len() >= 2 && prefix[0] == 0xFF && prefix[1] & 0xE0 == 0xE0 {
        return FileKind::Mp3;
    }
    FileKind::Unknown
}

fn has_tar_magic(block: &[u8]) -> bool {
    block.len() >= TAR_MAGIC_OFFSET + 5 && &block[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
}

// A compressed stream only counts as a tar when its first decompressed block is a tar header.
fn sniff_compressed_tar(mut decoder: impl Read, kind: FileKind) -> FileKind {
    let mut block = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < block.len() {
        match decoder.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => break,
        }
    }
    if has_tar_magic(&block[..filled]) {
        kind
    } else {
        FileKind::Unknown
    }
}

/// Detect the kind of a file on disk
///
/// Compressed streams are sniffed from their full first block, so the file is read
/// through the decoder rather than from a fixed-size prefix.
pub fn detect(path: &Path) -> Result<FileKind> {
    let mut file = std::fs::File::open(path)?;
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut prefix)?;

    let kind = detect_bytes(&prefix);
    if kind != FileKind::Unknown {
        return Ok(kind);
    }

    // A 512-byte prefix of a gzip/bzip2 stream may not decompress to a full tar header.
    if prefix.starts_with(&[0x1F, 0x8B]) {
        return Ok(sniff_compressed_tar(
            GzDecoder::new(std::fs::File::open(path)?),
            FileKind::TarGz,
        ));
    }
    if prefix.starts_with(b"BZh") {
        return Ok(sniff_compressed_tar(
            BzDecoder::new(std::fs::File::open(path)?),
            FileKind::TarBz2,
        ));
    }
    Ok(FileKind::Unknown)
}

/// Current extension, treating `.tar.gz`, `.tar.bz2` and `.tgz` as single units
pub fn current_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    for (suffix, canonical) in [
        (".tar.gz", "tar.gz"),
        (".tar.bz2", "tar.bz2"),
        (".tgz", "tar.gz"),
        (".tbz2", "tar.bz2"),
        (".tbz", "tar.bz2"),
    ] {
        if name.len() > suffix.len() && name.ends_with(suffix) {
            return Some(canonical.to_string());
        }
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Whether an extension names a compressed or archive format
pub fn claims_archive(extension: &str) -> bool {
    matches!(
        extension,
        "zip" | "rar" | "7z" | "tar" | "tar.gz" | "tar.bz2" | "gz" | "bz2"
    )
}

fn stem_without(path: &Path, extension: Option<&str>) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(extension) = extension else {
        return name;
    };
    // Strip the written suffix, which may be the short form (.tgz) of the canonical one.
    for written in [
        format!(".{extension}"),
        ".tgz".to_string(),
        ".tbz2".to_string(),
        ".tbz".to_string(),
    ] {
        let Some(cut) = name.len().checked_sub(written.len()).filter(|c| *c > 0) else {
            continue;
        };
        if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(&written) {
            return name[..cut].to_string();
        }
    }
    name
}

/// Inspect a file and rename it when its signature disagrees with its extension
///
/// A file whose extension claims an archive format but whose bytes match no
/// signature is returned as [`FileKind::Unknown`] under its original name, so it is
/// never handed to an extractor.
pub fn correct_extension(path: &Path) -> Result<Inspection> {
    let kind = detect(path)?;
    let claimed = current_extension(path);

    let Some(real) = kind.extension() else {
        if let Some(claimed) = claimed.as_deref().filter(|c| claims_archive(c)) {
            let mismatch = PostProcessError::SignatureMismatch {
                path: path.to_path_buf(),
                claimed: claimed.to_string(),
                actual: kind.to_string(),
            };
            warn!(error = %mismatch, "not extracting; keeping file as payload");
        }
        return Ok(Inspection {
            path: path.to_path_buf(),
            kind,
        });
    };

    if claimed.as_deref() == Some(real) {
        debug!(?path, %kind, "signature matches extension");
        return Ok(Inspection {
            path: path.to_path_buf(),
            kind,
        });
    }

    // Keep an unrecognized suffix ("Album.v2") as part of the stem.
    let known_claim = claimed
        .as_deref()
        .filter(|c| claims_archive(c) || is_known_audio_extension(c));
    let stem = stem_without(path, known_claim);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut target = parent.join(format!("{stem}.{real}"));
    let mut n = 1;
    while target.exists() {
        target = parent.join(format!("{stem} ({n}).{real}"));
        n += 1;
    }

    std::fs::rename(path, &target)?;
    info!(
        from = ?path,
        to = ?target,
        claimed = claimed.as_deref().unwrap_or(""),
        %kind,
        "corrected file extension from signature"
    );

    Ok(Inspection { path: target, kind })
}

fn is_known_audio_extension(ext: &str) -> bool {
    crate::organize::AUDIO_EXTENSIONS.contains(&ext)
}
