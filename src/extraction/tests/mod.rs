use crate::error::{Error, PostProcessError};
use crate::extraction::*;
use crate::inspect::FileKind;
use crate::test_helpers::FakeTools;
use crate::tools::ArchiveTool;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing the given files
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a password-encrypted ZIP using the deprecated ZipCrypto method
/// (only encryption method supported for writing by zip 0.6)
fn create_encrypted_zip(archive_path: &Path, file_name: &str, content: &[u8], password: &[u8]) {
    use ::zip::unstable::write::FileOptionsExt;
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Stored)
        .with_deprecated_encryption(password);
    writer.start_file(file_name, options).unwrap();
    std::io::Write::write_all(&mut writer, content).unwrap();
    writer.finish().unwrap();
}

/// Create a gzip-compressed tar holding one file
fn create_tar_gz(archive_path: &Path, file_name: &str, content: &[u8]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = ::tar::Builder::new(encoder);
    let mut header = ::tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, file_name, content).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

fn extractor(tools: FakeTools) -> (Extractor, Arc<FakeTools>) {
    let tools = Arc::new(tools);
    (Extractor::new(tools.clone()), tools)
}

// ---------------------------------------------------------------------------
// ZIP
// ---------------------------------------------------------------------------

#[test]
fn test_zip_extract_nested_entries() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("album.zip");
    create_zip_archive(
        &archive,
        &[("Album/01.mp3", b"one"), ("Album/02.mp3", b"two")],
    );
    let dest = temp.path().join("out");

    let files = ZipExtractor::try_extract(&archive, None, &dest).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(std::fs::read(dest.join("Album").join("02.mp3")).unwrap(), b"two");
}

#[test]
fn test_zip_extract_with_password() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("locked.zip");
    create_encrypted_zip(&archive, "01.flac", b"lossless", b"metal");
    let dest = temp.path().join("out");

    ZipExtractor::try_extract(&archive, Some("metal"), &dest).unwrap();

    assert_eq!(std::fs::read(dest.join("01.flac")).unwrap(), b"lossless");
}

#[test]
fn test_zip_extract_wrong_password() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("locked.zip");
    create_encrypted_zip(&archive, "01.flac", b"lossless", b"metal");

    let result = ZipExtractor::try_extract(&archive, Some("pop"), &temp.path().join("out"));

    assert!(matches!(
        result,
        Err(Error::PostProcess(PostProcessError::ExtractionFailed { .. }))
    ));
}

#[tokio::test]
async fn test_zip_native_success_skips_tools() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("album.zip");
    create_zip_archive(&archive, &[("01.mp3", b"audio")]);
    let dest = temp.path().join("out");
    let (extractor, tools) = extractor(FakeTools::unpacking(true));

    extractor
        .extract(&archive, FileKind::Zip, &dest, None)
        .await
        .unwrap();

    assert!(dest.join("01.mp3").is_file());
    assert!(tools.unpack_calls().is_empty());
}

#[tokio::test]
async fn test_corrupt_zip_falls_back_to_7z() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("odd.zip");
    // Local header signature without a readable central directory
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0u8; 128]);
    std::fs::write(&archive, bytes).unwrap();
    let dest = temp.path().join("out");
    let (extractor, tools) = extractor(FakeTools::unpacking(true).with_unpack_output("01.mp3"));

    extractor
        .extract(&archive, FileKind::Zip, &dest, Some("pw"))
        .await
        .unwrap();

    let calls = tools.unpack_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ArchiveTool::Zip);
    assert_eq!(calls[0].2.as_deref(), Some("pw"));
    assert!(dest.join("01.mp3").is_file());
}

#[tokio::test]
async fn test_corrupt_zip_fallback_failure_reports_both() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("odd.zip");
    std::fs::write(&archive, b"PK\x03\x04 truncated").unwrap();
    let (extractor, _tools) = extractor(FakeTools::unpacking(false));

    let err = extractor
        .extract(&archive, FileKind::Zip, &temp.path().join("out"), None)
        .await
        .unwrap_err();

    match err {
        Error::PostProcess(PostProcessError::ExtractionFailed { archive: a, reason }) => {
            assert_eq!(a, archive);
            assert!(reason.contains("7z fallback"), "reason: {reason}");
        }
        other => panic!("expected ExtractionFailed, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// RAR / 7z
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rar_always_delegates_with_password() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("album.rar");
    std::fs::write(&archive, b"Rar!\x1a\x07\x00").unwrap();
    let dest = temp.path().join("out");
    let (extractor, tools) = extractor(FakeTools::unpacking(true));

    extractor
        .extract(&archive, FileKind::Rar, &dest, Some("secret"))
        .await
        .unwrap();

    let calls = tools.unpack_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ArchiveTool::Rar);
    assert_eq!(calls[0].1, archive);
    assert_eq!(calls[0].2.as_deref(), Some("secret"));
}

#[tokio::test]
async fn test_7z_tool_failure_is_extraction_failure() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("album.7z");
    std::fs::write(&archive, [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]).unwrap();
    let (extractor, tools) = extractor(FakeTools::unpacking(false));

    let err = extractor
        .extract(&archive, FileKind::SevenZip, &temp.path().join("out"), None)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "extraction_failed");
    assert_eq!(tools.unpack_calls()[0].0, ArchiveTool::SevenZip);
    assert_eq!(tools.unpack_calls()[0].2, None);
}

// ---------------------------------------------------------------------------
// Tar family and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tar_gz_extracts_natively() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("album.tar.gz");
    create_tar_gz(&archive, "Album/01.ogg", b"OggS fake");
    let dest = temp.path().join("out");
    let (extractor, tools) = extractor(FakeTools::unpacking(false));

    extractor
        .extract(&archive, FileKind::TarGz, &dest, None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(dest.join("Album").join("01.ogg")).unwrap(), b"OggS fake");
    assert!(tools.unpack_calls().is_empty());
}

#[test]
fn test_tar_extractor_rejects_non_tar_kind() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("x.bin");
    std::fs::write(&archive, b"data").unwrap();

    let result = TarExtractor::try_extract(&archive, FileKind::Zip, &temp.path().join("out"));

    assert!(matches!(result, Err(Error::NotSupported(_))));
}

#[tokio::test]
async fn test_non_archive_is_not_supported() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("01.mp3");
    std::fs::write(&file, b"ID3").unwrap();
    let (extractor, tools) = extractor(FakeTools::unpacking(true));

    let result = extractor
        .extract(&file, FileKind::Mp3, &temp.path().join("out"), None)
        .await;

    assert!(matches!(result, Err(Error::NotSupported(_))));
    assert!(tools.unpack_calls().is_empty());
}
