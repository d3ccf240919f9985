//! Link classification by URL shape
//!
//! Classification is a case-insensitive substring match against an ordered rule
//! table. The first matching rule wins; a URL that matches nothing is `Direct`.

use crate::types::BackendKind;

/// Ordered (substrings, kind) rules; earlier rules take precedence
const RULES: &[(&[&str], BackendKind)] = &[
    (
        &[
            "zippyshare.com",
            "megaupload.com",
            "uploaded.net",
            "uploaded.to",
            "rapidshare.com",
            "hotfile.com",
            "filesonic.com",
            "fileserve.com",
            "depositfiles.com",
        ],
        BackendKind::Dead,
    ),
    (&["mega.nz", "mega.co.nz", "mega.io"], BackendKind::Mega),
    (&["mediafire.com"], BackendKind::Mediafire),
    (
        &["drive.google.com", "docs.google.com", "drive.usercontent.google.com"],
        BackendKind::GoogleDrive,
    ),
    (&["vk.com/doc", "vk.ru/doc", "m.vk.com/doc"], BackendKind::VkDoc),
    (
        &["disk.yandex.", "yadi.sk", "disk.360.yandex."],
        BackendKind::YandexDisk,
    ),
    (&["pcloud.link", "pcloud.com"], BackendKind::Pcloud),
    (&["cloud.mail.ru"], BackendKind::Mailru),
    (&["icedrive.net"], BackendKind::Icedrive),
    (&["krakenfiles.com"], BackendKind::Krakenfiles),
    (&["workupload.com"], BackendKind::Workupload),
    (&["wetransfer.com", "we.tl"], BackendKind::Wetransfer),
];

/// Classify a share URL into a backend kind
///
/// Pure and total: identical input always yields the same kind, and URLs that
/// match no rule classify as [`BackendKind::Direct`].
///
/// # Examples
///
/// ```
/// use release_dl::classify::classify;
/// use release_dl::types::BackendKind;
///
/// assert_eq!(classify("https://MEGA.nz/file/abc#key"), BackendKind::Mega);
/// assert_eq!(classify("https://cdn.example.org/a.zip"), BackendKind::Direct);
/// ```
#[must_use]
pub fn classify(url: &str) -> BackendKind {
    let url = url.trim().to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| url.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(BackendKind::Direct)
}
