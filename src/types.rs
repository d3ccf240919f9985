//! Core types for release-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One discrete downloadable work (album, EP, demo, ...) with its candidate links
///
/// Records are produced upstream and read once per run. Fields the pipeline does not
/// use are preserved in `extra` so that a release written to the pending queue keeps
/// everything the upstream producer attached to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Unique release identifier
    #[serde(with = "lenient_string")]
    pub post_id: String,

    /// Band name
    #[serde(default = "unknown")]
    pub band: String,

    /// Album title
    #[serde(default = "unknown")]
    pub album: String,

    /// Release year, if known
    #[serde(default, with = "lenient_string::option")]
    pub year: Option<String>,

    /// Release type (Album, EP, Demo, Split, Compilation, Live, ...)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub release_type: Option<String>,

    /// Band identifier; failures are recorded against it
    #[serde(default, with = "lenient_string")]
    pub band_id: String,

    /// Candidate download links, tried in order
    #[serde(default)]
    pub download_links: Vec<Link>,

    /// Upstream fields carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Release {
    /// Key used by the failure ledger
    ///
    /// Falls back to the band name when the upstream record carries no band id.
    pub fn failure_key(&self) -> &str {
        if self.band_id.trim().is_empty() {
            &self.band
        } else {
            &self.band_id
        }
    }

    /// Copy of this release keeping only the links of the given backend kind
    pub fn narrowed_to(&self, kind: BackendKind) -> Release {
        let mut narrowed = self.clone();
        narrowed
            .download_links
            .retain(|link| crate::classify::classify(&link.url) == kind);
        narrowed
    }

    /// Whether the release type counts as a regular album
    pub fn is_album(&self) -> bool {
        match self.release_type.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(t) => {
                let t = t.to_lowercase();
                t == "album" || t == "álbum"
            }
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.band, self.album)
    }
}

/// A candidate download link
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Share URL
    pub url: String,

    /// Archive or share password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Link label shown upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Declared quality; carried but never used to rank links
    #[serde(
        default,
        with = "lenient_string::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub quality: Option<String>,
}

impl Link {
    /// Create a link with only a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Non-empty password, if any
    pub fn password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// File-hosting service a link belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// mega.nz
    Mega,
    /// mediafire.com
    Mediafire,
    /// drive.google.com
    GoogleDrive,
    /// vk.com documents
    VkDoc,
    /// disk.yandex.*
    YandexDisk,
    /// pcloud
    Pcloud,
    /// cloud.mail.ru
    Mailru,
    /// icedrive.net
    Icedrive,
    /// krakenfiles.com
    Krakenfiles,
    /// workupload.com
    Workupload,
    /// wetransfer.com
    Wetransfer,
    /// Hosts that no longer exist
    Dead,
    /// Anything else; fetched as-is
    Direct,
}

impl BackendKind {
    /// Every backend kind
    pub const ALL: [BackendKind; 13] = [
        BackendKind::Mega,
        BackendKind::Mediafire,
        BackendKind::GoogleDrive,
        BackendKind::VkDoc,
        BackendKind::YandexDisk,
        BackendKind::Pcloud,
        BackendKind::Mailru,
        BackendKind::Icedrive,
        BackendKind::Krakenfiles,
        BackendKind::Workupload,
        BackendKind::Wetransfer,
        BackendKind::Dead,
        BackendKind::Direct,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mega => "mega",
            BackendKind::Mediafire => "mediafire",
            BackendKind::GoogleDrive => "google-drive",
            BackendKind::VkDoc => "vk-doc",
            BackendKind::YandexDisk => "yandex-disk",
            BackendKind::Pcloud => "pcloud",
            BackendKind::Mailru => "mailru",
            BackendKind::Icedrive => "icedrive",
            BackendKind::Krakenfiles => "krakenfiles",
            BackendKind::Workupload => "workupload",
            BackendKind::Wetransfer => "wetransfer",
            BackendKind::Dead => "dead",
            BackendKind::Direct => "direct",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link-level signal reported by a resolver or download attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    /// The attempt produced something usable
    Ok,
    /// The host is throttling; try again after the cooldown
    RetryLater,
    /// This link will not work
    HardFail,
}

/// Why a release was skipped without any network activity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Present in the completion ledger
    Completed,
    /// The band already has an entry in the failure ledger
    BandFailed,
    /// The canonical destination folder already exists
    FolderExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Completed => "already downloaded",
            SkipReason::BandFailed => "band previously failed",
            SkipReason::FolderExists => "destination already exists",
        })
    }
}

/// Final disposition of one release in one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "disposition")]
pub enum Disposition {
    /// Acquired and filed under `destination`
    Succeeded {
        /// Folder the release was moved into
        destination: PathBuf,
    },
    /// Already resolved in an earlier run (not an error)
    AlreadyProcessed {
        /// What short-circuited the release
        reason: SkipReason,
    },
    /// Every attempt broke off mid-transfer; retried cleanly on a later run
    Partial,
    /// Only a cooldown-gated Mega link is left; parked in the pending queue
    Deferred,
    /// All links exhausted; recorded in the failure ledger
    Failed {
        /// Error code of the last link failure
        reason: String,
    },
    /// The release carried no links at all
    NoLinks,
}

impl Disposition {
    /// Short lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Succeeded { .. } => "succeeded",
            Disposition::AlreadyProcessed { .. } => "skipped",
            Disposition::Partial => "partial",
            Disposition::Deferred => "deferred",
            Disposition::Failed { .. } => "failed",
            Disposition::NoLinks => "no_links",
        }
    }
}

/// Run-level counters reported back to the caller
///
/// Every release considered lands in exactly one counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Newly acquired
    pub succeeded: usize,
    /// Already processed (ledger, band failure or existing folder)
    pub skipped: usize,
    /// Exhausted or without links
    pub failed: usize,
    /// Broke off mid-transfer on every link
    pub partial: usize,
    /// Parked in the pending queue
    pub pending: usize,
}

impl RunStats {
    /// Count one disposition
    pub fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Succeeded { .. } => self.succeeded += 1,
            Disposition::AlreadyProcessed { .. } => self.skipped += 1,
            Disposition::Partial => self.partial += 1,
            Disposition::Deferred => self.pending += 1,
            Disposition::Failed { .. } | Disposition::NoLinks => self.failed += 1,
        }
    }

    /// Number of releases considered
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.partial + self.pending
    }
}

/// Progress events emitted by the release processor
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A release is about to be processed
    ReleaseStarted {
        /// Release identifier
        post_id: String,
        /// "Band - Album"
        name: String,
    },
    /// A link is being attempted
    LinkAttempt {
        /// Release identifier
        post_id: String,
        /// Backend the link was classified as
        backend: BackendKind,
        /// Share URL
        url: String,
    },
    /// A link attempt failed
    LinkFailed {
        /// Release identifier
        post_id: String,
        /// Backend the link was classified as
        backend: BackendKind,
        /// Machine-readable error code
        code: String,
    },
    /// A Mega link was skipped because the cooldown is active
    LinkSkipped {
        /// Release identifier
        post_id: String,
        /// Cooldown deadline
        until: DateTime<Utc>,
    },
    /// The Mega backend reported throttling
    CooldownStarted {
        /// Cooldown deadline
        until: DateTime<Utc>,
    },
    /// A release reached its final disposition
    ReleaseFinished {
        /// Release identifier
        post_id: String,
        /// Outcome
        disposition: Disposition,
    },
}

fn unknown() -> String {
    "Unknown".to_string()
}

// Upstream ids and years arrive as JSON numbers or strings; keep them as strings.
mod lenient_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    impl Raw {
        fn into_string(self) -> String {
            match self {
                Raw::Str(s) => s,
                Raw::Int(i) => i.to_string(),
                Raw::Float(f) => f.to_string(),
                Raw::Bool(b) => b.to_string(),
            }
        }
    }

    pub fn serialize<S>(value: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Raw>::deserialize(deserializer)?
            .map(Raw::into_string)
            .unwrap_or_default())
    }

    pub mod option {
        use super::Raw;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(v) => serializer.serialize_some(v),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<Raw>::deserialize(deserializer)?
                .map(Raw::into_string)
                .filter(|s| !s.trim().is_empty()))
        }
    }
}
