//! Configuration types for release-dl
//!
//! Every field has a default, so an empty JSON object is a valid configuration.
//! Only the Mega timeout and cooldown are meant to be tuned per environment; the
//! remaining delays and thresholds are fixed defaults that callers rarely touch.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the Mega tool timeout (seconds)
pub const ENV_MEGA_TIMEOUT: &str = "RELEASE_DL_MEGA_TIMEOUT_SECS";

/// Environment variable overriding the Mega cooldown length (seconds)
pub const ENV_MEGA_COOLDOWN: &str = "RELEASE_DL_MEGA_COOLDOWN_SECS";

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input, output and state file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Mega backend timing
    #[serde(default)]
    pub mega: MegaConfig,

    /// Download engine and pacing
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool locations and bounds
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load a configuration file (JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Apply environment overrides for the Mega timeout and cooldown
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(secs) = env_seconds(ENV_MEGA_TIMEOUT)? {
            self.mega.timeout = secs;
        }
        if let Some(secs) = env_seconds(ENV_MEGA_COOLDOWN)? {
            self.mega.cooldown = secs;
        }
        Ok(())
    }
}

fn env_seconds(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| Error::Config {
                message: format!("{key} must be a whole number of seconds: {e}"),
                key: Some(key.to_string()),
            }),
        Err(_) => Ok(None),
    }
}

/// File and directory locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// JSON array of release records (default: "data/releases.json")
    #[serde(default = "default_input")]
    pub input: PathBuf,

    /// Destination root for organized releases (default: "./library")
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// Parent of per-attempt temporary workspaces
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Completion ledger (default: "data/completed.txt")
    #[serde(default = "default_completed_ledger")]
    pub completed_ledger: PathBuf,

    /// Failure ledger (default: "data/failed.txt")
    #[serde(default = "default_failed_ledger")]
    pub failed_ledger: PathBuf,

    /// Pending queue of cooldown-deferred releases (default: "data/pending_mega.json")
    #[serde(default = "default_pending_queue")]
    pub pending_queue: PathBuf,

    /// Persisted Mega cooldown deadline (default: "data/mega_cooldown.json")
    #[serde(default = "default_cooldown_state")]
    pub cooldown_state: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            destination: default_destination(),
            temp_dir: default_temp_dir(),
            completed_ledger: default_completed_ledger(),
            failed_ledger: default_failed_ledger(),
            pending_queue: default_pending_queue(),
            cooldown_state: default_cooldown_state(),
        }
    }
}

impl PathsConfig {
    /// Place every state file and the temp dir under `root`
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            input: root.join("releases.json"),
            destination: root.join("library"),
            temp_dir: root.join("tmp"),
            completed_ledger: root.join("completed.txt"),
            failed_ledger: root.join("failed.txt"),
            pending_queue: root.join("pending_mega.json"),
            cooldown_state: root.join("mega_cooldown.json"),
        }
    }
}

/// Mega backend timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MegaConfig {
    /// Upper bound for one fetch-tool run (default: 30 minutes)
    #[serde(default = "default_mega_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// How long Mega is skipped after a quota signal or timeout (default: 1 hour)
    #[serde(default = "default_mega_cooldown", with = "duration_serde")]
    pub cooldown: Duration,
}

impl Default for MegaConfig {
    fn default() -> Self {
        Self {
            timeout: default_mega_timeout(),
            cooldown: default_mega_cooldown(),
        }
    }
}

/// Download engine, retry bound and pacing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Retries of the same URL after a mid-transfer failure (None = unbounded, default: 2)
    #[serde(default = "default_max_partial_retries")]
    pub max_partial_retries: Option<u32>,

    /// Fixed delay between partial-download retries (default: 5 seconds)
    #[serde(default = "default_partial_retry_delay", with = "duration_serde")]
    pub partial_retry_delay: Duration,

    /// Files smaller than this are treated as error pages (default: 10 KiB)
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,

    /// Pause between releases (default: 2 seconds)
    #[serde(default = "default_release_delay", with = "duration_serde")]
    pub release_delay: Duration,

    /// Pause between link attempts of one release (default: 1 second)
    #[serde(default = "default_link_delay", with = "duration_serde")]
    pub link_delay: Duration,

    /// Connect timeout for every HTTP request (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Longest silence tolerated between body chunks (default: 60 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// Timeout for share pages and host API calls (default: 30 seconds)
    #[serde(default = "default_page_timeout", with = "duration_serde")]
    pub page_timeout: Duration,

    /// User-Agent sent to hosts
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_partial_retries: default_max_partial_retries(),
            partial_retry_delay: default_partial_retry_delay(),
            min_file_size: default_min_file_size(),
            release_delay: default_release_delay(),
            link_delay: default_link_delay(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            page_timeout: default_page_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// External tool paths (unrar, 7z, megadl, headless browser)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to unrar executable (auto-detected if None)
    #[serde(default)]
    pub unrar_path: Option<PathBuf>,

    /// Path to 7z executable (auto-detected if None)
    #[serde(default)]
    pub sevenzip_path: Option<PathBuf>,

    /// Path to megadl executable (auto-detected if None)
    #[serde(default)]
    pub megadl_path: Option<PathBuf>,

    /// Path to a Chromium-compatible browser (auto-detected if None)
    #[serde(default)]
    pub browser_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Upper bound for one unrar/7z run (default: 5 minutes)
    #[serde(default = "default_extract_timeout", with = "duration_serde")]
    pub extract_timeout: Duration,

    /// Upper bound for one headless page render (default: 60 seconds)
    #[serde(default = "default_browser_timeout", with = "duration_serde")]
    pub browser_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            unrar_path: None,
            sevenzip_path: None,
            megadl_path: None,
            browser_path: None,
            search_path: true,
            extract_timeout: default_extract_timeout(),
            browser_timeout: default_browser_timeout(),
        }
    }
}

fn default_input() -> PathBuf {
    PathBuf::from("data/releases.json")
}

fn default_destination() -> PathBuf {
    PathBuf::from("./library")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("release-dl")
}

fn default_completed_ledger() -> PathBuf {
    PathBuf::from("data/completed.txt")
}

fn default_failed_ledger() -> PathBuf {
    PathBuf::from("data/failed.txt")
}

fn default_pending_queue() -> PathBuf {
    PathBuf::from("data/pending_mega.json")
}

fn default_cooldown_state() -> PathBuf {
    PathBuf::from("data/mega_cooldown.json")
}

fn default_mega_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_mega_cooldown() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_partial_retries() -> Option<u32> {
    Some(2)
}

fn default_partial_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_min_file_size() -> u64 {
    10 * 1024
}

fn default_release_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_link_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

fn default_true() -> bool {
    true
}

fn default_extract_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_browser_timeout() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
