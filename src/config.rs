//! Configuration types for content-dl

use crate::error::{Error, Result};
use crate::tags::TagPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling for part-fetch workers per item
pub const MAX_PART_WORKERS: usize = 4;

/// Download behavior configuration (directories, pacing, timing, cleanup)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory content is written under (default: "./downloads")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Override for the on-disk naming pattern
    ///
    /// Must be a regex with optional `volume` and `number` named groups, matched against
    /// file and directory names without their `.cbz` extension.
    #[serde(default)]
    pub content_pattern: Option<String>,

    /// Delay after every successfully fetched part, in milliseconds (default: 250)
    #[serde(default = "default_part_pacing_ms")]
    pub part_pacing_ms: u64,

    /// Pause after items with fewer than 5 parts (default: 1s)
    #[serde(default = "default_short_item_pause", with = "duration_serde")]
    pub short_item_pause: Duration,

    /// Interval between progress reports (default: 2s)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Disk scans slower than this raise a warning (default: 5s)
    #[serde(default = "default_long_scan_threshold", with = "duration_serde")]
    pub long_scan_threshold: Duration,

    /// Sleep used when a rate limit response carries no usable resume time (default: 60s)
    #[serde(default = "default_rate_limit_fallback", with = "duration_serde")]
    pub rate_limit_fallback: Duration,

    /// Maximum time a provider may spend loading content information (default: 5 minutes)
    #[serde(default = "default_load_info_timeout", with = "duration_serde")]
    pub load_info_timeout: Duration,

    /// Grace period live sessions get on shutdown (default: 60s)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Package finished item directories into `.cbz` archives (default: true)
    #[serde(default = "default_true")]
    pub packaging: bool,

    /// Raise a completion notification even when nothing was downloaded (default: false)
    #[serde(default)]
    pub log_empty_downloads: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            content_pattern: None,
            part_pacing_ms: default_part_pacing_ms(),
            short_item_pause: default_short_item_pause(),
            progress_interval: default_progress_interval(),
            long_scan_threshold: default_long_scan_threshold(),
            rate_limit_fallback: default_rate_limit_fallback(),
            load_info_timeout: default_load_info_timeout(),
            shutdown_grace: default_shutdown_grace(),
            packaging: true,
            log_empty_downloads: false,
        }
    }
}

impl DownloadConfig {
    /// Part pacing as a Duration
    pub fn part_pacing(&self) -> Duration {
        Duration::from_millis(self.part_pacing_ms)
    }
}

/// Admission and worker limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum sessions of single-transfer providers in Loading or Downloading (default: 5)
    #[serde(default = "default_max_transfers")]
    pub max_concurrent_transfers: usize,

    /// Maximum sessions of collection providers in Loading or Downloading (default: 2)
    #[serde(default = "default_max_collections")]
    pub max_concurrent_collections: usize,

    /// Part-fetch workers per item, clamped to 1..=4 (default: 4)
    #[serde(default = "default_max_parts")]
    pub max_concurrent_parts: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_transfers(),
            max_concurrent_collections: default_max_collections(),
            max_concurrent_parts: default_max_parts(),
        }
    }
}

impl LimitsConfig {
    /// Worker count actually used by the pipeline
    pub fn part_workers(&self) -> usize {
        self.max_concurrent_parts.clamp(1, MAX_PART_WORKERS)
    }
}

/// Tag policy configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// JSON file holding the tag policy; takes precedence over `policy`
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Inline tag policy
    #[serde(default)]
    pub policy: TagPolicy,
}

/// Main configuration for ContentDownloader
///
/// - [`download`](DownloadConfig): directories, pacing, timing, cleanup
/// - [`limits`](LimitsConfig): admission capacity and part workers
/// - [`metadata`](MetadataConfig): tag policy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Concurrency limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metadata settings
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl Config {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_concurrent_transfers == 0 {
            return Err(Error::Config {
                message: "max_concurrent_transfers must be at least 1".to_string(),
                key: Some("max_concurrent_transfers".to_string()),
            });
        }
        if self.limits.max_concurrent_collections == 0 {
            return Err(Error::Config {
                message: "max_concurrent_collections must be at least 1".to_string(),
                key: Some("max_concurrent_collections".to_string()),
            });
        }
        if let Some(pattern) = &self.download.content_pattern {
            regex::Regex::new(pattern).map_err(|e| Error::Config {
                message: format!("invalid content_pattern: {e}"),
                key: Some("content_pattern".to_string()),
            })?;
        }
        Ok(())
    }

    /// Root directory content is written under
    pub fn root_dir(&self) -> &PathBuf {
        &self.download.root_dir
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_part_pacing_ms() -> u64 {
    250
}

fn default_short_item_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_long_scan_threshold() -> Duration {
    Duration::from_secs(5)
}

fn default_rate_limit_fallback() -> Duration {
    Duration::from_secs(60)
}

fn default_load_info_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(60)
}

fn default_max_transfers() -> usize {
    5
}

fn default_max_collections() -> usize {
    2
}

fn default_max_parts() -> usize {
    MAX_PART_WORKERS
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
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
