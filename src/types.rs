//! Core types for content-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Name of a content source (e.g. "mangadex", "nyaa")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderTag(pub String);

impl ProviderTag {
    /// Create a new ProviderTag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-scoped identity of a piece of content
///
/// At most one live session exists per key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    /// Source the content comes from
    pub provider: ProviderTag,
    /// Identifier within that source
    pub id: String,
}

impl ContentKey {
    /// Create a new ContentKey
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: ProviderTag(provider.into()),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

/// Session lifecycle state
///
/// `Queued → Loading → {Ready | Waiting} → Downloading → Cleanup → Terminated`.
/// Every non-terminal state can also move to `Cleanup` when cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentState {
    /// Created, not yet admitted
    Queued,
    /// Admitted, loading content information
    Loading,
    /// Loaded and allowed to start right away
    Ready,
    /// Loaded, waiting for user confirmation or a free slot
    Waiting,
    /// Fetching parts
    Downloading,
    /// Removing or packaging output
    Cleanup,
    /// Finished, about to be dropped from the registry
    Terminated,
}

impl ContentState {
    /// States that hold an admission slot
    pub fn holds_slot(&self) -> bool {
        matches!(self, ContentState::Loading | ContentState::Downloading)
    }

    /// States a cancelled session can no longer be cancelled from
    pub fn is_stopping(&self) -> bool {
        matches!(self, ContentState::Cleanup | ContentState::Terminated)
    }

    /// Whether a download can be started from this state
    pub fn can_start(&self) -> bool {
        matches!(self, ContentState::Ready | ContentState::Waiting)
    }
}

impl std::fmt::Display for ContentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentState::Queued => "queued",
            ContentState::Loading => "loading",
            ContentState::Ready => "ready",
            ContentState::Waiting => "waiting",
            ContentState::Downloading => "downloading",
            ContentState::Cleanup => "cleanup",
            ContentState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Capacity class a provider's sessions are admitted under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// One-shot byte-stream transfers (torrents)
    SingleTransfer,
    /// Multi-item collections (series)
    Collection,
}

/// Per-request download options
///
/// The well-known flags are typed fields; anything a provider wants beyond those goes
/// into `extra`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Download items that carry no number (one-shots, extras)
    #[serde(default)]
    pub download_one_shot: bool,

    /// Fetch and write the cover image into every item directory
    #[serde(default = "default_true")]
    pub include_cover: bool,

    /// Replace the provider title in directory names and notifications
    #[serde(default)]
    pub title_override: Option<String>,

    /// Group items without a volume under the volume of their neighbours
    #[serde(default)]
    pub assign_empty_volumes: bool,

    /// Only download releases of this scanlation group / translator
    #[serde(default)]
    pub scanlation_group: Option<String>,

    /// Keep tags that are neither whitelisted nor genres
    #[serde(default)]
    pub include_not_matched_tags: bool,

    /// Provider specific options
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            download_one_shot: false,
            include_cover: true,
            title_override: None,
            assign_empty_volumes: false,
            scanlation_group: None,
            include_not_matched_tags: false,
            extra: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A request to acquire one piece of content
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentRequest {
    /// Provider-scoped identifier
    pub id: String,

    /// Source of the content
    pub provider: ProviderTag,

    /// Override of the configured root directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Title shown until the real title has been loaded
    #[serde(default)]
    pub display_title: Option<String>,

    /// Whether the request comes from a subscription rather than a user
    #[serde(default)]
    pub is_subscription: bool,

    /// Start downloading as soon as loading finishes and a slot is free
    #[serde(default)]
    pub start_immediately: bool,

    /// Download options
    #[serde(default)]
    pub options: DownloadOptions,
}

impl ContentRequest {
    /// Create a request with default flags
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: ProviderTag(provider.into()),
            base_dir: None,
            display_title: None,
            is_subscription: false,
            start_immediately: false,
            options: DownloadOptions::default(),
        }
    }

    /// Registry key for this request
    pub fn key(&self) -> ContentKey {
        ContentKey {
            provider: self.provider.clone(),
            id: self.id.clone(),
        }
    }
}

/// What a speed value counts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedType {
    /// Parts (pages) per second
    Parts,
    /// Bytes per second
    Bytes,
}

/// Notification severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Degraded but continuing
    Warning,
    /// Terminal failure
    Error,
}

/// User facing notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    /// Content the notification is about
    pub key: ContentKey,
    /// Short headline
    pub title: String,
    /// Detail text
    pub body: String,
    /// Severity
    pub severity: Severity,
    /// Stored in the notification centre instead of only shown live
    pub persistent: bool,
    /// When it was raised
    pub created_at: DateTime<Utc>,
}

/// Event emitted during the content lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session created and queued
    Added {
        /// Content key
        key: ContentKey,
        /// Display name
        name: String,
    },

    /// Session moved to a new state
    StateChanged {
        /// Content key
        key: ContentKey,
        /// New state
        state: ContentState,
    },

    /// Periodic progress report
    Progress {
        /// Content key
        key: ContentKey,
        /// Overall progress (0.0 to 100.0)
        percent: f32,
        /// Throughput since the previous report
        speed: f64,
        /// Unit of `speed`
        speed_type: SpeedType,
    },

    /// Size became known after loading
    SizeChanged {
        /// Content key
        key: ContentKey,
        /// Human readable size ("12 Chapters", "1.2 GiB")
        size: String,
    },

    /// Session dropped from the registry
    Removed {
        /// Content key
        key: ContentKey,
    },

    /// Notification for the user
    Notification(Notification),

    /// Downloader is shutting down
    Shutdown,
}

/// Snapshot of one session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Source
    pub provider: ProviderTag,
    /// Identifier within the source
    pub id: String,
    /// Current state
    pub state: ContentState,
    /// Display name
    pub name: String,
    /// Source page
    pub ref_url: Option<String>,
    /// Human readable size
    pub size: String,
    /// Overall progress (0.0 to 100.0)
    pub progress: f32,
    /// What `speed` counts
    pub speed_type: SpeedType,
    /// Last measured throughput
    pub speed: f64,
    /// Directory the content is written to
    pub download_dir: Option<PathBuf>,
    /// Whether the request came from a subscription
    pub is_subscription: bool,
}

/// Node of the content plan tree (volumes containing items)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentListNode {
    /// Label shown to the user
    pub label: String,
    /// Item id for leaves, None for groups
    pub id: Option<String>,
    /// Will be downloaded
    pub selected: bool,
    /// Children (items of a volume)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContentListNode>,
}
