//! Session registry, admission and control surface.
//!
//! The `ContentDownloader` struct and its methods are organized by domain:
//! - [`admission`] - Capacity accounting, promotion and the session task bodies
//! - [`control`] - Adding, removing and messaging sessions
//! - [`lifecycle`] - Admission loop startup and graceful shutdown

mod admission;
mod control;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::archive::{CbzPackager, ComicInfoInspector, Packager, VolumeInspector};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{HttpFetcher, PartFetcher};
use crate::pipeline::{DownloadPipeline, PipelineConfig};
use crate::provider::ProviderRegistry;
use crate::session::ContentSession;
use crate::tags::{JsonPolicyFile, PolicySource, StaticPolicySource};
use crate::types::{ContentInfo, ContentKey, Event};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Live sessions and the primitives coordinating them
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Live sessions in insertion order; every transition into a slot-holding state
    /// happens while this lock is held
    pub(crate) sessions: Arc<tokio::sync::Mutex<Vec<Arc<ContentSession>>>>,
    /// Flag to indicate whether new requests are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Wakes the admission loop
    pub(crate) wake: Arc<tokio::sync::Notify>,
    /// Tracks every session task so shutdown can wait for them
    pub(crate) tracker: tokio_util::task::TaskTracker,
    /// Stops the admission loop
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

/// External collaborators of every session
#[derive(Clone)]
pub struct Collaborators {
    /// Part fetch primitive
    pub fetcher: Arc<dyn PartFetcher>,
    /// Tag policy source
    pub policy_source: Arc<dyn PolicySource>,
    /// Packages finished item directories
    pub packager: Arc<dyn Packager>,
    /// Reads the volume stored in on-disk content
    pub inspector: Arc<dyn VolumeInspector>,
}

impl Collaborators {
    /// HTTP fetching, cbz packaging and the policy source named by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let policy_source: Arc<dyn PolicySource> = match &config.metadata.policy_file {
            Some(path) => Arc::new(JsonPolicyFile::new(path.clone())),
            None => Arc::new(StaticPolicySource(config.metadata.policy.clone())),
        };
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new()?),
            policy_source,
            packager: Arc::new(CbzPackager),
            inspector: Arc::new(ComicInfoInspector),
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ContentDownloader {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Providers sessions can be created for
    pub(crate) registry: Arc<ProviderRegistry>,
    /// Part fetch engine shared by every session
    pub(crate) pipeline: DownloadPipeline,
    /// Policy source, packager and volume inspector
    pub(crate) services: Collaborators,
    /// Session registry and admission state
    pub(crate) queue_state: QueueState,
}

impl std::fmt::Debug for ContentDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDownloader")
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl ContentDownloader {
    /// Create a downloader with the collaborators described by `config`
    ///
    /// Validates the configuration, creates the root directory and starts the
    /// admission loop.
    pub async fn new(config: Config, registry: ProviderRegistry) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, registry, collaborators).await
    }

    /// Create a downloader with explicit collaborators
    pub async fn with_collaborators(
        config: Config,
        registry: ProviderRegistry,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.root_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create root directory '{}': {}",
                        config.root_dir().display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events so slow subscribers rarely lag
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let pipeline = DownloadPipeline::new(
            Arc::clone(&collaborators.fetcher),
            PipelineConfig::from_config(&config),
        );

        tracing::info!(
            root_dir = %config.root_dir().display(),
            providers = registry.tags().count(),
            part_workers = pipeline.config().workers,
            max_concurrent_transfers = config.limits.max_concurrent_transfers,
            max_concurrent_collections = config.limits.max_concurrent_collections,
            "content downloader initialized"
        );

        let downloader = Self {
            event_tx,
            config: Arc::new(config),
            registry: Arc::new(registry),
            pipeline,
            services: collaborators,
            queue_state: QueueState {
                sessions: Arc::new(tokio::sync::Mutex::new(Vec::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                wake: Arc::new(tokio::sync::Notify::new()),
                tracker: tokio_util::task::TaskTracker::new(),
                shutdown: tokio_util::sync::CancellationToken::new(),
            },
        };

        downloader.start_admission_loop();
        Ok(downloader)
    }

    /// Subscribe to the event stream
    ///
    /// Every subscriber receives every event emitted after it subscribed. A subscriber
    /// that falls more than 1000 events behind misses the oldest ones.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a [`Stream`](futures::Stream)
    pub fn event_stream(&self) -> tokio_stream::wrappers::BroadcastStream<Event> {
        tokio_stream::wrappers::BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Configuration the downloader runs with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Snapshot of every live session, in insertion order
    pub async fn current_downloads(&self) -> Vec<ContentInfo> {
        let sessions = self.queue_state.sessions.lock().await;
        sessions.iter().map(|s| s.info()).collect()
    }

    /// Live session for `key`
    pub async fn session(&self, key: &ContentKey) -> Option<Arc<ContentSession>> {
        let sessions = self.queue_state.sessions.lock().await;
        sessions.iter().find(|s| s.key() == key).cloned()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
