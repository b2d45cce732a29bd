//! # content-dl
//!
//! Content acquisition orchestrator for serialized publications (series of chapters) and
//! single-blob transfers (torrents).
//!
//! ## Design Philosophy
//!
//! content-dl is designed to be:
//! - **Provider agnostic** - Sources plug in through the [`InfoProvider`] trait
//! - **Disk aware** - Only what is missing on disk is fetched
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use content_dl::{
//!     Collection, Config, ContentDownloader, ContentRequest, InfoProvider, Item,
//!     ProviderRegistry, ProviderTag, ResourceClass,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Example(String);
//!
//! #[async_trait::async_trait]
//! impl InfoProvider for Example {
//!     fn provider(&self) -> ProviderTag {
//!         ProviderTag::new("example")
//!     }
//!     fn title(&self) -> String {
//!         self.0.clone()
//!     }
//!     async fn load_info(&self, _cancel: &CancellationToken) -> content_dl::Result<Collection> {
//!         Ok(Collection::chapters(&self.0, "Example", vec![Item::numbered("c1", "1")]))
//!     }
//!     async fn part_urls(&self, _item: &Item) -> content_dl::Result<Vec<String>> {
//!         Ok(vec!["https://example.com/1.png".to_string()])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ProviderRegistry::new();
//!     registry.register("example", ResourceClass::Collection, |request: &ContentRequest| {
//!         Ok(Arc::new(Example(request.id.clone())) as Arc<dyn InfoProvider>)
//!     });
//!
//!     let downloader = ContentDownloader::new(Config::default(), registry).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut request = ContentRequest::new("example", "series-1");
//!     request.start_immediately = true;
//!     downloader.download(request).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Embedded metadata and archive packaging
pub mod archive;
/// Configuration types
pub mod config;
/// Collection and item model
pub mod content;
/// Session registry, admission and control surface
pub mod downloader;
/// Error types
pub mod error;
/// Part fetch primitive
pub mod fetch;
/// Bounded-parallel part fetching
pub mod pipeline;
/// Content source seam
pub mod provider;
/// Disk reconciliation
pub mod reconcile;
/// Rate-limit handling around the fetch primitive
pub mod retry;
/// Per-request orchestration
pub mod session;
/// Tag policy resolution
pub mod tags;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{CbzPackager, ComicInfo, ComicInfoInspector, Packager, VolumeInspector};
pub use config::{Config, DownloadConfig, LimitsConfig, MetadataConfig};
pub use content::{Collection, ContentShape, Item};
pub use downloader::{Collaborators, ContentDownloader};
pub use error::{Error, FetchError, Result, SessionError};
pub use fetch::{FetchRequest, HttpFetcher, PartFetcher};
pub use pipeline::{DownloadPipeline, PipelineConfig, PipelineReport};
pub use provider::{InfoProvider, ItemContext, ProviderFactory, ProviderRegistry};
pub use reconcile::{DiskReconciler, NamingConvention, OnDiskItem, ReconcilePlan};
pub use session::{ContentSession, DownloadSummary, LoadOutcome, Message, MessageReply};
pub use tags::{
    AgeRating, JsonPolicyFile, PolicySource, StaticPolicySource, TagPolicy, TagRecord,
    TagResolver,
};
pub use types::{
    ContentInfo, ContentKey, ContentListNode, ContentRequest, ContentState, DownloadOptions,
    Event, Notification, ProviderTag, ResourceClass, Severity, SpeedType,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use content_dl::{Config, ContentDownloader, ProviderRegistry, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = ContentDownloader::new(Config::default(), ProviderRegistry::new()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: ContentDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
