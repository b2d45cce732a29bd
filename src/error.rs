//! Error types for content-dl
//!
//! This module provides the error handling for the library:
//! - A crate-wide [`Error`] enum with contextual variants
//! - [`SessionError`] for state-machine and pipeline failures of one session
//! - [`FetchError`] for the part fetch primitive (HTTP status, rate limiting)

use crate::types::{ContentKey, ProviderTag};
use thiserror::Error;

/// Result type alias for content-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for content-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_parts")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Part fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Session state machine or pipeline error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A live session already exists for this content
    #[error("content {0} is already being downloaded")]
    Duplicate(ContentKey),

    /// No live or queued session exists for this content
    #[error("content {0} not found")]
    NotFound(ContentKey),

    /// No factory has been registered for the provider
    #[error("unknown provider: {0}")]
    UnknownProvider(ProviderTag),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Error reported by an info provider (scraping layer)
    #[error("provider error: {0}")]
    Provider(String),

    /// Archive packaging or inspection failed
    #[error("archive error: {0}")]
    Archive(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a single content session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Cannot perform operation in current state
    #[error("cannot {operation} content {key} in state {current_state}")]
    InvalidState {
        /// The content the operation was attempted on
        key: ContentKey,
        /// The operation that was attempted (e.g., "select", "start")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },

    /// The session is already being cancelled or cleaned up
    #[error("content {key} is already stopping")]
    AlreadyStopping {
        /// The content that is already stopping
        key: ContentKey,
    },

    /// Loading the content information failed
    #[error("failed to load info for {key}: {reason}")]
    LoadFailed {
        /// The content whose info failed to load
        key: ContentKey,
        /// The reason reported by the provider
        reason: String,
    },

    /// Loading the content information did not finish in time
    #[error("loading info for {key} timed out")]
    LoadTimedOut {
        /// The content whose info load timed out
        key: ContentKey,
    },

    /// A part failed on its first attempt and again on its retry
    #[error("final download failed for part {index} ({url}): {reason}")]
    PartFailed {
        /// 1-based part index within the item
        index: usize,
        /// The location that failed
        url: String,
        /// The last failure reason
        reason: String,
    },

    /// The provider could not list the parts of an item
    #[error("failed to list parts of item {item_id}: {reason}")]
    ItemFailed {
        /// The item whose parts could not be listed
        item_id: String,
        /// The reason reported by the provider
        reason: String,
    },

    /// Writing a fetched part to disk failed
    #[error("failed to write part {index} to {path}: {reason}")]
    WriteFailed {
        /// 1-based part index within the item
        index: usize,
        /// Destination path
        path: std::path::PathBuf,
        /// Underlying I/O error text
        reason: String,
    },

    /// The session was cancelled
    #[error("download cancelled")]
    Cancelled,
}

/// Errors raised by the part fetch primitive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The remote asked us to slow down (HTTP 429 or provider equivalent)
    #[error("rate limited (retry after: {})", retry_after.as_deref().unwrap_or("unspecified"))]
    RateLimited {
        /// Raw value of the retry-after indication, if any
        retry_after: Option<String>,
    },

    /// Rate limited again right after sleeping for the advertised period
    #[error("hit rate limit too many times for {url}")]
    RateLimitExceeded {
        /// The location that kept being rate limited
        url: String,
    },

    /// Non-success HTTP status
    #[error("bad status {status} for {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested location
        url: String,
    },

    /// Connection, timeout or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Aborted by cancellation
    #[error("fetch cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is the result of a cooperative cancellation
    ///
    /// Cancelled sessions are cleaned up by whoever cancelled them, so callers use this
    /// to avoid raising failure notifications for them.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::Cancelled) | Error::Fetch(FetchError::Cancelled)
        )
    }
}
