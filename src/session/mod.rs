//! Per-request orchestration
//!
//! A [`ContentSession`] owns one [`ContentRequest`] and walks it through
//! `Queued → Loading → {Ready | Waiting} → Downloading → Cleanup → Terminated`.
//! The session only does the work of each phase; which phase may run when is decided by
//! the downloader, which performs every transition into `Loading` and `Downloading`
//! while holding its session table lock.
//!
//! - [`load`](ContentSession::load): load info, resolve the tag policy, reconcile with disk
//! - [`download`](ContentSession::download): fetch the wanted items one after another
//! - [`cleanup`](ContentSession::cleanup): keep and package, or delete, the output
//! - [`content_list`](ContentSession::content_list): the content plan grouped by volume

mod cleanup;
mod download;
mod load;
mod message;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use cleanup::CleanupReport;
pub use download::DownloadSummary;
pub use load::LoadOutcome;
pub use message::{Message, MessageReply};

pub(crate) use cleanup::CleanupContext;
pub(crate) use download::DownloadContext;
pub(crate) use load::LoadContext;

use crate::content::{Collection, Item};
use crate::error::SessionError;
use crate::pipeline::ProgressCounters;
use crate::provider::InfoProvider;
use crate::reconcile::NamingConvention;
use crate::tags::TagResolver;
use crate::types::{
    ContentInfo, ContentKey, ContentRequest, ContentState, Event, Notification, ResourceClass,
    Severity, SpeedType,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Mutable part of a session
#[derive(Debug)]
struct SessionInner {
    state: ContentState,
    collection: Option<Collection>,
    collection_dir: Option<PathBuf>,
    naming: NamingConvention,
    resolver: TagResolver,
    to_download: Vec<Item>,
    to_remove: Vec<PathBuf>,
    user_selected: Vec<String>,
    has_downloaded: Vec<PathBuf>,
    finished: Vec<PathBuf>,
    completed: bool,
    size: String,
    policy_warned: bool,
}

/// Live orchestration instance for one request
pub struct ContentSession {
    key: ContentKey,
    request: ContentRequest,
    provider: Arc<dyn InfoProvider>,
    class: ResourceClass,
    cancel: CancellationToken,
    counters: Arc<ProgressCounters>,
    event_tx: broadcast::Sender<Event>,
    inner: Mutex<SessionInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ContentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentSession")
            .field("key", &self.key)
            .field("class", &self.class)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContentSession {
    /// Create a queued session
    pub fn new(
        request: ContentRequest,
        provider: Arc<dyn InfoProvider>,
        class: ResourceClass,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let naming = provider.naming();
        Self {
            key: request.key(),
            request,
            provider,
            class,
            cancel: CancellationToken::new(),
            counters: Arc::new(ProgressCounters::new()),
            event_tx,
            inner: Mutex::new(SessionInner {
                state: ContentState::Queued,
                collection: None,
                collection_dir: None,
                naming,
                resolver: TagResolver::default(),
                to_download: Vec::new(),
                to_remove: Vec::new(),
                user_selected: Vec::new(),
                has_downloaded: Vec::new(),
                finished: Vec::new(),
                completed: false,
                size: String::new(),
                policy_warned: false,
            }),
            task: Mutex::new(None),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry key
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// The request this session serves
    pub fn request(&self) -> &ContentRequest {
        &self.request
    }

    /// Capacity class
    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Current state
    pub fn state(&self) -> ContentState {
        self.inner().state
    }

    /// Cancellation scope of the session
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shared progress counters
    pub fn counters(&self) -> &Arc<ProgressCounters> {
        &self.counters
    }

    /// Move to `state` and announce it
    pub(crate) fn set_state(&self, state: ContentState) {
        let previous = {
            let mut inner = self.inner();
            std::mem::replace(&mut inner.state, state)
        };
        if previous == state {
            return;
        }
        tracing::debug!(
            content_id = %self.key.id,
            provider = %self.key.provider,
            from = %previous,
            state = %state,
            "state changed"
        );
        self.emit(Event::StateChanged {
            key: self.key.clone(),
            state,
        });
    }

    /// Move to `to` only when the current state is one of `from`
    pub(crate) fn transition(
        &self,
        operation: &str,
        from: &[ContentState],
        to: ContentState,
    ) -> Result<(), SessionError> {
        let current = self.state();
        if !from.contains(&current) {
            return Err(SessionError::InvalidState {
                key: self.key.clone(),
                operation: operation.to_string(),
                current_state: current.to_string(),
            });
        }
        self.set_state(to);
        Ok(())
    }

    /// Remember the task currently working for this session
    pub(crate) fn set_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Take the handle of the task working for this session, if any
    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Display title: override, loaded title, request hint, provider placeholder
    pub fn title(&self) -> String {
        if let Some(title) = &self.request.options.title_override {
            return title.clone();
        }
        if let Some(collection) = &self.inner().collection {
            return collection.title.clone();
        }
        self.request
            .display_title
            .clone()
            .unwrap_or_else(|| self.provider.title())
    }

    /// Directory the content is written to, known once loaded
    pub fn download_dir(&self) -> Option<PathBuf> {
        self.inner().collection_dir.clone()
    }

    /// Item ids the user picked, empty when no selection was made
    pub fn user_selection(&self) -> Vec<String> {
        self.inner().user_selected.clone()
    }

    /// Items planned for download (before the user selection is applied)
    pub fn planned_items(&self) -> Vec<Item> {
        self.inner().to_download.clone()
    }

    /// On-disk copies that a successful download replaces
    pub fn planned_removals(&self) -> Vec<PathBuf> {
        self.inner().to_remove.clone()
    }

    /// Snapshot for listings
    pub fn info(&self) -> ContentInfo {
        let (percent, speed) = self.counters.last_reported();
        let inner = self.inner();
        let speed_type = match &inner.collection {
            Some(collection) if collection.is_single_transfer() => SpeedType::Bytes,
            _ => SpeedType::Parts,
        };
        let state = inner.state;
        let size = inner.size.clone();
        let download_dir = inner.collection_dir.clone();
        drop(inner);

        ContentInfo {
            provider: self.key.provider.clone(),
            id: self.key.id.clone(),
            state,
            name: self.title(),
            ref_url: self.provider.ref_url(),
            size,
            progress: percent,
            speed_type,
            speed: if state == ContentState::Downloading { speed } else { 0.0 },
            download_dir,
            is_subscription: self.request.is_subscription,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Raise a notification; subscription requests get persistent ones
    pub(crate) fn notify(&self, title: impl Into<String>, body: impl Into<String>, severity: Severity) {
        self.emit(Event::Notification(Notification {
            key: self.key.clone(),
            title: title.into(),
            body: body.into(),
            severity,
            persistent: self.request.is_subscription,
            created_at: Utc::now(),
        }));
    }

    fn set_size(&self, size: String) {
        self.inner().size = size.clone();
        self.emit(Event::SizeChanged {
            key: self.key.clone(),
            size,
        });
    }
}
