//! Admission: per-class capacity, promotion, and the load and download task bodies.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::ContentDownloader;
use crate::error::SessionError;
use crate::session::{
    CleanupContext, ContentSession, DownloadContext, DownloadSummary, LoadContext, LoadOutcome,
};
use crate::types::{ContentState, Event, ResourceClass, Severity};

impl ContentDownloader {
    /// Configured maximum of slot-holding sessions for `class`
    pub(crate) fn capacity(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::SingleTransfer => self.config.limits.max_concurrent_transfers,
            ResourceClass::Collection => self.config.limits.max_concurrent_collections,
        }
    }

    /// Whether `session` may hold a slot next to the other sessions of its class
    ///
    /// A session that already holds a slot keeps it, so it is not counted against itself.
    pub(crate) fn has_capacity(&self, sessions: &[Arc<ContentSession>], session: &ContentSession) -> bool {
        let class = session.class();
        let active = sessions
            .iter()
            .filter(|s| !std::ptr::eq(Arc::as_ptr(*s), session))
            .filter(|s| s.class() == class && s.state().holds_slot())
            .count();
        active < self.capacity(class)
    }

    pub(crate) fn wake(&self) {
        self.queue_state.wake.notify_one();
    }

    /// Admit queued sessions, then start ready ones, until nothing moves
    ///
    /// Loading goes first so sessions with nothing new to download resolve without ever
    /// taking a download slot.
    pub(crate) async fn promote(&self) {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return;
        }

        let sessions = self.queue_state.sessions.lock().await;
        loop {
            let mut promoted = 0;

            for session in sessions.iter() {
                if session.state() == ContentState::Queued && self.has_capacity(&sessions, session) {
                    session.set_state(ContentState::Loading);
                    self.spawn_load(Arc::clone(session));
                    promoted += 1;
                }
            }

            // Ready sessions first, then those that only waited for a free slot
            let startable: Vec<&Arc<ContentSession>> = sessions
                .iter()
                .filter(|s| s.state() == ContentState::Ready)
                .chain(sessions.iter().filter(|s| {
                    s.state() == ContentState::Waiting && s.request().start_immediately
                }))
                .collect();
            for session in startable {
                if self.has_capacity(&sessions, session) {
                    self.start_download_locked(session);
                    promoted += 1;
                }
            }

            if promoted == 0 {
                break;
            }
            tracing::debug!(promoted, "promoted sessions");
        }
    }

    /// Move a Ready or Waiting session to Downloading and spawn its download task
    ///
    /// The caller holds the session table lock.
    pub(crate) fn start_download_locked(&self, session: &Arc<ContentSession>) {
        if let Err(e) = session.transition(
            "start",
            &[ContentState::Ready, ContentState::Waiting],
            ContentState::Downloading,
        ) {
            tracing::debug!(content_id = %session.key().id, error = %e, "not starting download");
            return;
        }

        let downloader = self.clone();
        let task_session = Arc::clone(session);
        let handle = self.queue_state.tracker.spawn(async move {
            downloader.run_download(task_session).await;
        });
        session.set_task(handle);
    }

    /// Spawn the load task of a session that just moved to Loading
    ///
    /// The caller holds the session table lock, so the load task cannot replace its own
    /// handle with the download handle before it is stored.
    fn spawn_load(&self, session: Arc<ContentSession>) {
        let downloader = self.clone();
        let task_session = Arc::clone(&session);
        let handle = self.queue_state.tracker.spawn(async move {
            downloader.run_load(task_session).await;
        });
        session.set_task(handle);
    }

    async fn run_load(&self, session: Arc<ContentSession>) {
        let ctx = LoadContext {
            config: &self.config,
            policy_source: self.services.policy_source.as_ref(),
            inspector: Arc::clone(&self.services.inspector),
        };

        match session.load(&ctx).await {
            LoadOutcome::Loaded => self.loaded(&session).await,
            LoadOutcome::NothingToDownload => {
                tracing::info!(
                    content_id = %session.key().id,
                    provider = %session.key().provider,
                    "nothing new to download"
                );
                self.finish(&session, false).await;
            }
            LoadOutcome::Failed(e) => {
                tracing::error!(content_id = %session.key().id, error = %e, "loading content failed");
                self.notify_failure(&session, &e);
                self.finish(&session, true).await;
            }
            LoadOutcome::Cancelled => {
                tracing::debug!(content_id = %session.key().id, "loading cancelled");
            }
        }
    }

    /// Start right away when requested and possible, otherwise wait
    async fn loaded(&self, session: &Arc<ContentSession>) {
        let sessions = self.queue_state.sessions.lock().await;
        if session.state() != ContentState::Loading {
            return;
        }

        if session.request().start_immediately
            && self.queue_state.accepting_new.load(Ordering::SeqCst)
            && self.has_capacity(&sessions, session)
        {
            session.set_state(ContentState::Ready);
            self.start_download_locked(session);
            return;
        }

        session.set_state(ContentState::Waiting);
        drop(sessions);
        self.wake();
    }

    async fn run_download(&self, session: Arc<ContentSession>) {
        let ctx = DownloadContext {
            config: &self.config,
            pipeline: &self.pipeline,
        };

        match session.download(&ctx).await {
            Ok(summary) => {
                self.notify_completion(&session, &summary);
                self.finish(&session, false).await;
            }
            Err(SessionError::Cancelled) => {
                tracing::debug!(content_id = %session.key().id, "download cancelled");
            }
            Err(e) => {
                tracing::error!(
                    content_id = %session.key().id,
                    provider = %session.key().provider,
                    error = %e,
                    "download failed"
                );
                self.notify_failure(&session, &e);
                self.finish(&session, true).await;
            }
        }
    }

    /// Clean up and drop a session whose task reached its end
    ///
    /// Does nothing when a removal already moved the session to Cleanup.
    async fn finish(&self, session: &Arc<ContentSession>, delete: bool) {
        {
            let _sessions = self.queue_state.sessions.lock().await;
            if session.state().is_stopping() {
                return;
            }
            session.set_state(ContentState::Cleanup);
        }
        self.wake();

        self.cleanup_and_terminate(session, delete).await;
    }

    pub(crate) async fn cleanup_and_terminate(&self, session: &Arc<ContentSession>, delete: bool) {
        let ctx = CleanupContext {
            packager: Arc::clone(&self.services.packager),
            packaging: self.config.download.packaging,
        };
        let report = session.cleanup(delete, &ctx).await;
        if !report.errors.is_empty() {
            session.notify(
                "Cleanup failed",
                format!(
                    "Cleaning up {} failed:\n{}",
                    session.title(),
                    report.errors.join("\n")
                ),
                Severity::Error,
            );
        }

        self.terminate(session).await;
    }

    /// Mark terminated and drop from the table
    async fn terminate(&self, session: &Arc<ContentSession>) {
        {
            let mut sessions = self.queue_state.sessions.lock().await;
            session.set_state(ContentState::Terminated);
            sessions.retain(|s| !Arc::ptr_eq(s, session));
        }
        tracing::debug!(content_id = %session.key().id, "session removed");
        self.emit(Event::Removed {
            key: session.key().clone(),
        });
        self.wake();
    }

    fn notify_failure(&self, session: &ContentSession, error: &SessionError) {
        session.notify(
            "Failed download",
            format!("Download failed for {}, because {}", session.title(), error),
            Severity::Error,
        );
    }

    fn notify_completion(&self, session: &ContentSession, summary: &DownloadSummary) {
        if summary.items.is_empty() && !self.config.download.log_empty_downloads {
            return;
        }

        let mut body = if summary.items.is_empty() {
            format!("Nothing new was downloaded for {}", session.title())
        } else {
            format!(
                "Downloaded {} new for {}: {}",
                summary.items.len(),
                session.title(),
                summary.items.join(", ")
            )
        };
        if summary.re_downloads > 0 {
            body.push_str(&format!("\nReplaced {} on disk", summary.re_downloads));
        }
        if summary.recovered > 0 {
            body.push_str(&format!(
                "\n{} parts failed once and were recovered",
                summary.recovered
            ));
        }

        session.notify("Download finished", body, Severity::Info);
    }
}
