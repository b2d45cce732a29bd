//! Session control: add, remove, and the message surface.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::ContentDownloader;
use crate::error::{Error, Result, SessionError};
use crate::session::{ContentSession, Message, MessageReply};
use crate::types::{ContentKey, ContentRequest, ContentState, Event};

impl ContentDownloader {
    /// Queue a request
    ///
    /// The session starts in `Queued` and is admitted by the admission loop. Requests for
    /// content that already has a live session are rejected, never merged.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown started
    /// - [`Error::UnknownProvider`] when no factory is registered for the provider
    /// - [`Error::Duplicate`] when a live session exists for the same key
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use content_dl::*;
    /// # async fn example(downloader: ContentDownloader) -> Result<()> {
    /// let mut request = ContentRequest::new("mangadex", "a1c7c817");
    /// request.start_immediately = true;
    /// let key = downloader.download(request).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn download(&self, request: ContentRequest) -> Result<ContentKey> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let (provider, class) = self.registry.create(&request)?;
        let key = request.key();

        {
            let mut sessions = self.queue_state.sessions.lock().await;
            if sessions.iter().any(|s| s.key() == &key) {
                return Err(Error::Duplicate(key));
            }

            let session = Arc::new(ContentSession::new(
                request,
                provider,
                class,
                self.event_tx.clone(),
            ));
            self.emit(Event::Added {
                key: key.clone(),
                name: session.title(),
            });
            sessions.push(session);
        }

        tracing::info!(
            content_id = %key.id,
            provider = %key.provider,
            "content queued"
        );
        self.wake();
        Ok(key)
    }

    /// Stop a session and remove it once its cleanup finished
    ///
    /// The session is cancelled right away; cleanup runs in the background with `delete`
    /// deciding whether its output is removed or kept. Listen for [`Event::Removed`] to
    /// know when it is gone.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when no live or queued session exists for `key`
    /// - [`SessionError::AlreadyStopping`] when the session is already being cleaned up
    pub async fn remove(&self, key: &ContentKey, delete: bool) -> Result<()> {
        let (session, task) = {
            let sessions = self.queue_state.sessions.lock().await;
            let Some(session) = sessions.iter().find(|s| s.key() == key) else {
                return Err(Error::NotFound(key.clone()));
            };
            if session.state().is_stopping() {
                return Err(SessionError::AlreadyStopping { key: key.clone() }.into());
            }

            session.set_state(ContentState::Cleanup);
            session.cancel_token().cancel();
            (Arc::clone(session), session.take_task())
        };

        tracing::info!(content_id = %key.id, provider = %key.provider, delete, "removing content");
        self.wake();

        let downloader = self.clone();
        self.queue_state.tracker.spawn(async move {
            // The session task stops at its next suspension point
            if let Some(task) = task
                && let Err(e) = task.await
            {
                tracing::warn!(content_id = %session.key().id, error = %e, "session task failed");
            }
            downloader.cleanup_and_terminate(&session, delete).await;
        });
        Ok(())
    }

    /// Send a control message to a session
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] when no live session exists for `key`
    /// - [`SessionError::InvalidState`] when the session cannot take the message now
    pub async fn message(&self, key: &ContentKey, message: Message) -> Result<MessageReply> {
        let session = self
            .session(key)
            .await
            .ok_or_else(|| Error::NotFound(key.clone()))?;

        match message {
            Message::ListContent => Ok(MessageReply::Content(session.content_list())),
            Message::SetSelection(ids) => {
                session.set_selection(ids)?;
                Ok(MessageReply::Accepted)
            }
            Message::StartDownload => {
                self.start_download(&session).await?;
                Ok(MessageReply::Accepted)
            }
        }
    }

    /// Start now when a slot is free, otherwise mark Ready for the next promotion
    async fn start_download(&self, session: &Arc<ContentSession>) -> std::result::Result<(), SessionError> {
        let sessions = self.queue_state.sessions.lock().await;
        match session.state() {
            ContentState::Downloading => {
                tracing::debug!(content_id = %session.key().id, "already downloading");
                return Ok(());
            }
            ContentState::Ready | ContentState::Waiting => {}
            other => {
                return Err(SessionError::InvalidState {
                    key: session.key().clone(),
                    operation: "start".to_string(),
                    current_state: other.to_string(),
                });
            }
        }

        if self.queue_state.accepting_new.load(Ordering::SeqCst)
            && self.has_capacity(&sessions, session)
        {
            self.start_download_locked(session);
            return Ok(());
        }

        session.set_state(ContentState::Ready);
        drop(sessions);
        tracing::debug!(content_id = %session.key().id, "no free slot, download queued");
        self.wake();
        Ok(())
    }
}
