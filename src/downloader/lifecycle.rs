//! Admission loop startup and shutdown coordination.

use std::sync::atomic::Ordering;

use super::ContentDownloader;
use crate::error::Result;
use crate::types::{ContentKey, Event};

impl ContentDownloader {
    /// Start the admission loop
    ///
    /// The loop runs a promotion pass whenever it is woken: after a request is added,
    /// after a session leaves a slot-holding state, and after a StartDownload that found
    /// no free slot. It stops when the downloader shuts down.
    pub(crate) fn start_admission_loop(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move {
            loop {
                downloader.promote().await;
                tokio::select! {
                    _ = downloader.queue_state.shutdown.cancelled() => break,
                    _ = downloader.queue_state.wake.notified() => {}
                }
            }
            tracing::debug!("admission loop stopped");
        })
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new requests and promoting queued ones
    /// 2. Removes every live session with deletion of its partial output
    /// 3. Waits up to the configured grace period for all session tasks to finish
    /// 4. Stops the admission loop and emits [`Event::Shutdown`]
    ///
    /// Sessions still running after the grace period are abandoned with a warning; their
    /// output may be inconsistent.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new requests
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);

        // 2. Cancel every session that is not already stopping
        let keys: Vec<ContentKey> = {
            let sessions = self.queue_state.sessions.lock().await;
            sessions
                .iter()
                .filter(|s| !s.state().is_stopping())
                .map(|s| s.key().clone())
                .collect()
        };
        for key in &keys {
            if let Err(e) = self.remove(key, true).await {
                tracing::debug!(content_id = %key.id, error = %e, "session already stopping");
            }
        }
        tracing::info!(cancelled = keys.len(), "Signaled cancellation to all sessions");

        // 3. Wait for session tasks with the grace period
        self.queue_state.tracker.close();
        let grace = self.config.download.shutdown_grace;
        match tokio::time::timeout(grace, self.queue_state.tracker.wait()).await {
            Ok(()) => tracing::info!("All sessions stopped"),
            Err(_) => {
                let sessions = self.queue_state.sessions.lock().await;
                for session in sessions.iter() {
                    tracing::warn!(
                        content_id = %session.key().id,
                        provider = %session.key().provider,
                        state = %session.state(),
                        grace_secs = grace.as_secs(),
                        "session did not stop in time, its output may be inconsistent"
                    );
                }
            }
        }

        // 4. Stop the admission loop and announce shutdown
        self.queue_state.shutdown.cancel();
        self.emit(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
