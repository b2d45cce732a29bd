//! Loading phase: content info, tag policy, disk reconciliation

use super::ContentSession;
use crate::archive::VolumeInspector;
use crate::config::Config;
use crate::error::{Error, SessionError};
use crate::reconcile::{DiskReconciler, NamingConvention, fill_empty_volumes};
use crate::tags::{PolicySource, TagResolver};
use crate::types::Severity;
use std::sync::Arc;
use std::time::Instant;

/// How loading ended
#[derive(Debug)]
pub enum LoadOutcome {
    /// Something new has to be downloaded
    Loaded,
    /// Everything wanted is already on disk
    NothingToDownload,
    /// Loading failed or timed out
    Failed(SessionError),
    /// The session was cancelled while loading
    Cancelled,
}

/// Collaborators of the loading phase
pub(crate) struct LoadContext<'a> {
    pub config: &'a Config,
    pub policy_source: &'a dyn PolicySource,
    pub inspector: Arc<dyn VolumeInspector>,
}

impl ContentSession {
    /// Load the collection, resolve the tag policy and compute what is missing on disk
    ///
    /// Loading races the session's cancellation and the configured timeout; whichever
    /// finishes first wins.
    pub(crate) async fn load(&self, ctx: &LoadContext<'_>) -> LoadOutcome {
        let start = Instant::now();
        tracing::info!(
            content_id = %self.key.id,
            provider = %self.key.provider,
            "loading content info"
        );

        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return LoadOutcome::Cancelled,
            loaded = tokio::time::timeout(
                ctx.config.download.load_info_timeout,
                self.provider.load_info(&self.cancel),
            ) => loaded,
        };

        let mut collection = match loaded {
            Err(_) => {
                return LoadOutcome::Failed(SessionError::LoadTimedOut {
                    key: self.key.clone(),
                });
            }
            Ok(Err(_)) if self.cancel.is_cancelled() => {
                return LoadOutcome::Cancelled;
            }
            Ok(Err(e)) => {
                return LoadOutcome::Failed(SessionError::LoadFailed {
                    key: self.key.clone(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(collection)) => collection,
        };

        tracing::debug!(
            content_id = %self.key.id,
            items = collection.items.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "content info loaded"
        );

        let resolver = self.resolve_policy(ctx.policy_source).await;

        let options = &self.request.options;
        if let Some(title) = options.title_override.as_ref().filter(|t| !t.is_empty()) {
            collection.title = title.clone();
        }
        if options.assign_empty_volumes && !collection.is_single_transfer() {
            fill_empty_volumes(&mut collection.items);
        }

        let naming = self.naming_for(ctx.config);
        let base = self
            .request
            .base_dir
            .clone()
            .unwrap_or_else(|| ctx.config.root_dir().clone());
        let collection_dir = naming.collection_dir(&base, &collection.title);

        let reconciler = DiskReconciler::new(
            naming.clone(),
            Arc::clone(&ctx.inspector),
            ctx.config.download.long_scan_threshold,
        )
        .with_item_directories(!ctx.config.download.packaging);
        let plan = {
            let collection = collection.clone();
            let dir = collection_dir.clone();
            let options = options.clone();
            tokio::task::spawn_blocking(move || reconciler.plan(&dir, &collection, &options)).await
        };
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                return LoadOutcome::Failed(SessionError::LoadFailed {
                    key: self.key.clone(),
                    reason: format!("disk check failed: {e}"),
                });
            }
        };

        if self.cancel.is_cancelled() {
            return LoadOutcome::Cancelled;
        }

        if plan.slow {
            self.notify(
                "Slow disk check",
                format!(
                    "Checking which content of {} must be downloaded took {}s",
                    collection.title,
                    plan.elapsed.as_secs()
                ),
                Severity::Warning,
            );
        }

        tracing::info!(
            content_id = %self.key.id,
            all = collection.items.len(),
            to_download = plan.to_download.len(),
            re_downloads = plan.to_remove.len(),
            on_disk = plan.on_disk.len(),
            "content checked against disk"
        );

        let size = collection.size_label(plan.to_download.len());
        let nothing_new = plan.is_empty();
        {
            let mut inner = self.inner();
            inner.collection = Some(collection);
            inner.collection_dir = Some(collection_dir);
            inner.naming = naming;
            inner.resolver = resolver;
            inner.to_download = plan.to_download;
            inner.to_remove = plan.to_remove;
        }
        self.set_size(size);

        if nothing_new {
            LoadOutcome::NothingToDownload
        } else {
            LoadOutcome::Loaded
        }
    }

    fn naming_for(&self, config: &Config) -> NamingConvention {
        let Some(pattern) = &config.download.content_pattern else {
            return self.provider.naming();
        };
        NamingConvention::with_pattern(pattern).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid content pattern, using the provider default");
            self.provider.naming()
        })
    }

    /// Tag resolver for this session; a failing policy source degrades metadata only
    async fn resolve_policy(&self, source: &dyn PolicySource) -> TagResolver {
        let include_unmatched = self.request.options.include_not_matched_tags;
        match source.load().await {
            Ok(policy) => TagResolver::new(Some(&policy), include_unmatched),
            Err(e) => {
                self.warn_policy_unavailable(&e);
                TagResolver::new(None, include_unmatched)
            }
        }
    }

    fn warn_policy_unavailable(&self, error: &Error) {
        let first = {
            let mut inner = self.inner();
            !std::mem::replace(&mut inner.policy_warned, true)
        };
        if !first {
            return;
        }
        tracing::warn!(
            content_id = %self.key.id,
            error = %error,
            "failed to load tag preferences, metadata will lack genres and tags"
        );
        self.notify(
            "Preferences unavailable",
            format!(
                "Tag preferences could not be loaded for {}; genres, tags and age rating are not set",
                self.title()
            ),
            Severity::Warning,
        );
    }
}
