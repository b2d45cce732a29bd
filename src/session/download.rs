//! Download phase: items one after another, parts through the pipeline

use super::ContentSession;
use crate::config::Config;
use crate::content::{Collection, ContentShape, Item};
use crate::error::SessionError;
use crate::fetch::FetchRequest;
use crate::pipeline::{
    DirectorySink, DownloadPipeline, PartLayout, PartTask, ProgressReporterParams,
    spawn_progress_reporter,
};
use crate::provider::ItemContext;
use crate::reconcile::{NamingConvention, has_duplicate_numbers};
use crate::tags::TagResolver;
use crate::types::SpeedType;
use crate::utils::same_label;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Items with fewer parts than this are followed by a short pause
const SHORT_ITEM_PARTS: usize = 5;

/// Collaborators of the download phase
pub(crate) struct DownloadContext<'a> {
    pub config: &'a Config,
    pub pipeline: &'a DownloadPipeline,
}

/// What a finished download produced
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Labels of the items downloaded, in download order
    pub items: Vec<String>,
    /// Items skipped because the provider listed no parts
    pub skipped: usize,
    /// Parts written
    pub parts: usize,
    /// Bytes written
    pub bytes: u64,
    /// Parts that failed once and were recovered by their retry
    pub recovered: usize,
    /// On-disk copies replaced by this download
    pub re_downloads: usize,
    /// Wall time of the download phase
    pub elapsed: Duration,
}

/// Everything the item loop needs, taken from the session in one go
struct DownloadPlan {
    collection: Collection,
    collection_dir: PathBuf,
    naming: NamingConvention,
    resolver: TagResolver,
    items: Vec<Item>,
    re_downloads: usize,
}

impl ContentSession {
    /// Apply the user selection to the planned items and removals
    ///
    /// Without a selection nothing changes. Replaced copies are only removed for items
    /// that are still going to be downloaded.
    pub(crate) fn apply_selection(&self) {
        let mut inner = self.inner();
        if inner.user_selected.is_empty() {
            return;
        }

        let before = inner.to_download.len();
        let selected = std::mem::take(&mut inner.user_selected);
        inner.to_download.retain(|item| selected.contains(&item.id));
        tracing::debug!(
            content_id = %self.key.id,
            size = before,
            new_size = inner.to_download.len(),
            "content filtered by user selection"
        );

        let naming = inner.naming.clone();
        let numbers: Vec<String> = inner
            .to_download
            .iter()
            .filter_map(|item| item.number().map(str::to_string))
            .collect();
        inner.to_remove.retain(|path| {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                return false;
            };
            naming
                .parse(stem)
                .and_then(|parsed| parsed.number)
                .is_some_and(|number| numbers.iter().any(|n| same_label(n, &number)))
        });
        inner.user_selected = selected;
    }

    fn download_plan(&self) -> Result<DownloadPlan, SessionError> {
        let inner = self.inner();
        let (Some(collection), Some(collection_dir)) = (&inner.collection, &inner.collection_dir)
        else {
            return Err(SessionError::InvalidState {
                key: self.key.clone(),
                operation: "download".to_string(),
                current_state: inner.state.to_string(),
            });
        };
        Ok(DownloadPlan {
            collection: collection.clone(),
            collection_dir: collection_dir.clone(),
            naming: inner.naming.clone(),
            resolver: inner.resolver.clone(),
            items: inner.to_download.clone(),
            re_downloads: inner.to_remove.len(),
        })
    }

    /// Download every planned item
    ///
    /// Items are processed sequentially; the first failing item aborts the download and
    /// the error is returned so the caller can clean up with deletion.
    pub(crate) async fn download(&self, ctx: &DownloadContext<'_>) -> Result<DownloadSummary, SessionError> {
        self.apply_selection();
        let plan = self.download_plan()?;
        let start = Instant::now();

        tracing::info!(
            content_id = %self.key.id,
            provider = %self.key.provider,
            all = plan.collection.items.len(),
            to_download = plan.items.len(),
            re_downloads = plan.re_downloads,
            into = %plan.collection_dir.display(),
            "downloading content"
        );

        self.counters.set_items_total(plan.items.len());
        let (speed_type, total_bytes) = match plan.collection.shape {
            ContentShape::Chapters => (SpeedType::Parts, None),
            ContentShape::SingleTransfer { total_bytes } => (SpeedType::Bytes, Some(total_bytes)),
        };

        let reporter_token = self.cancel.child_token();
        let reporter = spawn_progress_reporter(ProgressReporterParams {
            key: self.key.clone(),
            speed_type,
            total_bytes,
            interval: ctx.config.download.progress_interval,
            counters: std::sync::Arc::clone(&self.counters),
            event_tx: self.event_tx.clone(),
            cancel_token: reporter_token.clone(),
        });

        let result = self.download_items(ctx, &plan).await;

        reporter_token.cancel();
        let _ = reporter.await;

        let mut summary = result?;
        summary.re_downloads = plan.re_downloads;
        summary.elapsed = start.elapsed();
        self.inner().completed = true;
        self.counters.publish(self.counters.percent(total_bytes), 0.0);

        tracing::info!(
            content_id = %self.key.id,
            items = summary.items.len(),
            parts = summary.parts,
            recovered = summary.recovered,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "finished downloading content"
        );
        Ok(summary)
    }

    async fn download_items(
        &self,
        ctx: &DownloadContext<'_>,
        plan: &DownloadPlan,
    ) -> Result<DownloadSummary, SessionError> {
        let include_volume = has_duplicate_numbers(&plan.collection.items);
        let mut summary = DownloadSummary::default();

        for item in &plan.items {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let dir = if plan.collection.is_single_transfer() {
                plan.collection_dir.clone()
            } else {
                plan.naming
                    .item_dir(&plan.collection_dir, &plan.collection.title, item, include_volume)
            };

            match self.download_item(ctx, plan, item, &dir).await? {
                Some(report) => {
                    summary.items.push(if plan.collection.is_single_transfer() {
                        plan.collection.title.clone()
                    } else {
                        item.label()
                    });
                    summary.parts += report.parts;
                    summary.bytes += report.bytes;
                    summary.recovered += report.recovered;
                }
                None => summary.skipped += 1,
            }
            self.counters.record_item();
        }

        Ok(summary)
    }

    /// Download one item into `dir`; None when the provider listed no parts
    async fn download_item(
        &self,
        ctx: &DownloadContext<'_>,
        plan: &DownloadPlan,
        item: &Item,
        dir: &Path,
    ) -> Result<Option<crate::pipeline::PipelineReport>, SessionError> {
        let single = plan.collection.is_single_transfer();

        let urls = self
            .provider
            .part_urls(item)
            .await
            .map_err(|e| SessionError::ItemFailed {
                item_id: item.id.clone(),
                reason: e.to_string(),
            })?;
        if urls.is_empty() {
            tracing::warn!(
                content_id = %self.key.id,
                item_id = %item.id,
                "item has no downloadable parts, skipping"
            );
            return Ok(None);
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SessionError::WriteFailed {
                index: 0,
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
        // A transfer writes into the collection directory, so only its files are its own
        if !single {
            self.record_created(&[dir.to_path_buf()]);
        }

        if !single {
            let ref_url = self.provider.ref_url();
            let item_ctx = ItemContext {
                dir,
                series: &plan.collection.title,
                resolver: &plan.resolver,
                ref_url: ref_url.as_deref(),
            };
            if let Err(e) = self.provider.write_item_metadata(item, &item_ctx).await {
                tracing::warn!(
                    content_id = %self.key.id,
                    item_id = %item.id,
                    error = %e,
                    "error writing metadata"
                );
            }

            if self.request.options.include_cover
                && let Some(cover_url) = &plan.collection.cover_url
            {
                self.download_cover(ctx, &plan.naming, cover_url, dir).await?;
            }
        }

        tracing::debug!(
            content_id = %self.key.id,
            item_id = %item.id,
            parts = urls.len(),
            "downloading parts"
        );

        let part_count = urls.len();
        let tasks: Vec<PartTask> = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| PartTask::new(i + 1, self.provider.customize_request(FetchRequest::new(url))))
            .collect();
        let layout = if single {
            PartLayout::TransferFiles
        } else {
            PartLayout::Pages
        };
        let sink = DirectorySink::new(dir, plan.naming.clone(), layout);

        let result = ctx
            .pipeline
            .run(tasks, &sink, &self.counters, &self.cancel)
            .await;
        let written = sink.written();
        if single {
            self.record_created(&written);
        }
        let report = result?;
        if single {
            self.record_finished(&written);
        } else {
            self.record_finished(&[dir.to_path_buf()]);
        }

        if part_count < SHORT_ITEM_PARTS && !single {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(ctx.config.download.short_item_pause) => {}
            }
        }

        Ok(Some(report))
    }

    fn record_created(&self, paths: &[PathBuf]) {
        let mut inner = self.inner();
        for path in paths {
            if !inner.has_downloaded.contains(path) {
                inner.has_downloaded.push(path.clone());
            }
        }
    }

    /// Output whose parts were all written
    fn record_finished(&self, paths: &[PathBuf]) {
        let mut inner = self.inner();
        for path in paths {
            if !inner.finished.contains(path) {
                inner.finished.push(path.clone());
            }
        }
    }

    /// Best effort; a missing cover never fails the item
    async fn download_cover(
        &self,
        ctx: &DownloadContext<'_>,
        naming: &NamingConvention,
        url: &str,
        dir: &Path,
    ) -> Result<(), SessionError> {
        let request = self.provider.customize_request(FetchRequest::new(url));
        match ctx.pipeline.fetch_one(&request, &self.cancel).await {
            Ok(bytes) => {
                let path = dir.join(naming.cover_file_name(url));
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write cover");
                }
                Ok(())
            }
            Err(crate::error::FetchError::Cancelled) => Err(SessionError::Cancelled),
            Err(e) => {
                tracing::warn!(content_id = %self.key.id, url, error = %e, "failed to download cover");
                Ok(())
            }
        }
    }
}
