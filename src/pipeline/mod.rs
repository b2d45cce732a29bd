//! Bounded-parallel part fetching for one item
//!
//! A producer streams [`PartTask`]s into a bounded queue that a fixed number of workers
//! drain. Every part gets one retry: parts that fail during the first pass are collected
//! and fetched again, one after another, once the pass has finished. A part that fails
//! its retry aborts the item.
//!
//! Writing a part to disk is never retried; a write error stops the pass immediately.
//! Every suspension point (queue receive, pacing, rate-limit sleep) also watches the
//! cancellation token and returns without writing further output.

pub mod progress;
mod sink;


pub use progress::{ProgressCounters, ProgressReporterParams, spawn_progress_reporter};
pub use sink::{DirectorySink, PartLayout, PartSink};

use crate::config::Config;
use crate::error::{FetchError, SessionError};
use crate::fetch::{FetchRequest, PartFetcher};
use crate::retry::fetch_with_rate_limit;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// One part to fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartTask {
    /// 1-based position of the part within its item
    pub index: usize,
    /// What to fetch
    pub request: FetchRequest,
}

impl PartTask {
    /// Create a task
    pub fn new(index: usize, request: FetchRequest) -> Self {
        Self { index, request }
    }
}

/// Pipeline tuning
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Concurrent fetch workers per item
    pub workers: usize,
    /// Pause after every successful first-pass part
    pub pacing: Duration,
    /// Rate-limit wait when the server gives no usable resume time
    pub rate_limit_fallback: Duration,
}

impl PipelineConfig {
    /// Derive pipeline settings from the crate configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.limits.part_workers(),
            pacing: config.download.part_pacing(),
            rate_limit_fallback: config.download.rate_limit_fallback,
        }
    }
}

/// Outcome of a successful item download
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Parts written
    pub parts: usize,
    /// Bytes written
    pub bytes: u64,
    /// Parts that failed on the first pass and succeeded on retry
    pub recovered: usize,
}

/// A part that failed on the first pass
#[derive(Debug)]
struct FailedPart {
    task: PartTask,
    reason: FetchError,
}

/// Shared state of the workers of one pass
struct PassState<'a> {
    queue: Mutex<mpsc::Receiver<PartTask>>,
    sink: &'a dyn PartSink,
    counters: &'a ProgressCounters,
    token: CancellationToken,
    failed: std::sync::Mutex<Vec<FailedPart>>,
}

/// Fetch engine shared by every session
#[derive(Clone)]
pub struct DownloadPipeline {
    fetcher: Arc<dyn PartFetcher>,
    config: PipelineConfig,
}

impl std::fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DownloadPipeline {
    /// Create a pipeline; the worker count is raised to at least one
    pub fn new(fetcher: Arc<dyn PartFetcher>, mut config: PipelineConfig) -> Self {
        config.workers = config.workers.max(1);
        Self { fetcher, config }
    }

    /// Pipeline settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch a single location outside the worker pool (covers), with rate-limit handling
    pub async fn fetch_one(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        fetch_with_rate_limit(
            self.fetcher.as_ref(),
            request,
            self.config.rate_limit_fallback,
            cancel,
        )
        .await
    }

    /// Fetch and store every part of one item
    ///
    /// Returns [`SessionError::Cancelled`] when `cancel` fires, [`SessionError::PartFailed`]
    /// when a retry fails or a request stays rate limited, and
    /// [`SessionError::WriteFailed`] when storing a part fails.
    pub async fn run(
        &self,
        tasks: Vec<PartTask>,
        sink: &dyn PartSink,
        counters: &ProgressCounters,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, SessionError> {
        let start = Instant::now();
        let total = tasks.len();
        let workers = self.config.workers.min(total.max(1));
        let (tx, rx) = mpsc::channel::<PartTask>(workers);

        let pass = PassState {
            queue: Mutex::new(rx),
            sink,
            counters,
            token: cancel.child_token(),
            failed: std::sync::Mutex::new(Vec::new()),
        };

        let producer_token = pass.token.clone();
        let producer = async move {
            for task in tasks {
                tokio::select! {
                    _ = producer_token.cancelled() => break,
                    sent = tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        };

        let consumers = futures::future::join_all((0..workers).map(|worker| self.work(worker, &pass)));
        let ((), results) = tokio::join!(producer, consumers);

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let mut report = PipelineReport::default();
        for result in results {
            let written = result?;
            report.parts += written.parts;
            report.bytes += written.bytes;
        }

        let mut failed = pass
            .failed
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        failed.sort_by_key(|f| f.task.index);

        if !failed.is_empty() {
            tracing::debug!(failed = failed.len(), "retrying failed parts");
        }

        for part in failed {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            tracing::trace!(part = part.task.index, url = %part.task.request.url, "retrying part");
            match fetch_with_rate_limit(
                self.fetcher.as_ref(),
                &part.task.request,
                self.config.rate_limit_fallback,
                cancel,
            )
            .await
            {
                Ok(bytes) => {
                    report.bytes += store(sink, counters, &part.task, bytes).await?;
                    report.parts += 1;
                    report.recovered += 1;
                }
                Err(FetchError::Cancelled) if cancel.is_cancelled() => {
                    return Err(SessionError::Cancelled);
                }
                Err(e) => {
                    tracing::error!(
                        part = part.task.index,
                        url = %part.task.request.url,
                        first_error = %part.reason,
                        error = %e,
                        "retry download failed, ending item download"
                    );
                    return Err(SessionError::PartFailed {
                        index: part.task.index,
                        url: part.task.request.url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            parts = report.parts,
            total,
            recovered = report.recovered,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "finished fetching parts"
        );
        Ok(report)
    }

    /// Worker loop of the first pass; a fatal error stops the whole pass
    async fn work(&self, worker: usize, pass: &PassState<'_>) -> Result<PipelineReport, SessionError> {
        let result = self.drain(worker, pass).await;
        if result.is_err() {
            pass.token.cancel();
        }
        result
    }

    async fn drain(&self, worker: usize, pass: &PassState<'_>) -> Result<PipelineReport, SessionError> {
        let mut written = PipelineReport::default();

        loop {
            let next = tokio::select! {
                _ = pass.token.cancelled() => return Ok(written),
                next = async { pass.queue.lock().await.recv().await } => next,
            };
            let Some(task) = next else {
                return Ok(written);
            };

            tracing::trace!(worker, part = task.index, url = %task.request.url, "fetching part");
            match fetch_with_rate_limit(
                self.fetcher.as_ref(),
                &task.request,
                self.config.rate_limit_fallback,
                &pass.token,
            )
            .await
            {
                Ok(bytes) => {
                    written.bytes += store(pass.sink, pass.counters, &task, bytes).await?;
                    written.parts += 1;

                    tokio::select! {
                        _ = pass.token.cancelled() => return Ok(written),
                        _ = tokio::time::sleep(self.config.pacing) => {}
                    }
                }
                Err(FetchError::Cancelled) if pass.token.is_cancelled() => return Ok(written),
                Err(FetchError::RateLimitExceeded { url }) => {
                    return Err(SessionError::PartFailed {
                        index: task.index,
                        reason: format!("hit rate limit too many times for {url}"),
                        url,
                    });
                }
                Err(reason) => {
                    tracing::warn!(
                        worker,
                        part = task.index,
                        url = %task.request.url,
                        error = %reason,
                        "part failed for the first time, retrying it at the end"
                    );
                    pass.counters.record_failure();
                    pass.failed
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(FailedPart { task, reason });
                }
            }
        }
    }
}

async fn store(
    sink: &dyn PartSink,
    counters: &ProgressCounters,
    task: &PartTask,
    bytes: Vec<u8>,
) -> Result<u64, SessionError> {
    let len = bytes.len() as u64;
    let path = sink.write_part(task.index, &task.request.url, bytes).await?;
    counters.record_part(len);
    tracing::trace!(part = task.index, bytes = len, path = %path.display(), "part written");
    Ok(len)
}
