//! Shared test helpers for creating ContentDownloader instances in tests.

use crate::archive::{CbzPackager, ComicInfoInspector};
use crate::config::Config;
use crate::content::{Collection, Item};
use crate::downloader::{Collaborators, ContentDownloader};
use crate::error::{Error, FetchError, Result};
use crate::fetch::{FetchRequest, PartFetcher};
use crate::provider::{InfoProvider, ProviderRegistry};
use crate::tags::{StaticPolicySource, TagPolicy};
use crate::types::{ContentKey, ContentRequest, ContentState, Event, ProviderTag, ResourceClass};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Provider building its collection from the request
///
/// `extra` options: `items` (chapter count, default 2), `load_delay_ms`, `load_error`,
/// `load_cancelled` (fail with a cancellation-typed error).
pub(crate) struct MockProvider {
    request: ContentRequest,
}

impl MockProvider {
    fn option<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.request.options.extra.get(name).and_then(|v| v.parse().ok())
    }
}

#[async_trait]
impl InfoProvider for MockProvider {
    fn provider(&self) -> ProviderTag {
        self.request.provider.clone()
    }

    fn title(&self) -> String {
        format!("Series {}", self.request.id)
    }

    async fn load_info(&self, cancel: &CancellationToken) -> Result<Collection> {
        if let Some(ms) = self.option::<u64>("load_delay_ms") {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Other("cancelled".to_string())),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            }
        }
        if let Some(reason) = self.request.options.extra.get("load_error") {
            return Err(Error::Provider(reason.clone()));
        }
        if self.request.options.extra.contains_key("load_cancelled") {
            return Err(Error::Fetch(FetchError::Cancelled));
        }

        if self.request.provider.as_str() == "torrent" {
            return Ok(Collection::single_transfer(
                self.request.id.clone(),
                self.title(),
                3 * 1024,
            ));
        }

        let count = self.option::<usize>("items").unwrap_or(2);
        let items = (1..=count)
            .map(|n| Item::numbered(format!("c{n}"), n.to_string()))
            .collect();
        Ok(Collection::chapters(self.request.id.clone(), self.title(), items))
    }

    async fn part_urls(&self, item: &Item) -> Result<Vec<String>> {
        Ok((1..=3)
            .map(|page| part_url(&self.request.id, &item.id, page))
            .collect())
    }
}

/// URL of one page served by [`MockProvider`]
pub(crate) fn part_url(content_id: &str, item_id: &str, page: usize) -> String {
    format!("https://cdn.example/{content_id}/{item_id}/{page}.png")
}

type FetchResult = std::result::Result<Vec<u8>, FetchError>;

/// Fetcher replaying scripted results per URL; unscripted URLs succeed after `delay`
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: std::sync::Mutex<HashMap<String, Vec<FetchResult>>>,
    attempts: std::sync::Mutex<HashMap<String, usize>>,
    pub(crate) delay: Duration,
}

impl ScriptedFetcher {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, url: &str, mut results: Vec<FetchResult>) {
        results.reverse();
        self.scripts.lock().unwrap().insert(url.to_string(), results);
    }

    pub(crate) fn attempts(&self, url: &str) -> usize {
        self.attempts.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PartFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(request.url.clone())
            .or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(Vec::pop);
        scripted.unwrap_or_else(|| Ok(request.url.as_bytes().to_vec()))
    }
}

/// Registry with a "mock" collection provider and a "torrent" single-transfer provider
pub(crate) fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register("mock", ResourceClass::Collection, |request: &ContentRequest| {
            Ok(Arc::new(MockProvider {
                request: request.clone(),
            }) as Arc<dyn InfoProvider>)
        })
        .register("torrent", ResourceClass::SingleTransfer, |request: &ContentRequest| {
            Ok(Arc::new(MockProvider {
                request: request.clone(),
            }) as Arc<dyn InfoProvider>)
        });
    registry
}

/// Configuration writing into `temp_dir` with no pacing and no pauses
pub(crate) fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.root_dir = temp_dir.path().join("downloads");
    config.download.part_pacing_ms = 0;
    config.download.short_item_pause = Duration::ZERO;
    config.download.progress_interval = Duration::from_millis(50);
    config.download.shutdown_grace = Duration::from_secs(5);
    config.download.packaging = false;
    config
}

/// Helper to create a test ContentDownloader with a scripted fetcher.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    fetcher: Arc<ScriptedFetcher>,
    configure: impl FnOnce(&mut Config),
) -> (ContentDownloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let collaborators = Collaborators {
        fetcher,
        policy_source: Arc::new(StaticPolicySource(TagPolicy::default())),
        packager: Arc::new(CbzPackager),
        inspector: Arc::new(ComicInfoInspector),
    };
    let downloader = ContentDownloader::with_collaborators(config, registry(), collaborators)
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// Request for the mock provider
pub(crate) fn request(id: &str, start_immediately: bool) -> ContentRequest {
    let mut request = ContentRequest::new("mock", id);
    request.start_immediately = start_immediately;
    request
}

/// Collect events until `key` is removed; panics after 10 seconds
pub(crate) async fn events_until_removed(
    rx: &mut broadcast::Receiver<Event>,
    key: &ContentKey,
) -> Vec<Event> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            let done = matches!(&event, Event::Removed { key: k } if k == key);
            events.push(event);
            if done {
                return;
            }
        }
    })
    .await
    .expect("session was not removed in time");
    events
}

/// Wait until `key` reaches `state`; panics after 10 seconds
pub(crate) async fn wait_for_state(
    rx: &mut broadcast::Receiver<Event>,
    key: &ContentKey,
    state: ContentState,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Event::StateChanged { key: k, state: s } = rx.recv().await.unwrap()
                && &k == key
                && s == state
            {
                return;
            }
        }
    })
    .await
    .expect("state not reached in time");
}

/// States `key` went through, in order
pub(crate) fn states_of(events: &[Event], key: &ContentKey) -> Vec<ContentState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged { key: k, state } if k == key => Some(*state),
            _ => None,
        })
        .collect()
}
