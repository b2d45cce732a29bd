use super::*;
use crate::archive::{COMIC_INFO_FILE, CbzPackager, ComicInfoInspector};
use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::fetch::{FetchRequest, PartFetcher};
use crate::pipeline::{DownloadPipeline, PipelineConfig};
use crate::tags::{PolicySource, StaticPolicySource, TagPolicy, TagRecord};
use crate::types::ProviderTag;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const TITLE: &str = "Frieren";

/// Provider serving a fixed collection; items without scripted URLs get three pages
#[derive(Default)]
struct MockProvider {
    collection: Option<Collection>,
    load_error: Option<String>,
    /// Fail loading with a cancellation-typed error while the session is live
    cancelled_error: bool,
    hang: bool,
    urls: HashMap<String, Vec<String>>,
}

impl MockProvider {
    fn serving(collection: Collection) -> Self {
        Self {
            collection: Some(collection),
            ..Self::default()
        }
    }
}

#[async_trait]
impl InfoProvider for MockProvider {
    fn provider(&self) -> ProviderTag {
        ProviderTag::new("mock")
    }

    fn title(&self) -> String {
        "Loading...".to_string()
    }

    fn ref_url(&self) -> Option<String> {
        Some("https://example.com/title/1".to_string())
    }

    async fn load_info(&self, _cancel: &CancellationToken) -> Result<Collection> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = &self.load_error {
            return Err(Error::Provider(reason.clone()));
        }
        if self.cancelled_error {
            return Err(Error::Fetch(FetchError::Cancelled));
        }
        self.collection
            .clone()
            .ok_or_else(|| Error::Provider("no collection".to_string()))
    }

    async fn part_urls(&self, item: &Item) -> Result<Vec<String>> {
        if let Some(urls) = self.urls.get(&item.id) {
            return Ok(urls.clone());
        }
        Ok((1..=3)
            .map(|i| format!("https://cdn.example/{}/{i}.png", item.id))
            .collect())
    }
}

/// Fetcher echoing the URL as the body
#[derive(Default)]
struct EchoFetcher {
    calls: AtomicUsize,
    /// URLs ending with this always answer 500
    failing: Option<&'static str>,
}

#[async_trait]
impl PartFetcher for EchoFetcher {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(suffix) = self.failing
            && request.url.ends_with(suffix)
        {
            return Err(FetchError::Status {
                status: 500,
                url: request.url.clone(),
            });
        }
        Ok(request.url.as_bytes().to_vec())
    }
}

struct FailingPolicy;

#[async_trait]
impl PolicySource for FailingPolicy {
    async fn load(&self) -> Result<TagPolicy> {
        Err(Error::Other("preferences store offline".to_string()))
    }
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.root_dir = root.to_path_buf();
    config.download.part_pacing_ms = 0;
    config.download.short_item_pause = Duration::ZERO;
    config.download.progress_interval = Duration::from_millis(20);
    config
}

fn chapters() -> Collection {
    Collection::chapters(
        "series-1",
        TITLE,
        vec![
            Item::numbered("c1", "1").in_volume("1"),
            Item::numbered("c2", "2").in_volume("1"),
            Item::numbered("c3", "3"),
        ],
    )
}

fn session(provider: MockProvider) -> (ContentSession, broadcast::Receiver<Event>) {
    let (event_tx, event_rx) = broadcast::channel(100);
    let session = ContentSession::new(
        ContentRequest::new("mock", "series-1"),
        Arc::new(provider),
        ResourceClass::Collection,
        event_tx,
    );
    (session, event_rx)
}

async fn load(session: &ContentSession, config: &Config, policy: &dyn PolicySource) -> LoadOutcome {
    let ctx = LoadContext {
        config,
        policy_source: policy,
        inspector: Arc::new(ComicInfoInspector),
    };
    session.load(&ctx).await
}

fn pipeline(fetcher: Arc<EchoFetcher>) -> DownloadPipeline {
    DownloadPipeline::new(
        fetcher,
        PipelineConfig {
            workers: 2,
            pacing: Duration::ZERO,
            rate_limit_fallback: Duration::from_millis(10),
        },
    )
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn no_policy() -> StaticPolicySource {
    StaticPolicySource(TagPolicy::default())
}

#[tokio::test]
async fn load_plans_every_missing_item() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, mut rx) = session(MockProvider::serving(chapters()));

    let outcome = load(&session, &config, &no_policy()).await;

    assert!(matches!(outcome, LoadOutcome::Loaded));
    assert_eq!(session.planned_items().len(), 3);
    assert_eq!(session.download_dir(), Some(temp_dir.path().join(TITLE)));
    assert_eq!(session.title(), TITLE);
    assert_eq!(session.info().size, "3 Chapters");

    let sizes: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::SizeChanged { size, .. } => Some(size),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec!["3 Chapters".to_string()]);
}

#[tokio::test]
async fn load_skips_items_already_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let collection_dir = temp_dir.path().join(TITLE);
    std::fs::create_dir_all(&collection_dir).unwrap();
    std::fs::write(collection_dir.join("Frieren Ch. 0003.cbz"), b"zip").unwrap();
    // With packaging on, an unpackaged item directory is a leftover
    std::fs::create_dir_all(collection_dir.join("Frieren Vol. 1").join("Frieren Ch. 0002")).unwrap();
    let (session, _rx) = session(MockProvider::serving(chapters()));

    let outcome = load(&session, &config, &no_policy()).await;

    assert!(matches!(outcome, LoadOutcome::Loaded));
    let ids: Vec<String> = session.planned_items().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn load_reports_nothing_to_download() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.download.packaging = false;
    let collection_dir = temp_dir.path().join(TITLE);
    let vol = collection_dir.join("Frieren Vol. 1");
    std::fs::create_dir_all(vol.join("Frieren Ch. 0001")).unwrap();
    std::fs::create_dir_all(vol.join("Frieren Ch. 0002")).unwrap();
    std::fs::create_dir_all(collection_dir.join("Frieren Ch. 0003")).unwrap();
    let (session, _rx) = session(MockProvider::serving(chapters()));

    let outcome = load(&session, &config, &no_policy()).await;

    assert!(matches!(outcome, LoadOutcome::NothingToDownload));
    assert!(session.planned_items().is_empty());
    assert_eq!(session.info().size, "0 Chapters");
}

#[tokio::test]
async fn load_failure_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider {
        load_error: Some("HTTP 503".to_string()),
        ..MockProvider::default()
    });

    let outcome = load(&session, &config, &no_policy()).await;

    match outcome {
        LoadOutcome::Failed(SessionError::LoadFailed { reason, .. }) => {
            assert!(reason.contains("HTTP 503"), "reason: {reason}");
        }
        other => panic!("expected LoadFailed, got {other:?}"),
    }
    assert!(session.download_dir().is_none());
}

#[tokio::test]
async fn cancelled_provider_error_on_a_live_session_is_a_failure() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider {
        cancelled_error: true,
        ..MockProvider::default()
    });

    let outcome = load(&session, &config, &no_policy()).await;

    assert!(
        matches!(outcome, LoadOutcome::Failed(SessionError::LoadFailed { .. })),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn load_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.download.load_info_timeout = Duration::from_millis(50);
    let (session, _rx) = session(MockProvider {
        hang: true,
        ..MockProvider::default()
    });

    let outcome = load(&session, &config, &no_policy()).await;

    assert!(matches!(
        outcome,
        LoadOutcome::Failed(SessionError::LoadTimedOut { .. })
    ));
}

#[tokio::test]
async fn cancellation_wins_over_loading() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider {
        hang: true,
        ..MockProvider::default()
    });

    let token = session.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let outcome = load(&session, &config, &no_policy()).await;
    assert!(matches!(outcome, LoadOutcome::Cancelled));
}

#[tokio::test]
async fn policy_failure_warns_once_per_session() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, mut rx) = session(MockProvider::serving(chapters()));

    assert!(matches!(
        load(&session, &config, &FailingPolicy).await,
        LoadOutcome::Loaded
    ));
    assert!(matches!(
        load(&session, &config, &FailingPolicy).await,
        LoadOutcome::Loaded
    ));

    let warnings: Vec<Notification> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::Notification(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].title, "Preferences unavailable");
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert!(!warnings[0].persistent);
}

#[tokio::test]
async fn state_changes_are_emitted_once() {
    let (session, mut rx) = session(MockProvider::serving(chapters()));

    session.set_state(ContentState::Loading);
    session.set_state(ContentState::Loading);
    session
        .transition("wait", &[ContentState::Loading], ContentState::Waiting)
        .unwrap();
    let err = session
        .transition("load", &[ContentState::Queued], ContentState::Loading)
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidState { .. }));
    let states: Vec<ContentState> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::StateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![ContentState::Loading, ContentState::Waiting]);
}

#[tokio::test]
async fn content_list_groups_items_by_volume() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let mut collection = chapters();
    collection.items.push(Item::numbered("c10", "10").in_volume("10"));
    collection.items[0].title = Some("The Journey's End".to_string());
    let (session, _rx) = session(MockProvider::serving(collection));
    load(&session, &config, &no_policy()).await;

    let list = session.content_list();

    let labels: Vec<&str> = list.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, vec!["Volume 1", "Volume 10", "No Volume"]);
    let volume_one: Vec<&str> = list[0].children.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(
        volume_one,
        vec!["Vol. 1 Ch. 2", "The Journey's End Vol. 1 Ch. 1"]
    );
    assert!(list.iter().all(|n| n.selected && n.id.is_none()));
    assert_eq!(list[2].children[0].id.as_deref(), Some("c3"));
}

#[tokio::test]
async fn content_list_without_volumes_is_flat() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let collection = Collection::chapters(
        "series-1",
        TITLE,
        vec![Item::numbered("c1", "1"), Item::numbered("c2", "2")],
    );
    let (session, _rx) = session(MockProvider::serving(collection));
    load(&session, &config, &no_policy()).await;
    session.set_state(ContentState::Waiting);
    session.set_selection(vec!["c1".to_string()]).unwrap();

    let list = session.content_list();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].label, "Ch. 2");
    assert!(!list[0].selected);
    assert_eq!(list[1].label, "Ch. 1");
    assert!(list[1].selected);
}

#[tokio::test]
async fn selection_only_while_waiting_or_ready() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, mut rx) = session(MockProvider::serving(chapters()));
    load(&session, &config, &no_policy()).await;
    drain(&mut rx);

    let err = session.set_selection(vec!["c1".to_string()]).unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    session.set_state(ContentState::Ready);
    session
        .set_selection(vec!["c1".to_string(), "c3".to_string()])
        .unwrap();

    assert_eq!(session.user_selection(), vec!["c1", "c3"]);
    assert_eq!(session.info().size, "2 Chapters");
    assert!(drain(&mut rx).iter().any(
        |e| matches!(e, Event::SizeChanged { size, .. } if size == "2 Chapters")
    ));
}

#[tokio::test]
async fn selection_filters_items_and_replacements() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider::serving(chapters()));
    load(&session, &config, &no_policy()).await;
    {
        let mut inner = session.inner();
        inner.to_remove = vec![
            temp_dir.path().join("Frieren Ch. 0001.cbz"),
            temp_dir.path().join("Frieren Ch. 0002.cbz"),
        ];
        inner.user_selected = vec!["c1".to_string()];
    }

    session.apply_selection();

    let ids: Vec<String> = session.planned_items().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["c1"]);
    assert_eq!(
        session.planned_removals(),
        vec![temp_dir.path().join("Frieren Ch. 0001.cbz")]
    );
}

#[tokio::test]
async fn download_writes_pages_metadata_and_cover() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let mut collection = chapters();
    collection.cover_url = Some("https://cdn.example/cover.jpg".to_string());
    collection.items[0].tags = vec![TagRecord::new("Fantasy"), TagRecord::new("Gore")];
    let policy = StaticPolicySource(TagPolicy {
        genres: vec!["Fantasy".to_string()],
        blacklist: vec!["Gore".to_string()],
        ..TagPolicy::default()
    });
    let mut provider = MockProvider::serving(collection);
    provider.urls.insert("c3".to_string(), Vec::new());
    let (session, _rx) = session(provider);
    load(&session, &config, &policy).await;
    session.set_state(ContentState::Downloading);

    let fetcher = Arc::new(EchoFetcher::default());
    let pipeline = pipeline(fetcher.clone());
    let summary = session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap();

    assert_eq!(summary.items, vec!["Vol. 1 Ch. 1", "Vol. 1 Ch. 2"]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.parts, 6);
    // six pages and one cover per item
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 8);

    let item_dir = temp_dir.path().join(TITLE).join("Frieren Vol. 1").join("Frieren Ch. 0001");
    assert_eq!(
        std::fs::read(item_dir.join("page 0002.png")).unwrap(),
        b"https://cdn.example/c1/2.png"
    );
    assert!(item_dir.join("!0000 cover.jpg").exists());
    let xml = std::fs::read_to_string(item_dir.join(COMIC_INFO_FILE)).unwrap();
    assert!(xml.contains("<Genre>Fantasy</Genre>"));
    assert!(!xml.contains("Gore"));
    assert!(!temp_dir.path().join(TITLE).join("Frieren Ch. 0003").exists());

    let info = session.info();
    assert_eq!(info.progress, 100.0);
    assert_eq!(info.speed, 0.0);
}

#[tokio::test]
async fn download_before_load_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider::serving(chapters()));
    let pipeline = pipeline(Arc::new(EchoFetcher::default()));

    let err = session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidState { .. }));
}

async fn downloaded_session(temp_dir: &TempDir) -> ContentSession {
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider::serving(chapters()));
    load(&session, &config, &no_policy()).await;
    let pipeline = pipeline(Arc::new(EchoFetcher::default()));
    session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap();
    session
}

fn cleanup_ctx(packaging: bool) -> CleanupContext {
    CleanupContext {
        packager: Arc::new(CbzPackager),
        packaging,
    }
}

#[tokio::test]
async fn cleanup_with_delete_removes_all_output() {
    let temp_dir = TempDir::new().unwrap();
    let session = downloaded_session(&temp_dir).await;
    assert!(temp_dir.path().join(TITLE).exists());

    let report = session.cleanup(true, &cleanup_ctx(true)).await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.removed, 3);
    assert!(!temp_dir.path().join(TITLE).exists());
}

#[tokio::test]
async fn cleanup_keeps_and_packages_output() {
    let temp_dir = TempDir::new().unwrap();
    let replaced = temp_dir.path().join("old copy.cbz");
    std::fs::write(&replaced, b"old").unwrap();
    let session = downloaded_session(&temp_dir).await;
    session.inner().to_remove = vec![replaced.clone()];

    let report = session.cleanup(false, &cleanup_ctx(true)).await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.packaged, 3);
    assert_eq!(report.removed, 1);
    assert!(!replaced.exists());
    let collection_dir = temp_dir.path().join(TITLE);
    assert!(collection_dir.join("Frieren Ch. 0003.cbz").exists());
    assert!(!collection_dir.join("Frieren Ch. 0003").exists());
    assert!(
        collection_dir
            .join("Frieren Vol. 1")
            .join("Frieren Ch. 0001.cbz")
            .exists()
    );
}

#[tokio::test]
async fn cleanup_without_packaging_leaves_directories() {
    let temp_dir = TempDir::new().unwrap();
    let session = downloaded_session(&temp_dir).await;

    let report = session.cleanup(false, &cleanup_ctx(false)).await;

    assert_eq!(report, CleanupReport::default());
    assert!(temp_dir.path().join(TITLE).join("Frieren Ch. 0003").is_dir());
}

#[tokio::test]
async fn incomplete_session_keeps_replaced_content() {
    let temp_dir = TempDir::new().unwrap();
    let replaced = temp_dir.path().join("old copy.cbz");
    std::fs::write(&replaced, b"old").unwrap();
    let (session, _rx) = session(MockProvider::serving(chapters()));
    session.inner().to_remove = vec![replaced.clone()];

    let report = session.cleanup(false, &cleanup_ctx(true)).await;

    assert_eq!(report, CleanupReport::default());
    assert!(replaced.exists());
}

#[tokio::test]
async fn interrupted_keep_removes_unfinished_items() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(MockProvider::serving(chapters()));
    load(&session, &config, &no_policy()).await;
    let pipeline = pipeline(Arc::new(EchoFetcher {
        failing: Some("c2/2.png"),
        ..EchoFetcher::default()
    }));

    let err = session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PartFailed { index: 2, .. }), "{err:?}");

    let report = session.cleanup(false, &cleanup_ctx(true)).await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.removed, 1);
    assert_eq!(report.packaged, 0);
    let volume_dir = temp_dir.path().join(TITLE).join("Frieren Vol. 1");
    assert!(volume_dir.join("Frieren Ch. 0001").join("page 0003.png").exists());
    assert!(!volume_dir.join("Frieren Ch. 0002").exists());
}

fn transfer_provider() -> MockProvider {
    let mut provider = MockProvider::serving(Collection::single_transfer("t1", TITLE, 2048));
    provider.urls.insert(
        crate::content::SINGLE_TRANSFER_ITEM_ID.to_string(),
        vec![
            "https://files.example/pack/Episode.01.mkv".to_string(),
            "https://files.example/pack/Episode.02.mkv".to_string(),
        ],
    );
    provider
}

#[tokio::test]
async fn failed_transfer_removes_only_its_own_files() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let collection_dir = temp_dir.path().join(TITLE);
    std::fs::create_dir_all(collection_dir.join("extras")).unwrap();
    std::fs::write(collection_dir.join("Episode.00.mkv"), b"earlier run").unwrap();

    let (session, _rx) = session(transfer_provider());
    load(&session, &config, &no_policy()).await;
    let pipeline = pipeline(Arc::new(EchoFetcher {
        failing: Some("Episode.02.mkv"),
        ..EchoFetcher::default()
    }));
    session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap_err();
    assert!(collection_dir.join("Episode.01.mkv").exists());

    let report = session.cleanup(true, &cleanup_ctx(true)).await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.removed, 1);
    assert!(!collection_dir.join("Episode.01.mkv").exists());
    assert_eq!(
        std::fs::read(collection_dir.join("Episode.00.mkv")).unwrap(),
        b"earlier run"
    );
    assert!(collection_dir.join("extras").is_dir(), "empty dirs it did not create stay");
}

#[tokio::test]
async fn finished_transfer_is_kept_on_interrupt() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let (session, _rx) = session(transfer_provider());
    load(&session, &config, &no_policy()).await;
    let pipeline = pipeline(Arc::new(EchoFetcher::default()));
    session
        .download(&DownloadContext {
            config: &config,
            pipeline: &pipeline,
        })
        .await
        .unwrap();
    session.inner().completed = false;

    let report = session.cleanup(false, &cleanup_ctx(true)).await;

    assert_eq!(report, CleanupReport::default());
    let collection_dir = temp_dir.path().join(TITLE);
    assert!(collection_dir.join("Episode.01.mkv").exists());
    assert!(collection_dir.join("Episode.02.mkv").exists());
}
