//! Providers, servers and downloaders shared by the integration tests

use async_trait::async_trait;
use content_dl::{
    CbzPackager, Collaborators, Collection, ComicInfoInspector, Config, ContentDownloader,
    ContentRequest, HttpFetcher, InfoProvider, Item, ProviderRegistry, ProviderTag,
    ResourceClass, StaticPolicySource, TagPolicy,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pages served for every item
pub const PAGES_PER_ITEM: usize = 3;

/// Series title used by every catalog entry
pub const TITLE: &str = "Dungeon Meshi";

/// Collections the test provider serves, keyed by request id
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Arc<Mutex<HashMap<String, Collection>>>,
    base_url: Arc<Mutex<String>>,
}

impl Catalog {
    /// Catalog whose parts are served below `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let catalog = Self::default();
        *catalog.base_url.lock().unwrap() = base_url.into();
        catalog
    }

    /// Serve `collection` for requests with `id`
    pub fn insert(&self, id: &str, collection: Collection) {
        self.entries
            .lock()
            .unwrap()
            .insert(id.to_string(), collection);
    }

    fn get(&self, id: &str) -> Option<Collection> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    fn base_url(&self) -> String {
        self.base_url.lock().unwrap().clone()
    }
}

/// Provider reading its collection from a [`Catalog`]
pub struct CatalogProvider {
    id: String,
    catalog: Catalog,
}

#[async_trait]
impl InfoProvider for CatalogProvider {
    fn provider(&self) -> ProviderTag {
        ProviderTag::new("catalog")
    }

    fn title(&self) -> String {
        TITLE.to_string()
    }

    fn ref_url(&self) -> Option<String> {
        Some(format!("https://catalog.example/title/{}", self.id))
    }

    async fn load_info(&self, _cancel: &CancellationToken) -> content_dl::Result<Collection> {
        self.catalog
            .get(&self.id)
            .ok_or_else(|| content_dl::Error::Provider(format!("{} not in catalog", self.id)))
    }

    async fn part_urls(&self, item: &Item) -> content_dl::Result<Vec<String>> {
        Ok((1..=PAGES_PER_ITEM)
            .map(|page| format!("{}/{}/{}/{page}.png", self.catalog.base_url(), self.id, item.id))
            .collect())
    }
}

/// Registry with the "catalog" provider
pub fn registry(catalog: &Catalog) -> ProviderRegistry {
    let catalog = catalog.clone();
    let mut registry = ProviderRegistry::new();
    registry.register("catalog", ResourceClass::Collection, move |request: &ContentRequest| {
        Ok(Arc::new(CatalogProvider {
            id: request.id.clone(),
            catalog: catalog.clone(),
        }) as Arc<dyn InfoProvider>)
    });
    registry
}

/// Server answering every page request with its path
pub async fn page_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/.+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .mount(&server)
        .await;
    server
}

/// Configuration writing into `temp_dir` without pacing
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.root_dir = temp_dir.path().join("library");
    config.download.part_pacing_ms = 0;
    config.download.short_item_pause = Duration::ZERO;
    config.download.progress_interval = Duration::from_millis(100);
    config.download.rate_limit_fallback = Duration::from_secs(1);
    config
}

/// Downloader using real HTTP fetching and cbz packaging
pub async fn create_downloader(
    catalog: &Catalog,
    policy: TagPolicy,
    configure: impl FnOnce(&mut Config),
) -> (ContentDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let collaborators = Collaborators {
        fetcher: Arc::new(HttpFetcher::new().unwrap()),
        policy_source: Arc::new(StaticPolicySource(policy)),
        packager: Arc::new(CbzPackager),
        inspector: Arc::new(ComicInfoInspector),
    };
    let downloader =
        ContentDownloader::with_collaborators(config, registry(catalog), collaborators)
            .await
            .unwrap();
    (downloader, temp_dir)
}

/// Request for the catalog provider that starts right away
pub fn request(id: &str) -> ContentRequest {
    let mut request = ContentRequest::new("catalog", id);
    request.start_immediately = true;
    request
}

/// Chapters `1..=count` without volumes
pub fn chapters(count: usize) -> Vec<Item> {
    (1..=count)
        .map(|n| Item::numbered(format!("ch{n}"), n.to_string()))
        .collect()
}
