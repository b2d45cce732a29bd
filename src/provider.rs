//! Content sources
//!
//! Every source implements [`InfoProvider`]: it loads the collection tree, lists the part
//! locations of an item and writes the item's metadata. Sessions only talk to this trait.
//! A [`ProviderRegistry`] maps provider tags to factories creating one provider per
//! request, together with the capacity class its sessions are admitted under.

use crate::archive::{COMIC_INFO_FILE, ComicInfo};
use crate::content::{Collection, Item};
use crate::error::{Error, Result};
use crate::fetch::FetchRequest;
use crate::reconcile::NamingConvention;
use crate::tags::TagResolver;
use crate::types::{ContentRequest, ProviderTag, ResourceClass};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a provider gets when writing the metadata of one item
#[derive(Clone, Copy, Debug)]
pub struct ItemContext<'a> {
    /// Item directory, already created
    pub dir: &'a Path,
    /// Collection title (after any override)
    pub series: &'a str,
    /// Tag policy of the session
    pub resolver: &'a TagResolver,
    /// Source page of the collection
    pub ref_url: Option<&'a str>,
}

impl ItemContext<'_> {
    /// ComicInfo document for `item` with genres, tags and rating resolved
    pub fn comic_info(&self, item: &Item) -> ComicInfo {
        let resolved = self.resolver.genres_and_tags(&item.tags);
        ComicInfo {
            series: self.series.to_string(),
            title: item.title.clone(),
            number: item.number().map(str::to_string),
            volume: item.volume().map(str::to_string),
            genre: resolved.genres,
            tags: resolved.tags,
            age_rating: self.resolver.age_rating(&item.tags),
            web: self.ref_url.map(str::to_string),
            translator: item.group.clone(),
        }
    }
}

/// One content source, created per request
#[async_trait]
pub trait InfoProvider: Send + Sync {
    /// Source tag
    fn provider(&self) -> ProviderTag;

    /// Title; before loading finishes this may only be a placeholder
    fn title(&self) -> String;

    /// Source page of the content
    fn ref_url(&self) -> Option<String> {
        None
    }

    /// Load the collection tree
    ///
    /// Implementations must return promptly once `cancel` fires.
    async fn load_info(&self, cancel: &CancellationToken) -> Result<Collection>;

    /// Ordered part locations of `item`
    async fn part_urls(&self, item: &Item) -> Result<Vec<String>>;

    /// Write the metadata of `item` into its directory, before its parts are fetched
    ///
    /// The default writes a `ComicInfo.xml` built by [`ItemContext::comic_info`].
    async fn write_item_metadata(&self, item: &Item, ctx: &ItemContext<'_>) -> Result<()> {
        let xml = ctx.comic_info(item).to_xml()?;
        tokio::fs::write(ctx.dir.join(COMIC_INFO_FILE), xml).await?;
        Ok(())
    }

    /// Add provider specific headers (Referer, cookies) to a part request
    fn customize_request(&self, request: FetchRequest) -> FetchRequest {
        request
    }

    /// Naming convention of the provider's on-disk layout
    fn naming(&self) -> NamingConvention {
        NamingConvention::default()
    }
}

/// Creates the provider for one request
pub type ProviderFactory = Arc<dyn Fn(&ContentRequest) -> Result<Arc<dyn InfoProvider>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    class: ResourceClass,
    factory: ProviderFactory,
}

/// Provider tags mapped to factories
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderTag, Registration>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes: HashMap<&ProviderTag, ResourceClass> =
            self.providers.iter().map(|(tag, r)| (tag, r.class)).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &classes)
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `tag`
    pub fn register<F>(&mut self, tag: impl Into<ProviderTag>, class: ResourceClass, factory: F) -> &mut Self
    where
        F: Fn(&ContentRequest) -> Result<Arc<dyn InfoProvider>> + Send + Sync + 'static,
    {
        self.providers.insert(
            tag.into(),
            Registration {
                class,
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Capacity class of a registered provider
    pub fn class_of(&self, tag: &ProviderTag) -> Option<ResourceClass> {
        self.providers.get(tag).map(|r| r.class)
    }

    /// Create the provider for `request`
    pub fn create(&self, request: &ContentRequest) -> Result<(Arc<dyn InfoProvider>, ResourceClass)> {
        let registration = self
            .providers
            .get(&request.provider)
            .ok_or_else(|| Error::UnknownProvider(request.provider.clone()))?;
        let provider = (registration.factory)(request)?;
        Ok((provider, registration.class))
    }

    /// Registered tags
    pub fn tags(&self) -> impl Iterator<Item = &ProviderTag> {
        self.providers.keys()
    }
}
