//! Mock source for testing purposes.
//!
//! Hooks return scripted data, but every hook still issues a real request
//! through the source runtime against an in-memory [`StaticFetcher`], so
//! throttling, retries and readiness checks behave as for a real source.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    ChapterImages, ScrapedEntry, ScrapedManga, Source, SourceCapabilities, SourceDescriptor,
    SourceError, SourceRuntime, SourceServices,
};
use crate::config::FetchConfig;
use crate::library::LibraryIndex;
use crate::models::ChapterInfo;
use crate::utils::{FetchError, FetchRequest, StaticFetcher};

const READY: &str = "<html><body><div class='ready'></div></body></html>";

/// Failure injected into every hook
#[derive(Debug, Clone)]
pub enum MockFailure {
    Fetch(FetchError),
    Parse(String),
    /// Panic with this message inside the hook
    Panic(String),
}

/// A mock source that returns predefined responses.
///
/// Manga pages live under `/manga/`, chapter pages under `/chapter/`.
#[derive(Debug)]
pub struct MockSource {
    runtime: SourceRuntime,
    fetcher: Arc<StaticFetcher>,
    entries: Mutex<Vec<ScrapedEntry>>,
    recommendations: Mutex<Vec<ScrapedEntry>>,
    manga: Mutex<Option<ScrapedManga>>,
    pages: Mutex<Vec<Option<String>>>,
    backlink: Mutex<Option<String>>,
    failure: Mutex<Option<MockFailure>>,
    latency: Duration,
}

impl MockSource {
    /// Mock source `name` served from `https://<name>.test`, without throttling
    pub fn new(name: &str) -> Result<Self, SourceError> {
        Self::builder(name).build()
    }

    pub fn builder(name: &str) -> MockSourceBuilder {
        MockSourceBuilder {
            name: name.to_string(),
            enabled: true,
            capabilities: SourceCapabilities::all(),
            wait_time: Duration::ZERO,
            latency: Duration::ZERO,
            fetcher: None,
            library: None,
            fetch: FetchConfig {
                max_retries: 0,
                readiness_attempts: 1,
                ..FetchConfig::default()
            },
        }
    }

    /// The fetcher every request of this source goes through
    pub fn fetcher(&self) -> &Arc<StaticFetcher> {
        &self.fetcher
    }

    pub fn host(&self) -> &str {
        self.runtime.descriptor().host()
    }

    /// Absolute URL of a path on this source
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.host(), path)
    }

    pub fn set_entries(&self, entries: Vec<ScrapedEntry>) {
        *lock(&self.entries) = entries;
    }

    pub fn set_recommendations(&self, entries: Vec<ScrapedEntry>) {
        *lock(&self.recommendations) = entries;
    }

    /// Serve `manga` at the relative `url`
    pub fn set_manga(&self, url: &str, manga: ScrapedManga) {
        self.fetcher.route_html(self.url(url), READY);
        *lock(&self.manga) = Some(manga);
    }

    /// Serve a chapter page at the relative `url`
    pub fn set_chapter(&self, url: &str) {
        self.fetcher.route_html(self.url(url), READY);
    }

    /// Append a page whose image downloads fine
    pub fn add_page(&self, image_path: &str, data: &[u8], content_type: Option<&str>) {
        self.fetcher.route_bytes(self.url(image_path), data, content_type);
        lock(&self.pages).push(Some(image_path.to_string()));
    }

    /// Append a page whose image download fails
    pub fn add_broken_page(&self, image_path: &str) {
        lock(&self.pages).push(Some(image_path.to_string()));
    }

    /// Append a page without an image URL
    pub fn add_missing_page(&self) {
        lock(&self.pages).push(None);
    }

    /// Link a chapter page shows back to its manga
    pub fn set_backlink(&self, link: Option<&str>) {
        *lock(&self.backlink) = link.map(str::to_string);
    }

    pub fn fail_with(&self, failure: MockFailure) {
        *lock(&self.failure) = Some(failure);
    }

    pub fn clear_failure(&self) {
        *lock(&self.failure) = None;
    }

    /// Fetch `url` after the configured latency, then apply the injected failure
    async fn request(&self, url: String) -> Result<(), SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = lock(&self.failure).clone();
        if let Some(MockFailure::Fetch(err)) = &failure {
            return Err(SourceError::Fetch(err.clone()));
        }

        self.runtime
            .fetch_html(FetchRequest::html(url).wait_for(".ready"))
            .await?;

        match failure {
            Some(MockFailure::Parse(reason)) => Err(SourceError::Parse(reason)),
            Some(MockFailure::Panic(message)) => panic!("{}", message),
            _ => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Builder for [`MockSource`]
#[derive(Debug, Clone)]
pub struct MockSourceBuilder {
    name: String,
    enabled: bool,
    capabilities: SourceCapabilities,
    wait_time: Duration,
    latency: Duration,
    fetcher: Option<Arc<StaticFetcher>>,
    library: Option<Arc<dyn LibraryIndex>>,
    fetch: FetchConfig,
}

impl MockSourceBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Delay every hook by `latency` before it issues its request
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Share a fetcher, e.g. to observe several sources on one request log
    pub fn fetcher(mut self, fetcher: Arc<StaticFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn library(mut self, library: Arc<dyn LibraryIndex>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn build(self) -> Result<MockSource, SourceError> {
        let host = format!("https://{}.test", self.name);
        let descriptor = SourceDescriptor::builder(&self.name, "Mock Source", &host)
            .langs(&["en", "fr"])
            .enabled(self.enabled)
            .capabilities(self.capabilities)
            .wait_time(self.wait_time)
            .build()?;

        let fetcher = self.fetcher.unwrap_or_else(|| Arc::new(StaticFetcher::new()));
        fetcher
            .route_html(format!("{}/search", host), READY)
            .route_html(format!("{}/recommend", host), READY);

        let mut services = SourceServices::new(fetcher.clone()).with_fetch_config(self.fetch);
        if let Some(library) = self.library {
            services = services.with_library(library);
        }

        Ok(MockSource {
            runtime: SourceRuntime::new(descriptor, &services),
            fetcher,
            entries: Mutex::new(Vec::new()),
            recommendations: Mutex::new(Vec::new()),
            manga: Mutex::new(None),
            pages: Mutex::new(Vec::new()),
            backlink: Mutex::new(None),
            failure: Mutex::new(None),
            latency: self.latency,
        })
    }
}

#[async_trait]
impl Source for MockSource {
    fn runtime(&self) -> &SourceRuntime {
        &self.runtime
    }

    fn is_manga_page(&self, url: &str) -> bool {
        url.starts_with("/manga/")
    }

    fn is_chapter_page(&self, url: &str) -> bool {
        url.starts_with("/chapter/")
    }

    fn chapter_info(&self, label: &str) -> Option<ChapterInfo> {
        let number = label.strip_prefix("Chapter ")?;
        Some(ChapterInfo {
            volume: None,
            chapter: number.trim().parse().unwrap_or(0.0),
            name: None,
        })
    }

    async fn search_entries(&self, _query: &str) -> Result<Vec<ScrapedEntry>, SourceError> {
        self.request(self.url("/search")).await?;
        Ok(lock(&self.entries).clone())
    }

    async fn recommend_entries(&self) -> Result<Vec<ScrapedEntry>, SourceError> {
        self.request(self.url("/recommend")).await?;
        Ok(lock(&self.recommendations).clone())
    }

    async fn manga_page(&self, url: &str, _lang: &str) -> Result<ScrapedManga, SourceError> {
        self.request(self.url(url)).await?;
        lock(&self.manga)
            .clone()
            .ok_or_else(|| SourceError::NotFound(url.to_string()))
    }

    async fn chapter_images(&self, url: &str, _lang: &str) -> Result<ChapterImages, SourceError> {
        self.request(self.url(url)).await?;
        Ok(ChapterImages {
            referer: Some(self.url(url)),
            pages: lock(&self.pages).clone(),
        })
    }

    async fn manga_link_from_chapter(
        &self,
        url: &str,
        _lang: &str,
    ) -> Result<Option<String>, SourceError> {
        self.request(self.url(url)).await?;
        Ok(lock(&self.backlink).clone())
    }
}

/// Helper function to create a scripted listing entry.
pub fn make_entry(name: &str, url: &str) -> ScrapedEntry {
    ScrapedEntry {
        name: name.to_string(),
        url: url.to_string(),
        ..ScrapedEntry::default()
    }
}

/// Helper function to create a scripted manga with chapter rows newest first.
pub fn make_manga(name: &str, chapter_urls: &[&str]) -> ScrapedManga {
    ScrapedManga {
        name: name.to_string(),
        synopsis: format!("About {}", name),
        chapters: chapter_urls
            .iter()
            .map(|url| super::ScrapedChapter {
                name: url.rsplit('/').next().unwrap_or(url).to_string(),
                volume: None,
                url: url.to_string(),
            })
            .collect(),
        ..ScrapedManga::default()
    }
}
