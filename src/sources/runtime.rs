//! Per-source execution context: throttled fetching and image acquisition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::SourceDescriptor;
use crate::config::{Config, FetchConfig};
use crate::library::{LibraryIndex, NoLibrary};
use crate::utils::{
    with_retry, DataUrlStore, Document, FetchError, FetchRequest, FetchResponse, Fetcher,
    HttpFetcher, ImageStore, RetryConfig, StaticFetcher, ThrottleGate,
};

/// Services shared by every source of a registry
#[derive(Debug, Clone)]
pub struct SourceServices {
    pub fetcher: Arc<dyn Fetcher>,
    pub images: Arc<dyn ImageStore>,
    pub library: Arc<dyn LibraryIndex>,
    pub fetch: FetchConfig,
    /// Wait-time overrides keyed by source slug
    pub wait_overrides: HashMap<String, Duration>,
}

impl SourceServices {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            images: Arc::new(DataUrlStore),
            library: Arc::new(NoLibrary),
            fetch: FetchConfig::default(),
            wait_overrides: HashMap::new(),
        }
    }

    /// Network-backed services from the application configuration
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::from_config(&config.fetch)?;
        Ok(Self {
            fetch: config.fetch.clone(),
            wait_overrides: config.wait_overrides(),
            ..Self::new(Arc::new(fetcher))
        })
    }

    /// Services answering every request from an empty [`StaticFetcher`]
    pub fn offline() -> Self {
        Self::new(Arc::new(StaticFetcher::new()))
    }

    pub fn with_images(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn with_library(mut self, library: Arc<dyn LibraryIndex>) -> Self {
        self.library = library;
        self
    }

    pub fn with_fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_wait(mut self, source: &str, wait: Duration) -> Self {
        self.wait_overrides.insert(source.to_string(), wait);
        self
    }
}

/// Everything a source needs at run time.
///
/// Every outbound request of the source (page fetches, readiness re-polls,
/// retries and image downloads) passes the source's [`ThrottleGate`].
#[derive(Debug)]
pub struct SourceRuntime {
    descriptor: SourceDescriptor,
    gate: ThrottleGate,
    fetcher: Arc<dyn Fetcher>,
    images: Arc<dyn ImageStore>,
    library: Arc<dyn LibraryIndex>,
    readiness_attempts: u32,
    readiness_interval: Duration,
    retry: RetryConfig,
}

impl SourceRuntime {
    pub fn new(descriptor: SourceDescriptor, services: &SourceServices) -> Self {
        let wait = services
            .wait_overrides
            .get(descriptor.name())
            .copied()
            .unwrap_or_else(|| descriptor.wait_time());

        Self {
            gate: ThrottleGate::new(descriptor.name(), wait),
            descriptor,
            fetcher: Arc::clone(&services.fetcher),
            images: Arc::clone(&services.images),
            library: Arc::clone(&services.library),
            readiness_attempts: services.fetch.readiness_attempts.max(1),
            readiness_interval: services.fetch.readiness_interval(),
            retry: RetryConfig::with_retries(services.fetch.max_retries),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn gate(&self) -> &ThrottleGate {
        &self.gate
    }

    /// Fetch an HTML document, re-polling until its readiness selector matches
    pub async fn fetch_html(&self, request: FetchRequest) -> Result<Document, FetchError> {
        for attempt in 1..=self.readiness_attempts {
            let document = self.fetch_once(&request).await?.into_document(&request.url)?;

            let Some(selector) = &request.wait_for else {
                return Ok(document);
            };
            if document.matches(selector)? {
                return Ok(document);
            }

            tracing::debug!(
                source = %self.descriptor.name(),
                "{} not ready (`{}`), attempt {}/{}",
                request.url,
                selector,
                attempt,
                self.readiness_attempts
            );
            if attempt < self.readiness_attempts {
                tokio::time::sleep(self.readiness_interval).await;
            }
        }

        Err(FetchError::NotReady {
            url: request.url.clone(),
            selector: request.wait_for.clone().unwrap_or_default(),
        })
    }

    /// Fetch raw bytes and their declared content type
    pub async fn fetch_bytes(
        &self,
        request: FetchRequest,
    ) -> Result<(Vec<u8>, Option<String>), FetchError> {
        Ok(self.fetch_once(&request).await?.into_bytes())
    }

    /// Download and normalize an image. Failures are logged and yield `None`.
    pub async fn download_image(&self, url: &str, referer: Option<&str>) -> Option<String> {
        let url = self.absolute_url(url);
        let mut request = FetchRequest::bytes(&url);
        if let Some(referer) = referer {
            request = request.referer(referer);
        }

        let (data, content_type) = match self.fetch_bytes(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(source = %self.descriptor.name(), "Image download failed: {}", e);
                return None;
            }
        };

        match self.images.store(&data, content_type.as_deref(), &url) {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::warn!(source = %self.descriptor.name(), "Image rejected: {}", e);
                None
            }
        }
    }

    /// Resolve relative and protocol-relative URLs against the host
    pub fn absolute_url(&self, url: &str) -> String {
        let host = self.descriptor.host();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if let Some(rest) = url.strip_prefix("//") {
            let scheme = host.split("://").next().unwrap_or("https");
            format!("{}://{}", scheme, rest)
        } else if url.starts_with('/') {
            format!("{}{}", host, url)
        } else {
            format!("{}/{}", host, url)
        }
    }

    /// Remove the host or an alternate host from `url`
    pub fn strip_host(&self, url: &str) -> String {
        let url = url.trim();
        self.descriptor.path_on_host(url).unwrap_or(url).to_string()
    }

    /// The requested language if supported, the default one otherwise
    pub fn resolve_lang(&self, lang: Option<&str>) -> String {
        match lang {
            Some(lang) if self.descriptor.supports_lang(lang) => lang.to_string(),
            Some(lang) => {
                tracing::debug!(
                    source = %self.descriptor.name(),
                    "Unsupported language {}, using {}",
                    lang,
                    self.descriptor.default_lang()
                );
                self.descriptor.default_lang().to_string()
            }
            None => self.descriptor.default_lang().to_string(),
        }
    }

    pub fn is_in_library(&self, lang: &str, url: &str) -> bool {
        self.library.contains(self.descriptor.name(), lang, url)
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let gate = &self.gate;
        let fetcher = &self.fetcher;
        with_retry(self.retry, || async move {
            gate.wait().await;
            fetcher.fetch(request).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MemoryLibrary;
    use crate::sources::SourceCapabilities;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn runtime(fetcher: Arc<StaticFetcher>, fetch: FetchConfig) -> SourceRuntime {
        let descriptor = SourceDescriptor::builder("demo", "Demo", "https://demo.test")
            .alt_host("https://www.demo.test")
            .langs(&["en", "fr"])
            .capabilities(SourceCapabilities::all())
            .wait_time(Duration::from_millis(100))
            .build()
            .unwrap();
        let services = SourceServices::new(fetcher).with_fetch_config(fetch);
        SourceRuntime::new(descriptor, &services)
    }

    #[test]
    fn test_url_helpers() {
        let rt = runtime(Arc::new(StaticFetcher::new()), FetchConfig::default());
        assert_eq!(rt.absolute_url("/a.jpg"), "https://demo.test/a.jpg");
        assert_eq!(rt.absolute_url("//cdn.test/a.jpg"), "https://cdn.test/a.jpg");
        assert_eq!(rt.absolute_url("http://x.test/a.jpg"), "http://x.test/a.jpg");
        assert_eq!(rt.strip_host("https://www.demo.test/m-p1.html"), "/m-p1.html");
        assert_eq!(rt.strip_host("/m-p1.html"), "/m-p1.html");
        assert_eq!(
            rt.strip_host("https://demo.test.evil/m-p1.html"),
            "https://demo.test.evil/m-p1.html"
        );
        assert_eq!(rt.strip_host("https://demo.testx"), "https://demo.testx");
        assert_eq!(rt.resolve_lang(Some("fr")), "fr");
        assert_eq!(rt.resolve_lang(Some("de")), "en");
        assert_eq!(rt.resolve_lang(None), "en");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_html_repolls_until_ready() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.route_html("https://demo.test/page", "<p>loading</p>");
        let fetch = FetchConfig {
            readiness_attempts: 3,
            readiness_interval_ms: 10,
            ..FetchConfig::default()
        };
        let rt = runtime(Arc::clone(&fetcher), fetch);

        let result = rt
            .fetch_html(FetchRequest::html("https://demo.test/page").wait_for(".ready"))
            .await;
        assert!(matches!(result, Err(FetchError::NotReady { .. })));
        assert_eq!(fetcher.request_count("https://demo.test/page"), 3);

        let stamps: Vec<_> = fetcher.requests().iter().map(|r| r.at).collect();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_html_returns_ready_document() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.route_html("https://demo.test/page", "<div class='ready'></div>");
        let rt = runtime(Arc::clone(&fetcher), FetchConfig::default());

        let doc = rt
            .fetch_html(FetchRequest::html("https://demo.test/page").wait_for(".ready"))
            .await
            .unwrap();
        assert_eq!(doc.url, "https://demo.test/page");
        assert_eq!(fetcher.total_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.route_error(
            "https://demo.test/down",
            FetchError::Status {
                url: "https://demo.test/down".into(),
                status: 503,
            },
        );
        let fetch = FetchConfig {
            max_retries: 2,
            ..FetchConfig::default()
        };
        let rt = runtime(Arc::clone(&fetcher), fetch);

        let result = rt.fetch_html(FetchRequest::html("https://demo.test/down")).await;
        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(fetcher.request_count("https://demo.test/down"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_image_is_soft() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher
            .route_bytes("https://demo.test/ok.png", PNG, None)
            .route_html("https://demo.test/not-image", "<html></html>");
        let rt = runtime(Arc::clone(&fetcher), FetchConfig::default());

        let stored = rt.download_image("/ok.png", Some("https://demo.test/ch")).await;
        assert!(stored.unwrap().starts_with("data:image/png;base64,"));
        assert!(rt.download_image("/missing.png", None).await.is_none());
        assert!(rt.download_image("/not-image", None).await.is_none());
    }

    #[test]
    fn test_wait_override_and_library() {
        let descriptor = SourceDescriptor::builder("demo", "Demo", "https://demo.test")
            .langs(&["en"])
            .wait_time(Duration::from_millis(500))
            .build()
            .unwrap();
        let library = Arc::new(MemoryLibrary::new());
        library.add("demo", "en", "/m-p1.html");
        let services = SourceServices::offline()
            .with_library(library)
            .with_wait("demo", Duration::from_millis(50));

        let rt = SourceRuntime::new(descriptor, &services);
        assert_eq!(rt.gate().wait_time(), Duration::from_millis(50));
        assert!(rt.is_in_library("en", "/m-p1.html"));
        assert!(!rt.is_in_library("en", "/other-p2.html"));
    }
}
