//! The fetch capability consumed by sources.
//!
//! A [`Fetcher`] turns a [`FetchRequest`] into either an HTML [`Document`]
//! or raw bytes. Throttling and readiness verification happen one level up,
//! in the source runtime, so a fetcher only performs single requests.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Errors produced by a fetcher
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Unparseable response from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("Readiness condition `{selector}` not met for {url}")]
    NotReady { url: String, selector: String },
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse { .. } | FetchError::NotReady { .. } => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return FetchError::Status {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        FetchError::Network(err.to_string())
    }
}

/// What the caller expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Html,
    Bytes,
}

/// A single outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub kind: FetchKind,
    /// CSS selector that must be present before the document counts as ready
    pub wait_for: Option<String>,
    pub referer: Option<String>,
}

impl FetchRequest {
    pub fn html(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FetchKind::Html,
            wait_for: None,
            referer: None,
        }
    }

    pub fn bytes(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: FetchKind::Bytes,
            wait_for: None,
            referer: None,
        }
    }

    pub fn wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// A fetched HTML document.
///
/// The markup is kept as text: `scraper::Html` is not `Send`, so sources
/// parse it inside synchronous extraction functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: String,
    pub html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.html)
    }

    /// Whether at least one element matches `selector`
    pub fn matches(&self, selector: &str) -> Result<bool, FetchError> {
        let selector = Selector::parse(selector).map_err(|e| FetchError::Parse {
            url: self.url.clone(),
            reason: format!("invalid selector `{}`: {}", selector, e),
        })?;
        Ok(self.parse().select(&selector).next().is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    Html(Document),
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
}

impl FetchResponse {
    pub fn into_document(self, url: &str) -> Result<Document, FetchError> {
        match self {
            FetchResponse::Html(document) => Ok(document),
            FetchResponse::Bytes { data, .. } => String::from_utf8(data)
                .map(|html| Document::new(url, html))
                .map_err(|e| FetchError::Parse {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn into_bytes(self) -> (Vec<u8>, Option<String>) {
        match self {
            FetchResponse::Html(document) => {
                (document.html.into_bytes(), Some("text/html".to_string()))
            }
            FetchResponse::Bytes { data, content_type } => (data, content_type),
        }
    }
}

/// Performs one request. Implementations must bound every request with a
/// finite timeout.
#[async_trait]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// A request observed by [`StaticFetcher`]
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub url: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Route {
    Html(String),
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    Fail(FetchError),
}

/// In-memory fetcher serving canned responses.
///
/// Used for fixtures and offline runs. Every request is recorded with the
/// instant it was issued; unknown URLs answer with HTTP 404.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, Route>>,
    log: Mutex<Vec<FetchRecord>>,
    latency: Duration,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn route_html(&self, url: impl Into<String>, html: impl Into<String>) -> &Self {
        self.insert(url.into(), Route::Html(html.into()))
    }

    pub fn route_bytes(
        &self,
        url: impl Into<String>,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> &Self {
        self.insert(
            url.into(),
            Route::Bytes {
                data: data.into(),
                content_type: content_type.map(str::to_string),
            },
        )
    }

    pub fn route_error(&self, url: impl Into<String>, error: FetchError) -> &Self {
        self.insert(url.into(), Route::Fail(error))
    }

    fn insert(&self, url: String, route: Route) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url, route);
        self
    }

    /// All requests issued so far, in order
    pub fn requests(&self) -> Vec<FetchRecord> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FetchRecord {
                url: request.url.clone(),
                at: Instant::now(),
            });

        let route = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&request.url)
            .cloned();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match route {
            Some(Route::Html(html)) => Ok(FetchResponse::Html(Document::new(&request.url, html))),
            Some(Route::Bytes { data, content_type }) => {
                Ok(FetchResponse::Bytes { data, content_type })
            }
            Some(Route::Fail(error)) => Err(error),
            None => Err(FetchError::Status {
                url: request.url.clone(),
                status: 404,
            }),
        }
    }
}
