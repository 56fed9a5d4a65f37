//! Manga source plugins with a capability-based trait.
//!
//! A source is split in two layers:
//!
//! - *extractor hooks* ([`Source::search_entries`], [`Source::manga_page`],
//!   ...) fetch through the source's [`SourceRuntime`] and return plain
//!   scraped data. A plugin implements the hooks for the capabilities it
//!   declares; the others default to [`SourceError::NotImplemented`].
//! - *streaming operations* ([`Source::search`], [`Source::manga`], ...) are
//!   provided methods. They run the shared session protocol over the hooks:
//!   cancellation checkpoints, cover and page downloads, chapter numbering,
//!   error capture and exactly one terminal emission.
//!
//! # Implementing a New Source
//!
//! 1. Build a [`SourceDescriptor`] and a [`SourceRuntime`] from the shared
//!    [`SourceServices`]
//! 2. Implement the page classifiers and the hooks of every declared capability
//! 3. Register it in [`SourceRegistry::from_services`]

mod descriptor;
pub mod mangahasu;
pub mod mock;
mod pipeline;
mod registry;
mod runtime;

pub use descriptor::{SourceDescriptor, SourceInfo, SourceMeta};
pub use mangahasu::MangaHasu;
pub use mock::MockSource;
pub use registry::{SourceCapabilities, SourceRegistry};
pub use runtime::{SourceRuntime, SourceServices};

use async_trait::async_trait;
use std::fmt;

use crate::models::{ChapterInfo, CorrelationId, ErrorKind};
use crate::session::SessionTarget;
use crate::utils::{FetchError, ValidationError};

/// A search or recommendation entry as scraped from a listing page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedEntry {
    pub name: String,
    /// Manga page URL, absolute or relative to the source host
    pub url: String,
    /// Cover image URL, downloaded by the pipeline
    pub cover: Option<String>,
    /// Raw label of the latest release, e.g. `Vol 2 Chapter 5: Title`
    pub last_release: Option<String>,
    /// Language of the entry, the source's first language when unset
    pub lang: Option<String>,
}

/// A manga page as scraped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedManga {
    pub name: String,
    pub synopsis: String,
    pub cover: Option<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    /// In page order, newest first
    pub chapters: Vec<ScrapedChapter>,
}

/// One row of a manga's chapter list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedChapter {
    pub name: String,
    pub volume: Option<u32>,
    pub url: String,
}

/// Image URLs of a chapter in reading order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterImages {
    /// Referer sent with every image request
    pub referer: Option<String>,
    /// `None` for a page whose image URL could not be found
    pub pages: Vec<Option<String>>,
}

/// Invoked once with the number of pages to expect
pub type PageCountCallback = Box<dyn FnOnce(usize) + Send>;

/// Extra arguments of the chapter operation
#[derive(Default)]
pub struct ChapterOptions {
    pub on_page_count: Option<PageCountCallback>,
    /// Only fetch the page at this index
    pub retry_index: Option<usize>,
}

impl ChapterOptions {
    pub fn retry(index: usize) -> Self {
        Self {
            on_page_count: None,
            retry_index: Some(index),
        }
    }

    pub fn on_page_count(mut self, callback: impl FnOnce(usize) + Send + 'static) -> Self {
        self.on_page_count = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ChapterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapterOptions")
            .field("on_page_count", &self.on_page_count.is_some())
            .field("retry_index", &self.retry_index)
            .finish()
    }
}

/// The Source trait defines the interface for all manga source plugins.
#[async_trait]
pub trait Source: Send + Sync + fmt::Debug {
    /// Throttled fetch access, descriptor and shared services
    fn runtime(&self) -> &SourceRuntime;

    fn descriptor(&self) -> &SourceDescriptor {
        self.runtime().descriptor()
    }

    /// Source slug, e.g. `mangahasu`
    fn id(&self) -> &str {
        self.descriptor().name()
    }

    /// Human-readable name
    fn name(&self) -> &str {
        self.descriptor().display_name()
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.descriptor().capabilities()
    }

    fn supports(&self, capability: SourceCapabilities) -> bool {
        self.capabilities().contains(capability)
    }

    // ========== CLASSIFIERS ==========

    /// Whether `url` (relative to the host) has the shape of a manga page
    fn is_manga_page(&self, url: &str) -> bool;

    /// Whether `url` (relative to the host) has the shape of a chapter page
    fn is_chapter_page(&self, url: &str) -> bool;

    /// Parse a chapter label such as `Vol 2 Chapter 5: Title`
    fn chapter_info(&self, _label: &str) -> Option<ChapterInfo> {
        None
    }

    // ========== EXTRACTOR HOOKS ==========

    async fn search_entries(&self, _query: &str) -> Result<Vec<ScrapedEntry>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    async fn recommend_entries(&self) -> Result<Vec<ScrapedEntry>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// `url` is a relative manga page URL already accepted by the classifier
    async fn manga_page(&self, _url: &str, _lang: &str) -> Result<ScrapedManga, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// `url` is a relative chapter page URL already accepted by the classifier
    async fn chapter_images(&self, _url: &str, _lang: &str) -> Result<ChapterImages, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Link from a chapter page back to its manga page, if the page has one
    async fn manga_link_from_chapter(
        &self,
        _url: &str,
        _lang: &str,
    ) -> Result<Option<String>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    // ========== STREAMING OPERATIONS ==========

    /// Stream search results, then `done`
    async fn search(&self, query: &str, target: &SessionTarget, id: CorrelationId) {
        pipeline::search(self, query, target, id).await
    }

    /// Emit one manga detail
    async fn manga(&self, url: &str, lang: &str, target: &SessionTarget, id: CorrelationId) {
        pipeline::manga(self, url, lang, target, id).await
    }

    /// Stream chapter pages, then `done`
    async fn chapter(
        &self,
        url: &str,
        lang: &str,
        target: &SessionTarget,
        id: CorrelationId,
        options: ChapterOptions,
    ) {
        pipeline::chapter(self, url, lang, target, id, options).await
    }

    /// Stream recommendations, then `done`
    async fn recommend(&self, target: &SessionTarget, id: CorrelationId) {
        pipeline::recommend(self, target, id).await
    }

    /// Emit where the manga of a manga or chapter URL lives, or `null`
    async fn manga_from_chapter_url(
        &self,
        url: &str,
        lang: Option<&str>,
        target: &SessionTarget,
        id: CorrelationId,
    ) {
        pipeline::manga_from_chapter_url(self, url, lang, target, id).await
    }
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// URL rejected by the page classifiers
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Expected page structure is missing
    #[error("Parse error: {0}")]
    Parse(String),

    /// The caller withdrew interest
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation not implemented for this source")]
    NotImplemented,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid source descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Error: {0}")]
    Other(String),
}

impl SourceError {
    /// Caller-facing error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::InvalidLink(_) => ErrorKind::InvalidLink,
            SourceError::Fetch(FetchError::Parse { .. }) => ErrorKind::ParseError,
            SourceError::Fetch(_) => ErrorKind::FetchError,
            SourceError::Parse(_) | SourceError::NotFound(_) => ErrorKind::ParseError,
            SourceError::Cancelled
            | SourceError::NotImplemented
            | SourceError::InvalidDescriptor(_)
            | SourceError::Other(_) => ErrorKind::UnknownError,
        }
    }
}

impl From<ValidationError> for SourceError {
    fn from(err: ValidationError) -> Self {
        SourceError::Parse(err.to_string())
    }
}

impl From<regex::Error> for SourceError {
    fn from(err: regex::Error) -> Self {
        SourceError::InvalidDescriptor(format!("regex: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_capabilities() {
        let caps = SourceCapabilities::SEARCH | SourceCapabilities::CHAPTER;

        assert!(caps.contains(SourceCapabilities::SEARCH));
        assert!(caps.contains(SourceCapabilities::CHAPTER));
        assert!(!caps.contains(SourceCapabilities::RECOMMEND));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SourceError::InvalidLink("/x".into()).kind(),
            ErrorKind::InvalidLink
        );
        assert_eq!(
            SourceError::Fetch(FetchError::Timeout("t".into())).kind(),
            ErrorKind::FetchError
        );
        assert_eq!(
            SourceError::Fetch(FetchError::NotReady {
                url: "u".into(),
                selector: ".img".into()
            })
            .kind(),
            ErrorKind::FetchError
        );
        assert_eq!(SourceError::Parse("p".into()).kind(), ErrorKind::ParseError);
        assert_eq!(SourceError::Other("o".into()).kind(), ErrorKind::UnknownError);
    }

    #[test]
    fn test_chapter_options() {
        let options = ChapterOptions::retry(3).on_page_count(|_| {});
        assert_eq!(options.retry_index, Some(3));
        assert!(options.on_page_count.is_some());
        assert!(format!("{:?}", options).contains("retry_index: Some(3)"));
    }
}
