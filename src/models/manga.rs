//! Source-agnostic manga, chapter and page records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{escape_id_part, unescape_id_part, validate_lang, validate_slug, ValidationError};

/// Composite manga id: `<source>/<lang>/<relative-url>`.
///
/// The relative URL always starts with `/` and is escaped so that it never
/// contains a bare `@`, which separates a manga id from a chapter URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MangaId {
    source: String,
    lang: String,
    url: String,
}

impl MangaId {
    /// Build an id from its parts. `url` is the relative manga URL.
    pub fn new(source: &str, lang: &str, url: &str) -> Result<Self, ValidationError> {
        validate_slug(source)?;
        validate_lang(lang)?;

        let url = if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{}", url)
        };

        Ok(Self {
            source: source.to_string(),
            lang: lang.to_string(),
            url,
        })
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(id: &str) -> Result<Self, ValidationError> {
        let mut parts = id.splitn(3, '/');
        let (source, lang, rest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(lang), Some(rest)) => (source, lang, rest),
            _ => return Err(ValidationError::InvalidId(id.to_string())),
        };

        let url = unescape_id_part(&format!("/{}", rest))?;
        Self::new(source, lang, &url)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Relative manga URL (unescaped)
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for MangaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.source, self.lang, escape_id_part(&self.url))
    }
}

impl From<MangaId> for String {
    fn from(id: MangaId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for MangaId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Composite chapter id: `<mangaId>@<relative-chapter-url>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterId {
    manga: MangaId,
    url: String,
}

impl ChapterId {
    pub fn new(manga: MangaId, url: &str) -> Self {
        Self {
            manga,
            url: url.to_string(),
        }
    }

    pub fn parse(id: &str) -> Result<Self, ValidationError> {
        let (manga, url) = id
            .split_once('@')
            .ok_or_else(|| ValidationError::InvalidId(id.to_string()))?;

        Ok(Self {
            manga: MangaId::parse(manga)?,
            url: unescape_id_part(url)?,
        })
    }

    pub fn manga(&self) -> &MangaId {
        &self.manga
    }

    /// Relative chapter URL (unescaped)
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.manga, escape_id_part(&self.url))
    }
}

impl From<ChapterId> for String {
    fn from(id: ChapterId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ChapterId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Volume, chapter number and name parsed from a human-readable label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub volume: Option<u32>,
    /// Chapter number, `0` when the label carries none
    pub chapter: f64,
    pub name: Option<String>,
}

/// Latest release advertised next to a search or recommendation entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<f64>,
}

/// A manga as listed by search and recommendation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaSummary {
    pub id: MangaId,
    /// Slug of the source that produced this entry
    pub source: String,
    pub lang: String,
    pub name: String,
    /// Relative URL of the manga page
    pub url: String,
    pub covers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_release: Option<ReleaseInfo>,
    pub in_library: bool,
}

/// A manga page with its chapter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MangaDetail {
    pub id: MangaId,
    pub source: String,
    pub lang: String,
    pub name: String,
    pub url: String,
    pub covers: Vec<String>,
    pub synopsis: String,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    /// Sorted descending by `number`
    pub chapters: Vec<ChapterDescriptor>,
    pub in_library: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterDescriptor {
    pub id: ChapterId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    /// Display number, 1-based in discovery order
    pub number: f64,
    /// Relative chapter URL
    pub url: String,
    /// Discovery time, epoch milliseconds
    pub date: i64,
    pub read: bool,
}

/// One downloaded chapter page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPage {
    pub index: usize,
    /// Normalized image reference
    pub src: String,
    pub lastpage: bool,
}

/// Where a manga lives, as resolved from a manga or chapter URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaLocator {
    pub url: String,
    pub lang: String,
    pub source: String,
}

/// Sort chapters descending by number.
pub fn sort_chapters_descending(chapters: &mut [ChapterDescriptor]) {
    chapters.sort_by(|a, b| b.number.total_cmp(&a.number));
}
