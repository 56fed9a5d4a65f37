//! Wire-level event names and payloads of the streaming protocol.
//!
//! Every emission carries the caller's correlation id next to its payload.
//! The event names are a contract with the caller and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::manga::{ChapterPage, MangaDetail, MangaLocator, MangaSummary};

/// Caller-supplied identifier correlating emissions with a request
pub type CorrelationId = u64;

/// The five streaming operations of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Search,
    Manga,
    Chapter,
    Recommend,
    MangaFromChapterUrl,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Search,
        Operation::Manga,
        Operation::Chapter,
        Operation::Recommend,
        Operation::MangaFromChapterUrl,
    ];

    /// Operation name used in error payloads and logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Manga => "manga",
            Operation::Chapter => "chapter",
            Operation::Recommend => "recommend",
            Operation::MangaFromChapterUrl => "manga-from-chapter-url",
        }
    }

    /// Event name results are emitted under
    pub fn result_event(&self) -> &'static str {
        match self {
            Operation::Search => "search-in-sources",
            Operation::Manga => "show-manga",
            Operation::Chapter => "show-chapter",
            Operation::Recommend => "show-recommend",
            Operation::MangaFromChapterUrl => "manga-from-chapter-url",
        }
    }

    /// Event name a caller raises to withdraw interest
    pub fn stop_event(&self) -> &'static str {
        match self {
            Operation::Search => "stop-search",
            Operation::Manga => "stop-show-manga",
            Operation::Chapter => "stop-show-chapter",
            Operation::Recommend => "stop-show-recommend",
            Operation::MangaFromChapterUrl => "stop-manga-from-chapter-url",
        }
    }

    /// Whether `payload` ends a single-source session of this operation.
    ///
    /// `done` and errors end every operation. A manga detail ends `manga`
    /// and a locator, found or not, ends `manga-from-chapter-url`.
    pub fn is_terminal(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Done(_) | Payload::Error(_) => true,
            Payload::Detail(_) => *self == Operation::Manga,
            Payload::Located(_) => *self == Operation::MangaFromChapterUrl,
            Payload::Manga(_) | Payload::Page(_) | Payload::PageError(_) => false,
        }
    }

    /// Resolve a stop event name back to its operation
    pub fn from_stop_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.stop_event() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// URL failed the source's page-shape classifier
    InvalidLink,
    /// Network, timeout or non-success status
    FetchError,
    /// Document fetched but the expected structure is absent
    ParseError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidLink => "invalid-link",
            ErrorKind::FetchError => "fetch-error",
            ErrorKind::ParseError => "parse-error",
            ErrorKind::UnknownError => "unknown-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error emission closing a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub source: String,
    pub operation: Operation,
    pub error: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// A chapter page that could not be downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageError {
    pub index: usize,
    pub lastpage: bool,
    pub error: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Done {
    pub done: bool,
}

/// Everything an operation can emit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Manga(Box<MangaSummary>),
    Detail(Box<MangaDetail>),
    Page(ChapterPage),
    PageError(PageError),
    /// Result of resolving a URL; `None` when nothing matched
    Located(Option<MangaLocator>),
    Error(ErrorPayload),
    Done(Done),
}

impl Payload {
    pub fn done() -> Self {
        Payload::Done(Done { done: true })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Payload::Done(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Payload::Error(_))
    }
}

/// One message on the wire: `emit(event, correlation_id, payload)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Emission {
    pub event: &'static str,
    pub correlation_id: CorrelationId,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Operation::Search.result_event(), "search-in-sources");
        assert_eq!(Operation::Search.stop_event(), "stop-search");
        assert_eq!(Operation::Manga.stop_event(), "stop-show-manga");
        assert_eq!(Operation::Chapter.stop_event(), "stop-show-chapter");
        assert_eq!(Operation::Recommend.stop_event(), "stop-show-recommend");
    }

    #[test]
    fn test_stop_event_lookup() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_stop_event(op.stop_event()), Some(op));
        }
        assert_eq!(Operation::from_stop_event("stop-nothing"), None);
    }

    #[test]
    fn test_terminal_payloads_per_operation() {
        for op in Operation::ALL {
            assert!(op.is_terminal(&Payload::done()));
        }
        assert!(Operation::MangaFromChapterUrl.is_terminal(&Payload::Located(None)));
        assert!(!Operation::Search.is_terminal(&Payload::Located(None)));

        let page_error = Payload::PageError(PageError {
            index: 0,
            lastpage: true,
            error: ErrorKind::FetchError,
        });
        assert!(!Operation::Chapter.is_terminal(&page_error));
    }

    #[test]
    fn test_payload_serialization() {
        let done = serde_json::to_value(Payload::done()).unwrap();
        assert_eq!(done, serde_json::json!({ "done": true }));

        let error = serde_json::to_value(Payload::Error(ErrorPayload {
            source: "mangahasu".to_string(),
            operation: Operation::Search,
            error: ErrorKind::FetchError,
            trace: Some("timed out".to_string()),
        }))
        .unwrap();
        assert_eq!(error["error"], "fetch-error");
        assert_eq!(error["operation"], "search");
        assert_eq!(error["source"], "mangahasu");

        let located = serde_json::to_value(Payload::Located(None)).unwrap();
        assert!(located.is_null());
    }
}
