//! The session protocol shared by every source.
//!
//! Each operation opens a [`Session`], runs the source's extractor hooks
//! under a panic guard, checks for cancellation between items and ends
//! with exactly one terminal emission:
//!
//! | operation                | success        | cancelled | failure |
//! |--------------------------|----------------|-----------|---------|
//! | search, recommend        | items, `done`  | `done`    | error   |
//! | chapter                  | pages, `done`  | `done`    | error   |
//! | manga                    | detail         | `done`    | error   |
//! | manga_from_chapter_url   | locator/`null` | `done`    | error   |

use futures_util::FutureExt;
use regex::{Regex, RegexBuilder};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::LazyLock;

use super::{ChapterOptions, ScrapedEntry, Source, SourceError};
use crate::models::{
    sort_chapters_descending, ChapterDescriptor, ChapterId, ChapterPage, CorrelationId,
    ErrorKind, ErrorPayload, MangaDetail, MangaId, MangaLocator, MangaSummary, Operation,
    PageError, Payload, ReleaseInfo,
};
use crate::session::{Session, SessionTarget};

/// Why an operation did not complete
enum Failure {
    Cancelled,
    Error { kind: ErrorKind, trace: Option<String> },
}

impl From<SourceError> for Failure {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => Failure::Cancelled,
            other => Failure::Error {
                kind: other.kind(),
                trace: Some(other.to_string()),
            },
        }
    }
}

impl Failure {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let trace = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        Failure::Error {
            kind: ErrorKind::UnknownError,
            trace,
        }
    }
}

/// Run `body`, turning errors and panics into a [`Failure`]
async fn guarded<T, F>(body: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.into()),
        Err(panic) => Err(Failure::from_panic(panic)),
    }
}

fn checkpoint(session: &Session) -> Result<(), SourceError> {
    if session.is_cancelled() {
        Err(SourceError::Cancelled)
    } else {
        Ok(())
    }
}

/// Terminate a session that failed or was cancelled
fn terminate_failed(session: &mut Session, failure: Failure) {
    match failure {
        Failure::Cancelled => {
            tracing::debug!(
                source = %session.source(),
                operation = %session.operation(),
                id = session.correlation_id(),
                "cancelled"
            );
            session.terminate(Payload::done());
        }
        Failure::Error { kind, trace } => {
            tracing::warn!(
                source = %session.source(),
                operation = %session.operation(),
                id = session.correlation_id(),
                "{}: {}",
                kind,
                trace.as_deref().unwrap_or("no trace")
            );
            let payload = ErrorPayload {
                source: session.source().to_string(),
                operation: session.operation(),
                error: kind,
                trace,
            };
            session.terminate(Payload::Error(payload));
        }
    }
}

/// Terminate a streaming operation: `done` on success
fn finish_stream(mut session: Session, outcome: Result<(), Failure>) {
    match outcome {
        Ok(()) => {
            tracing::info!(
                source = %session.source(),
                operation = %session.operation(),
                id = session.correlation_id(),
                "finished"
            );
            session.terminate(Payload::done());
        }
        Err(failure) => terminate_failed(&mut session, failure),
    }
}

/// Terminate a single-shot operation with its result
fn finish_single(mut session: Session, outcome: Result<Payload, Failure>) {
    match outcome {
        Ok(payload) => {
            session.terminate(payload);
        }
        Err(failure) => terminate_failed(&mut session, failure),
    }
}

/// Turn a raw release label into structured release info
fn release_info<S: Source + ?Sized>(source: &S, label: &str) -> Option<ReleaseInfo> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }

    Some(match source.chapter_info(label) {
        Some(info) => ReleaseInfo {
            name: info.name,
            volume: info.volume,
            chapter: Some(info.chapter),
        },
        None => ReleaseInfo {
            name: Some(strip_chapter_word(label)),
            volume: None,
            chapter: None,
        },
    })
}

static CHAPTER_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    RegexBuilder::new("chapter")
        .case_insensitive(true)
        .build()
        .ok()
});

fn strip_chapter_word(label: &str) -> String {
    match CHAPTER_WORD.as_ref() {
        Some(re) => re.replace_all(label, "").trim().to_string(),
        None => label.trim().to_string(),
    }
}

/// Emit listing entries one by one, downloading covers on the way
async fn emit_entries<S: Source + ?Sized>(
    source: &S,
    session: &Session,
    entries: Vec<ScrapedEntry>,
) -> Result<(), SourceError> {
    let runtime = source.runtime();

    for entry in entries {
        checkpoint(session)?;

        let url = runtime.strip_host(&entry.url);
        let name = entry.name.trim();
        if name.is_empty() || !source.is_manga_page(&url) {
            tracing::debug!(source = %source.id(), "Skipping entry {:?}", entry.url);
            continue;
        }

        let lang = runtime.resolve_lang(entry.lang.as_deref());
        let id = MangaId::new(source.id(), &lang, &url)?;

        let mut covers = Vec::new();
        if let Some(cover) = &entry.cover {
            covers.extend(runtime.download_image(cover, None).await);
        }
        checkpoint(session)?;

        let summary = MangaSummary {
            id,
            source: source.id().to_string(),
            in_library: runtime.is_in_library(&lang, &url),
            lang,
            name: name.to_string(),
            url,
            covers,
            last_release: entry
                .last_release
                .as_deref()
                .and_then(|label| release_info(source, label)),
        };
        session.emit(Payload::Manga(Box::new(summary)));
    }

    Ok(())
}

pub(super) async fn search<S: Source + ?Sized>(
    source: &S,
    query: &str,
    target: &SessionTarget,
    id: CorrelationId,
) {
    let session = Session::open(target, Operation::Search, id, source.id());
    tracing::info!(source = %source.id(), id, "search {:?}", query);

    let outcome = {
        let session = &session;
        guarded(async move {
            checkpoint(session)?;
            let entries = source.search_entries(query).await?;
            emit_entries(source, session, entries).await
        })
        .await
    };

    finish_stream(session, outcome);
}

pub(super) async fn recommend<S: Source + ?Sized>(
    source: &S,
    target: &SessionTarget,
    id: CorrelationId,
) {
    let session = Session::open(target, Operation::Recommend, id, source.id());
    tracing::info!(source = %source.id(), id, "recommend");

    let outcome = {
        let session = &session;
        guarded(async move {
            checkpoint(session)?;
            let entries = source.recommend_entries().await?;
            emit_entries(source, session, entries).await
        })
        .await
    };

    finish_stream(session, outcome);
}

pub(super) async fn manga<S: Source + ?Sized>(
    source: &S,
    url: &str,
    lang: &str,
    target: &SessionTarget,
    id: CorrelationId,
) {
    let session = Session::open(target, Operation::Manga, id, source.id());
    tracing::info!(source = %source.id(), id, "manga {}", url);

    let outcome = {
        let session = &session;
        guarded(async move {
            let runtime = source.runtime();
            let link = runtime.strip_host(url);
            if !source.is_manga_page(&link) {
                return Err(SourceError::InvalidLink(url.to_string()));
            }
            let lang = runtime.resolve_lang(Some(lang));
            let manga_id = MangaId::new(source.id(), &lang, &link)?;

            checkpoint(session)?;
            let page = source.manga_page(&link, &lang).await?;
            checkpoint(session)?;

            let mut covers = Vec::new();
            if let Some(cover) = &page.cover {
                covers.extend(runtime.download_image(cover, None).await);
            }

            // rows are listed newest first; number them in discovery order
            let discovered_at = chrono::Utc::now().timestamp_millis();
            let mut chapters = Vec::with_capacity(page.chapters.len());
            for row in page.chapters.into_iter().rev() {
                checkpoint(session)?;
                let chapter_url = runtime.strip_host(&row.url);
                if chapter_url.is_empty() {
                    continue;
                }
                chapters.push(ChapterDescriptor {
                    id: ChapterId::new(manga_id.clone(), &chapter_url),
                    name: row.name,
                    volume: row.volume,
                    number: (chapters.len() + 1) as f64,
                    url: chapter_url,
                    date: discovered_at,
                    read: false,
                });
            }
            sort_chapters_descending(&mut chapters);
            checkpoint(session)?;

            Ok(Payload::Detail(Box::new(MangaDetail {
                id: manga_id,
                source: source.id().to_string(),
                in_library: runtime.is_in_library(&lang, &link),
                lang,
                name: page.name.trim().to_string(),
                url: link,
                covers,
                synopsis: page.synopsis,
                authors: page.authors,
                tags: page.tags,
                chapters,
            })))
        })
        .await
    };

    finish_single(session, outcome);
}

pub(super) async fn chapter<S: Source + ?Sized>(
    source: &S,
    url: &str,
    lang: &str,
    target: &SessionTarget,
    id: CorrelationId,
    options: ChapterOptions,
) {
    let session = Session::open(target, Operation::Chapter, id, source.id());
    tracing::info!(source = %source.id(), id, ?options, "chapter {}", url);

    let ChapterOptions {
        on_page_count,
        retry_index,
    } = options;

    let outcome = {
        let session = &session;
        guarded(async move {
            let runtime = source.runtime();
            let link = runtime.strip_host(url);
            if !source.is_chapter_page(&link) {
                return Err(SourceError::InvalidLink(url.to_string()));
            }
            let lang = runtime.resolve_lang(Some(lang));

            checkpoint(session)?;
            let images = source.chapter_images(&link, &lang).await?;

            let total = images.pages.len();
            if let Some(callback) = on_page_count {
                callback(total);
            }

            for (index, image) in images.pages.into_iter().enumerate() {
                checkpoint(session)?;
                if retry_index.is_some_and(|wanted| wanted != index) {
                    continue;
                }

                let lastpage = index + 1 == total;
                let stored = match image {
                    Some(src) => runtime.download_image(&src, images.referer.as_deref()).await,
                    None => None,
                };
                checkpoint(session)?;

                match stored {
                    Some(src) => session.emit(Payload::Page(ChapterPage {
                        index,
                        src,
                        lastpage,
                    })),
                    None => session.emit(Payload::PageError(PageError {
                        index,
                        lastpage,
                        error: ErrorKind::FetchError,
                    })),
                };
            }

            Ok(())
        })
        .await
    };

    finish_stream(session, outcome);
}

pub(super) async fn manga_from_chapter_url<S: Source + ?Sized>(
    source: &S,
    url: &str,
    lang: Option<&str>,
    target: &SessionTarget,
    id: CorrelationId,
) {
    let session = Session::open(target, Operation::MangaFromChapterUrl, id, source.id());
    tracing::info!(source = %source.id(), id, "manga from chapter url {}", url);

    let outcome = {
        let session = &session;
        guarded(async move {
            let runtime = source.runtime();
            let link = runtime.strip_host(url);
            let lang = runtime.resolve_lang(lang);

            let locator = |url: String| MangaLocator {
                url,
                lang: lang.clone(),
                source: source.id().to_string(),
            };

            if source.is_manga_page(&link) {
                return Ok(Payload::Located(Some(locator(link))));
            }
            if !source.is_chapter_page(&link) {
                return Ok(Payload::Located(None));
            }

            checkpoint(session)?;
            let manga_link = source.manga_link_from_chapter(&link, &lang).await?;
            checkpoint(session)?;

            Ok(Payload::Located(
                manga_link
                    .map(|found| runtime.strip_host(&found))
                    .filter(|found| source.is_manga_page(found))
                    .map(locator),
            ))
        })
        .await
    };

    finish_single(session, outcome);
}
