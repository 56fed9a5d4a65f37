//! Routes caller requests to sources.
//!
//! Single-source operations are looked up by slug (or by URL host for
//! [`Scheduler::resolve`]) and run against the caller's target directly.
//! [`Scheduler::search_all`] and [`Scheduler::recommend_all`] fan out to
//! every enabled source with the capability and merge their streams into
//! one, closed by a single aggregate `done`.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{Config, SourcesConfig};
use crate::models::{CorrelationId, Emission, Operation, Payload};
use crate::session::{Emitter, SessionTarget};
use crate::sources::{
    ChapterOptions, Source, SourceCapabilities, SourceError, SourceInfo, SourceRegistry,
    SourceServices,
};
use crate::utils::FetchError;

/// Request rejected before any source ran. Nothing has been emitted.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Source {slug} does not support {operation}")]
    Unsupported { slug: String, operation: Operation },

    #[error("No source serves {0}")]
    NoSourceForUrl(String),

    #[error("Failed to set up fetcher: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to set up sources: {0}")]
    Source(#[from] SourceError),
}

/// Dispatches operations over a [`SourceRegistry`]
#[derive(Debug, Clone)]
pub struct Scheduler {
    registry: Arc<SourceRegistry>,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(registry: SourceRegistry, max_concurrent: usize) -> Self {
        Self {
            registry: Arc::new(registry),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Build the HTTP-backed services and built-in sources from configuration
    pub fn from_config(config: &Config) -> Result<Self, SchedulerError> {
        let services = SourceServices::from_config(config)?;
        Self::from_services(&services, &config.sources)
    }

    pub fn from_services(
        services: &SourceServices,
        sources: &SourcesConfig,
    ) -> Result<Self, SchedulerError> {
        let registry = SourceRegistry::from_services(services, sources)?;
        tracing::info!("Scheduler ready with {} source(s)", registry.len());
        Ok(Self::new(registry, sources.max_concurrent_sources))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Descriptions of every registered source, ordered by slug
    pub fn source_infos(&self) -> Vec<SourceInfo> {
        self.registry
            .all()
            .into_iter()
            .map(|source| source.descriptor().info())
            .collect()
    }

    fn route(
        &self,
        slug: &str,
        operation: Operation,
        capability: SourceCapabilities,
    ) -> Result<Arc<dyn Source>, SchedulerError> {
        let source = self
            .registry
            .get(slug)
            .filter(|source| source.descriptor().enabled())
            .ok_or_else(|| SchedulerError::UnknownSource(slug.to_string()))?;

        if !source.supports(capability) {
            return Err(SchedulerError::Unsupported {
                slug: slug.to_string(),
                operation,
            });
        }

        Ok(Arc::clone(source))
    }

    pub async fn search(
        &self,
        slug: &str,
        query: &str,
        target: &SessionTarget,
        id: CorrelationId,
    ) -> Result<(), SchedulerError> {
        let source = self.route(slug, Operation::Search, SourceCapabilities::SEARCH)?;
        source.search(query, target, id).await;
        Ok(())
    }

    pub async fn manga(
        &self,
        slug: &str,
        url: &str,
        lang: &str,
        target: &SessionTarget,
        id: CorrelationId,
    ) -> Result<(), SchedulerError> {
        let source = self.route(slug, Operation::Manga, SourceCapabilities::MANGA)?;
        source.manga(url, lang, target, id).await;
        Ok(())
    }

    pub async fn chapter(
        &self,
        slug: &str,
        url: &str,
        lang: &str,
        target: &SessionTarget,
        id: CorrelationId,
        options: ChapterOptions,
    ) -> Result<(), SchedulerError> {
        let source = self.route(slug, Operation::Chapter, SourceCapabilities::CHAPTER)?;
        source.chapter(url, lang, target, id, options).await;
        Ok(())
    }

    pub async fn recommend(
        &self,
        slug: &str,
        target: &SessionTarget,
        id: CorrelationId,
    ) -> Result<(), SchedulerError> {
        let source = self.route(slug, Operation::Recommend, SourceCapabilities::RECOMMEND)?;
        source.recommend(target, id).await;
        Ok(())
    }

    pub async fn manga_from_chapter_url(
        &self,
        slug: &str,
        url: &str,
        lang: Option<&str>,
        target: &SessionTarget,
        id: CorrelationId,
    ) -> Result<(), SchedulerError> {
        let source = self.route(
            slug,
            Operation::MangaFromChapterUrl,
            SourceCapabilities::RESOLVE,
        )?;
        source.manga_from_chapter_url(url, lang, target, id).await;
        Ok(())
    }

    /// The enabled source serving an absolute URL
    pub fn source_for_url(&self, url: &str) -> Result<Arc<dyn Source>, SchedulerError> {
        self.registry
            .for_url(url)
            .map(Arc::clone)
            .ok_or_else(|| SchedulerError::NoSourceForUrl(url.to_string()))
    }

    /// Locate the manga of an absolute manga or chapter URL on whichever source serves it
    pub async fn resolve(
        &self,
        url: &str,
        lang: Option<&str>,
        target: &SessionTarget,
        id: CorrelationId,
    ) -> Result<(), SchedulerError> {
        let source = self.source_for_url(url)?;
        if !source.supports(SourceCapabilities::RESOLVE) {
            return Err(SchedulerError::Unsupported {
                slug: source.id().to_string(),
                operation: Operation::MangaFromChapterUrl,
            });
        }
        source.manga_from_chapter_url(url, lang, target, id).await;
        Ok(())
    }

    /// Search every enabled source; returns how many sources were queried
    pub async fn search_all(&self, query: &str, target: &SessionTarget, id: CorrelationId) -> usize {
        let query = query.to_string();
        self.fan_out(
            Operation::Search,
            SourceCapabilities::SEARCH,
            target,
            id,
            move |source, inner| {
                let query = query.clone();
                async move { source.search(&query, &inner, id).await }
            },
        )
        .await
    }

    /// Recommendations of every enabled source; returns how many sources were queried
    pub async fn recommend_all(&self, target: &SessionTarget, id: CorrelationId) -> usize {
        self.fan_out(
            Operation::Recommend,
            SourceCapabilities::RECOMMEND,
            target,
            id,
            move |source, inner| async move { source.recommend(&inner, id).await },
        )
        .await
    }

    /// Run `run` on every enabled source with `capability`, each against an
    /// internal target forwarding to `target`.
    ///
    /// Per-source `done` signals are absorbed. Once the caller's interest is
    /// withdrawn nothing more is forwarded and queued sources are skipped.
    /// One aggregate `done` follows the last source.
    async fn fan_out<F, Fut>(
        &self,
        operation: Operation,
        capability: SourceCapabilities,
        target: &SessionTarget,
        id: CorrelationId,
        run: F,
    ) -> usize
    where
        F: Fn(Arc<dyn Source>, SessionTarget) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sources: Vec<Arc<dyn Source>> = self
            .registry
            .with_capability(capability)
            .into_iter()
            .map(Arc::clone)
            .collect();

        let listener = match target {
            SessionTarget::External(caller) => Some(caller.listen(operation, id)),
            SessionTarget::Internal(_) => None,
        };
        let interest = listener.as_ref().map(|l| l.token().clone());
        let downstream = target.emitter();

        let forward: Arc<dyn Emitter> = {
            let downstream = Arc::clone(&downstream);
            let interest = interest.clone();
            Arc::new(move |emission: Emission| {
                if emission.payload.is_done() {
                    return;
                }
                if interest.as_ref().is_some_and(|t| t.is_cancelled()) {
                    return;
                }
                downstream.emit(emission);
            })
        };
        let inner = SessionTarget::internal(forward);

        tracing::info!(id, "{} across {} source(s)", operation, sources.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for source in &sources {
            let slug = source.id().to_string();
            let semaphore = Arc::clone(&semaphore);
            let interest = interest.clone();
            let job = run(Arc::clone(source), inner.clone());

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if interest.as_ref().is_some_and(|t| t.is_cancelled()) {
                    tracing::debug!(source = %slug, "Skipping source, interest withdrawn");
                    return;
                }
                job.await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(id, "{} task failed: {}", operation, err);
            }
        }

        downstream.emit(Emission {
            event: operation.result_event(),
            correlation_id: id,
            payload: Payload::done(),
        });
        drop(listener);

        sources.len()
    }
}
