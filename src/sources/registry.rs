//! Registry for managing manga source plugins.

use std::collections::HashMap;
use std::sync::Arc;

use super::{MangaHasu, Source, SourceError, SourceServices};
use crate::config::SourcesConfig;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const MANGA = 1 << 1;
        const CHAPTER = 1 << 2;
        const RECOMMEND = 1 << 3;
        /// Resolve a chapter URL back to its manga
        const RESOLVE = 1 << 4;
        /// Parses chapter labels into volume, number and name
        const CHAPTER_INFO = 1 << 5;
        /// Results may be cached by the caller
        const CACHE = 1 << 6;
    }
}

/// Registry of available sources.
///
/// Built explicitly from shared services; there is no global instance.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in source that is enabled by its
    /// descriptor and passes the configured allow and deny lists
    pub fn from_services(
        services: &SourceServices,
        filter: &SourcesConfig,
    ) -> Result<Self, SourceError> {
        let mut registry = Self::new();

        let builtin: Vec<Arc<dyn Source>> = vec![Arc::new(MangaHasu::new(services)?)];

        for source in builtin {
            if !source.descriptor().enabled() {
                tracing::debug!("Source {} disabled by its descriptor", source.id());
                continue;
            }
            if !filter.is_enabled(source.id()) {
                tracing::debug!("Source {} disabled by configuration", source.id());
                continue;
            }
            registry.register(source);
        }

        Ok(registry)
    }

    /// Register a new source, replacing one with the same slug
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id().to_string(), source);
    }

    /// Get a source by slug
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.get(id)
    }

    /// All registered sources, ordered by slug
    pub fn all(&self) -> Vec<&Arc<dyn Source>> {
        let mut all: Vec<_> = self.sources.values().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Registered sources whose descriptor is enabled
    pub fn enabled(&self) -> Vec<&Arc<dyn Source>> {
        self.all()
            .into_iter()
            .filter(|s| s.descriptor().enabled())
            .collect()
    }

    /// Enabled sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn Source>> {
        self.enabled()
            .into_iter()
            .filter(|s| s.capabilities().contains(capability))
            .collect()
    }

    /// The enabled source whose host or alternate host serves `url`
    pub fn for_url(&self, url: &str) -> Option<&Arc<dyn Source>> {
        self.enabled()
            .into_iter()
            .find(|source| source.descriptor().path_on_host(url).is_some())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
