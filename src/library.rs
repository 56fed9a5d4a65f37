//! Boundary to the user's library.
//!
//! Sources only ask one question of it: is this manga already saved?

use std::collections::HashSet;
use std::sync::RwLock;

/// Read-only view of the saved library
pub trait LibraryIndex: Send + Sync + std::fmt::Debug {
    /// Whether the manga at `url` (relative to the source host) is saved
    fn contains(&self, source: &str, lang: &str, url: &str) -> bool;
}

/// A library that is always empty
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLibrary;

impl LibraryIndex for NoLibrary {
    fn contains(&self, _source: &str, _lang: &str, _url: &str) -> bool {
        false
    }
}

/// In-memory library keyed by `(source, lang, url)`
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    entries: RwLock<HashSet<(String, String, String)>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, source: &str, lang: &str, url: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((source.to_string(), lang.to_string(), url.to_string()));
    }

    pub fn remove(&self, source: &str, lang: &str, url: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(source.to_string(), lang.to_string(), url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LibraryIndex for MemoryLibrary {
    fn contains(&self, source: &str, lang: &str, url: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(source.to_string(), lang.to_string(), url.to_string()))
    }
}
