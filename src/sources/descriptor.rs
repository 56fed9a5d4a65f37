//! Static identity of a source.

use serde::Serialize;
use std::time::Duration;

use super::registry::SourceCapabilities;
use super::SourceError;
use crate::utils::{normalize_host, validate_lang, validate_slug};

/// Quality, speed and popularity scores, each in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceMeta {
    pub quality: f32,
    pub speed: f32,
    pub popularity: f32,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            quality: 0.5,
            speed: 0.5,
            popularity: 0.5,
        }
    }
}

/// Identity and capabilities of a source. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    name: String,
    display_name: String,
    host: String,
    alt_hosts: Vec<String>,
    enabled: bool,
    capabilities: SourceCapabilities,
    langs: Vec<String>,
    wait_time: Duration,
    icon: String,
    meta: SourceMeta,
}

impl SourceDescriptor {
    /// Start building a descriptor for slug `name` served from `host`
    pub fn builder(name: &str, display_name: &str, host: &str) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.to_string(),
            display_name: display_name.to_string(),
            host: host.to_string(),
            alt_hosts: Vec::new(),
            enabled: true,
            capabilities: SourceCapabilities::empty(),
            langs: Vec::new(),
            wait_time: Duration::ZERO,
            icon: String::new(),
            meta: SourceMeta::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Base URL without trailing slash
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn alt_hosts(&self) -> &[String] {
        &self.alt_hosts
    }

    /// The main host followed by the alternates
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.host.as_str()).chain(self.alt_hosts.iter().map(String::as_str))
    }

    /// The path of `url` when it is served by the host or an alternate host.
    ///
    /// The host must end at a path boundary, so `https://demo.test.evil/x`
    /// does not belong to `https://demo.test`.
    pub fn path_on_host<'a>(&self, url: &'a str) -> Option<&'a str> {
        self.hosts().find_map(|host| {
            url.strip_prefix(host)
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    pub fn langs(&self) -> &[String] {
        &self.langs
    }

    /// First declared language
    pub fn default_lang(&self) -> &str {
        // never empty, checked by the builder
        self.langs.first().map(String::as_str).unwrap_or("en")
    }

    pub fn supports_lang(&self, lang: &str) -> bool {
        self.langs.iter().any(|l| l == lang)
    }

    /// Minimum spacing between two requests
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    pub fn meta(&self) -> SourceMeta {
        self.meta
    }

    /// Serializable summary for listings
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            host: self.host.clone(),
            alt_hosts: self.alt_hosts.clone(),
            enabled: self.enabled,
            capabilities: self
                .capabilities
                .iter_names()
                .map(|(name, _)| name.to_ascii_lowercase())
                .collect(),
            langs: self.langs.clone(),
            wait_ms: self.wait_time.as_millis() as u64,
            icon: self.icon.clone(),
            meta: self.meta,
        }
    }
}

/// Builder validating a [`SourceDescriptor`]
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    display_name: String,
    host: String,
    alt_hosts: Vec<String>,
    enabled: bool,
    capabilities: SourceCapabilities,
    langs: Vec<String>,
    wait_time: Duration,
    icon: String,
    meta: SourceMeta,
}

impl DescriptorBuilder {
    pub fn alt_host(mut self, host: &str) -> Self {
        self.alt_hosts.push(host.to_string());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn langs(mut self, langs: &[&str]) -> Self {
        self.langs = langs.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn icon(mut self, icon: &str) -> Self {
        self.icon = icon.to_string();
        self
    }

    pub fn meta(mut self, quality: f32, speed: f32, popularity: f32) -> Self {
        self.meta = SourceMeta {
            quality,
            speed,
            popularity,
        };
        self
    }

    pub fn build(self) -> Result<SourceDescriptor, SourceError> {
        let invalid = |e: crate::utils::ValidationError| SourceError::InvalidDescriptor(e.to_string());

        validate_slug(&self.name).map_err(invalid)?;
        let host = normalize_host(&self.host).map_err(invalid)?;
        let alt_hosts = self
            .alt_hosts
            .iter()
            .map(|h| normalize_host(h))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;

        if self.langs.is_empty() {
            return Err(SourceError::InvalidDescriptor(format!(
                "source '{}' declares no language",
                self.name
            )));
        }
        for lang in &self.langs {
            validate_lang(lang).map_err(invalid)?;
        }

        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_range(self.meta.quality) && in_range(self.meta.speed) && in_range(self.meta.popularity)) {
            return Err(SourceError::InvalidDescriptor(format!(
                "meta scores of '{}' must lie in 0..=1",
                self.name
            )));
        }

        Ok(SourceDescriptor {
            name: self.name,
            display_name: self.display_name,
            host,
            alt_hosts,
            enabled: self.enabled,
            capabilities: self.capabilities,
            langs: self.langs,
            wait_time: self.wait_time,
            icon: self.icon,
            meta: self.meta,
        })
    }
}

/// Listing form of a descriptor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub name: String,
    pub display_name: String,
    pub host: String,
    pub alt_hosts: Vec<String>,
    pub enabled: bool,
    pub capabilities: Vec<String>,
    pub langs: Vec<String>,
    pub wait_ms: u64,
    pub icon: String,
    pub meta: SourceMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> DescriptorBuilder {
        SourceDescriptor::builder("demo", "Demo", "https://demo.test/")
            .langs(&["en", "fr"])
            .capabilities(SourceCapabilities::SEARCH | SourceCapabilities::MANGA)
    }

    #[test]
    fn test_builder_normalizes_host() {
        let descriptor = builder().alt_host("https://www.demo.test").build().unwrap();
        assert_eq!(descriptor.host(), "https://demo.test");
        assert_eq!(
            descriptor.hosts().collect::<Vec<_>>(),
            vec!["https://demo.test", "https://www.demo.test"]
        );
        assert_eq!(descriptor.default_lang(), "en");
        assert!(descriptor.supports_lang("fr"));
    }

    #[test]
    fn test_path_on_host_stops_at_boundary() {
        let descriptor = builder().alt_host("https://www.demo.test").build().unwrap();
        assert_eq!(descriptor.path_on_host("https://demo.test/a-p1.html"), Some("/a-p1.html"));
        assert_eq!(descriptor.path_on_host("https://www.demo.test"), Some(""));
        assert_eq!(descriptor.path_on_host("https://demo.test.evil/a-p1.html"), None);
        assert_eq!(descriptor.path_on_host("https://demo.testing/a"), None);
        assert_eq!(descriptor.path_on_host("/a-p1.html"), None);
    }

    #[test]
    fn test_builder_rejects_invalid_descriptors() {
        assert!(SourceDescriptor::builder("Bad Name", "x", "https://a.test")
            .langs(&["en"])
            .build()
            .is_err());
        assert!(SourceDescriptor::builder("ok", "x", "ftp://a.test")
            .langs(&["en"])
            .build()
            .is_err());
        assert!(SourceDescriptor::builder("ok", "x", "https://a.test")
            .build()
            .is_err());
        assert!(builder().meta(1.5, 0.5, 0.5).build().is_err());
    }

    #[test]
    fn test_info_lists_capabilities() {
        let info = builder().wait_time(Duration::from_millis(250)).build().unwrap().info();
        assert_eq!(info.capabilities, vec!["search", "manga"]);
        assert_eq!(info.wait_ms, 250);
    }
}
