//! Configuration management.
//!
//! Settings come from an optional TOML file, overridden by environment
//! variables prefixed with `MANGA_MIRRORS_` (nested keys joined by `__`,
//! e.g. `MANGA_MIRRORS_FETCH__TIMEOUT_SECS=10`).
//!
//! ```toml
//! [fetch]
//! user_agent = "manga-mirrors/0.1"
//! timeout_secs = 30
//! readiness_attempts = 3
//! max_retries = 2
//! proxy = "socks5://127.0.0.1:1080"
//!
//! [sources]
//! enabled_sources = "mangahasu"
//! max_concurrent_sources = 4
//!
//! [[source_waits]]
//! source = "mangahasu"
//! wait_ms = 800
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [auth]
//! token_file = "/var/lib/manga-mirrors/tokens.json"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "manga-mirrors";
const ENV_PREFIX: &str = "MANGA_MIRRORS";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    /// Per-source overrides of the minimum request spacing
    #[serde(default)]
    pub source_waits: Vec<SourceWait>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Wait-time overrides keyed by source slug
    pub fn wait_overrides(&self) -> HashMap<String, Duration> {
        self.source_waits
            .iter()
            .map(|w| (w.source.clone(), Duration::from_millis(w.wait_ms)))
            .collect()
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.sources.max_concurrent_sources == 0 {
            return Err(ConfigError::Invalid(
                "sources.max_concurrent_sources must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outbound request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How many times a document is fetched while its readiness selector is missing
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    #[serde(default = "default_readiness_interval")]
    pub readiness_interval_ms: u64,

    /// Extra attempts for transient failures (timeouts, 429, 5xx)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Proxy for every request (`http://`, `https://` or `socks5://`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval(),
            max_retries: default_max_retries(),
            proxy: None,
        }
    }
}

impl FetchConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

fn default_user_agent() -> String {
    format!("manga-mirrors/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_readiness_attempts() -> u32 {
    3
}

fn default_readiness_interval() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    2
}

/// Source selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Comma-separated allow list; every source when unset
    #[serde(default)]
    pub enabled_sources: Option<String>,

    /// Comma-separated deny list, applied after the allow list
    #[serde(default)]
    pub disabled_sources: Option<String>,

    /// Upper bound on sources queried at once by fan-out operations
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled_sources: None,
            disabled_sources: None,
            max_concurrent_sources: default_max_concurrent_sources(),
        }
    }
}

impl SourcesConfig {
    /// Whether `slug` passes the allow and deny lists
    pub fn is_enabled(&self, slug: &str) -> bool {
        let listed = |list: &Option<String>| {
            list.as_deref().map(|l| {
                l.split(',')
                    .map(str::trim)
                    .any(|s| s.eq_ignore_ascii_case(slug))
            })
        };

        let allowed = match self.enabled_sources.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(_) => listed(&self.enabled_sources).unwrap_or(true),
        };
        allowed && !listed(&self.disabled_sources).unwrap_or(false)
    }
}

fn default_max_concurrent_sources() -> usize {
    4
}

/// Minimum spacing override for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWait {
    pub source: String,
    pub wait_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` for structured output, plain text otherwise
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Token store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl AuthConfig {
    /// Configured token file, or `tokens.json` in the platform data dir
    pub fn token_path(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("tokens.json")
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Look for a config file in the working directory, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("manga-mirrors.toml"),
        PathBuf::from(".manga-mirrors.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR).join("config.toml"));
    }
    candidates.into_iter().find(|p| p.is_file())
}

/// Load configuration from `path` (or a discovered file) plus the environment
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        None => {
            if let Some(found) = find_config_file() {
                tracing::debug!("Using config file {}", found.display());
                builder = builder.add_source(config::File::from(found).required(false));
            }
        }
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.readiness_attempts, 3);
        assert_eq!(config.sources.max_concurrent_sources, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.source_waits.is_empty());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"
[fetch]
timeout_secs = 12
readiness_attempts = 5
proxy = "socks5://127.0.0.1:1080"

[sources]
enabled_sources = "mangahasu, other"
disabled_sources = "other"
max_concurrent_sources = 2

[[source_waits]]
source = "mangahasu"
wait_ms = 800

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.fetch.timeout_secs, 12);
        assert_eq!(config.fetch.readiness_attempts, 5);
        assert_eq!(config.fetch.connect_timeout_secs, 10);
        assert_eq!(config.fetch.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(config.sources.max_concurrent_sources, 2);
        assert!(config.sources.is_enabled("mangahasu"));
        assert!(!config.sources.is_enabled("other"));
        assert!(!config.sources.is_enabled("unlisted"));
        assert_eq!(
            config.wait_overrides().get("mangahasu"),
            Some(&Duration::from_millis(800))
        );
        assert!(config.logging.is_json());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/manga-mirrors.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sources]\nmax_concurrent_sources = 0\n").unwrap();

        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fetch]\nuser_agent = \"from-file\"\n").unwrap();

        std::env::set_var("MANGA_MIRRORS_FETCH__USER_AGENT", "from-env");
        let config = load_config(Some(&path));
        std::env::remove_var("MANGA_MIRRORS_FETCH__USER_AGENT");

        assert_eq!(config.unwrap().fetch.user_agent, "from-env");
    }

    #[test]
    fn test_enabled_filter_defaults_to_all() {
        let sources = SourcesConfig::default();
        assert!(sources.is_enabled("anything"));

        let sources = SourcesConfig {
            disabled_sources: Some("mangahasu".into()),
            ..SourcesConfig::default()
        };
        assert!(!sources.is_enabled("MangaHasu"));
        assert!(sources.is_enabled("other"));
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = Config::default();
        config.source_waits.push(SourceWait {
            source: "mangahasu".into(),
            wait_ms: 250,
        });

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.source_waits.len(), 1);
        assert_eq!(parsed.source_waits[0].wait_ms, 250);
        assert_eq!(parsed.fetch.timeout_secs, 30);
    }

    #[test]
    fn test_token_path_override() {
        let auth = AuthConfig {
            token_file: Some(PathBuf::from("/tmp/tokens.json")),
        };
        assert_eq!(auth.token_path(), PathBuf::from("/tmp/tokens.json"));
        assert!(AuthConfig::default().token_path().ends_with("tokens.json"));
    }
}
