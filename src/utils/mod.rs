//! Utility modules supporting source execution.
//!
//! - [`Fetcher`]: the fetch capability sources consume, with [`HttpFetcher`]
//!   for the network and [`StaticFetcher`] for fixtures and offline runs
//! - [`ThrottleGate`]: per-source minimum spacing between requests
//! - [`ImageStore`]: normalization of downloaded images, [`DataUrlStore`] by default
//! - [`with_retry`]: retry of transient fetch failures with backoff
//! - validation helpers for slugs, language codes, hosts and id parts
//!
//! # Throttling
//!
//! ```rust
//! use manga_mirrors::utils::ThrottleGate;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let gate = ThrottleGate::new("mangahasu", Duration::from_millis(10));
//! gate.wait().await; // first request goes straight through
//! gate.wait().await; // the second one waits ~10ms
//! # }
//! ```

mod fetch;
mod http;
mod image;
mod retry;
mod throttle;
mod validate;

pub use fetch::{
    Document, FetchError, FetchKind, FetchRecord, FetchRequest, FetchResponse, Fetcher,
    StaticFetcher,
};
pub use http::HttpFetcher;
pub use image::{sniff_mime, DataUrlStore, ImageError, ImageStore};
pub use retry::{with_retry, RetryConfig, TransientError};
pub use throttle::ThrottleGate;
pub use validate::{
    escape_id_part, normalize_host, unescape_id_part, validate_lang, validate_slug,
    ValidationError,
};
