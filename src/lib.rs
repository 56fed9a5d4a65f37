//! # Manga Mirrors
//!
//! An orchestration engine for scraping manga listings, metadata, chapter
//! lists and page images from third-party mirror sites.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Manga records, composite ids and the streaming wire payloads
//! - [`sources`]: Source plugins behind a capability-based trait, the shared
//!   session pipeline and the source registry
//! - [`session`]: Streaming sessions, emitters and cooperative cancellation
//! - [`scheduler`]: Routing by slug or URL and multi-source fan-out
//! - [`utils`]: Fetch capability, throttle gate, retries, image store and validation
//! - [`library`]: The "already in library" lookup
//! - [`auth`]: Persistent API token store
//! - [`config`]: Configuration management

pub mod auth;
pub mod config;
pub mod library;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use models::{Emission, Operation, Payload};
pub use scheduler::{Scheduler, SchedulerError};
pub use session::{Caller, SessionTarget};
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
