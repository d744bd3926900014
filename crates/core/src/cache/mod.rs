//! Result cache: finished artifacts keyed by request, plus the janitor that
//! keeps the cache and the job scratch area bounded.

mod config;
mod error;
mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use store::{CacheStats, CachedArtifact, CleanupReport, ResultCache};
