//! Cache layer: reversible keys, the cache-store capability and the stores
//! extractors delegate to.
//!
//! Content is cached per record under its unique key. Searches are cached as
//! ranked sets of content keys plus info hashes carrying extraction status,
//! both per extractor directory and for the whole cohort.

pub mod client;
pub mod key;
pub mod memory;
pub mod sqlite;
pub mod stores;

pub use client::{CacheClient, Hash, Pipeline, Reply};
pub use key::{CacheKey, CacheKeyError, FieldValue};
pub use memory::MemoryCacheClient;
pub use sqlite::SqliteCacheClient;
pub use stores::{CohortInfoStore, ContentStore, SearchResultStore};

use thiserror::Error;

use crate::content::ContentError;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache key error: {0}")]
    Key(#[from] CacheKeyError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cached content error: {0}")]
    Content(#[from] ContentError),
}
