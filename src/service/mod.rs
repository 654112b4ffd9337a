//! Community service: turn a community payload into a search, answer with
//! what the cache already holds, and extract the rest in the background.

pub mod community;
pub mod inflight;
pub mod payload;

pub use community::{CommunityService, ContentResponse, RequestOutcome};
pub use inflight::{InFlight, InFlightGuard};
pub use payload::{derive_geo_terms, derive_search_data, get_related_json};

use thiserror::Error;

use crate::cache::CacheError;
use crate::extraction::ExtractionError;

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid community payload: {0}")]
    Payload(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}
