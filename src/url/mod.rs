//! Search URL construction from structured search terms

pub mod constructor;
pub mod search_data;
pub mod series;

pub use constructor::{Definition, UrlConstructor};
pub use search_data::{SearchData, SearchTerms};
pub use series::{ClauseSeries, SeriesKind};

use thiserror::Error;

pub type UrlResult<T> = Result<T, UrlError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("Unknown token: {0}")]
    UnknownToken(String),

    /// Raised for a topic without terms; clause series treat it as a skip
    #[error("No value for search topic: {0}")]
    NoneValue(String),

    #[error("Invalid url configuration: {0}")]
    Configuration(String),

    #[error("Invalid url clause series: {0}")]
    InvalidSeries(String),

    #[error("Invalid term series: {0}")]
    InvalidTerm(String),
}
