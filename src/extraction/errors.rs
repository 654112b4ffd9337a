//! Error types for extractor runs

use std::path::PathBuf;

use thiserror::Error;

use super::status::ExtractionStatus;
use crate::browser::DriverError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::operation::OperationError;

/// Result type alias for extractor operations
pub type ExtractionResult<T> = Result<T, ExtractionError>;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A status update would move backward; a programming error
    #[error("Invalid status update from {current} to {requested}")]
    StatusRegression {
        current: ExtractionStatus,
        requested: ExtractionStatus,
    },

    #[error("Extractor is disabled: {0}")]
    Disabled(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Browser error: {0}")]
    Driver(#[from] DriverError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Source extractor configuration not found for {url} under {root}")]
    SourceDirectoryNotFound { url: String, root: PathBuf },

    #[error("Content missing unique key '{0}'")]
    MissingUniqueKey(&'static str),

    #[error("Failed to provision browser session: {0}")]
    Session(String),
}

impl From<anyhow::Error> for ExtractionError {
    fn from(error: anyhow::Error) -> Self {
        ExtractionError::Session(format!("{error:#}"))
    }
}
