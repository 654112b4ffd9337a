//! Configuration for extraction runs
//!
//! Provider configuration documents (`multi.yaml`, `source.yaml`) are parsed
//! into typed configs by [`loader`]; engine-wide settings are assembled with
//! the typestate [`EngineSettings`] builder.

pub mod builder;
pub mod getters;
pub mod loader;
pub mod methods;
pub mod types;

pub use builder::{EngineSettingsBuilder, WithProviderRoot};
pub use loader::{ConfigFileCache, load_multi_config, load_source_config};
pub use types::{
    DelayConfig, EngineSettings, ExtractorConfig, MultiConfig, NextPage, NextPageVia,
    PaginationConfig, SessionBackend, SourceConfig,
};

use std::path::PathBuf;

use thiserror::Error;

use crate::operation::OperationError;
use crate::url::UrlError;

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing required configuration key '{0}'")]
    MissingKey(String),

    #[error("Exactly one of {0} must be configured")]
    Exclusive(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid operation: {0}")]
    Operation(#[from] OperationError),

    #[error("Invalid url: {0}")]
    Url(#[from] UrlError),
}
