//! Extractors: drive configured pages through the operation pipeline.
//!
//! - [`SourceExtractor`] extracts one record from one detail page
//! - [`MultiExtractor`] extracts ranked items from a paginated results
//!   listing and optionally refines each item from its own detail page
//! - [`Cohort`] provisions every enabled multi extractor under the provider
//!   root for one search and tracks their overall status
//!
//! Extractors share an [`Engine`]: the settings, session provider, cache
//! client and configuration file cache of one process.

pub mod assembly;
pub mod cohort;
pub mod multi;
pub mod session;
pub mod source;

pub use cohort::{Cohort, CohortMember, CohortStatus, find_multi_directories};
pub use multi::MultiExtractor;
pub use session::SessionLease;
pub use source::{
    SourceExtractor, extract_in_parallel, extract_in_series, group_by_domain, source_directory,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::info;

use crate::browser::SessionProvider;
use crate::cache::{CacheClient, MemoryCacheClient, SqliteCacheClient};
use crate::config::{ConfigFileCache, EngineSettings, ExtractorConfig};
use crate::utils::IMPLICIT_WAIT_DEFAULT_SECS;

/// Shared resources for every extractor of one process
#[derive(Clone)]
pub struct Engine {
    settings: Arc<EngineSettings>,
    provider: Arc<dyn SessionProvider>,
    cache: Option<Arc<dyn CacheClient>>,
    config_files: Arc<ConfigFileCache>,
}

impl Engine {
    /// Engine over explicit collaborators. `cache` is ignored when the
    /// settings disable caching.
    pub fn new(
        settings: EngineSettings,
        provider: Arc<dyn SessionProvider>,
        cache: Option<Arc<dyn CacheClient>>,
    ) -> Self {
        let cache = cache.filter(|_| settings.use_cache());
        let config_files = Arc::new(ConfigFileCache::new(settings.config_cache_capacity()));
        Self {
            settings: Arc::new(settings),
            provider,
            cache,
            config_files,
        }
    }

    /// Engine with the session provider and cache the settings describe
    pub async fn connect(settings: EngineSettings) -> anyhow::Result<Self> {
        let provider = settings.session_provider();
        let cache: Option<Arc<dyn CacheClient>> = match (settings.use_cache(), settings.cache_path()) {
            (false, _) => None,
            (true, Some(path)) => {
                let client = SqliteCacheClient::open(path)
                    .await
                    .with_context(|| format!("Failed to open cache at {}", path.display()))?;
                info!("Using cache at {}", path.display());
                Some(Arc::new(client))
            }
            (true, None) => {
                info!("Using in-memory cache");
                Some(Arc::new(MemoryCacheClient::new()))
            }
        };
        Ok(Self::new(settings, provider, cache))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn provider(&self) -> &dyn SessionProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn CacheClient>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn config_files(&self) -> &ConfigFileCache {
        &self.config_files
    }

    /// Implicit wait for sessions opened on behalf of `config`
    #[must_use]
    pub fn implicit_wait(&self, config: &ExtractorConfig) -> Duration {
        match self.settings.implicit_wait_override() {
            Some(seconds) => Duration::from_secs_f64(seconds),
            None => config.implicit_wait_duration(),
        }
    }

    /// Implicit wait for sessions not tied to one configuration
    #[must_use]
    pub fn default_implicit_wait(&self) -> Duration {
        Duration::from_secs_f64(
            self.settings
                .implicit_wait_override()
                .unwrap_or(IMPLICIT_WAIT_DEFAULT_SECS),
        )
    }
}
