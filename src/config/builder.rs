//! Type-safe builder for `EngineSettings` using the typestate pattern
//!
//! The provider root is required before `build()` becomes available.

use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::{EngineSettings, SessionBackend};
use super::{ConfigError, ConfigResult};
use crate::utils::CONFIG_FILE_CACHE_CAPACITY;

// Type states for the builder
pub struct WithProviderRoot;

pub struct EngineSettingsBuilder<State = ()> {
    pub(crate) provider_root: Option<PathBuf>,
    pub(crate) use_cache: bool,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) session_backend: SessionBackend,
    pub(crate) headless: bool,
    pub(crate) implicit_wait_override: Option<f64>,
    pub(crate) config_cache_capacity: usize,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for EngineSettingsBuilder<()> {
    fn default() -> Self {
        Self {
            provider_root: None,
            use_cache: true,
            cache_path: None,
            session_backend: SessionBackend::default(),
            headless: true,
            implicit_wait_override: None,
            config_cache_capacity: CONFIG_FILE_CACHE_CAPACITY,
            _phantom: PhantomData,
        }
    }
}

impl EngineSettings {
    /// Create a builder for configuring `EngineSettings` with a fluent interface
    #[must_use]
    pub fn builder() -> EngineSettingsBuilder<()> {
        EngineSettingsBuilder::default()
    }
}

impl EngineSettingsBuilder<()> {
    /// Model root directory; each provider directory beneath it holds a
    /// `multi.yaml` and/or `source.yaml`
    pub fn provider_root(self, root: impl Into<PathBuf>) -> EngineSettingsBuilder<WithProviderRoot> {
        EngineSettingsBuilder {
            provider_root: Some(root.into()),
            use_cache: self.use_cache,
            cache_path: self.cache_path,
            session_backend: self.session_backend,
            headless: self.headless,
            implicit_wait_override: self.implicit_wait_override,
            config_cache_capacity: self.config_cache_capacity,
            _phantom: PhantomData,
        }
    }
}

// Build method only available when all required fields are set
impl EngineSettingsBuilder<WithProviderRoot> {
    pub fn build(self) -> ConfigResult<EngineSettings> {
        let provider_root = self
            .provider_root
            .ok_or_else(|| ConfigError::MissingKey("provider_root".into()))?;

        if let Some(wait) = self.implicit_wait_override
            && !(wait.is_finite() && wait >= 0.0)
        {
            return Err(ConfigError::InvalidValue {
                key: "implicit_wait".into(),
                reason: format!("must be a non-negative number of seconds, found {wait}"),
            });
        }

        // Enforce headless mode in release builds for production safety
        #[cfg(not(debug_assertions))]
        let headless = if !self.headless {
            log::warn!(
                "Forcing headless mode in release build. \
                Headed mode is only available in debug builds for development."
            );
            true
        } else {
            self.headless
        };

        #[cfg(debug_assertions)]
        let headless = self.headless;

        Ok(EngineSettings {
            provider_root,
            use_cache: self.use_cache,
            cache_path: self.cache_path,
            session_backend: self.session_backend,
            headless,
            implicit_wait_override: self.implicit_wait_override,
            config_cache_capacity: self.config_cache_capacity.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = EngineSettings::builder().provider_root("/providers").build().unwrap();
        assert_eq!(settings.provider_root(), std::path::Path::new("/providers"));
        assert!(settings.use_cache());
        assert!(settings.headless());
        assert_eq!(settings.session_backend(), SessionBackend::Chromium);
        assert!(settings.cache_path().is_none());
        assert!(settings.implicit_wait_override().is_none());
    }

    #[test]
    fn optional_settings() {
        let settings = EngineSettings::builder()
            .use_cache(false)
            .session_backend(SessionBackend::Static)
            .provider_root("/providers")
            .implicit_wait(0.5)
            .cache_path("/tmp/cache.sqlite")
            .build()
            .unwrap();
        assert!(!settings.use_cache());
        assert_eq!(settings.session_backend(), SessionBackend::Static);
        assert_eq!(settings.implicit_wait_override(), Some(0.5));
    }

    #[test]
    fn negative_waits_are_rejected() {
        let result = EngineSettings::builder()
            .provider_root("/providers")
            .implicit_wait(-1.0)
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
