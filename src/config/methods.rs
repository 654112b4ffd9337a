//! Builder methods available for all states
//!
//! This module contains methods that can be called on the builder
//! regardless of its current type state.

use std::path::PathBuf;

use super::builder::EngineSettingsBuilder;
use super::types::SessionBackend;

impl<State> EngineSettingsBuilder<State> {
    /// Read and write the extraction cache (default). When disabled every
    /// request re-extracts and nothing is stored.
    #[must_use]
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// SQLite database backing the cache; an in-memory cache is used when
    /// unset
    #[must_use]
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn session_backend(mut self, backend: SessionBackend) -> Self {
        self.session_backend = backend;
        self
    }

    /// Set browser headless mode (visible vs invisible browser window)
    ///
    /// **Headless mode is enforced in release builds.** Headed mode is only
    /// available in debug builds, where a visible window helps when writing
    /// provider configurations.
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Implicit wait in seconds used instead of each provider's `wait`
    #[must_use]
    pub fn implicit_wait(mut self, seconds: f64) -> Self {
        self.implicit_wait_override = Some(seconds);
        self
    }

    #[must_use]
    pub fn config_cache_capacity(mut self, capacity: usize) -> Self {
        self.config_cache_capacity = capacity;
        self
    }
}
