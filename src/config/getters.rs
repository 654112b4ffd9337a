//! Getter methods for `EngineSettings`

use std::path::Path;
use std::sync::Arc;

use super::types::{EngineSettings, SessionBackend};
use crate::browser::{ChromiumProvider, SessionProvider, StaticProvider};

impl EngineSettings {
    #[must_use]
    pub fn provider_root(&self) -> &Path {
        &self.provider_root
    }

    #[must_use]
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    #[must_use]
    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    #[must_use]
    pub fn session_backend(&self) -> SessionBackend {
        self.session_backend
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn implicit_wait_override(&self) -> Option<f64> {
        self.implicit_wait_override
    }

    #[must_use]
    pub fn config_cache_capacity(&self) -> usize {
        self.config_cache_capacity
    }

    /// Session provider for the configured backend
    #[must_use]
    pub fn session_provider(&self) -> Arc<dyn SessionProvider> {
        match self.session_backend {
            SessionBackend::Chromium => Arc::new(ChromiumProvider::new(self.headless)),
            SessionBackend::Static => Arc::new(StaticProvider::http()),
        }
    }
}
