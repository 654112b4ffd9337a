//! Provider configuration loading with a stat-validated document cache

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use serde_yaml::Value;

use super::types::{MultiConfig, SourceConfig};
use super::{ConfigError, ConfigResult};
use crate::utils::CONFIG_FILE_CACHE_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    size: u64,
}

impl FileStamp {
    fn of(path: &Path) -> ConfigResult<Self> {
        let metadata = fs::metadata(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        })
    }
}

/// Parsed YAML documents keyed by path.
///
/// Every read stats the file first; an entry is reused only while the file's
/// modification time and size are unchanged.
pub struct ConfigFileCache {
    entries: Mutex<LruCache<PathBuf, (FileStamp, Arc<Value>)>>,
}

impl Default for ConfigFileCache {
    fn default() -> Self {
        Self::new(CONFIG_FILE_CACHE_CAPACITY)
    }
}

impl ConfigFileCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Parsed document at `path`, re-read when the file changed
    pub fn load(&self, path: &Path) -> ConfigResult<Arc<Value>> {
        let stamp = FileStamp::of(path)?;

        if let Some((cached, document)) = self.entries.lock().get(path)
            && *cached == stamp
        {
            return Ok(Arc::clone(document));
        }

        debug!("Parsing configuration {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Arc::new(document);

        self.entries
            .lock()
            .put(path.to_path_buf(), (stamp, Arc::clone(&document)));
        Ok(document)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

pub fn load_multi_config(cache: &ConfigFileCache, path: &Path) -> ConfigResult<MultiConfig> {
    MultiConfig::from_value(&*cache.load(path)?)
}

pub fn load_source_config(cache: &ConfigFileCache, path: &Path) -> ConfigResult<SourceConfig> {
    SourceConfig::from_value(&*cache.load(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn documents_reload_when_files_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("source.yaml");
        fs::write(&path, "content:\n  title:\n    tag_name: h1\n").unwrap();

        let cache = ConfigFileCache::new(4);
        let first = cache.load(&path).unwrap();
        let again = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // Size changes even if the mtime resolution is coarse
        fs::write(&path, "is_enabled: false\ncontent:\n  title:\n    tag_name: h2\n").unwrap();
        let changed = cache.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &changed));
        assert_eq!(changed["is_enabled"], Value::Bool(false));

        let config = load_source_config(&cache, &path).unwrap();
        assert!(!config.common.is_enabled);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_and_malformed_files_are_errors() {
        let temp = TempDir::new().unwrap();
        let cache = ConfigFileCache::default();
        assert!(matches!(
            cache.load(&temp.path().join("absent.yaml")),
            Err(ConfigError::Io { .. })
        ));

        let path = temp.path().join("multi.yaml");
        fs::write(&path, "content: [unclosed\n").unwrap();
        assert!(matches!(cache.load(&path), Err(ConfigError::Yaml { .. })));
    }
}
