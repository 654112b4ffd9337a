//! Typed provider configurations and engine settings
//!
//! Provider documents are parsed into a `serde_yaml::Value` tree and
//! validated here. Unknown top-level keys are ignored.

use std::path::PathBuf;

use chrono::Duration;
use indexmap::IndexMap;
use log::warn;
use serde_yaml::{Mapping, Value};

use super::{ConfigError, ConfigResult};
use crate::operation::FieldConfig;
use crate::url::UrlConstructor;
use crate::utils::{
    FRESHNESS_THRESHOLD_DEFAULT_DAYS, HumanDwellTime, IMPLICIT_WAIT_DEFAULT_SECS,
    PAGES_MAXIMUM_DEFAULT, PAGES_MINIMUM_DEFAULT,
};

const IS_ENABLED_TAG: &str = "is_enabled";
const IMPLICIT_WAIT_TAG: &str = "wait";
const DELAY_TAG: &str = "delay";
const CONTENT_TAG: &str = "content";
const CACHE_VERSION_TAG: &str = "cache_version";
const FRESHNESS_THRESHOLD_TAG: &str = "freshness_threshold";
const EXTRACT_SOURCES_TAG: &str = "extract_sources";
const URL_TAG: &str = "url";
const PAGINATION_TAG: &str = "pagination";
const PAGES_TAG: &str = "pages";
const PAGE_SIZE_TAG: &str = "page_size";
pub const NEXT_PAGE_CLICK_TAG: &str = "next_page_click";
pub const NEXT_PAGE_URL_TAG: &str = "next_page_url";
pub const CONTENT_ITEMS_TAG: &str = "items";

fn as_mapping<'a>(value: &'a Value, key: &str) -> ConfigResult<&'a Mapping> {
    value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected a mapping, found {value:?}"),
    })
}

fn present<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping.get(key).filter(|value| !value.is_null())
}

fn bool_or(mapping: &Mapping, key: &str, default: bool) -> ConfigResult<bool> {
    match present(mapping, key) {
        None => Ok(default),
        Some(value) => value.as_bool().ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a boolean, found {value:?}"),
        }),
    }
}

fn number_or(mapping: &Mapping, key: &str, default: f64) -> ConfigResult<f64> {
    match present(mapping, key) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a number, found {value:?}"),
        }),
    }
}

fn count(value: &Value, key: &str) -> ConfigResult<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a positive integer, found {value:?}"),
        })
}

/// Randomized pacing applied between page fetches
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DelayConfig(pub HumanDwellTime);

impl DelayConfig {
    /// Defaults overlaid by any configured parameters. Unsupported keys are
    /// logged and dropped.
    pub fn from_value(config: Option<&Value>) -> ConfigResult<Self> {
        let mut dwell = HumanDwellTime::default();
        let Some(config) = config.filter(|c| !c.is_null()) else {
            return Ok(Self(dwell));
        };

        let mut unsupported = Vec::new();
        for (key, value) in as_mapping(config, DELAY_TAG)? {
            let name = key.as_str().unwrap_or_default();
            let number = || {
                value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
                    key: format!("{DELAY_TAG}.{name}"),
                    reason: format!("expected a number, found {value:?}"),
                })
            };
            match name {
                "mu" => dwell.mu = number()?,
                "sigma" => dwell.sigma = number()?,
                "base" => dwell.base = number()?,
                "multiplier" => dwell.multiplier = number()?,
                "minimum" | "min" => dwell.minimum = number()?,
                "maximum" | "max" if value.is_null() => dwell.maximum = None,
                "maximum" | "max" => dwell.maximum = Some(number()?),
                _ => unsupported.push(format!("{key:?}")),
            }
        }
        if !unsupported.is_empty() {
            warn!("Unsupported keys in delay configuration: {}", unsupported.join(", "));
        }
        Ok(Self(dwell))
    }

    #[must_use]
    pub fn random_delay(&self) -> std::time::Duration {
        self.0.random_delay()
    }
}

/// How the next results page is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPageVia {
    /// The operation yields a control that is clicked
    Click,
    /// The operation yields a URL that is fetched
    Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextPage {
    pub via: NextPageVia,
    pub operation: FieldConfig,
}

impl NextPage {
    /// Configuration key the operation was read from
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self.via {
            NextPageVia::Click => NEXT_PAGE_CLICK_TAG,
            NextPageVia::Url => NEXT_PAGE_URL_TAG,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationConfig {
    pub pages: u32,
    pub page_size: Option<u32>,
    pub next_page: Option<NextPage>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            pages: PAGES_MINIMUM_DEFAULT,
            page_size: None,
            next_page: None,
        }
    }
}

impl PaginationConfig {
    /// Without a `pagination` section a single page is extracted. With one,
    /// `page_size` is required and exactly one of `next_page_click` and
    /// `next_page_url` must be given.
    pub fn from_value(config: Option<&Value>) -> ConfigResult<Self> {
        let Some(config) = config.filter(|c| !c.is_null()) else {
            return Ok(Self::default());
        };
        let mapping = as_mapping(config, PAGINATION_TAG)?;

        let pages = match present(mapping, PAGES_TAG) {
            Some(value) => count(value, PAGES_TAG)?,
            None => PAGES_MAXIMUM_DEFAULT,
        };
        let page_size = present(mapping, PAGE_SIZE_TAG)
            .ok_or_else(|| ConfigError::MissingKey(format!("{PAGINATION_TAG}.{PAGE_SIZE_TAG}")))
            .and_then(|value| count(value, PAGE_SIZE_TAG))?;

        let next_page = match (present(mapping, NEXT_PAGE_CLICK_TAG), present(mapping, NEXT_PAGE_URL_TAG)) {
            (Some(click), None) => NextPage {
                via: NextPageVia::Click,
                operation: FieldConfig::from_value(NEXT_PAGE_CLICK_TAG, click)?,
            },
            (None, Some(url)) => NextPage {
                via: NextPageVia::Url,
                operation: FieldConfig::from_value(NEXT_PAGE_URL_TAG, url)?,
            },
            _ => {
                return Err(ConfigError::Exclusive(format!(
                    "{NEXT_PAGE_CLICK_TAG}/{NEXT_PAGE_URL_TAG}"
                )));
            }
        };

        Ok(Self {
            pages,
            page_size: Some(page_size),
            next_page: Some(next_page),
        })
    }

    /// Rank of the `index`th (1-based) item on `page` (1-based)
    #[must_use]
    pub fn rank(&self, page: u32, index: usize) -> i64 {
        let page_size = i64::from(self.page_size.unwrap_or(0));
        let index = i64::try_from(index).unwrap_or(i64::MAX);
        (i64::from(page) - 1) * page_size + index
    }
}

/// Settings shared by source and multi configurations
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub is_enabled: bool,
    /// Implicit wait in seconds applied to element lookups
    pub implicit_wait: f64,
    pub delay: DelayConfig,
    /// Field name to field configuration, in extraction order
    pub content: IndexMap<String, FieldConfig>,
    pub cache_version: Option<String>,
    pub freshness_threshold: Duration,
}

impl ExtractorConfig {
    pub fn from_mapping(mapping: &Mapping) -> ConfigResult<Self> {
        let content_config = present(mapping, CONTENT_TAG)
            .ok_or_else(|| ConfigError::MissingKey(CONTENT_TAG.to_string()))?;

        let mut content = IndexMap::new();
        for (field, config) in as_mapping(content_config, CONTENT_TAG)? {
            let Some(field) = field.as_str() else {
                return Err(ConfigError::InvalidValue {
                    key: CONTENT_TAG.to_string(),
                    reason: format!("non-string field name {field:?}"),
                });
            };
            content.insert(field.to_string(), FieldConfig::from_value(field, config)?);
        }

        let cache_version = match present(mapping, CACHE_VERSION_TAG) {
            None => None,
            Some(Value::String(version)) => Some(version.clone()),
            Some(Value::Number(version)) => Some(version.to_string()),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: CACHE_VERSION_TAG.to_string(),
                    reason: format!("expected a string, found {other:?}"),
                });
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let days = number_or(
            mapping,
            FRESHNESS_THRESHOLD_TAG,
            FRESHNESS_THRESHOLD_DEFAULT_DAYS as f64,
        )?;
        if days < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: FRESHNESS_THRESHOLD_TAG.to_string(),
                reason: format!("must not be negative, found {days}"),
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let freshness_threshold = Duration::milliseconds((days * 86_400_000.0).round() as i64);

        Ok(Self {
            is_enabled: bool_or(mapping, IS_ENABLED_TAG, true)?,
            implicit_wait: number_or(mapping, IMPLICIT_WAIT_TAG, IMPLICIT_WAIT_DEFAULT_SECS)?,
            delay: DelayConfig::from_value(mapping.get(DELAY_TAG))?,
            content,
            cache_version,
            freshness_threshold,
        })
    }

    #[must_use]
    pub fn implicit_wait_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.implicit_wait.max(0.0))
    }
}

/// `source.yaml`: fields of one detail page
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub common: ExtractorConfig,
}

impl SourceConfig {
    pub fn from_value(config: &Value) -> ConfigResult<Self> {
        let mapping = as_mapping(config, "source configuration")?;
        Ok(Self {
            common: ExtractorConfig::from_mapping(mapping)?,
        })
    }
}

/// `multi.yaml`: a paginated listing of result items
#[derive(Debug, Clone, PartialEq)]
pub struct MultiConfig {
    pub common: ExtractorConfig,
    /// Refine each item from its own detail page
    pub extract_sources: bool,
    pub url: UrlConstructor,
    pub pagination: PaginationConfig,
    /// Locates the repeating result elements
    pub items: FieldConfig,
}

impl MultiConfig {
    pub fn from_value(config: &Value) -> ConfigResult<Self> {
        let mapping = as_mapping(config, "multi configuration")?;
        let url = present(mapping, URL_TAG).ok_or_else(|| ConfigError::MissingKey(URL_TAG.to_string()))?;
        let items = present(mapping, CONTENT_ITEMS_TAG)
            .ok_or_else(|| ConfigError::MissingKey(CONTENT_ITEMS_TAG.to_string()))?;

        Ok(Self {
            common: ExtractorConfig::from_mapping(mapping)?,
            extract_sources: bool_or(mapping, EXTRACT_SOURCES_TAG, true)?,
            url: UrlConstructor::from_value(url)?,
            pagination: PaginationConfig::from_value(mapping.get(PAGINATION_TAG))?,
            items: FieldConfig::from_value(CONTENT_ITEMS_TAG, items)?,
        })
    }
}

/// Which browser backend extractors provision sessions from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Headless Chromium over CDP; runs page scripts
    #[default]
    Chromium,
    /// Plain HTTP fetch parsed as static HTML
    Static,
}

/// Engine-wide settings, built with [`EngineSettings::builder`]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineSettings {
    /// Model root: provider directories live directly beneath it
    pub(crate) provider_root: PathBuf,
    pub(crate) use_cache: bool,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) session_backend: SessionBackend,
    pub(crate) headless: bool,
    /// Overrides every provider's implicit wait when set
    pub(crate) implicit_wait_override: Option<f64>,
    pub(crate) config_cache_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    const MULTI: &str = r"
is_enabled: true
wait: 1
cache_version: '2019-04-01-01'
freshness_threshold: 7
delay:
  mu: 0.5
  max: 4
  bogus: 1
url:
  url_template: 'https://journals.example.org/search?q={problem}'
pagination:
  pages: 2
  page_size: 5
  next_page_url:
    css_selector: a.next
    attribute: href
items:
  class_name: result
  is_multiple: true
content:
  source_url:
    tag_name: a
    attribute: href
  title:
    css_selector: h3
    getattr: text
  publisher: Example Press
";

    #[test]
    fn multi_configuration_parses() {
        let config = MultiConfig::from_value(&yaml(MULTI)).unwrap();
        assert!(config.common.is_enabled);
        assert_eq!(config.common.implicit_wait, 1.0);
        assert_eq!(config.common.cache_version.as_deref(), Some("2019-04-01-01"));
        assert_eq!(config.common.freshness_threshold, Duration::days(7));
        assert_eq!(config.common.delay.0.mu, 0.5);
        assert_eq!(config.common.delay.0.maximum, Some(4.0));
        assert!(config.extract_sources);
        assert_eq!(config.pagination.pages, 2);
        assert_eq!(config.pagination.page_size, Some(5));
        assert_eq!(config.pagination.next_page.as_ref().map(|n| n.via), Some(NextPageVia::Url));
        assert_eq!(
            config.common.content.keys().collect::<Vec<_>>(),
            vec!["source_url", "title", "publisher"]
        );
    }

    #[test]
    fn pagination_defaults_and_ranks() {
        let single = PaginationConfig::from_value(None).unwrap();
        assert_eq!(single.pages, 1);
        assert_eq!(single.rank(1, 3), 3);

        let paged = PaginationConfig::from_value(Some(&yaml(
            "page_size: 5\nnext_page_click:\n  link_text: Next",
        )))
        .unwrap();
        assert_eq!(paged.pages, PAGES_MAXIMUM_DEFAULT);
        assert_eq!(paged.rank(2, 1), 6);
        assert_eq!(paged.rank(2, 5), 10);
    }

    #[test]
    fn next_page_methods_are_exclusive() {
        let both = yaml(
            "page_size: 5\nnext_page_click:\n  link_text: Next\nnext_page_url:\n  css_selector: a.next",
        );
        assert!(matches!(
            PaginationConfig::from_value(Some(&both)),
            Err(ConfigError::Exclusive(_))
        ));
        let neither = yaml("page_size: 5");
        assert!(matches!(
            PaginationConfig::from_value(Some(&neither)),
            Err(ConfigError::Exclusive(_))
        ));
        let no_size = yaml("next_page_click:\n  link_text: Next");
        assert!(matches!(
            PaginationConfig::from_value(Some(&no_size)),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn missing_sections_are_reported() {
        assert!(matches!(
            SourceConfig::from_value(&yaml("is_enabled: true")),
            Err(ConfigError::MissingKey(key)) if key == "content"
        ));
        assert!(matches!(
            MultiConfig::from_value(&yaml("content: {}\nitems:\n  class_name: r")),
            Err(ConfigError::MissingKey(key)) if key == "url"
        ));
    }

    #[test]
    fn source_defaults() {
        let config = SourceConfig::from_value(&yaml("content:\n  title:\n    tag_name: h1")).unwrap();
        assert!(config.common.is_enabled);
        assert_eq!(config.common.implicit_wait, IMPLICIT_WAIT_DEFAULT_SECS);
        assert_eq!(config.common.freshness_threshold, Duration::days(30));
        assert_eq!(config.common.delay, DelayConfig::default());
        assert!(config.common.cache_version.is_none());
    }
}
