//! Extraction info: status, last-extracted time and cache format version.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use log::debug;

use super::status::ExtractionStatus;
use crate::utils::GranularDateTime;

pub const STATUS_KEY: &str = "status";
pub const LAST_EXTRACTED_KEY: &str = "last_extracted";
pub const CACHE_VERSION_KEY: &str = "cache_version";

/// Hash field carrying one contributing extractor's value inside a cohort
/// info hash, e.g. `status&extractor=academic_oup_com`.
#[must_use]
pub fn directory_field(name: &str, directory: &str) -> String {
    format!("{name}&extractor={directory}")
}

/// What the cache knows about an earlier extraction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionInfo {
    pub status: Option<ExtractionStatus>,
    pub last_extracted: Option<GranularDateTime>,
    pub cache_version: Option<String>,
}

impl ExtractionInfo {
    /// Read an info hash; unknown or malformed values become `None`.
    #[must_use]
    pub fn from_hash(hash: &HashMap<String, String>) -> Self {
        Self::from_fields(
            hash.get(STATUS_KEY),
            hash.get(LAST_EXTRACTED_KEY),
            hash.get(CACHE_VERSION_KEY),
        )
    }

    /// Read one extractor's entry from a cohort info hash
    #[must_use]
    pub fn from_cohort_hash(hash: &HashMap<String, String>, directory: &str) -> Self {
        Self::from_fields(
            hash.get(&directory_field(STATUS_KEY, directory)),
            hash.get(&directory_field(LAST_EXTRACTED_KEY, directory)),
            hash.get(CACHE_VERSION_KEY),
        )
    }

    fn from_fields(
        status: Option<&String>,
        last_extracted: Option<&String>,
        cache_version: Option<&String>,
    ) -> Self {
        let status = status.and_then(|s| ExtractionStatus::from_name(s));
        let last_extracted = last_extracted.and_then(|raw| match GranularDateTime::deserialize(raw) {
            Ok(dt) => Some(dt),
            Err(e) => {
                debug!("Ignoring malformed last_extracted '{raw}': {e}");
                None
            }
        });
        Self {
            status,
            last_extracted,
            cache_version: cache_version.cloned(),
        }
    }

    /// Info for a stored content record, which is complete by definition
    #[must_use]
    pub fn from_content(
        last_extracted: Option<GranularDateTime>,
        cache_version: Option<String>,
    ) -> Self {
        Self {
            status: Some(ExtractionStatus::Completed),
            last_extracted,
            cache_version,
        }
    }

    /// Hash fields to store for a status change at `now`.
    ///
    /// `last_extracted` is written only once the status says results are
    /// known; `cache_version` only when configured.
    #[must_use]
    pub fn status_fields(
        status: ExtractionStatus,
        now: NaiveDateTime,
        cache_version: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut fields = vec![(STATUS_KEY.to_string(), status.name().to_string())];
        if status.records_extraction_time() {
            fields.push((
                LAST_EXTRACTED_KEY.to_string(),
                GranularDateTime::from_datetime(now).serialize(),
            ));
        }
        if let Some(version) = cache_version {
            fields.push((CACHE_VERSION_KEY.to_string(), version.to_string()));
        }
        fields
    }

    /// Fields a status change at `status` leaves unset, which must be
    /// cleared from a hash that is updated in place
    #[must_use]
    pub fn cleared_fields(status: ExtractionStatus, cache_version: Option<&str>) -> Vec<&'static str> {
        let mut cleared = Vec::new();
        if !status.records_extraction_time() {
            cleared.push(LAST_EXTRACTED_KEY);
        }
        if cache_version.is_none() {
            cleared.push(CACHE_VERSION_KEY);
        }
        cleared
    }

    /// Whether content described by this info can be served without
    /// re-extracting.
    ///
    /// Requires a status of at least PRELIMINARY, a last-extracted time
    /// younger than `threshold`, and a matching cache version.
    #[must_use]
    pub fn is_fresh(
        &self,
        threshold: Duration,
        cache_version: Option<&str>,
        now: NaiveDateTime,
    ) -> bool {
        let Some(status) = self.status else {
            return false;
        };
        let Some(last_extracted) = self.last_extracted else {
            return false;
        };
        if !status.indicates_results() {
            return false;
        }
        let age = now - last_extracted.datetime();
        age < threshold && self.cache_version.as_deref() == cache_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{SubsecRound, Utc};

    fn info(status: ExtractionStatus, days_ago: i64, version: Option<&str>) -> ExtractionInfo {
        let when = Utc::now().naive_utc() - Duration::days(days_ago);
        ExtractionInfo {
            status: Some(status),
            last_extracted: Some(GranularDateTime::from_datetime(when)),
            cache_version: version.map(str::to_string),
        }
    }

    #[test]
    fn freshness_gate() {
        let now = Utc::now().naive_utc();
        let threshold = Duration::days(30);

        assert!(info(ExtractionStatus::Completed, 1, Some("v1")).is_fresh(threshold, Some("v1"), now));
        assert!(info(ExtractionStatus::Preliminary, 29, None).is_fresh(threshold, None, now));

        // Too old
        assert!(!info(ExtractionStatus::Completed, 31, Some("v1")).is_fresh(threshold, Some("v1"), now));
        // Version mismatch, regardless of age
        assert!(!info(ExtractionStatus::Completed, 0, Some("v1")).is_fresh(threshold, Some("v2"), now));
        assert!(!info(ExtractionStatus::Completed, 0, None).is_fresh(threshold, Some("v2"), now));
        // Not enough progress
        assert!(!info(ExtractionStatus::Initiated, 0, None).is_fresh(threshold, None, now));
        assert!(!info(ExtractionStatus::Empty, 0, None).is_fresh(threshold, None, now));
        // Nothing known
        assert!(!ExtractionInfo::default().is_fresh(threshold, None, now));
    }

    #[test]
    fn hash_round_trip() {
        let now = Utc::now().naive_utc().trunc_subsecs(6);
        let fields = ExtractionInfo::status_fields(ExtractionStatus::Completed, now, Some("2019-04-01"));
        let hash: HashMap<String, String> = fields.into_iter().collect();
        let parsed = ExtractionInfo::from_hash(&hash);
        assert_eq!(parsed.status, Some(ExtractionStatus::Completed));
        assert_eq!(parsed.cache_version.as_deref(), Some("2019-04-01"));
        assert_eq!(parsed.last_extracted.map(|d| d.datetime()), Some(now));
    }

    #[test]
    fn initiated_omits_last_extracted() {
        let now = Utc::now().naive_utc();
        let fields = ExtractionInfo::status_fields(ExtractionStatus::Initiated, now, None);
        assert_eq!(fields, vec![("status".to_string(), "INITIATED".to_string())]);
    }

    #[test]
    fn unset_fields_are_cleared() {
        assert_eq!(
            ExtractionInfo::cleared_fields(ExtractionStatus::Initiated, None),
            vec![LAST_EXTRACTED_KEY, CACHE_VERSION_KEY]
        );
        assert!(ExtractionInfo::cleared_fields(ExtractionStatus::Completed, Some("v1")).is_empty());
    }

    #[test]
    fn cohort_fields_are_scoped_by_directory() {
        let mut hash = HashMap::new();
        hash.insert(directory_field(STATUS_KEY, "academic_oup_com"), "PRELIMINARY".to_string());
        hash.insert(STATUS_KEY.to_string(), "INITIATED".to_string());
        let scoped = ExtractionInfo::from_cohort_hash(&hash, "academic_oup_com");
        assert_eq!(scoped.status, Some(ExtractionStatus::Preliminary));
        let other = ExtractionInfo::from_cohort_hash(&hash, "ncbi_nlm_nih_gov");
        assert_eq!(other.status, None);
    }

    #[test]
    fn malformed_values_are_ignored() {
        let mut hash = HashMap::new();
        hash.insert(STATUS_KEY.to_string(), "BOGUS".to_string());
        hash.insert(LAST_EXTRACTED_KEY.to_string(), "yesterday".to_string());
        let parsed = ExtractionInfo::from_hash(&hash);
        assert_eq!(parsed, ExtractionInfo::default());
    }
}
