//! Stores that extractors hold and delegate to.
//!
//! Key shapes:
//!
//! | What | Qualifiers | Fields |
//! |---|---|---|
//! | content hash | `content` | `source_url` |
//! | search results | `extraction`, `results` | search topics |
//! | extractor results | `extraction`, `results` | `extractor`, search topics |
//! | extractor info | `extraction`, `info` | `extractor`, search topics |
//! | cohort info | `extraction`, `info` | search topics |

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, warn};

use super::client::{CacheClient, Pipeline, Reply};
use super::key::{CacheKey, FieldValue};
use super::CacheResult;
use crate::content::{Extractable, SOURCE_URL_FIELD};
use crate::extraction::info::{CACHE_VERSION_KEY, LAST_EXTRACTED_KEY, STATUS_KEY, directory_field};
use crate::extraction::{ExtractionInfo, ExtractionStatus};
use crate::url::SearchData;
use crate::utils::GranularDateTime;

const CONTENT_KEY: &str = "content";
const EXTRACTION_KEY: &str = "extraction";
const INFO_KEY: &str = "info";
const RESULTS_KEY: &str = "results";
const EXTRACTOR_FIELD: &str = "extractor";

fn search_key(qualifier: &str, directory: Option<&str>, search: &SearchData) -> CacheResult<CacheKey> {
    let extractor = directory.map(|dir| (EXTRACTOR_FIELD.to_string(), FieldValue::from(dir)));
    let fields = extractor.into_iter().chain(search.key_fields());
    Ok(CacheKey::new([EXTRACTION_KEY, qualifier], fields)?)
}

/// Content records keyed by their source URL
#[derive(Clone)]
pub struct ContentStore {
    client: Arc<dyn CacheClient>,
    cache_version: Option<String>,
}

impl ContentStore {
    pub fn new(client: Arc<dyn CacheClient>, cache_version: Option<String>) -> Self {
        Self {
            client,
            cache_version,
        }
    }

    pub fn client(&self) -> &Arc<dyn CacheClient> {
        &self.client
    }

    #[must_use]
    pub fn cache_version(&self) -> Option<&str> {
        self.cache_version.as_deref()
    }

    pub fn content_key(source_url: &str) -> CacheResult<CacheKey> {
        Ok(CacheKey::new(
            [CONTENT_KEY],
            [(SOURCE_URL_FIELD, FieldValue::from(source_url))],
        )?)
    }

    /// Stamp housekeeping fields and return the hash to store
    pub fn prepare<M: Extractable>(&self, content: &mut M) -> Vec<(String, String)> {
        content.mark_extracted(self.cache_version(), GranularDateTime::now());
        content.to_hash()
    }

    /// Stage a content write onto `pipeline`, returning the content key.
    /// The stored hash is replaced, so fields now null do not linger.
    pub fn stage<M: Extractable>(
        &self,
        pipeline: &mut Pipeline,
        content: &mut M,
        source_url: &str,
    ) -> CacheResult<Vec<u8>> {
        let key = Self::content_key(source_url)?.to_bytes();
        pipeline.replace_hash(key.clone(), self.prepare(content));
        Ok(key)
    }

    pub async fn store<M: Extractable>(&self, content: &mut M, source_url: &str) -> CacheResult<()> {
        let mut pipeline = Pipeline::new();
        self.stage(&mut pipeline, content, source_url)?;
        self.client.execute(pipeline).await?;
        Ok(())
    }

    pub async fn retrieve<M: Extractable>(&self, source_url: &str) -> CacheResult<Option<M>> {
        let key = Self::content_key(source_url)?.to_bytes();
        let hash = self.client.get_hash(&key).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(M::from_hash(&hash)?))
    }

    /// Records for `keys` in order. Missing and undecodable hashes are skipped.
    pub async fn retrieve_many<M: Extractable>(&self, keys: Vec<Vec<u8>>) -> CacheResult<Vec<M>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipeline = Pipeline::new();
        for key in keys {
            pipeline.get_hash(key);
        }
        let replies = self.client.execute(pipeline).await?;

        let mut records = Vec::with_capacity(replies.len());
        for hash in replies.into_iter().map(Reply::into_hash) {
            if hash.is_empty() {
                continue;
            }
            match M::from_hash(&hash) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping cached content that failed to decode: {e}"),
            }
        }
        Ok(records)
    }
}

/// Ranked result sets for one search, and optionally one extractor's share
#[derive(Clone)]
pub struct SearchResultStore {
    content: ContentStore,
    search_results_key: Vec<u8>,
    extraction_results_key: Option<Vec<u8>>,
}

impl SearchResultStore {
    /// Results across the whole cohort of a search
    pub fn for_search(content: ContentStore, search: &SearchData) -> CacheResult<Self> {
        Ok(Self {
            content,
            search_results_key: search_key(RESULTS_KEY, None, search)?.to_bytes(),
            extraction_results_key: None,
        })
    }

    /// Results recorded by the extractor configured in `directory`
    pub fn for_extractor(
        content: ContentStore,
        directory: &str,
        search: &SearchData,
    ) -> CacheResult<Self> {
        Ok(Self {
            content,
            search_results_key: search_key(RESULTS_KEY, None, search)?.to_bytes(),
            extraction_results_key: Some(search_key(RESULTS_KEY, Some(directory), search)?.to_bytes()),
        })
    }

    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Record `content` at `rank` in one pipeline: its hash when
    /// `store_content`, and its key in the search and extractor ranked sets.
    pub async fn store_result<M: Extractable>(
        &self,
        content: &mut M,
        source_url: &str,
        rank: i64,
        store_content: bool,
    ) -> CacheResult<()> {
        let mut pipeline = Pipeline::new();
        let content_key = if store_content {
            self.content.stage(&mut pipeline, content, source_url)?
        } else {
            ContentStore::content_key(source_url)?.to_bytes()
        };

        #[allow(clippy::cast_precision_loss)]
        let score = rank as f64;
        pipeline.add_sorted(self.search_results_key.clone(), score, content_key.clone());
        if let Some(key) = &self.extraction_results_key {
            pipeline.add_sorted(key.clone(), score, content_key);
        }

        debug!("Storing result {source_url} at rank {rank} (content: {store_content})");
        self.content.client().execute(pipeline).await?;
        Ok(())
    }

    /// Every cached record for the search, by rank
    pub async fn retrieve_search_results<M: Extractable>(&self) -> CacheResult<Vec<M>> {
        let keys = self.content.client().range_sorted(&self.search_results_key).await?;
        self.content.retrieve_many(keys).await
    }

    /// This extractor's cached records keyed by source URL, by rank
    pub async fn retrieve_extraction_results<M: Extractable>(&self) -> CacheResult<IndexMap<String, M>> {
        let Some(key) = &self.extraction_results_key else {
            return Ok(IndexMap::new());
        };
        let keys = self.content.client().range_sorted(key).await?;
        let records: Vec<M> = self.content.retrieve_many(keys).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| record.source_url().map(|url| (url, record)))
            .collect())
    }
}

/// Extraction info hashes for the extractors of one search and their cohort
#[derive(Clone)]
pub struct CohortInfoStore {
    client: Arc<dyn CacheClient>,
    search: SearchData,
    cohort_key: Vec<u8>,
    cache_version: Option<String>,
}

impl CohortInfoStore {
    pub fn new(
        client: Arc<dyn CacheClient>,
        search: &SearchData,
        cache_version: Option<String>,
    ) -> CacheResult<Self> {
        Ok(Self {
            client,
            search: search.clone(),
            cohort_key: search_key(INFO_KEY, None, search)?.to_bytes(),
            cache_version,
        })
    }

    pub fn info_key(&self, directory: &str) -> CacheResult<CacheKey> {
        search_key(INFO_KEY, Some(directory), &self.search)
    }

    /// Info recorded by the extractor configured in `directory`
    pub async fn retrieve_info(&self, directory: &str) -> CacheResult<ExtractionInfo> {
        let key = self.info_key(directory)?.to_bytes();
        let hash = self.client.get_hash(&key).await?;
        Ok(ExtractionInfo::from_hash(&hash))
    }

    /// Info per directory, fetched in one pipeline, in `directories` order
    pub async fn retrieve_info_map<S: AsRef<str>>(
        &self,
        directories: &[S],
    ) -> CacheResult<IndexMap<String, ExtractionInfo>> {
        let mut pipeline = Pipeline::new();
        for directory in directories {
            pipeline.get_hash(self.info_key(directory.as_ref())?.to_bytes());
        }
        let replies = if pipeline.is_empty() {
            Vec::new()
        } else {
            self.client.execute(pipeline).await?
        };

        Ok(directories
            .iter()
            .zip(replies)
            .map(|(directory, reply)| {
                (
                    directory.as_ref().to_string(),
                    ExtractionInfo::from_hash(&reply.into_hash()),
                )
            })
            .collect())
    }

    /// Overall info for the search
    pub async fn retrieve_cohort_info(&self) -> CacheResult<ExtractionInfo> {
        let hash = self.client.get_hash(&self.cohort_key).await?;
        Ok(ExtractionInfo::from_hash(&hash))
    }

    /// One extractor's entry within the cohort info hash
    pub async fn retrieve_cohort_entry(&self, directory: &str) -> CacheResult<ExtractionInfo> {
        let hash = self.client.get_hash(&self.cohort_key).await?;
        Ok(ExtractionInfo::from_cohort_hash(&hash, directory))
    }

    /// Record an extractor's status change.
    ///
    /// Replaces the extractor's own info hash and updates its entry in the
    /// cohort hash; `overall` is written to the cohort hash when the
    /// aggregate changed with it. Cohort fields the change leaves unset are
    /// removed.
    pub async fn store_status(
        &self,
        directory: &str,
        status: ExtractionStatus,
        overall: Option<ExtractionStatus>,
    ) -> CacheResult<()> {
        let now = Utc::now().naive_utc();
        let version = self.cache_version.as_deref();

        let fields = ExtractionInfo::status_fields(status, now, version);
        let mut cohort_fields: Vec<(String, String)> = fields
            .iter()
            .filter(|(name, _)| name.as_str() != CACHE_VERSION_KEY)
            .map(|(name, value)| (directory_field(name, directory), value.clone()))
            .collect();
        let mut cleared = Vec::new();
        if !status.records_extraction_time() {
            cleared.push(directory_field(LAST_EXTRACTED_KEY, directory));
        }
        if let Some(overall) = overall {
            cohort_fields.extend(ExtractionInfo::status_fields(overall, now, version));
            cleared.extend(
                ExtractionInfo::cleared_fields(overall, version)
                    .into_iter()
                    .map(str::to_string),
            );
        }

        let mut pipeline = Pipeline::new();
        pipeline.replace_hash(self.info_key(directory)?.to_bytes(), fields);
        pipeline.set_hash(self.cohort_key.clone(), cohort_fields);
        pipeline.remove_fields(self.cohort_key.clone(), cleared);
        self.client.execute(pipeline).await?;
        Ok(())
    }

    /// Overall status name currently stored for the search, if any
    pub async fn cohort_status(&self) -> CacheResult<Option<ExtractionStatus>> {
        let hash = self.client.get_hash(&self.cohort_key).await?;
        Ok(hash.get(STATUS_KEY).and_then(|s| ExtractionStatus::from_name(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheClient;
    use crate::content::ResearchArticle;

    fn search() -> SearchData {
        SearchData::new()
            .with("problem", Some("Homelessness"))
            .with::<&str>("org", None)
            .with("geo", Some(vec!["Texas".to_string(), "TX".to_string()]))
    }

    fn article(url: &str, title: &str) -> ResearchArticle {
        ResearchArticle {
            source_url: Some(url.into()),
            title: Some(title.into()),
            ..ResearchArticle::default()
        }
    }

    #[tokio::test]
    async fn results_are_ranked_across_extractors() {
        let client: Arc<dyn CacheClient> = Arc::new(MemoryCacheClient::new());
        let content = ContentStore::new(Arc::clone(&client), Some("v1".into()));
        let oup = SearchResultStore::for_extractor(content.clone(), "academic_oup_com", &search()).unwrap();
        let nih = SearchResultStore::for_extractor(content.clone(), "ncbi_nlm_nih_gov", &search()).unwrap();

        oup.store_result(&mut article("https://a/2", "Two"), "https://a/2", 2, true)
            .await
            .unwrap();
        nih.store_result(&mut article("https://n/1", "One"), "https://n/1", 1, true)
            .await
            .unwrap();

        let all = SearchResultStore::for_search(content, &search()).unwrap();
        let titles: Vec<_> = all
            .retrieve_search_results::<ResearchArticle>()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title.unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["One", "Two"]);

        let mine = oup.retrieve_extraction_results::<ResearchArticle>().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine["https://a/2"].cache_version.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn keys_without_content_are_skipped() {
        let client: Arc<dyn CacheClient> = Arc::new(MemoryCacheClient::new());
        let content = ContentStore::new(Arc::clone(&client), None);
        let store = SearchResultStore::for_extractor(content, "academic_oup_com", &search()).unwrap();
        store
            .store_result(&mut article("https://a/1", "Pending"), "https://a/1", 1, false)
            .await
            .unwrap();
        assert!(store.retrieve_search_results::<ResearchArticle>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_is_recorded_per_extractor_and_cohort() {
        let client: Arc<dyn CacheClient> = Arc::new(MemoryCacheClient::new());
        let info = CohortInfoStore::new(client, &search(), Some("v1".into())).unwrap();

        info.store_status("academic_oup_com", ExtractionStatus::Preliminary, Some(ExtractionStatus::Preliminary))
            .await
            .unwrap();
        info.store_status("ncbi_nlm_nih_gov", ExtractionStatus::Initiated, None)
            .await
            .unwrap();

        let map = info
            .retrieve_info_map(&["academic_oup_com", "ncbi_nlm_nih_gov", "unknown"])
            .await
            .unwrap();
        assert_eq!(map["academic_oup_com"].status, Some(ExtractionStatus::Preliminary));
        assert_eq!(map["academic_oup_com"].cache_version.as_deref(), Some("v1"));
        assert!(map["academic_oup_com"].last_extracted.is_some());
        assert_eq!(map["ncbi_nlm_nih_gov"].status, Some(ExtractionStatus::Initiated));
        assert!(map["ncbi_nlm_nih_gov"].last_extracted.is_none());
        assert_eq!(map["unknown"], ExtractionInfo::default());

        let entry = info.retrieve_cohort_entry("ncbi_nlm_nih_gov").await.unwrap();
        assert_eq!(entry.status, Some(ExtractionStatus::Initiated));
        assert_eq!(info.cohort_status().await.unwrap(), Some(ExtractionStatus::Preliminary));
    }

    #[tokio::test]
    async fn rewritten_status_drops_fields_left_unset() {
        let client: Arc<dyn CacheClient> = Arc::new(MemoryCacheClient::new());
        let versioned = CohortInfoStore::new(Arc::clone(&client), &search(), Some("v1".into())).unwrap();
        versioned
            .store_status("academic_oup_com", ExtractionStatus::Completed, Some(ExtractionStatus::Completed))
            .await
            .unwrap();

        let unversioned = CohortInfoStore::new(client, &search(), None).unwrap();
        unversioned
            .store_status("academic_oup_com", ExtractionStatus::Initiated, Some(ExtractionStatus::Initiated))
            .await
            .unwrap();

        let own = unversioned.retrieve_info("academic_oup_com").await.unwrap();
        assert_eq!(own.status, Some(ExtractionStatus::Initiated));
        assert!(own.last_extracted.is_none());
        assert!(own.cache_version.is_none());

        let entry = unversioned.retrieve_cohort_entry("academic_oup_com").await.unwrap();
        assert_eq!(entry.status, Some(ExtractionStatus::Initiated));
        assert!(entry.last_extracted.is_none());
        let overall = unversioned.retrieve_cohort_info().await.unwrap();
        assert!(overall.cache_version.is_none());
        assert!(overall.last_extracted.is_none());
    }

    #[tokio::test]
    async fn stored_content_replaces_earlier_records() {
        let client: Arc<dyn CacheClient> = Arc::new(MemoryCacheClient::new());
        let url = "https://a/1";
        let mut first = article(url, "Old title");
        first.doi = Some("10.1000/1".into());
        ContentStore::new(Arc::clone(&client), Some("v1".into()))
            .store(&mut first, url)
            .await
            .unwrap();

        let store = ContentStore::new(Arc::clone(&client), None);
        let mut second = article(url, "New title");
        store.store(&mut second, url).await.unwrap();

        let cached: ResearchArticle = store.retrieve(url).await.unwrap().unwrap();
        assert_eq!(cached, second);
        assert!(cached.doi.is_none());
        assert!(cached.cache_version.is_none());
        let key = ContentStore::content_key(url).unwrap().to_bytes();
        let stored = client.get_hash(&key).await.unwrap();
        assert_eq!(stored, second.to_hash().into_iter().collect::<std::collections::HashMap<_, _>>());
    }
}
