//! Request handling for one community search.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::inflight::InFlight;
use super::payload::derive_search_data;
use super::ServiceResult;
use crate::cache::{CohortInfoStore, ContentStore, SearchResultStore};
use crate::content::{Extractable, ResearchArticle};
use crate::extraction::ExtractionStatus;
use crate::extractor::{Cohort, Engine};
use crate::url::SearchData;

/// Synchronous answer to a content request
#[derive(Debug, Clone, Serialize)]
pub struct ContentResponse {
    pub search_data: SearchData,
    pub status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<serde_json::Value>>,
}

/// A response plus the background extraction it started, if any
#[derive(Debug)]
pub struct RequestOutcome {
    pub response: ContentResponse,
    /// Resolves to the number of failed extractors
    pub extraction: Option<JoinHandle<usize>>,
}

/// Research content for one community search
#[derive(Clone)]
pub struct CommunityService {
    engine: Engine,
    search: SearchData,
    search_key: String,
    inflight: InFlight,
}

impl CommunityService {
    pub fn new(engine: Engine, search: SearchData, inflight: InFlight) -> Self {
        let search_key = search.to_string();
        Self {
            engine,
            search,
            search_key,
            inflight,
        }
    }

    /// Service for the community at the payload's `root`
    pub fn from_payload(
        engine: Engine,
        payload: &serde_json::Value,
        inflight: InFlight,
    ) -> ServiceResult<Self> {
        let search = derive_search_data(payload)?;
        Ok(Self::new(engine, search, inflight))
    }

    #[must_use]
    pub fn search(&self) -> &SearchData {
        &self.search
    }

    #[must_use]
    pub fn search_key(&self) -> &str {
        &self.search_key
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Every enabled multi extractor for the search
    #[must_use]
    pub fn provision(&self) -> Cohort<ResearchArticle> {
        Cohort::provision(&self.engine, &self.search)
    }

    /// Status to report before extracting.
    ///
    /// COMPLETED when every extractor could serve fresh cached results.
    /// Otherwise the aggregate of the cached extractor statuses, capped at
    /// PRELIMINARY, or INITIATED when nothing is cached.
    pub async fn determine_status(
        &self,
        cohort: &Cohort<ResearchArticle>,
    ) -> ServiceResult<ExtractionStatus> {
        if cohort.is_empty() {
            warn!("No multi extractors configured for {}", self.search);
        }
        let Some(client) = self.engine.cache() else {
            return Ok(if cohort.is_empty() {
                ExtractionStatus::Completed
            } else {
                ExtractionStatus::Initiated
            });
        };

        let store = CohortInfoStore::new(Arc::clone(client), &self.search, None)?;
        let infos = store.retrieve_info_map(cohort.directories()).await?;

        let all_fresh = cohort.members().iter().all(|member| {
            infos
                .get(member.directory())
                .is_some_and(|info| member.should_use_cached_content(info))
        });
        if all_fresh {
            return Ok(ExtractionStatus::Completed);
        }

        let status = match ExtractionStatus::aggregate(infos.values().filter_map(|info| info.status)) {
            None => ExtractionStatus::Initiated,
            Some(status) if status >= ExtractionStatus::Preliminary => ExtractionStatus::Preliminary,
            Some(status) => status,
        };
        debug!("Determined status {status} for {}", self.search);
        Ok(status)
    }

    /// Every cached record for the search in rank order, as JSON
    pub async fn cached_content(&self) -> ServiceResult<Vec<serde_json::Value>> {
        let Some(client) = self.engine.cache() else {
            return Ok(Vec::new());
        };
        let store = SearchResultStore::for_search(ContentStore::new(Arc::clone(client), None), &self.search)?;
        let records: Vec<ResearchArticle> = store.retrieve_search_results().await?;
        Ok(records.iter().map(|record| record.to_json()).collect())
    }

    /// Report status and cached content, and start a background extraction
    /// unless every extractor is already complete
    pub async fn handle_request(&self) -> ServiceResult<RequestOutcome> {
        let cohort = self.provision();
        let status = self.determine_status(&cohort).await?;

        let content = if status.indicates_results() {
            let content = self.cached_content().await?;
            (!content.is_empty()).then_some(content)
        } else {
            None
        };

        let extraction = if status == ExtractionStatus::Completed {
            None
        } else {
            self.spawn_extraction(cohort)
        };

        Ok(RequestOutcome {
            response: ContentResponse {
                search_data: self.search.clone(),
                status,
                content,
            },
            extraction,
        })
    }

    /// Extract `cohort` on a background task. `None` when an extraction of
    /// the same search is already running in this process.
    pub fn spawn_extraction(&self, cohort: Cohort<ResearchArticle>) -> Option<JoinHandle<usize>> {
        let Some(guard) = self.inflight.try_begin(&self.search_key) else {
            info!("Extraction for {} already in progress", self.search);
            return None;
        };
        info!("Scheduling extraction for {}", self.search);
        Some(tokio::spawn(async move {
            let _guard = guard;
            run_cohort(cohort).await
        }))
    }

    /// Provision and extract the cohort in the foreground. Returns how many
    /// extractors failed.
    pub async fn extract_content(&self) -> usize {
        run_cohort(self.provision()).await
    }
}

async fn run_cohort(mut cohort: Cohort<ResearchArticle>) -> usize {
    let failures = cohort.extract().await;
    info!(
        "Extracted {} record(s) for {} ({failures} extractor failure(s))",
        cohort.results().len(),
        cohort.search()
    );
    failures
}
