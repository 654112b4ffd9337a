//! Multi extraction: ranked items from a paginated results listing.
//!
//! Each page's items are assembled and stored in rank order. With
//! `extract_sources` the items of a page are then refined from their own
//! detail pages, fetched in parallel by host, and the merged records are
//! stored again. Status changes are recorded for the extractor and its
//! cohort.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use super::Engine;
use super::assembly::assemble;
use super::cohort::CohortMember;
use super::session::SessionLease;
use super::source::{extract_in_parallel, group_by_domain};
use crate::browser::Session;
use crate::cache::{CohortInfoStore, ContentStore, SearchResultStore};
use crate::config::{ConfigError, MultiConfig, NextPageVia, load_multi_config};
use crate::content::{Extractable, RANK_FIELD, SOURCE_URL_FIELD};
use crate::extraction::{ExtractionInfo, ExtractionResult, ExtractionStatus};
use crate::operation::{AssemblyContext, OperationContext, Value};
use crate::url::SearchData;
use crate::utils::{MULTI_FILE_NAME, derive_domain, resolve_url};

/// Cache stores of one multi extractor
#[derive(Clone)]
struct Stores {
    results: SearchResultStore,
    info: CohortInfoStore,
}

pub struct MultiExtractor<M> {
    engine: Engine,
    directory: String,
    search: SearchData,
    config: MultiConfig,
    page_url: String,
    stores: Option<Stores>,
    status: Option<ExtractionStatus>,
    member: CohortMember,
    extracted: IndexMap<String, M>,
}

impl<M> fmt::Display for MultiExtractor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<MultiExtractor | {} | {}>", self.directory, self.search)
    }
}

impl<M: Extractable> MultiExtractor<M> {
    /// Extractor configured by `<provider root>/<directory>/multi.yaml`.
    /// Fails on invalid configuration or when the search URL cannot be
    /// constructed for `search`.
    pub fn new(engine: &Engine, directory: &str, search: &SearchData) -> ExtractionResult<Self> {
        let path = engine
            .settings()
            .provider_root()
            .join(directory)
            .join(MULTI_FILE_NAME);
        let config = load_multi_config(engine.config_files(), &path)?;
        let page_url = config.url.construct(search).map_err(ConfigError::from)?;

        let stores = match engine.cache() {
            Some(client) => {
                let version = config.common.cache_version.clone();
                let content = ContentStore::new(Arc::clone(client), version.clone());
                Some(Stores {
                    results: SearchResultStore::for_extractor(content, directory, search)?,
                    info: CohortInfoStore::new(Arc::clone(client), search, version)?,
                })
            }
            None => None,
        };

        Ok(Self {
            engine: engine.clone(),
            directory: directory.to_string(),
            search: search.clone(),
            config,
            page_url,
            stores,
            status: None,
            member: CohortMember::solo(directory),
            extracted: IndexMap::new(),
        })
    }

    /// Report status to a shared cohort table instead of a table of its own
    pub fn join(&mut self, member: CohortMember) {
        if let Some(status) = self.status {
            member.record(status);
        }
        self.member = member;
    }

    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    #[must_use]
    pub fn search(&self) -> &SearchData {
        &self.search
    }

    #[must_use]
    pub fn config(&self) -> &MultiConfig {
        &self.config
    }

    /// First results page for the search
    #[must_use]
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.common.is_enabled
    }

    #[must_use]
    pub fn status(&self) -> Option<ExtractionStatus> {
        self.status
    }

    #[must_use]
    pub fn member(&self) -> &CohortMember {
        &self.member
    }

    /// Records extracted so far keyed by source URL, in rank order
    #[must_use]
    pub fn extracted(&self) -> &IndexMap<String, M> {
        &self.extracted
    }

    /// Whether results described by `info` can be served instead of
    /// extracting again
    #[must_use]
    pub fn should_use_cached_content(&self, info: &ExtractionInfo) -> bool {
        let common = &self.config.common;
        info.is_fresh(
            common.freshness_threshold,
            common.cache_version.as_deref(),
            Utc::now().naive_utc(),
        )
    }

    /// Load fresh cached results, else extract on `session` or on a session
    /// of its own. Disabled extractors yield `None`.
    pub async fn extract(
        &mut self,
        session: Option<Arc<dyn Session>>,
    ) -> ExtractionResult<Option<&IndexMap<String, M>>> {
        if !self.is_enabled() {
            warn!("{self} is disabled");
            return Ok(None);
        }
        if self.load_cached_content().await? {
            return Ok(Some(&self.extracted));
        }

        let wait = self.engine.implicit_wait(&self.config.common);
        let lease = SessionLease::acquire(self.engine.provider(), session, wait).await?;
        let result = self.perform_extraction(lease.session()).await;
        lease.release().await;

        match result {
            Ok(()) => Ok(Some(&self.extracted)),
            Err(e) => {
                self.conclude_failure().await;
                Err(e)
            }
        }
    }

    async fn load_cached_content(&mut self) -> ExtractionResult<bool> {
        let Some(stores) = &self.stores else {
            return Ok(false);
        };
        let info = stores.info.retrieve_info(&self.directory).await?;
        if !self.should_use_cached_content(&info) {
            return Ok(false);
        }

        let results = stores.results.retrieve_extraction_results().await?;
        debug!("{self}: using {} cached result(s)", results.len());
        self.extracted = results;
        self.status = info.status;
        if let Some(status) = info.status {
            self.member.record(status);
        }
        Ok(true)
    }

    async fn perform_extraction(&mut self, session: &Arc<dyn Session>) -> ExtractionResult<()> {
        self.update_status(ExtractionStatus::Initiated).await?;

        debug!("{self}: fetching {}", self.page_url);
        session.navigate(&self.page_url).await?;
        self.perform_page_extraction(session, 1).await?;

        let mut page = 2;
        while page <= self.config.pagination.pages
            && self.perform_next_page_extraction(session, page).await?
        {
            page += 1;
        }

        let status = if self.extracted.is_empty() {
            ExtractionStatus::Empty
        } else {
            ExtractionStatus::Completed
        };
        self.update_status(status).await?;
        Ok(())
    }

    /// Advance to `page` and extract it. Returns whether another page
    /// should follow; a missing next-page control ends pagination.
    async fn perform_next_page_extraction(
        &mut self,
        session: &Arc<dyn Session>,
        page: u32,
    ) -> ExtractionResult<bool> {
        let Some(next_page) = &self.config.pagination.next_page else {
            return Ok(false);
        };
        let label = self.to_string();
        let index = usize::try_from(page - 1).unwrap_or(usize::MAX);

        let result = {
            let content = AssemblyContext::new();
            let ctx = OperationContext::new(session.as_ref(), &content, &label);
            next_page.operation.execute(Value::Page, index, &ctx).await
        };
        let next = match result {
            Ok(next) => next,
            Err(e) if e.is_missing_element() => {
                info!("{label}: no {} for page {page}; pagination ends", next_page.tag());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let delay = self.config.common.delay.random_delay();
        debug!("{label}: waiting {delay:?} before page {page}");
        tokio::time::sleep(delay).await;

        if next_page.via == NextPageVia::Url {
            let Some(url) = next.as_text().filter(|url| !url.is_empty()) else {
                info!("{label}: no next page url for page {page}; pagination ends");
                return Ok(false);
            };
            let base = session
                .current_url()
                .await?
                .unwrap_or_else(|| self.page_url.clone());
            session.navigate(&resolve_url(url, &base)).await?;
        }

        self.perform_page_extraction(session, page).await?;
        Ok(page < self.config.pagination.pages)
    }

    async fn perform_page_extraction(
        &mut self,
        session: &Arc<dyn Session>,
        page: u32,
    ) -> ExtractionResult<()> {
        let label = self.to_string();
        let result = {
            let content = AssemblyContext::new();
            let ctx = OperationContext::new(session.as_ref(), &content, &label);
            self.config.items.execute(Value::Page, 1, &ctx).await
        };
        let items = match result {
            Ok(Value::Null) => {
                warn!("{label}: no items found on page {page}");
                return Ok(());
            }
            Ok(items) => items.enlist(),
            Err(e) if e.is_missing_element() => {
                warn!("{label}: no items found on page {page}: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let base = session
            .current_url()
            .await?
            .unwrap_or_else(|| self.page_url.clone());
        let store_content = !self.config.extract_sources;
        let mut page_content: IndexMap<String, M> = IndexMap::new();

        for (offset, item) in items.iter().enumerate() {
            let index = offset + 1;
            let rank = self.config.pagination.rank(page, index);
            let preset = AssemblyContext::from([(RANK_FIELD.to_string(), Value::Int(rank))]);
            let mut content: M = assemble(
                &self.config.common.content,
                session.as_ref(),
                item,
                index,
                preset,
                &label,
            )
            .await;

            let Some(source_url) = content.source_url() else {
                error!("{label}: item {index} on page {page} has no {SOURCE_URL_FIELD}: {content:?}");
                continue;
            };
            let source_url = resolve_url(&source_url, &base);
            content.put(SOURCE_URL_FIELD, Value::from(source_url.as_str()));

            if self.extracted.contains_key(&source_url) || page_content.contains_key(&source_url) {
                warn!("{label}: {source_url} found again at rank {rank}; keeping the earlier rank");
                continue;
            }
            if let Some(stores) = &self.stores {
                stores
                    .results
                    .store_result(&mut content, &source_url, rank, store_content)
                    .await?;
            }
            page_content.insert(source_url, content);
        }

        debug!("{label}: page {page} yielded {} item(s)", page_content.len());
        if page_content.is_empty() {
            return Ok(());
        }
        self.update_status(ExtractionStatus::Preliminary).await?;

        if self.config.extract_sources {
            let refined = self.extract_sources(session, &page_content).await?;
            self.combine_results(&mut page_content, refined);
            if let Some(stores) = &self.stores {
                for (source_url, content) in &mut page_content {
                    let rank = content.rank().unwrap_or_default();
                    stores.results.store_result(content, source_url, rank, true).await?;
                }
            }
        }

        self.extracted.extend(page_content);
        Ok(())
    }

    /// Source records for the page's items. The host of the results page
    /// reuses this extractor's session, which is returned to the results
    /// page afterwards.
    async fn extract_sources(
        &self,
        session: &Arc<dyn Session>,
        page_content: &IndexMap<String, M>,
    ) -> ExtractionResult<Vec<M>> {
        let search_domain = derive_domain(&self.page_url, None).ok();
        let urls_by_domain = group_by_domain(page_content.keys().cloned(), search_domain.as_deref());
        let results_page = session.current_url().await?;

        let refined = extract_in_parallel::<M>(
            &self.engine,
            urls_by_domain,
            search_domain.as_deref(),
            Some(Arc::clone(session)),
        )
        .await;
        debug!("{self}: refined {} of {} item(s)", refined.len(), page_content.len());

        if let Some(results_page) = results_page
            && session.current_url().await?.as_deref() != Some(results_page.as_str())
        {
            session.navigate(&results_page).await?;
        }
        Ok(refined)
    }

    /// Overlay each source record's non-null fields on its item
    fn combine_results(&self, page_content: &mut IndexMap<String, M>, refined: Vec<M>) {
        for source in refined {
            let Some(source_url) = source.source_url() else {
                continue;
            };
            let Some(item) = page_content.get_mut(&source_url) else {
                warn!("{self}: source record {source_url} matches no item");
                continue;
            };
            for conflict in item.merge_from(&source) {
                warn!(
                    "{self}: {source_url} field '{}' differs: item {:?}, source {:?}",
                    conflict.field, conflict.existing, conflict.incoming
                );
            }
        }
    }

    /// Move to `status`. Returns `false` when unchanged.
    ///
    /// A move backward is rejected before anything is written. Otherwise
    /// the status is recorded in the cohort table and, with a cache, stored
    /// along with the cohort aggregate when that changed too.
    pub async fn update_status(&mut self, status: ExtractionStatus) -> ExtractionResult<bool> {
        if self.status == Some(status) {
            return Ok(false);
        }
        ExtractionStatus::validate_transition(self.status, status)?;
        self.status = Some(status);

        let overall = self.member.record(status);
        match overall {
            Some(overall) => info!("{self}: {status} (cohort {overall})"),
            None => info!("{self}: {status}"),
        }
        if let Some(stores) = &self.stores {
            stores.info.store_status(&self.directory, status, overall).await?;
        }
        Ok(true)
    }

    async fn conclude_failure(&mut self) {
        if ExtractionStatus::validate_transition(self.status, ExtractionStatus::Failure).is_err() {
            return;
        }
        if let Err(e) = self.update_status(ExtractionStatus::Failure).await {
            error!("{self}: failed to record failure: {e}");
        }
    }
}
