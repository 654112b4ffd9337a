//! Source extraction: one record from one detail page, plus the serial and
//! host-parallel fan-out a multi extractor uses to refine its items.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use indexmap::IndexMap;
use log::{debug, error, info, warn};

use super::Engine;
use super::assembly::assemble;
use super::session::SessionLease;
use crate::browser::Session;
use crate::cache::{CacheError, ContentStore};
use crate::config::{SourceConfig, load_source_config};
use crate::content::{Extractable, RANK_FIELD, SOURCE_URL_FIELD};
use crate::extraction::{ExtractionError, ExtractionInfo, ExtractionResult, ExtractionStatus};
use crate::operation::{AssemblyContext, Value};
use crate::utils::{SOURCE_FILE_NAME, derive_domain, directory_components, human_selection_shuffle};

/// Provider directory, relative to `root`, whose `source.yaml` handles `url`.
///
/// Candidate directories run from the URL's host down its path; the deepest
/// one holding a source configuration wins.
pub fn source_directory(root: &Path, url: &str) -> ExtractionResult<String> {
    let components = directory_components(url);
    for depth in (1..=components.len()).rev() {
        let relative = components[..depth].join("/");
        if relative.is_empty() {
            continue;
        }
        if root.join(&relative).join(SOURCE_FILE_NAME).is_file() {
            return Ok(relative);
        }
    }
    Err(ExtractionError::SourceDirectoryNotFound {
        url: url.to_string(),
        root: root.to_path_buf(),
    })
}

pub struct SourceExtractor<M> {
    engine: Engine,
    directory: String,
    source_url: String,
    config: SourceConfig,
    store: Option<ContentStore>,
    status: Option<ExtractionStatus>,
    _model: PhantomData<fn() -> M>,
}

impl<M> fmt::Display for SourceExtractor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<SourceExtractor | {} | {}>", self.directory, self.source_url)
    }
}

impl<M: Extractable> SourceExtractor<M> {
    /// Extractor for `source_url` using the nearest matching provider
    /// directory. Fails when no directory matches or its configuration is
    /// invalid.
    pub fn new(engine: &Engine, source_url: &str) -> ExtractionResult<Self> {
        let root = engine.settings().provider_root();
        let directory = source_directory(root, source_url)?;
        let path = root.join(&directory).join(SOURCE_FILE_NAME);
        let config = load_source_config(engine.config_files(), &path)?;
        let store = engine
            .cache()
            .map(|client| ContentStore::new(Arc::clone(client), config.common.cache_version.clone()));

        Ok(Self {
            engine: engine.clone(),
            directory,
            source_url: source_url.to_string(),
            config,
            store,
            status: None,
            _model: PhantomData,
        })
    }

    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.common.is_enabled
    }

    #[must_use]
    pub fn status(&self) -> Option<ExtractionStatus> {
        self.status
    }

    /// Cached record if present and still fresh, else extract the page on
    /// `session` or on a session of its own. Disabled extractors yield
    /// `None`.
    pub async fn extract(&mut self, session: Option<Arc<dyn Session>>) -> ExtractionResult<Option<M>> {
        if !self.is_enabled() {
            warn!("{self} is disabled");
            return Ok(None);
        }
        if let Some(content) = self.cached_content().await? {
            return Ok(Some(content));
        }

        let wait = self.engine.implicit_wait(&self.config.common);
        let lease = SessionLease::acquire(self.engine.provider(), session, wait).await?;
        let result = self.extract_with(lease.session()).await;
        lease.release().await;
        result.map(Some)
    }

    /// Cached record when reusable: fresh and written with this
    /// configuration's cache version. Undecodable records count as misses.
    pub async fn cached_content(&mut self) -> ExtractionResult<Option<M>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let content: M = match store.retrieve(&self.source_url).await {
            Ok(Some(content)) => content,
            Ok(None) => return Ok(None),
            Err(CacheError::Content(e)) => {
                warn!("{self}: ignoring cached record: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let info = ExtractionInfo::from_content(content.last_extracted(), content.cache_version());
        let common = &self.config.common;
        if !info.is_fresh(
            common.freshness_threshold,
            common.cache_version.as_deref(),
            Utc::now().naive_utc(),
        ) {
            debug!("{self}: cached record is stale");
            return Ok(None);
        }

        debug!("{self}: using cached record");
        self.status = Some(ExtractionStatus::Completed);
        Ok(Some(content))
    }

    /// Fetch and extract the page on `session`, bypassing the cache check
    pub async fn extract_with(&mut self, session: &Arc<dyn Session>) -> ExtractionResult<M> {
        match self.perform_extraction(session).await {
            Ok(content) => Ok(content),
            Err(e) => {
                self.update_status(ExtractionStatus::Failure)?;
                Err(e)
            }
        }
    }

    async fn perform_extraction(&mut self, session: &Arc<dyn Session>) -> ExtractionResult<M> {
        self.update_status(ExtractionStatus::Initiated)?;
        self.delay_if_necessary(session.as_ref()).await;

        debug!("{self}: fetching page");
        session.navigate(&self.source_url).await?;

        let label = self.to_string();
        let preset = AssemblyContext::from([
            (SOURCE_URL_FIELD.to_string(), Value::from(self.source_url.as_str())),
            (RANK_FIELD.to_string(), Value::Null),
        ]);
        let mut content: M = assemble(
            &self.config.common.content,
            session.as_ref(),
            &Value::Page,
            1,
            preset,
            &label,
        )
        .await;

        if content.source_url().is_none() {
            error!("{label}: record has no {SOURCE_URL_FIELD}: {content:?}");
            return Err(ExtractionError::MissingUniqueKey(SOURCE_URL_FIELD));
        }
        if let Some(store) = &self.store {
            store.store(&mut content, &self.source_url).await?;
        }

        self.update_status(ExtractionStatus::Completed)?;
        Ok(content)
    }

    /// Sleep the remainder of a fresh random delay since the session's last
    /// fetch. A session that never fetched is not delayed.
    async fn delay_if_necessary(&self, session: &dyn Session) {
        let Some(last_fetch) = session.last_fetch() else {
            return;
        };
        let delay = self.config.common.delay.random_delay();
        if let Some(remaining) = delay.checked_sub(last_fetch.elapsed()) {
            debug!("{self}: delaying {remaining:?}");
            tokio::time::sleep(remaining).await;
        }
    }

    /// Source statuses live in memory only
    fn update_status(&mut self, status: ExtractionStatus) -> ExtractionResult<bool> {
        if self.status == Some(status) {
            return Ok(false);
        }
        ExtractionStatus::validate_transition(self.status, status)?;
        self.status = Some(status);
        debug!("{self}: {status}");
        Ok(true)
    }
}

/// Extract `urls` one after another on one session.
///
/// `session` is used when given; otherwise one is provisioned on the first
/// cache miss. Unless `reuse` is set the session is disposed afterwards.
/// URLs without a usable configuration, disabled extractors and failed
/// extractions are logged and skipped.
pub async fn extract_in_series<M: Extractable>(
    engine: &Engine,
    urls: Vec<String>,
    session: Option<Arc<dyn Session>>,
    reuse: bool,
) -> Vec<M> {
    let mut lease = session.map(|session| {
        if reuse {
            SessionLease::borrowed(session)
        } else {
            SessionLease::adopt(session)
        }
    });
    let mut results = Vec::with_capacity(urls.len());

    for url in urls {
        let mut extractor = match SourceExtractor::<M>::new(engine, &url) {
            Ok(extractor) => extractor,
            Err(e) => {
                warn!("Skipping source {url}: {e}");
                continue;
            }
        };
        if !extractor.is_enabled() {
            info!("{extractor} is disabled; skipping");
            continue;
        }

        match extractor.cached_content().await {
            Ok(Some(content)) => {
                results.push(content);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!("{extractor}: cache lookup failed: {e}");
                continue;
            }
        }

        if lease.is_none() {
            match SessionLease::acquire(engine.provider(), None, engine.default_implicit_wait()).await {
                Ok(acquired) => lease = Some(acquired),
                Err(e) => {
                    error!("Failed to provision a session for source extraction: {e}");
                    break;
                }
            }
        }
        let Some(active) = &lease else {
            break;
        };

        match extractor.extract_with(active.session()).await {
            Ok(content) => results.push(content),
            Err(e) => error!("{extractor} failed: {e}"),
        }
    }

    if let Some(lease) = lease {
        lease.release().await;
    }
    results
}

/// Source URLs grouped by host, each group ordered by a human-like
/// shuffle. Relative URLs take their host from `base`.
pub fn group_by_domain<I>(urls: I, base: Option<&str>) -> IndexMap<String, Vec<String>>
where
    I: IntoIterator<Item = String>,
{
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for url in urls {
        match derive_domain(&url, base) {
            Ok(domain) => groups.entry(domain).or_default().push(url),
            Err(e) => warn!("Skipping source {url}: {e}"),
        }
    }

    let mut rng = rand::rng();
    for urls in groups.values_mut() {
        human_selection_shuffle(&mut rng, urls);
    }
    groups
}

/// One series per host, run concurrently. The series for `search_domain`
/// reuses `search_session`; other hosts provision their own. Results are
/// chained in host order; a failed series contributes nothing.
pub async fn extract_in_parallel<M: Extractable>(
    engine: &Engine,
    urls_by_domain: IndexMap<String, Vec<String>>,
    search_domain: Option<&str>,
    search_session: Option<Arc<dyn Session>>,
) -> Vec<M> {
    let tasks: Vec<_> = urls_by_domain
        .into_iter()
        .map(|(domain, urls)| {
            let session = search_session
                .as_ref()
                .filter(|_| search_domain == Some(domain.as_str()))
                .map(Arc::clone);
            let reuse = session.is_some();
            let engine = engine.clone();
            debug!("Extracting {} source(s) from {domain}", urls.len());
            let handle = tokio::spawn(async move {
                extract_in_series::<M>(&engine, urls, session, reuse).await
            });
            (domain, handle)
        })
        .collect();

    let (domains, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
    let mut results = Vec::new();
    for (domain, outcome) in domains.into_iter().zip(join_all(handles).await) {
        match outcome {
            Ok(records) => results.extend(records),
            Err(e) => error!("Source extraction for {domain} aborted: {e}"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use tempfile::TempDir;

    use crate::browser::StaticProvider;
    use crate::cache::MemoryCacheClient;
    use crate::config::EngineSettings;
    use crate::content::ResearchArticle;

    const SOURCE_YAML: &str = r#"
wait: 0
delay:
  base: 0
  multiplier: 0.001
  minimum: 0
  maximum: 0.01
content:
  title:
    class_name: title
    getattr: text
  doi:
    class_name: doi
    getattr: text
"#;

    fn provider_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("journals_example_org");
        fs::create_dir_all(dir.join("articles")).unwrap();
        fs::write(dir.join(SOURCE_FILE_NAME), SOURCE_YAML).unwrap();
        temp
    }

    fn engine(root: &Path, pages: &[(&str, &str)]) -> Engine {
        let settings = EngineSettings::builder().provider_root(root).build().unwrap();
        let fixtures: HashMap<String, String> = pages
            .iter()
            .map(|(url, html)| ((*url).to_string(), (*html).to_string()))
            .collect();
        Engine::new(
            settings,
            Arc::new(StaticProvider::with_fixtures(fixtures)),
            Some(Arc::new(MemoryCacheClient::new())),
        )
    }

    fn page(title: &str) -> String {
        format!(r#"<html><body><h1 class="title">{title}</h1><p class="doi">10.1/x</p></body></html>"#)
    }

    #[test]
    fn deepest_configured_directory_wins() {
        let temp = provider_tree();
        let root = temp.path();
        assert_eq!(
            source_directory(root, "https://www.journals.example.org/articles/7").unwrap(),
            "journals_example_org"
        );

        fs::write(
            root.join("journals_example_org/articles").join(SOURCE_FILE_NAME),
            SOURCE_YAML,
        )
        .unwrap();
        assert_eq!(
            source_directory(root, "https://journals.example.org/articles/7").unwrap(),
            "journals_example_org/articles"
        );

        assert!(matches!(
            source_directory(root, "https://elsewhere.org/articles/7"),
            Err(ExtractionError::SourceDirectoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cached_records_are_reused_while_fresh() {
        let temp = provider_tree();
        let url = "https://journals.example.org/articles/1";
        let html = page("Housing First");
        let engine = engine(temp.path(), &[(url, &html)]);

        let mut first = SourceExtractor::<ResearchArticle>::new(&engine, url).unwrap();
        let article = first.extract(None).await.unwrap().unwrap();
        assert_eq!(article.title.as_deref(), Some("Housing First"));
        assert_eq!(article.doi.as_deref(), Some("10.1/x"));
        assert_eq!(article.rank, None);
        assert_eq!(first.status(), Some(ExtractionStatus::Completed));

        let mut second = SourceExtractor::<ResearchArticle>::new(&engine, url).unwrap();
        let cached = second.cached_content().await.unwrap().unwrap();
        assert_eq!(cached.title.as_deref(), Some("Housing First"));
        assert!(cached.last_extracted.is_some());
    }

    #[tokio::test]
    async fn failed_navigation_ends_in_failure() {
        let temp = provider_tree();
        let engine = engine(temp.path(), &[("https://journals.example.org/other", "<html></html>")]);
        let mut extractor =
            SourceExtractor::<ResearchArticle>::new(&engine, "https://journals.example.org/missing")
                .unwrap();
        assert!(extractor.extract(None).await.is_err());
        assert_eq!(extractor.status(), Some(ExtractionStatus::Failure));
    }

    #[tokio::test]
    async fn series_skips_unconfigured_and_failed_sources() {
        let temp = provider_tree();
        let ok = "https://journals.example.org/articles/1";
        let html = page("Housing First");
        let engine = engine(temp.path(), &[(ok, &html)]);

        let urls = vec![
            "https://unknown.org/a".to_string(),
            "https://journals.example.org/articles/404".to_string(),
            ok.to_string(),
        ];
        let records: Vec<ResearchArticle> = extract_in_series(&engine, urls, None, false).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_url.as_deref(), Some(ok));
    }

    #[test]
    fn grouping_by_host_keeps_every_url() {
        let urls = vec![
            "https://a.org/1".to_string(),
            "/relative".to_string(),
            "https://b.org/1".to_string(),
            "https://a.org/2".to_string(),
        ];
        let groups = group_by_domain(urls, Some("https://a.org/search"));
        assert_eq!(groups.keys().collect::<Vec<_>>(), ["a.org", "b.org"]);
        let mut a = groups["a.org"].clone();
        a.sort();
        assert_eq!(a, ["/relative", "https://a.org/1", "https://a.org/2"]);
    }
}
