//! Cohorts: the multi extractors provisioned together for one search.
//!
//! Members are held in an arena indexed by position. Each member carries a
//! [`CohortMember`] handle, a plain index into the shared [`CohortStatus`]
//! table, so members never refer to one another directly.

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use jwalk::WalkDir;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::Engine;
use super::multi::MultiExtractor;
use crate::content::Extractable;
use crate::extraction::ExtractionStatus;
use crate::url::SearchData;
use crate::utils::MULTI_FILE_NAME;

#[derive(Debug, Default)]
struct CohortState {
    statuses: Vec<Option<ExtractionStatus>>,
    overall: Option<ExtractionStatus>,
}

/// Per-member statuses of one cohort and their aggregate
#[derive(Debug)]
pub struct CohortStatus {
    directories: Vec<String>,
    state: Mutex<CohortState>,
}

impl CohortStatus {
    #[must_use]
    pub fn new(directories: Vec<String>) -> Arc<Self> {
        let state = CohortState {
            statuses: vec![None; directories.len()],
            overall: None,
        };
        Arc::new(Self {
            directories,
            state: Mutex::new(state),
        })
    }

    /// Handle for the member at `id`
    #[must_use]
    pub fn member(self: &Arc<Self>, id: usize) -> CohortMember {
        CohortMember {
            id,
            table: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    #[must_use]
    pub fn overall(&self) -> Option<ExtractionStatus> {
        self.state.lock().overall
    }

    #[must_use]
    pub fn status_of(&self, directory: &str) -> Option<ExtractionStatus> {
        let id = self.directories.iter().position(|d| d == directory)?;
        self.state.lock().statuses.get(id).copied().flatten()
    }

    /// Record a member's status. Returns the new aggregate when it changed.
    fn record(&self, id: usize, status: ExtractionStatus) -> Option<ExtractionStatus> {
        let mut state = self.state.lock();
        if let Some(slot) = state.statuses.get_mut(id) {
            *slot = Some(status);
        }
        let aggregate = ExtractionStatus::aggregate(state.statuses.iter().flatten().copied());
        if aggregate == state.overall {
            return None;
        }
        state.overall = aggregate;
        aggregate
    }
}

/// A member's index into its cohort's status table
#[derive(Debug, Clone)]
pub struct CohortMember {
    id: usize,
    table: Arc<CohortStatus>,
}

impl CohortMember {
    /// Sole member of a cohort of its own
    #[must_use]
    pub fn solo(directory: &str) -> Self {
        CohortStatus::new(vec![directory.to_string()]).member(0)
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn table(&self) -> &Arc<CohortStatus> {
        &self.table
    }

    /// Record this member's status; `Some(overall)` when the cohort
    /// aggregate changed
    pub fn record(&self, status: ExtractionStatus) -> Option<ExtractionStatus> {
        self.table.record(self.id, status)
    }
}

/// Provider directories under `root` holding a `multi.yaml`, relative to
/// the root with `/` separators, sorted
pub fn find_multi_directories(root: &Path) -> Vec<String> {
    let mut directories = Vec::new();
    for entry in WalkDir::new(root).sort(true).skip_hidden(true).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable provider path: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != MULTI_FILE_NAME {
            continue;
        }
        let path = entry.path();
        let Some(relative) = path.parent().and_then(|parent| parent.strip_prefix(root).ok()) else {
            continue;
        };
        let components: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if components.is_empty() {
            warn!("Ignoring {MULTI_FILE_NAME} at the provider root {}", root.display());
            continue;
        }
        directories.push(components.join("/"));
    }
    directories.sort();
    directories
}

/// Every enabled multi extractor for one search
pub struct Cohort<M> {
    search: SearchData,
    members: Vec<MultiExtractor<M>>,
    status: Arc<CohortStatus>,
}

impl<M: Extractable> Cohort<M> {
    /// One extractor per provider directory carrying a `multi.yaml`.
    /// Directories whose configuration fails to load and disabled
    /// extractors are left out.
    pub fn provision(engine: &Engine, search: &SearchData) -> Self {
        let root = engine.settings().provider_root();
        let mut members = Vec::new();
        for directory in find_multi_directories(root) {
            match MultiExtractor::<M>::new(engine, &directory, search) {
                Ok(extractor) if extractor.is_enabled() => members.push(extractor),
                Ok(extractor) => info!("{extractor} is disabled; leaving it out of the cohort"),
                Err(e) => error!("Failed to configure multi extractor in {directory}: {e}"),
            }
        }

        let directories = members.iter().map(|m| m.directory().to_string()).collect();
        let status = CohortStatus::new(directories);
        for (id, member) in members.iter_mut().enumerate() {
            member.join(status.member(id));
        }
        debug!("Provisioned {} multi extractor(s) for {search}", members.len());

        Self {
            search: search.clone(),
            members,
            status,
        }
    }

    #[must_use]
    pub fn search(&self) -> &SearchData {
        &self.search
    }

    #[must_use]
    pub fn directories(&self) -> &[String] {
        self.status.directories()
    }

    #[must_use]
    pub fn members(&self) -> &[MultiExtractor<M>] {
        &self.members
    }

    #[must_use]
    pub fn get(&self, directory: &str) -> Option<&MultiExtractor<M>> {
        let id = self.directories().iter().position(|d| d == directory)?;
        self.members.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> &Arc<CohortStatus> {
        &self.status
    }

    #[must_use]
    pub fn overall_status(&self) -> Option<ExtractionStatus> {
        self.status.overall()
    }

    /// Run every member concurrently. Failures are logged per member and
    /// never cancel the others. Returns how many members failed.
    pub async fn extract(&mut self) -> usize {
        let runs = self.members.iter_mut().map(|member| async move {
            let outcome = member.extract(None).await.map(|_| ());
            (member.to_string(), outcome)
        });

        let mut failures = 0;
        for (label, outcome) in join_all(runs).await {
            if let Err(e) = outcome {
                error!("{label} failed: {e}");
                failures += 1;
            }
        }
        info!(
            "Cohort for {} finished with overall status {}",
            self.search,
            self.overall_status().map_or("unknown", ExtractionStatus::name)
        );
        failures
    }

    /// Extracted records of every member keyed by source URL, in member
    /// then rank order. A URL found by several members keeps its first
    /// record.
    #[must_use]
    pub fn results(&self) -> IndexMap<String, M> {
        let mut results = IndexMap::new();
        for member in &self.members {
            for (url, record) in member.extracted() {
                results.entry(url.clone()).or_insert_with(|| record.clone());
            }
        }
        results
    }
}
