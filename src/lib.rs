//! Configuration-driven extraction of research content.
//!
//! Provider directories hold YAML configurations describing how to search a
//! site (`multi.yaml`) and how to read one of its detail pages
//! (`source.yaml`). Extractors interpret those configurations against a
//! browser [`Session`](browser::Session), cache what they find, and report
//! progress as an [`ExtractionStatus`].

pub mod browser;
pub mod cache;
pub mod config;
pub mod content;
pub mod extraction;
pub mod extractor;
pub mod operation;
pub mod service;
pub mod url;
pub mod utils;

pub use browser::{ChromiumProvider, Session, SessionProvider, StaticProvider};
pub use cache::{CacheClient, CacheKey, MemoryCacheClient, SqliteCacheClient};
pub use config::{EngineSettings, MultiConfig, SessionBackend, SourceConfig};
pub use content::{Extractable, ResearchArticle};
pub use extraction::{ExtractionError, ExtractionInfo, ExtractionResult, ExtractionStatus};
pub use extractor::{Cohort, Engine, MultiExtractor, SourceExtractor};
pub use service::{CommunityService, ContentResponse, InFlight, ServiceError, ServiceResult};
pub use url::{SearchData, SearchTerms, UrlConstructor};
pub use utils::{GranularDateTime, Granularity};
