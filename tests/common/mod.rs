//! Test utilities shared by the contextualize integration tests

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use contextualize::browser::StaticProvider;
use contextualize::cache::{CacheClient, MemoryCacheClient};
use contextualize::config::EngineSettings;
use contextualize::extractor::Engine;
use contextualize::url::SearchData;
use tempfile::TempDir;

pub const HOST: &str = "https://journals.example.org";
pub const PROVIDER: &str = "journals_example_org";
pub const SEARCH_URL: &str = "https://journals.example.org/search?q=Homelessness";
pub const PAGE_TWO_URL: &str = "https://journals.example.org/search?q=Homelessness&page=2";

/// Pacing that keeps tests fast: every sampled delay stays under 10ms
pub const FAST_DELAY: &str = "delay:\n  base: 0\n  multiplier: 0.001\n  minimum: 0\n  maximum: 0.01\n";

/// Search the fixtures answer
#[allow(dead_code)]
pub fn search() -> SearchData {
    SearchData::new()
        .with("problem", Some("Homelessness"))
        .with::<&str>("org", None)
        .with("geo", Some(vec!["Texas", "TX"]))
}

/// A `multi.yaml` for the fixture journal
#[allow(dead_code)]
pub fn multi_yaml(extract_sources: bool, pages: u32, cache_version: Option<&str>) -> String {
    let version = cache_version
        .map(|v| format!("cache_version: '{v}'\n"))
        .unwrap_or_default();
    format!(
        "wait: 0\n{FAST_DELAY}{version}extract_sources: {extract_sources}\n\
url:\n  url_template: '{HOST}/search?q={{problem}}'\n\
pagination:\n  pages: {pages}\n  page_size: 5\n  next_page_url:\n    css_selector: a.next\n    attribute: href\n\
items:\n  class_name: result\n  is_multiple: true\n\
content:\n  source_url:\n    tag_name: a\n    attribute: href\n  title:\n    tag_name: h3\n    getattr: text\n  publisher: Example Press\n"
    )
}

/// A `source.yaml` reading the fixture article pages
#[allow(dead_code)]
pub fn source_yaml() -> String {
    format!(
        "wait: 0\n{FAST_DELAY}content:\n  title:\n    tag_name: h1\n    getattr: text\n  doi:\n    class_name: doi\n    getattr: text\n"
    )
}

/// Temporary provider root
pub struct ProviderTree {
    dir: TempDir,
}

#[allow(dead_code)]
impl ProviderTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create provider root"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, directory: &str, file: &str, yaml: &str) -> &Self {
        let dir = self.root().join(directory);
        fs::create_dir_all(&dir).expect("create provider directory");
        fs::write(dir.join(file), yaml).expect("write provider configuration");
        self
    }

    pub fn multi(&self, directory: &str, yaml: &str) -> &Self {
        self.write(directory, "multi.yaml", yaml)
    }

    pub fn source(&self, directory: &str, yaml: &str) -> &Self {
        self.write(directory, "source.yaml", yaml)
    }
}

/// Escape text for inclusion in fixture HTML
#[allow(dead_code)]
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// A results listing with one `.result` block per `(href, title)` and an
/// optional next-page link
#[allow(dead_code)]
pub fn results_page(items: &[(String, String)], next: Option<&str>) -> String {
    let results: String = items
        .iter()
        .map(|(href, title)| {
            format!(
                r#"<div class="result"><h3>{}</h3><a href="{}">Read</a></div>"#,
                escape(title),
                escape(href)
            )
        })
        .collect();
    let next = next
        .map(|href| format!(r#"<a class="next" href="{}">Next</a>"#, escape(href)))
        .unwrap_or_default();
    format!("<html><body><main>{results}</main>{next}</body></html>")
}

/// An article detail page
#[allow(dead_code)]
pub fn article_page(title: &str, doi: &str) -> String {
    format!(
        r#"<html><body><h1>{}</h1><p class="doi">{}</p></body></html>"#,
        escape(title),
        escape(doi)
    )
}

/// Items `first..first + count` as relative article links
#[allow(dead_code)]
pub fn articles(first: usize, count: usize) -> Vec<(String, String)> {
    (first..first + count)
        .map(|n| (format!("/articles/{n}"), format!("Article {n}")))
        .collect()
}

/// Two five-item result pages and every article page they link to
#[allow(dead_code)]
pub fn journal_fixtures() -> HashMap<String, String> {
    let mut pages = HashMap::from([
        (
            SEARCH_URL.to_string(),
            results_page(&articles(1, 5), Some("/search?q=Homelessness&page=2")),
        ),
        (PAGE_TWO_URL.to_string(), results_page(&articles(6, 5), None)),
    ]);
    for n in 1..=10 {
        pages.insert(
            format!("{HOST}/articles/{n}"),
            article_page(&format!("Article {n}"), &format!("10.1000/{n}")),
        );
    }
    pages
}

#[allow(dead_code)]
pub fn memory_cache() -> Arc<dyn CacheClient> {
    Arc::new(MemoryCacheClient::new())
}

/// Engine over fixture pages and the given cache
#[allow(dead_code)]
pub fn engine(root: &Path, fixtures: HashMap<String, String>, cache: Option<Arc<dyn CacheClient>>) -> Engine {
    let settings = EngineSettings::builder()
        .provider_root(root)
        .build()
        .expect("valid engine settings");
    Engine::new(settings, Arc::new(StaticProvider::with_fixtures(fixtures)), cache)
}
