//! Script-free session over fetched HTML.
//!
//! Pages come from preloaded fixtures or plain HTTP GETs and are parsed with
//! `scraper`. Element handles carry their document so they stay valid after
//! the session moves on. Clicking an element with an `href` navigates to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ego_tree::NodeId;
use log::debug;
use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};

use super::{
    DriverError, DriverResult, ElementHandle, ElementState, Locator, Session, SessionProvider,
    SessionTiming, normalize_text,
};
use crate::operation::FindMethod;
use crate::utils::{BROWSER_USER_AGENT, normalize_url, resolve_url};

#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    html: Arc<str>,
}

/// Element inside a parsed document
#[derive(Debug, Clone)]
struct StaticElement {
    page: LoadedPage,
    node: NodeId,
}

impl StaticElement {
    /// Re-parse the owning document and run `f` on this element
    fn with_element<T>(&self, f: impl FnOnce(ElementRef<'_>) -> T) -> DriverResult<T> {
        let document = Html::parse_document(&self.page.html);
        let node = document
            .tree
            .get(self.node)
            .and_then(ElementRef::wrap)
            .ok_or_else(|| DriverError::Browser(format!("stale element {:?}", self.node)))?;
        Ok(f(node))
    }
}

fn element_of(handle: &ElementHandle) -> DriverResult<&StaticElement> {
    handle
        .downcast_ref::<StaticElement>()
        .ok_or_else(|| DriverError::Browser("element belongs to another session type".into()))
}

fn parse_selector(css: &str) -> DriverResult<Selector> {
    Selector::parse(css).map_err(|e| DriverError::InvalidSelector(format!("{css}: {e}")))
}

/// Node ids matching `locator` under `root`, or the whole document
fn select_nodes(html: &str, root: Option<NodeId>, locator: &Locator) -> DriverResult<Vec<NodeId>> {
    let document = Html::parse_document(html);
    let scope = match root {
        Some(id) => Some(
            document
                .tree
                .get(id)
                .and_then(ElementRef::wrap)
                .ok_or_else(|| DriverError::Browser(format!("stale element {id:?}")))?,
        ),
        None => None,
    };

    let candidates: Vec<ElementRef<'_>> = match (locator.by, locator.to_css()) {
        (_, Some(css)) => {
            let selector = parse_selector(&css)?;
            match scope {
                Some(element) => element.select(&selector).collect(),
                None => document.select(&selector).collect(),
            }
        }
        (FindMethod::LinkText | FindMethod::PartialLinkText, None) => {
            let anchors = parse_selector("a")?;
            let wanted = normalize_text(&locator.selector);
            let exact = locator.by == FindMethod::LinkText;
            let links: Vec<ElementRef<'_>> = match scope {
                Some(element) => element.select(&anchors).collect(),
                None => document.select(&anchors).collect(),
            };
            links
                .into_iter()
                .filter(|link| {
                    let text = normalize_text(&link.text().collect::<String>());
                    if exact { text == wanted } else { text.contains(&wanted) }
                })
                .collect()
        }
        _ => {
            return Err(DriverError::Unsupported(format!(
                "static sessions cannot evaluate {locator}"
            )));
        }
    };

    Ok(candidates.into_iter().map(|element| element.id()).collect())
}

fn is_displayed(element: ElementRef<'_>) -> bool {
    let hidden_style = element
        .value()
        .attr("style")
        .map(|style| style.replace(' ', "").to_ascii_lowercase())
        .is_some_and(|style| style.contains("display:none") || style.contains("visibility:hidden"));
    element.value().attr("hidden").is_none() && !hidden_style
}

/// Fetches pages over HTTP unless a fixture for the URL is loaded
pub struct StaticSession {
    client: reqwest::Client,
    fixtures: Arc<HashMap<String, String>>,
    current: Mutex<Option<LoadedPage>>,
    timing: SessionTiming,
}

impl StaticSession {
    #[must_use]
    pub fn new(client: reqwest::Client, fixtures: Arc<HashMap<String, String>>) -> Self {
        Self {
            client,
            fixtures,
            current: Mutex::new(None),
            timing: SessionTiming::default(),
        }
    }

    /// Session serving only the given pages, keyed by URL
    #[must_use]
    pub fn with_fixtures(fixtures: HashMap<String, String>) -> Self {
        let fixtures = fixtures
            .into_iter()
            .map(|(url, html)| (normalize_url(&url), html))
            .collect();
        Self::new(reqwest::Client::new(), Arc::new(fixtures))
    }

    async fn load(&self, url: &str) -> DriverResult<String> {
        if let Some(html) = self.fixtures.get(&normalize_url(url)) {
            return Ok(html.clone());
        }
        // Fixture-backed sessions never reach the network
        if !self.fixtures.is_empty() {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "no fixture loaded for url".into(),
            });
        }
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        response.text().await.map_err(|e| DriverError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn current_page(&self) -> DriverResult<LoadedPage> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| DriverError::Browser("no page loaded".into()))
    }
}

#[async_trait]
impl Session for StaticSession {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.timing.mark_fetch();
        let html = self.load(url).await?;
        debug!("Loaded {url} ({} bytes)", html.len());
        *self.current.lock() = Some(LoadedPage {
            url: url.to_string(),
            html: Arc::from(html),
        });
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<Option<String>> {
        Ok(self.current.lock().as_ref().map(|page| page.url.clone()))
    }

    async fn locate(
        &self,
        root: Option<&ElementHandle>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementHandle>> {
        let (page, root_node) = match root {
            Some(handle) => {
                let element = element_of(handle)?;
                (element.page.clone(), Some(element.node))
            }
            None => (self.current_page()?, None),
        };
        let nodes = select_nodes(&page.html, root_node, locator)?;
        Ok(nodes
            .into_iter()
            .map(|node| {
                ElementHandle::new(StaticElement {
                    page: page.clone(),
                    node,
                })
            })
            .collect())
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        element_of(element)?.with_element(|e| ElementState {
            displayed: is_displayed(e),
            enabled: e.value().attr("disabled").is_none(),
            selected: e.value().attr("selected").is_some() || e.value().attr("checked").is_some(),
        })
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let element = element_of(element)?;
        let href = element.with_element(|e| e.value().attr("href").map(str::to_string))?;
        match href {
            Some(href) => {
                let target = resolve_url(&href, &element.page.url);
                self.navigate(&target).await
            }
            None => {
                debug!("Click on element without href has no effect in a static session");
                Ok(())
            }
        }
    }

    async fn text(&self, element: &ElementHandle) -> DriverResult<String> {
        element_of(element)?.with_element(|e| normalize_text(&e.text().collect::<String>()))
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        element_of(element)?.with_element(|e| e.value().name().to_ascii_lowercase())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>> {
        element_of(element)?.with_element(|e| e.value().attr(name).map(str::to_string))
    }

    async fn property(&self, element: &ElementHandle, name: &str) -> DriverResult<serde_json::Value> {
        use serde_json::Value as Json;

        let element = element_of(element)?;
        let base = element.page.url.clone();
        element.with_element(|e| match name {
            "innerHTML" => Json::String(e.inner_html()),
            "outerHTML" => Json::String(e.html()),
            "textContent" => Json::String(e.text().collect()),
            "innerText" => Json::String(normalize_text(&e.text().collect::<String>())),
            "tagName" => Json::String(e.value().name().to_ascii_uppercase()),
            "className" => Json::String(e.value().attr("class").unwrap_or_default().to_string()),
            "href" | "src" => e
                .value()
                .attr(name)
                .map_or(Json::Null, |raw| Json::String(resolve_url(raw, &base))),
            "checked" | "selected" | "disabled" | "hidden" => Json::Bool(e.value().attr(name).is_some()),
            other => e
                .value()
                .attr(other)
                .map_or(Json::Null, |raw| Json::String(raw.to_string())),
        })
    }

    fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    async fn dispose(&self) -> DriverResult<()> {
        *self.current.lock() = None;
        Ok(())
    }
}

/// Provides [`StaticSession`]s sharing one HTTP client and fixture set
#[derive(Clone)]
pub struct StaticProvider {
    client: reqwest::Client,
    fixtures: Arc<HashMap<String, String>>,
}

impl StaticProvider {
    /// Sessions that fetch every page over HTTP
    #[must_use]
    pub fn http() -> Self {
        Self {
            client: reqwest::Client::new(),
            fixtures: Arc::new(HashMap::new()),
        }
    }

    /// Sessions serving only the given pages
    #[must_use]
    pub fn with_fixtures(fixtures: HashMap<String, String>) -> Self {
        let fixtures = fixtures
            .into_iter()
            .map(|(url, html)| (normalize_url(&url), html))
            .collect();
        Self {
            client: reqwest::Client::new(),
            fixtures: Arc::new(fixtures),
        }
    }
}

#[async_trait]
impl SessionProvider for StaticProvider {
    async fn provision(&self, implicit_wait: std::time::Duration) -> DriverResult<Arc<dyn Session>> {
        let session = StaticSession::new(self.client.clone(), Arc::clone(&self.fixtures));
        session.set_implicit_wait(implicit_wait);
        Ok(Arc::new(session))
    }
}
