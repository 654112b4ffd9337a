//! CDP-backed session driving a real Chrome page.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::setup::{apply_stealth, launch_browser};
use super::{
    DriverError, DriverResult, ElementHandle, ElementState, Locator, Session, SessionProvider,
    SessionTiming, normalize_text,
};
use crate::operation::FindMethod;
use crate::utils::NAVIGATION_TIMEOUT_SECS;

const ROOT_MARKER_ATTRIBUTE: &str = "data-contextualize-root";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

const ELEMENT_STATE_JS: &str = r"function() {
    const style = window.getComputedStyle(this);
    const rect = this.getBoundingClientRect();
    return JSON.stringify({
        displayed: style.display !== 'none' && style.visibility !== 'hidden'
            && (rect.width > 0 || rect.height > 0),
        enabled: !this.disabled,
        selected: !!(this.selected || this.checked),
    });
}";

#[derive(Deserialize)]
struct RenderedState {
    displayed: bool,
    enabled: bool,
    selected: bool,
}

struct ChromiumElement(Element);

fn element_of(handle: &ElementHandle) -> DriverResult<&Element> {
    handle
        .downcast_ref::<ChromiumElement>()
        .map(|e| &e.0)
        .ok_or_else(|| DriverError::Browser("element belongs to another session".into()))
}

fn browser_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

/// XPath string literal for arbitrary text
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|part| format!("'{part}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Relative XPath for link-text lookups
fn link_text_xpath(locator: &Locator) -> Option<String> {
    let text = xpath_literal(&locator.selector);
    match locator.by {
        FindMethod::LinkText => Some(format!(".//a[normalize-space(.)={text}]")),
        FindMethod::PartialLinkText => Some(format!(".//a[contains(normalize-space(.), {text})]")),
        _ => None,
    }
}

pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: parking_lot::Mutex<Option<JoinHandle<()>>>,
    profile_dir: PathBuf,
    timing: SessionTiming,
}

impl ChromiumSession {
    /// Launch a browser and open a blank page
    pub async fn launch(headless: bool) -> anyhow::Result<Self> {
        let (browser, handler, profile_dir) = launch_browser(headless, None).await?;
        let page = browser.new_page("about:blank").await?;
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler: parking_lot::Mutex::new(Some(handler)),
            profile_dir,
            timing: SessionTiming::default(),
        })
    }

    async fn wait_until_ready(&self) {
        let deadline = Instant::now() + Duration::from_secs(NAVIGATION_TIMEOUT_SECS);
        while Instant::now() < deadline {
            match self.page.evaluate("document.readyState").await {
                Ok(result) => {
                    if result.into_value::<String>().is_ok_and(|state| state == "complete") {
                        return;
                    }
                }
                Err(e) => debug!("readyState check failed: {e}"),
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        warn!("Page did not reach readyState=complete before timeout");
    }

    async fn xpath_under(&self, root: Option<&ElementHandle>, xpath: &str) -> DriverResult<Vec<Element>> {
        let relative = xpath.starts_with('.');
        let Some(root) = root.filter(|_| relative) else {
            let absolute = xpath.strip_prefix('.').unwrap_or(xpath);
            return self.page.find_xpaths(absolute).await.or_else(empty_on_missing);
        };

        // Scope the lookup by tagging the root element for the duration of the query
        let element = element_of(root)?;
        let marker = uuid::Uuid::new_v4().simple().to_string();
        element
            .call_js_fn(
                format!("function() {{ this.setAttribute('{ROOT_MARKER_ATTRIBUTE}', '{marker}'); }}"),
                false,
            )
            .await
            .map_err(browser_error)?;

        let scoped = format!(
            "//*[@{ROOT_MARKER_ATTRIBUTE}='{marker}']{}",
            xpath.trim_start_matches('.')
        );
        let found = self.page.find_xpaths(scoped).await.or_else(empty_on_missing);

        if let Err(e) = element
            .call_js_fn(
                format!("function() {{ this.removeAttribute('{ROOT_MARKER_ATTRIBUTE}'); }}"),
                false,
            )
            .await
        {
            debug!("Failed to clear root marker: {e}");
        }
        found
    }
}

/// CDP reports "no node found" as an error; a lookup with no matches is empty
fn empty_on_missing(e: chromiumoxide::error::CdpError) -> DriverResult<Vec<Element>> {
    let message = e.to_string();
    if message.contains("Could not find node") || message.contains("No node") {
        Ok(Vec::new())
    } else {
        Err(browser_error(message))
    }
}

#[async_trait]
impl Session for ChromiumSession {
    fn name(&self) -> &'static str {
        "chromium"
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.timing.mark_fetch();
        let navigation_error = |e: chromiumoxide::error::CdpError| DriverError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        };
        self.page.goto(url).await.map_err(navigation_error)?;
        self.page.wait_for_navigation().await.map_err(navigation_error)?;
        self.wait_until_ready().await;
        if let Err(e) = apply_stealth(&self.page).await {
            debug!("{e:#}");
        }
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<Option<String>> {
        self.page.url().await.map_err(browser_error)
    }

    async fn locate(
        &self,
        root: Option<&ElementHandle>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementHandle>> {
        let found = if let Some(css) = locator.to_css() {
            match root {
                Some(root) => element_of(root)?
                    .find_elements(css)
                    .await
                    .or_else(empty_on_missing)?,
                None => self.page.find_elements(css).await.or_else(empty_on_missing)?,
            }
        } else if let Some(xpath) = link_text_xpath(locator) {
            self.xpath_under(root, &xpath).await?
        } else {
            self.xpath_under(root, &locator.selector).await?
        };

        Ok(found
            .into_iter()
            .map(|element| ElementHandle::new(ChromiumElement(element)))
            .collect())
    }

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState> {
        let returns = element_of(element)?
            .call_js_fn(ELEMENT_STATE_JS, false)
            .await
            .map_err(browser_error)?;
        let raw = returns
            .result
            .value
            .and_then(|value| value.as_str().map(str::to_string))
            .ok_or_else(|| DriverError::Browser("element state unavailable".into()))?;
        let state: RenderedState = serde_json::from_str(&raw).map_err(browser_error)?;
        Ok(ElementState {
            displayed: state.displayed,
            enabled: state.enabled,
            selected: state.selected,
        })
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        element_of(element)?.click().await.map_err(browser_error)?;
        Ok(())
    }

    async fn text(&self, element: &ElementHandle) -> DriverResult<String> {
        let text = element_of(element)?.inner_text().await.map_err(browser_error)?;
        Ok(normalize_text(&text.unwrap_or_default()))
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        let tag = element_of(element)?
            .property("tagName")
            .await
            .map_err(browser_error)?;
        Ok(tag
            .and_then(|value| value.as_str().map(str::to_ascii_lowercase))
            .unwrap_or_default())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>> {
        element_of(element)?.attribute(name).await.map_err(browser_error)
    }

    async fn property(&self, element: &ElementHandle, name: &str) -> DriverResult<serde_json::Value> {
        let value = element_of(element)?.property(name).await.map_err(browser_error)?;
        Ok(value.unwrap_or(serde_json::Value::Null))
    }

    fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    async fn dispose(&self) -> DriverResult<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let mut failures = Vec::new();
        if let Err(e) = browser.close().await {
            failures.push(format!("close: {e}"));
        }
        if let Err(e) = browser.wait().await {
            failures.push(format!("wait: {e}"));
        }
        if let Some(handler) = self.handler.lock().take() {
            handler.abort();
        }
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            debug!("Failed to remove profile {}: {e}", self.profile_dir.display());
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DriverError::Browser(failures.join("; ")))
        }
    }
}

/// Launches one browser per provisioned session
#[derive(Debug, Clone, Copy)]
pub struct ChromiumProvider {
    headless: bool,
}

impl ChromiumProvider {
    #[must_use]
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

impl Default for ChromiumProvider {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SessionProvider for ChromiumProvider {
    async fn provision(&self, implicit_wait: Duration) -> DriverResult<Arc<dyn Session>> {
        let session = ChromiumSession::launch(self.headless)
            .await
            .map_err(|e| DriverError::Browser(format!("{e:#}")))?;
        session.set_implicit_wait(implicit_wait);
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_literals_handle_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal(r#"it's "quoted""#),
            r#"concat('it', "'", 's "quoted"')"#
        );
    }

    #[test]
    fn link_text_becomes_relative_xpath() {
        let exact = Locator::new(FindMethod::LinkText, "Next");
        assert_eq!(
            link_text_xpath(&exact).as_deref(),
            Some(".//a[normalize-space(.)='Next']")
        );
        let partial = Locator::new(FindMethod::PartialLinkText, "Ne");
        assert_eq!(
            link_text_xpath(&partial).as_deref(),
            Some(".//a[contains(normalize-space(.), 'Ne')]")
        );
        assert!(link_text_xpath(&Locator::new(FindMethod::XPath, "//a")).is_none());
    }
}
