//! Browser capability consumed by extraction operations.
//!
//! A [`Session`] is one live page that can be navigated, searched by locator,
//! clicked and read. Two backends implement it: [`ChromiumSession`] drives a
//! real browser over CDP, [`StaticSession`] parses fetched HTML without
//! running scripts.

pub mod chromium;
pub mod setup;
pub mod static_html;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

pub use chromium::{ChromiumProvider, ChromiumSession};
pub use static_html::{StaticProvider, StaticSession};

use crate::operation::{FindMethod, MethodFamily, WaitMethod};
use crate::utils::IMPLICIT_WAIT_DEFAULT_SECS;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Timed out after {seconds:.1}s waiting for {condition}")]
    Timeout { condition: String, seconds: f64 },

    #[error("Unsupported by this session: {0}")]
    Unsupported(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Failed to load {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Browser error: {0}")]
    Browser(String),
}

/// How to find elements: a find method plus its rendered selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub by: FindMethod,
    pub selector: String,
}

impl Locator {
    #[must_use]
    pub fn new(by: FindMethod, selector: impl Into<String>) -> Self {
        Self {
            by,
            selector: selector.into(),
        }
    }

    /// Equivalent CSS selector; `None` for XPath and link-text lookups
    #[must_use]
    pub fn to_css(&self) -> Option<String> {
        let selector = &self.selector;
        match self.by {
            FindMethod::CssSelector => Some(selector.clone()),
            FindMethod::TagName => Some(selector.clone()),
            FindMethod::ClassName => Some(format!(".{selector}")),
            FindMethod::Id => Some(format!("[id=\"{}\"]", css_escape(selector))),
            FindMethod::Name => Some(format!("[name=\"{}\"]", css_escape(selector))),
            FindMethod::LinkText | FindMethod::PartialLinkText | FindMethod::XPath => None,
        }
    }
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Collapse whitespace runs the way rendered text reads
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.by.key(), self.selector)
    }
}

/// Opaque reference to an element owned by the session that found it
#[derive(Clone)]
pub struct ElementHandle(Arc<dyn Any + Send + Sync>);

impl ElementHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Same underlying element handle
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementHandle({:p})", Arc::as_ptr(&self.0))
    }
}

/// Rendering state needed by explicit wait conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementState {
    pub displayed: bool,
    pub enabled: bool,
    pub selected: bool,
}

/// Result of a satisfied wait condition
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Elements(Vec<ElementHandle>),
    Satisfied,
}

/// Implicit wait and last-fetch bookkeeping shared by session backends
#[derive(Debug)]
pub struct SessionTiming {
    implicit_wait: Mutex<Duration>,
    last_fetch: Mutex<Option<Instant>>,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            implicit_wait: Mutex::new(Duration::from_secs_f64(IMPLICIT_WAIT_DEFAULT_SECS)),
            last_fetch: Mutex::new(None),
        }
    }
}

impl SessionTiming {
    #[must_use]
    pub fn implicit_wait(&self) -> Duration {
        *self.implicit_wait.lock()
    }

    pub fn set_implicit_wait(&self, wait: Duration) {
        *self.implicit_wait.lock() = wait;
    }

    #[must_use]
    pub fn last_fetch(&self) -> Option<Instant> {
        *self.last_fetch.lock()
    }

    pub fn mark_fetch(&self) {
        *self.last_fetch.lock() = Some(Instant::now());
    }
}

const IMPLICIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait Session: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<Option<String>>;

    /// One attempt at finding every element matching `locator`, under `root`
    /// or the whole page
    async fn locate(
        &self,
        root: Option<&ElementHandle>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementHandle>>;

    async fn element_state(&self, element: &ElementHandle) -> DriverResult<ElementState>;

    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn text(&self, element: &ElementHandle) -> DriverResult<String>;

    /// Lowercase tag name
    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>>;

    async fn property(&self, element: &ElementHandle, name: &str) -> DriverResult<serde_json::Value>;

    fn timing(&self) -> &SessionTiming;

    /// Release the underlying driver; the session is unusable afterwards
    async fn dispose(&self) -> DriverResult<()>;

    fn implicit_wait(&self) -> Duration {
        self.timing().implicit_wait()
    }

    fn set_implicit_wait(&self, wait: Duration) {
        self.timing().set_implicit_wait(wait);
    }

    /// When the last page fetch started, if any
    fn last_fetch(&self) -> Option<Instant> {
        self.timing().last_fetch()
    }

    /// First match, polling up to the implicit wait
    async fn find_element(
        &self,
        root: Option<&ElementHandle>,
        locator: &Locator,
    ) -> DriverResult<ElementHandle> {
        let deadline = Instant::now() + self.implicit_wait();
        loop {
            if let Some(first) = self.locate(root, locator).await?.into_iter().next() {
                return Ok(first);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::NoSuchElement(locator.to_string()));
            }
            tokio::time::sleep(IMPLICIT_POLL_INTERVAL).await;
        }
    }

    /// All matches, polling up to the implicit wait for at least one
    async fn find_elements(
        &self,
        root: Option<&ElementHandle>,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementHandle>> {
        let deadline = Instant::now() + self.implicit_wait();
        loop {
            let found = self.locate(root, locator).await?;
            if !found.is_empty() || Instant::now() >= deadline {
                return Ok(found);
            }
            tokio::time::sleep(IMPLICIT_POLL_INTERVAL).await;
        }
    }

    /// Poll a page-level condition on `locator` until it holds or `timeout`
    async fn wait_until(
        &self,
        condition: WaitMethod,
        locator: &Locator,
        timeout: Duration,
        poll_interval: Duration,
    ) -> DriverResult<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = check_condition(self, condition, locator).await? {
                return Ok(outcome);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    condition: format!("{} on {locator}", condition.key()),
                    seconds: timeout.as_secs_f64(),
                });
            }
            trace!("Waiting for {} on {locator}", condition.key());
            tokio::time::sleep(poll_interval).await;
        }
    }
}

async fn check_condition<S: Session + ?Sized>(
    session: &S,
    condition: WaitMethod,
    locator: &Locator,
) -> DriverResult<Option<WaitOutcome>> {
    let found = session.locate(None, locator).await?;

    let outcome = match condition {
        WaitMethod::PresenceOfElementLocated => found
            .into_iter()
            .next()
            .map(|first| WaitOutcome::Elements(vec![first])),

        WaitMethod::PresenceOfAllElementsLocated => {
            (!found.is_empty()).then_some(WaitOutcome::Elements(found))
        }

        WaitMethod::VisibilityOfElementLocated => match found.into_iter().next() {
            Some(first) if session.element_state(&first).await?.displayed => {
                Some(WaitOutcome::Elements(vec![first]))
            }
            _ => None,
        },

        WaitMethod::VisibilityOfAllElementsLocated => {
            if found.is_empty() {
                None
            } else {
                let mut all_displayed = true;
                for element in &found {
                    if !session.element_state(element).await?.displayed {
                        all_displayed = false;
                        break;
                    }
                }
                all_displayed.then_some(WaitOutcome::Elements(found))
            }
        }

        WaitMethod::VisibilityOfAnyElementsLocated => {
            let mut displayed = Vec::new();
            for element in found {
                if session.element_state(&element).await?.displayed {
                    displayed.push(element);
                }
            }
            (!displayed.is_empty()).then_some(WaitOutcome::Elements(displayed))
        }

        WaitMethod::ElementToBeClickable => match found.into_iter().next() {
            Some(first) => {
                let state = session.element_state(&first).await?;
                (state.displayed && state.enabled).then_some(WaitOutcome::Elements(vec![first]))
            }
            None => None,
        },

        WaitMethod::ElementLocatedToBeSelected => match found.into_iter().next() {
            Some(first) if session.element_state(&first).await?.selected => Some(WaitOutcome::Satisfied),
            _ => None,
        },

        WaitMethod::InvisibilityOfElementLocated => match found.into_iter().next() {
            None => Some(WaitOutcome::Satisfied),
            Some(first) => (!session.element_state(&first).await?.displayed).then_some(WaitOutcome::Satisfied),
        },

        WaitMethod::FrameToBeAvailableAndSwitchToIt => {
            return Err(DriverError::Unsupported(
                "frame switching is not available to extraction sessions".into(),
            ));
        }
    };

    Ok(outcome)
}

/// Opens sessions for extractors that do not already hold one
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn provision(&self, implicit_wait: Duration) -> DriverResult<Arc<dyn Session>>;
}
