use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::Browser as ChromeBrowser;
use headless_chrome::{Element, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod offline;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to start browser session: {0}")]
    SessionStart(String),
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("Page query failed: {0}")]
    Query(String),
    #[error("No live page in the browser session")]
    Detached,
    #[error("Failed to dispose browser session: {0}")]
    Disposal(String),
}

impl BrowserError {
    pub fn navigation(url: &str, reason: impl ToString) -> Self {
        BrowserError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, BrowserError::Navigation { .. })
    }

    /// Failures that leave the page in an unknown state: a stuck load, a
    /// query against a dead target, or a session that lost its page.
    pub fn is_page_failure(&self) -> bool {
        matches!(
            self,
            BrowserError::Navigation { .. } | BrowserError::Query(_) | BrowserError::Detached
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitMode {
    /// Return once the document has been navigated to.
    DomReady,
    /// Also wait for the page to finish loading its subresources.
    NetworkIdle,
}

/// Handle to an element of the currently loaded page. Handles are only valid
/// until the next navigation of the page that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(u32);

impl ElementRef {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Typed queries against one live page.
pub trait PageQuery {
    fn navigate(&mut self, url: &str, wait: WaitMode) -> Result<(), BrowserError>;

    fn title(&mut self) -> Result<String, BrowserError>;

    /// All elements matching `selector`, in document order, searched below
    /// `scope` or in the whole document.
    fn query_all(
        &mut self,
        scope: Option<ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError>;

    fn next_sibling(&mut self, element: ElementRef) -> Result<Option<ElementRef>, BrowserError>;

    fn children(&mut self, element: ElementRef) -> Result<Vec<ElementRef>, BrowserError>;

    fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;

    fn inner_text(&mut self, element: ElementRef) -> Result<String, BrowserError>;

    fn close(&mut self) -> Result<(), BrowserError>;

    fn query(
        &mut self,
        scope: Option<ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, BrowserError> {
        Ok(self.query_all(scope, selector)?.into_iter().next())
    }

    /// First candidate whose trimmed text equals `text`.
    fn find_by_text(
        &mut self,
        candidates: &[ElementRef],
        text: &str,
    ) -> Result<Option<ElementRef>, BrowserError> {
        for &candidate in candidates {
            if self.inner_text(candidate)?.trim() == text {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn rows(&mut self, table: ElementRef) -> Result<Vec<ElementRef>, BrowserError> {
        self.query_all(Some(table), "tr")
    }

    fn cells(&mut self, row: ElementRef) -> Result<Vec<ElementRef>, BrowserError> {
        self.query_all(Some(row), "td, th")
    }
}

/// Starts a browser process and hands back its single page.
pub trait Launcher {
    type Page: PageQuery;

    fn launch(&self) -> Result<Self::Page, BrowserError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub idle_browser_timeout_secs: u64,
    pub navigation_timeout_ms: u64,
    /// Extra quiet period after `document.readyState` reports complete.
    pub idle_settle_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            idle_browser_timeout_secs: 300,
            navigation_timeout_ms: 30000,
            idle_settle_ms: 500,
        }
    }
}

pub struct ChromeLauncher {
    config: LaunchConfig,
}

impl ChromeLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }
}

impl Launcher for ChromeLauncher {
    type Page = ChromePage;

    fn launch(&self) -> Result<ChromePage, BrowserError> {
        let launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .window_size(Some((self.config.window_width, self.config.window_height)))
            .idle_browser_timeout(Duration::from_secs(self.config.idle_browser_timeout_secs))
            .build()
            .map_err(|e| BrowserError::SessionStart(e.to_string()))?;

        let browser = ChromeBrowser::new(launch_options)
            .map_err(|e| BrowserError::SessionStart(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::SessionStart(e.to_string()))?;
        tab.set_default_timeout(Duration::from_millis(self.config.navigation_timeout_ms));

        if self.config.headless {
            info!("Headless browser launched successfully");
        } else {
            info!("Browser launched successfully");
        }

        Ok(ChromePage {
            _browser: browser,
            tab,
            navigation_timeout: Duration::from_millis(self.config.navigation_timeout_ms),
            idle_settle: Duration::from_millis(self.config.idle_settle_ms),
        })
    }
}

/// One Chrome process and its only tab. Dropping the page kills the process.
pub struct ChromePage {
    _browser: ChromeBrowser,
    tab: Arc<Tab>,
    navigation_timeout: Duration,
    idle_settle: Duration,
}

impl ChromePage {
    fn element(&self, element: ElementRef) -> Result<Element<'_>, BrowserError> {
        Element::new(&self.tab, element.raw()).map_err(query_error)
    }

    fn wait_for_idle(&self, url: &str) -> Result<(), BrowserError> {
        let deadline = Instant::now() + self.navigation_timeout;
        loop {
            let state = self
                .tab
                .evaluate("document.readyState", false)
                .map_err(|e| BrowserError::navigation(url, e))?;
            if state.value.as_ref().and_then(|v| v.as_str()) == Some("complete") {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::navigation(url, "page never finished loading"));
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        std::thread::sleep(self.idle_settle);
        Ok(())
    }
}

impl PageQuery for ChromePage {
    fn navigate(&mut self, url: &str, wait: WaitMode) -> Result<(), BrowserError> {
        info!("Navigating to: {}", url);

        self.tab
            .navigate_to(url)
            .map_err(|e| BrowserError::navigation(url, e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| BrowserError::navigation(url, e))?;

        if wait == WaitMode::NetworkIdle {
            self.wait_for_idle(url)?;
        }

        debug!("Navigation complete");
        Ok(())
    }

    fn title(&mut self) -> Result<String, BrowserError> {
        self.tab.get_title().map_err(query_error)
    }

    fn query_all(
        &mut self,
        scope: Option<ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        let found = match scope {
            Some(scope) => self.element(scope)?.find_elements(selector),
            None => self.tab.find_elements(selector),
        };
        match found {
            Ok(elements) => Ok(elements
                .iter()
                .map(|element| ElementRef::new(element.node_id))
                .collect()),
            Err(e) if e.is::<NoElementFound>() => Ok(Vec::new()),
            Err(e) => Err(query_error(e)),
        }
    }

    fn next_sibling(&mut self, element: ElementRef) -> Result<Option<ElementRef>, BrowserError> {
        let sibling = self
            .element(element)?
            .call_js_fn("function() { return this.nextElementSibling; }", vec![], false)
            .map_err(query_error)?;

        match sibling.object_id {
            Some(object_id) => {
                let node = self
                    .tab
                    .call_method(DOM::RequestNode { object_id })
                    .map_err(query_error)?;
                Ok(Some(ElementRef::new(node.node_id)))
            }
            None => Ok(None),
        }
    }

    fn children(&mut self, element: ElementRef) -> Result<Vec<ElementRef>, BrowserError> {
        self.query_all(Some(element), ":scope > *")
    }

    fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        self.element(element)?
            .get_attribute_value(name)
            .map_err(query_error)
    }

    fn inner_text(&mut self, element: ElementRef) -> Result<String, BrowserError> {
        self.element(element)?.get_inner_text().map_err(query_error)
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        match self.tab.close(true) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Failed to close tab: {}", e);
                Err(BrowserError::Disposal(e.to_string()))
            }
        }
    }
}

fn query_error(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Query(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_config_default() {
        let config = LaunchConfig::default();
        assert!(config.headless);
        assert_eq!(config.navigation_timeout_ms, 30000);
    }

    #[test]
    fn test_launch_config_partial_json() {
        let config: LaunchConfig = serde_json::from_str(r#"{"headless": false}"#).unwrap();
        assert!(!config.headless);
        assert_eq!(config.window_width, 1920);
    }

    #[test]
    fn test_error_classification() {
        assert!(BrowserError::navigation("https://example.com", "timeout").is_navigation());
        assert!(BrowserError::Query("stale".into()).is_page_failure());
        assert!(BrowserError::Detached.is_page_failure());
        assert!(!BrowserError::SessionStart("no chrome".into()).is_page_failure());
    }
}
