//! In-memory site served through the same [`PageQuery`] surface as Chrome.
//!
//! Pages are plain HTML parsed with `scraper`. Faults can be scheduled per URL
//! so that navigation, query and launch failures replay deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scraper::{Html, Selector};
use tracing::debug;

use crate::{BrowserError, ElementRef, Launcher, PageQuery, WaitMode};

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, String>,
    navigation_faults: HashMap<String, u32>,
    query_faults: HashMap<String, u32>,
    selector_faults: HashMap<(String, String), u32>,
    hidden: HashMap<(String, String), u32>,
    launch_budget: Option<u32>,
    launches: u32,
    history: Vec<(String, WaitMode)>,
    selector_reads: HashMap<(String, String), u32>,
}

/// Shared definition of the site. Clones share pages, faults and counters,
/// so every page launched from it observes the same schedule.
#[derive(Clone, Default)]
pub struct StaticSite {
    state: Arc<Mutex<SiteState>>,
}

impl StaticSite {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.state().pages.insert(url.to_string(), html.to_string());
        self
    }

    /// The next `times` navigations to `url` fail.
    pub fn fail_navigation(&self, url: &str, times: u32) {
        self.state().navigation_faults.insert(url.to_string(), times);
    }

    /// The next `times` queries against the loaded `url` fail.
    pub fn fail_queries(&self, url: &str, times: u32) {
        self.state().query_faults.insert(url.to_string(), times);
    }

    /// The next `times` lookups of `selector` on the loaded `url` fail, while
    /// other queries keep working.
    pub fn fail_selector(&self, url: &str, selector: &str, times: u32) {
        self.state()
            .selector_faults
            .insert((url.to_string(), selector.to_string()), times);
    }

    /// `selector` matches nothing on `url` for the next `reads` lookups.
    pub fn hide_until(&self, url: &str, selector: &str, reads: u32) {
        self.state()
            .hidden
            .insert((url.to_string(), selector.to_string()), reads);
    }

    /// Only `launches` more browser starts succeed; later ones fail.
    pub fn limit_launches(&self, launches: u32) {
        self.state().launch_budget = Some(launches);
    }

    pub fn launches(&self) -> u32 {
        self.state().launches
    }

    /// Navigation attempts made to `url`, successful or not.
    pub fn navigations(&self, url: &str) -> usize {
        self.state()
            .history
            .iter()
            .filter(|(visited, _)| visited == url)
            .count()
    }

    pub fn history(&self) -> Vec<(String, WaitMode)> {
        self.state().history.clone()
    }

    /// Lookups of `selector` made while `url` was loaded.
    pub fn selector_reads(&self, url: &str, selector: &str) -> u32 {
        self.state()
            .selector_reads
            .get(&(url.to_string(), selector.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl Launcher for StaticSite {
    type Page = StaticPage;

    fn launch(&self) -> Result<StaticPage, BrowserError> {
        let mut state = self.state();
        state.launches += 1;
        if let Some(budget) = state.launch_budget.as_mut() {
            if *budget == 0 {
                return Err(BrowserError::SessionStart(
                    "offline launch budget exhausted".to_string(),
                ));
            }
            *budget -= 1;
        }
        debug!("Offline page launched ({} launches)", state.launches);
        Ok(StaticPage {
            site: self.clone(),
            document: None,
            closed: false,
        })
    }
}

struct LoadedDocument {
    url: String,
    html: Html,
    handles: Vec<ego_tree::NodeId>,
}

impl LoadedDocument {
    fn register(&mut self, id: ego_tree::NodeId) -> ElementRef {
        if let Some(index) = self.handles.iter().position(|known| *known == id) {
            return ElementRef::new(index as u32);
        }
        self.handles.push(id);
        ElementRef::new((self.handles.len() - 1) as u32)
    }

    fn resolve(&self, element: ElementRef) -> Result<scraper::ElementRef<'_>, BrowserError> {
        self.handles
            .get(element.raw() as usize)
            .and_then(|id| self.html.tree.get(*id))
            .and_then(scraper::ElementRef::wrap)
            .ok_or_else(|| BrowserError::Query(format!("stale element handle {:?}", element)))
    }
}

pub struct StaticPage {
    site: StaticSite,
    document: Option<LoadedDocument>,
    closed: bool,
}

impl StaticPage {
    fn document(&mut self) -> Result<&mut LoadedDocument, BrowserError> {
        if self.closed {
            return Err(BrowserError::Detached);
        }
        self.document
            .as_mut()
            .ok_or_else(|| BrowserError::Query("no document loaded".to_string()))
    }

    fn check_query_fault(&mut self) -> Result<(), BrowserError> {
        let url = self.document()?.url.clone();
        let mut state = self.site.state();
        if let Some(remaining) = state.query_faults.get_mut(&url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::Query(format!("injected query failure on {}", url)));
            }
        }
        Ok(())
    }

    fn is_hidden(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let key = (self.document()?.url.clone(), selector.to_string());
        let mut state = self.site.state();
        *state.selector_reads.entry(key.clone()).or_insert(0) += 1;
        if let Some(remaining) = state.selector_faults.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::Query(format!(
                    "injected failure reading {} on {}",
                    key.1, key.0
                )));
            }
        }
        match state.hidden.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl PageQuery for StaticPage {
    fn navigate(&mut self, url: &str, wait: WaitMode) -> Result<(), BrowserError> {
        if self.closed {
            return Err(BrowserError::Detached);
        }

        let source = {
            let mut state = self.site.state();
            state.history.push((url.to_string(), wait));
            if let Some(remaining) = state.navigation_faults.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BrowserError::navigation(url, "injected navigation failure"));
                }
            }
            state.pages.get(url).cloned()
        };

        let source = source.ok_or_else(|| BrowserError::navigation(url, "page not found"))?;
        self.document = Some(LoadedDocument {
            url: url.to_string(),
            html: Html::parse_document(&source),
            handles: Vec::new(),
        });
        Ok(())
    }

    fn title(&mut self) -> Result<String, BrowserError> {
        self.check_query_fault()?;
        let document = self.document()?;
        let selector = parse_selector("title")?;
        Ok(document
            .html
            .select(&selector)
            .next()
            .map(collapse_text)
            .unwrap_or_default())
    }

    fn query_all(
        &mut self,
        scope: Option<ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        self.check_query_fault()?;
        if self.is_hidden(selector)? {
            return Ok(Vec::new());
        }

        let parsed = parse_selector(selector)?;
        let document = self.document()?;
        let ids: Vec<ego_tree::NodeId> = match scope {
            Some(scope) => {
                let scope = document.resolve(scope)?;
                scope
                    .select(&parsed)
                    .filter(|found| found.id() != scope.id())
                    .map(|found| found.id())
                    .collect()
            }
            None => document.html.select(&parsed).map(|found| found.id()).collect(),
        };
        Ok(ids.into_iter().map(|id| document.register(id)).collect())
    }

    fn next_sibling(&mut self, element: ElementRef) -> Result<Option<ElementRef>, BrowserError> {
        self.check_query_fault()?;
        let document = self.document()?;
        let sibling = document
            .resolve(element)?
            .next_siblings()
            .find_map(scraper::ElementRef::wrap)
            .map(|sibling| sibling.id());
        Ok(sibling.map(|id| document.register(id)))
    }

    fn children(&mut self, element: ElementRef) -> Result<Vec<ElementRef>, BrowserError> {
        self.check_query_fault()?;
        let document = self.document()?;
        let ids: Vec<ego_tree::NodeId> = document
            .resolve(element)?
            .children()
            .filter_map(scraper::ElementRef::wrap)
            .map(|child| child.id())
            .collect();
        Ok(ids.into_iter().map(|id| document.register(id)).collect())
    }

    fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        self.check_query_fault()?;
        let document = self.document()?;
        Ok(document
            .resolve(element)?
            .value()
            .attr(name)
            .map(str::to_string))
    }

    fn inner_text(&mut self, element: ElementRef) -> Result<String, BrowserError> {
        self.check_query_fault()?;
        let document = self.document()?;
        Ok(collapse_text(document.resolve(element)?))
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        self.closed = true;
        self.document = None;
        Ok(())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, BrowserError> {
    Selector::parse(selector)
        .map_err(|e| BrowserError::Query(format!("invalid selector {}: {}", selector, e)))
}

fn collapse_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
