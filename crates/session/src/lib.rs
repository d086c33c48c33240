use browser::{BrowserError, Launcher, PageQuery, WaitMode};
use tracing::{debug, info, warn};

/// The single browser/page pair a crawl runs through.
///
/// Recovery never repairs a page in place: `teardown_and_reacquire` drops the
/// whole page and launches a new one, so nothing from the broken page leaks
/// into later operations.
pub struct BrowserSession<L: Launcher> {
    launcher: L,
    page: Option<L::Page>,
    current_url: Option<String>,
    launches: u32,
    recoveries: u32,
}

impl<L: Launcher> BrowserSession<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            page: None,
            current_url: None,
            launches: 0,
            recoveries: 0,
        }
    }

    /// Starts a fresh browser and page, replacing any live one.
    pub fn acquire(&mut self) -> Result<(), BrowserError> {
        if self.page.is_some() {
            self.dispose();
        }

        info!("Starting browser session...");
        let page = self.launcher.launch()?;
        self.page = Some(page);
        self.launches += 1;
        debug!("Browser session acquired (launch #{})", self.launches);
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.page.is_some()
    }

    pub fn navigate(&mut self, url: &str, wait: WaitMode) -> Result<(), BrowserError> {
        self.current_url = None;
        self.page()?.navigate(url, wait)?;
        self.current_url = Some(url.to_string());
        Ok(())
    }

    /// URL of the last navigation that completed on the live page.
    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn page(&mut self) -> Result<&mut L::Page, BrowserError> {
        self.page.as_mut().ok_or(BrowserError::Detached)
    }

    pub fn teardown_and_reacquire(&mut self) -> Result<(), BrowserError> {
        warn!("Recreating browser session");
        self.dispose();
        self.recoveries += 1;
        self.acquire()
    }

    /// Releases the page and browser. Safe to call repeatedly, or before
    /// anything was acquired.
    pub fn dispose(&mut self) {
        self.current_url = None;
        if let Some(mut page) = self.page.take() {
            if let Err(e) = page.close() {
                warn!("Ignoring error while disposing browser session: {}", e);
            }
            debug!("Browser session disposed");
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }
}

impl<L: Launcher> Drop for BrowserSession<L> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser::offline::StaticSite;

    const URL: &str = "https://example.com/";

    fn site() -> StaticSite {
        StaticSite::new().page(URL, "<html><head><title>Home</title></head></html>")
    }

    #[test]
    fn test_session_creation() {
        let mut session = BrowserSession::new(site());
        assert!(!session.is_live());

        session.acquire().unwrap();
        assert!(session.is_live());
        assert_eq!(session.launches(), 1);
    }

    #[test]
    fn test_navigate_without_page_is_detached() {
        let mut session = BrowserSession::new(site());
        assert!(matches!(
            session.navigate(URL, WaitMode::DomReady),
            Err(BrowserError::Detached)
        ));
        assert_eq!(session.current_url(), None);
    }

    #[test]
    fn test_navigate_tracks_current_url() {
        let mut session = BrowserSession::new(site());
        session.acquire().unwrap();

        session.navigate(URL, WaitMode::DomReady).unwrap();
        assert_eq!(session.current_url(), Some(URL));

        assert!(session
            .navigate("https://example.com/missing", WaitMode::DomReady)
            .is_err());
        assert_eq!(session.current_url(), None);
    }

    #[test]
    fn test_teardown_and_reacquire_replaces_page() {
        let site = site();
        let mut session = BrowserSession::new(site.clone());
        session.acquire().unwrap();
        session.navigate(URL, WaitMode::DomReady).unwrap();

        session.teardown_and_reacquire().unwrap();
        assert!(session.is_live());
        assert_eq!(session.current_url(), None);
        assert_eq!(session.recoveries(), 1);
        assert_eq!(site.launches(), 2);
    }

    #[test]
    fn test_reacquire_failure_leaves_session_empty() {
        let site = site();
        site.limit_launches(1);
        let mut session = BrowserSession::new(site);
        session.acquire().unwrap();

        let err = session.teardown_and_reacquire().unwrap_err();
        assert!(matches!(err, BrowserError::SessionStart(_)));
        assert!(!session.is_live());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut session = BrowserSession::new(site());
        session.dispose();
        session.acquire().unwrap();
        session.dispose();
        session.dispose();
        assert!(!session.is_live());
    }
}
