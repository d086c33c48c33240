use browser::BrowserError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("Catalog footer not found on {url}")]
    CatalogNotFound { url: String },
    #[error("Couldn't find subpage link on {url}")]
    SubpageLinkNotFound { url: String },
    #[error("Couldn't find title name in page title: {page_title}")]
    TitleNameNotFound { page_title: String },
    #[error("Couldn't find submenu '{label}' on {url}")]
    SeriesMenuNotFound { label: String, url: String },
    #[error("Couldn't find list under submenu '{label}' on {url}")]
    SeriesListNotFound { label: String, url: String },
    #[error("Couldn't find series url in submenu '{label}' on {url}")]
    SeriesLinkMissing { label: String, url: String },
    #[error("Series '{series}' has a row with {columns} columns, expected name, type and release date")]
    MalformedEpisodeRow { series: String, columns: usize },
    #[error("Video source not found on {url}")]
    VideoSourceNotFound { url: String },
    #[error("Invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Result sink failed: {0}")]
    Sink(#[source] anyhow::Error),
}

impl WalkError {
    /// Errors that end the whole run instead of the current title or series.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WalkError::Browser(BrowserError::SessionStart(_)) | WalkError::Sink(_)
        )
    }
}

pub(crate) fn is_navigation_failure(error: &WalkError) -> bool {
    matches!(error, WalkError::Browser(e) if e.is_navigation())
}

pub(crate) fn is_page_failure(error: &WalkError) -> bool {
    matches!(error, WalkError::Browser(e) if e.is_page_failure())
}

pub(crate) fn is_missing_video_source(error: &WalkError) -> bool {
    matches!(error, WalkError::VideoSourceNotFound { .. })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(WalkError::from(BrowserError::SessionStart("gone".into())).is_fatal());
        assert!(WalkError::Sink(anyhow::anyhow!("disk full")).is_fatal());
        assert!(!WalkError::MalformedEpisodeRow {
            series: "Main".into(),
            columns: 2
        }
        .is_fatal());
        assert!(!WalkError::from(BrowserError::navigation("https://example.com", "timeout")).is_fatal());
    }

    #[test]
    fn test_policy_triggers() {
        let navigation = WalkError::from(BrowserError::navigation("https://example.com", "timeout"));
        let query = WalkError::from(BrowserError::Query("stale".into()));
        let missing = WalkError::VideoSourceNotFound {
            url: "https://example.com".into(),
        };

        assert!(is_navigation_failure(&navigation));
        assert!(!is_navigation_failure(&query));
        assert!(is_page_failure(&query));
        assert!(is_page_failure(&navigation));
        assert!(!is_page_failure(&missing));
        assert!(is_missing_video_source(&missing));
    }
}
