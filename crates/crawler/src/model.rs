use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// One top-level catalog entry and everything discovered beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRecord {
    pub name: String,
    /// Page the title's series paths are relative to.
    pub url: String,
    pub series: Vec<SeriesRecord>,
    /// Series pages found in the title menu, in menu order. Only used while
    /// the title is being walked.
    #[serde(skip)]
    pub series_paths: IndexSet<String>,
}

impl TitleRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            series: Vec::new(),
            series_paths: IndexSet::new(),
        }
    }

    pub fn with_series_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.series_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn episodes(&self) -> impl Iterator<Item = &EpisodeRecord> {
        self.series.iter().flat_map(|series| series.episodes.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub name: String,
    pub path: String,
    pub episodes: Vec<EpisodeRecord>,
}

impl SeriesRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            episodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub name: String,
    /// Type label as printed by the site. Empty for aggregated sections.
    pub kind: String,
    /// Release date or episode range; the site does not tell them apart.
    pub released: String,
    /// Page listing the players of an ordinary episode.
    pub player_listing: Option<String>,
    /// Player pages tried for this episode.
    pub player_pages: Vec<String>,
    /// Sources resolved from `player_pages`; never longer than it.
    pub video_urls: Vec<String>,
}

impl EpisodeRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Player pages that produced no source.
    pub fn missing_sources(&self) -> usize {
        self.player_pages.len().saturating_sub(self.video_urls.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_paths_are_ordered_and_unique() {
        let title = TitleRecord::new("Naruto", "https://naruto.example.com/")
            .with_series_paths(["b.html", "a.html", "b.html"]);
        let paths: Vec<_> = title.series_paths.iter().map(String::as_str).collect();
        assert_eq!(paths, vec!["b.html", "a.html"]);
    }

    #[test]
    fn test_series_paths_are_not_serialized() {
        let title = TitleRecord::new("Naruto", "https://naruto.example.com/")
            .with_series_paths(["a.html"]);
        let json = serde_json::to_value(&title).unwrap();
        assert!(json.get("series_paths").is_none());
        assert_eq!(json["name"], "Naruto");
    }

    #[test]
    fn test_missing_sources() {
        let mut episode = EpisodeRecord::new("Ep 1");
        episode.player_pages = vec!["a".into(), "b".into(), "c".into()];
        episode.video_urls = vec!["x".into()];
        assert_eq!(episode.missing_sources(), 2);
    }
}
