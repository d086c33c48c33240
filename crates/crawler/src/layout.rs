use serde::{Deserialize, Serialize};

use crate::model::EpisodeRecord;

/// How a catalog entry is organised on the site. Decided once per title URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    /// One show on its own subdomain.
    Ordinary,
    /// Several unrelated shows grouped under shared submenus; each episode
    /// row lists its player pages directly, one per column.
    Aggregated,
}

impl SectionKind {
    pub fn classify(url: &str, aggregated_host_marker: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string));
        match host {
            Some(host) if host.contains(aggregated_host_marker) => SectionKind::Aggregated,
            None if url.contains(aggregated_host_marker) => SectionKind::Aggregated,
            _ => SectionKind::Ordinary,
        }
    }
}

/// Column order of a series table. Decided once per series from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnLayout {
    /// name, type, release date or range
    Standard,
    /// name, release range, type
    OpeningsEndings,
}

impl ColumnLayout {
    pub fn for_series<S: AsRef<str>>(series_name: &str, markers: &[S]) -> Self {
        let lowered = series_name.to_lowercase();
        if markers
            .iter()
            .any(|marker| lowered.contains(&marker.as_ref().to_lowercase()))
        {
            ColumnLayout::OpeningsEndings
        } else {
            ColumnLayout::Standard
        }
    }

    /// Builds an episode from the first three column texts of a row.
    pub fn episode(self, columns: &[String; 3]) -> EpisodeRecord {
        let [name, second, third] = columns;
        let (kind, released) = match self {
            ColumnLayout::Standard => (second, third),
            ColumnLayout::OpeningsEndings => (third, second),
        };
        EpisodeRecord {
            name: name.clone(),
            kind: kind.clone(),
            released: released.clone(),
            ..EpisodeRecord::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKERS: [&str; 2] = ["openings", "endings"];

    fn row() -> [String; 3] {
        ["Ep 1".to_string(), "A".to_string(), "B".to_string()]
    }

    #[test]
    fn test_classify_section() {
        assert_eq!(
            SectionKind::classify("https://inne.example.com/", "inne."),
            SectionKind::Aggregated
        );
        assert_eq!(
            SectionKind::classify("https://example.com/inne.html", "inne."),
            SectionKind::Ordinary
        );
        assert_eq!(
            SectionKind::classify("https://naruto.example.com/", "inne."),
            SectionKind::Ordinary
        );
    }

    #[test]
    fn test_layout_from_series_name() {
        assert_eq!(ColumnLayout::for_series("Openings", &MARKERS), ColumnLayout::OpeningsEndings);
        assert_eq!(
            ColumnLayout::for_series("Naruto ENDINGS", &MARKERS),
            ColumnLayout::OpeningsEndings
        );
        assert_eq!(ColumnLayout::for_series("Episodes", &MARKERS), ColumnLayout::Standard);
    }

    #[test]
    fn test_swapping_layout_swaps_columns() {
        let standard = ColumnLayout::Standard.episode(&row());
        let openings = ColumnLayout::OpeningsEndings.episode(&row());

        assert_eq!(standard.name, openings.name);
        assert_eq!((standard.kind.as_str(), standard.released.as_str()), ("A", "B"));
        assert_eq!(standard.kind, openings.released);
        assert_eq!(standard.released, openings.kind);
    }
}
