use resilience::ResilienceConfig;
use serde::{Deserialize, Serialize};

/// Where the walker finds things on the site, and how hard it tries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    pub root_url: String,
    pub catalog_footer_selector: String,
    /// Host fragment of title URLs that point at the aggregated section.
    pub aggregated_host_marker: String,
    pub subpage_link_selector: String,
    /// Trailing phrase of a title page's `<title>`; the text before it is the
    /// display name.
    pub title_suffix: String,
    pub submenu_selector: String,
    pub series_menu_label: String,
    pub aggregated_menu_labels: Vec<String>,
    /// `src` of the icon that marks series entries in a submenu list.
    pub series_icon: String,
    /// Series header selectors, tried in order until one matches.
    pub series_header_selectors: Vec<String>,
    /// Lower-case fragments of series names whose tables put the release
    /// range before the type.
    pub openings_markers: Vec<String>,
    pub player_table_selector: String,
    /// Player page path relative to the title page; `{rel}` is replaced by
    /// the player's `rel` attribute.
    pub player_page_template: String,
    pub warning_selector: String,
    pub warning_text: String,
    /// Recorded instead of a source when the player is hosted on the
    /// restricted external service.
    pub external_host_sentinel: String,
    pub video_frame_selector: String,
    /// Skip every title URL before the first one containing this text.
    pub resume_marker: Option<String>,
    pub resilience: ResilienceConfig,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            root_url: "https://wbijam.pl/".to_string(),
            catalog_footer_selector: "div#stopka_srodek".to_string(),
            aggregated_host_marker: "inne.wbijam.pl".to_string(),
            subpage_link_selector: "center a.sub_link".to_string(),
            title_suffix: "- wszystkie odcinki anime online".to_string(),
            submenu_selector: "div.pmenu_naglowek_b".to_string(),
            series_menu_label: "Odcinki anime online".to_string(),
            aggregated_menu_labels: vec!["Akcja".to_string(), "Lżejsze klimaty".to_string()],
            series_icon: "images/tv_info.gif".to_string(),
            series_header_selectors: vec!["h1.pod_naglowek".to_string(), ".naglowek_fb".to_string()],
            openings_markers: vec![
                "openingi".to_string(),
                "endingi".to_string(),
                "openings".to_string(),
                "endings".to_string(),
            ],
            player_table_selector: "table.lista".to_string(),
            player_page_template: "odtwarzacz-{rel}.html".to_string(),
            warning_selector: "center".to_string(),
            warning_text: "Aby oglądać odcinki na serwerze VK".to_string(),
            external_host_sentinel: "VKontakte player -> https://vk.com/".to_string(),
            video_frame_selector: "iframe".to_string(),
            resume_marker: None,
            resilience: ResilienceConfig::default(),
        }
    }
}

impl WalkerConfig {
    pub fn player_page_path(&self, rel: &str) -> String {
        self.player_page_template.replace("{rel}", rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_page_path() {
        let config = WalkerConfig::default();
        assert_eq!(config.player_page_path("abc"), "odtwarzacz-abc.html");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: WalkerConfig =
            serde_json::from_str(r#"{"resume_marker": "naruto"}"#).unwrap();
        assert_eq!(config.resume_marker.as_deref(), Some("naruto"));
        assert_eq!(config.series_header_selectors.len(), 2);
        assert_eq!(config.resilience, ResilienceConfig::default());
    }
}
