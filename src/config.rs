use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use browser::LaunchConfig;
use crawler::WalkerConfig;

use crate::cli::CrawlArgs;

/// Everything a run needs. Built from defaults, then the JSON config file,
/// then command line and environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub walker: WalkerConfig,
    pub browser: LaunchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./results"),
            walker: WalkerConfig::default(),
            browser: LaunchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn load(args: &CrawlArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    fn apply(&mut self, args: &CrawlArgs) {
        if let Some(root_url) = &args.root_url {
            self.walker.root_url = root_url.clone();
        }
        if let Some(marker) = &args.resume_from {
            self.walker.resume_marker = Some(marker.clone());
        }
        if let Some(output) = &args.output {
            self.output_dir = output.clone();
        }
        if args.headed {
            self.browser.headless = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load(&CrawlArgs::default()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.browser.headless);
    }

    #[test]
    fn test_file_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "output_dir": "/data/catalog",
                "walker": { "root_url": "https://mirror.example.com/", "resume_marker": "bleach" },
                "browser": { "navigation_timeout_ms": 5000 }
            }"#,
        )
        .unwrap();

        let from_file = AppConfig::load(&CrawlArgs {
            config: Some(path.clone()),
            ..CrawlArgs::default()
        })
        .unwrap();
        assert_eq!(from_file.output_dir, PathBuf::from("/data/catalog"));
        assert_eq!(from_file.walker.root_url, "https://mirror.example.com/");
        assert_eq!(from_file.browser.navigation_timeout_ms, 5000);
        assert_eq!(from_file.browser.window_width, 1920);

        let overridden = AppConfig::load(&CrawlArgs {
            config: Some(path),
            resume_from: Some("naruto".to_string()),
            headed: true,
            ..CrawlArgs::default()
        })
        .unwrap();
        assert_eq!(overridden.walker.resume_marker.as_deref(), Some("naruto"));
        assert_eq!(overridden.walker.root_url, "https://mirror.example.com/");
        assert!(!overridden.browser.headless);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppConfig::load(&CrawlArgs {
            config: Some(PathBuf::from("/nonexistent/catalog.json")),
            ..CrawlArgs::default()
        });
        assert!(result.is_err());
    }
}
