mod config;
mod error;
mod layout;
mod model;
mod walker;

pub use config::WalkerConfig;
pub use error::WalkError;
pub use layout::{ColumnLayout, SectionKind};
pub use model::{EpisodeRecord, SeriesRecord, TitleRecord};
pub use walker::{resume_from, CatalogWalker, SkippedUnit, WalkSummary};

/// Receives each title once its whole subtree has been walked. An error
/// aborts the crawl.
pub trait TitleSink {
    fn on_title_complete(&mut self, title: TitleRecord) -> anyhow::Result<()>;
}

impl TitleSink for Vec<TitleRecord> {
    fn on_title_complete(&mut self, title: TitleRecord) -> anyhow::Result<()> {
        self.push(title);
        Ok(())
    }
}
