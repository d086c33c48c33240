use crawler::{TitleRecord, TitleSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::Cell;
use std::time::Duration;

pub struct CrawlProgress {
    bar: Option<ProgressBar>,
    finished: Cell<bool>,
}

impl CrawlProgress {
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} titles {msg}")
            {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        Self {
            bar,
            finished: Cell::new(false),
        }
    }

    pub fn inc(&self) {
        if let Some(ref pb) = self.bar {
            pb.inc(1);
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.as_ref().map_or(0, ProgressBar::position)
    }

    pub fn finish(&self, msg: String) {
        if self.finished.replace(true) {
            return;
        }

        if let Some(ref pb) = self.bar {
            pb.finish_with_message(msg);
        }
    }

    pub fn set_message(&self, msg: String) {
        if let Some(ref pb) = self.bar {
            pb.set_message(msg);
        }
    }
}

impl Drop for CrawlProgress {
    fn drop(&mut self) {
        if !self.finished.get() {
            if let Some(ref pb) = self.bar {
                pb.finish_and_clear();
            }
        }
    }
}

/// Hands titles to `inner` and ticks the spinner for each one it accepted.
pub struct ProgressSink<'a, K> {
    inner: K,
    progress: &'a CrawlProgress,
}

impl<'a, K: TitleSink> ProgressSink<'a, K> {
    pub fn new(inner: K, progress: &'a CrawlProgress) -> Self {
        Self { inner, progress }
    }
}

impl<K: TitleSink> TitleSink for ProgressSink<'_, K> {
    fn on_title_complete(&mut self, title: TitleRecord) -> anyhow::Result<()> {
        let name = title.name.clone();
        self.inner.on_title_complete(title)?;
        self.progress.inc();
        self.progress.set_message(format!("(last: {})", name));
        Ok(())
    }
}
