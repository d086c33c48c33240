use std::path::Path;

use anyhow::{Context, Result};
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Daily-rolled file name inside the log directory.
pub const LOG_FILE: &str = "log.txt";

/// Builds the subscriber: stderr always, plus a daily rolling file under
/// `log_dir` when given. Keep the guard alive until exit so buffered lines
/// reach the file.
pub fn build_subscriber(
    level: Level,
    log_dir: Option<&Path>,
) -> Result<(impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>)> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE)
                .build(dir)
                .with_context(|| format!("Failed to open log file under {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer);

    Ok((subscriber, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_log_lines_reach_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let (subscriber, guard) = build_subscriber(Level::INFO, Some(dir.path())).unwrap();
        assert!(guard.is_some());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Whole process took: 3 minutes");
        });
        drop(guard);

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(LOG_FILE))
            })
            .collect();
        assert_eq!(files.len(), 1);

        let contents = fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("Whole process took: 3 minutes"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn test_no_file_without_log_dir() {
        let (_subscriber, guard) = build_subscriber(Level::WARN, None).unwrap();
        assert!(guard.is_none());
    }
}
