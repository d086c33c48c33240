mod cli;
mod config;
mod logging;
mod progress;
mod shutdown;

use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::HumanDuration;
use tracing::{info, warn};
use tracing_subscriber::util::SubscriberInitExt;

use browser::ChromeLauncher;
use cli::{Cli, Commands, CrawlArgs, ExportArgs};
use config::AppConfig;
use crawler::CatalogWalker;
use exporter::CatalogExporter;
use progress::{CrawlProgress, ProgressSink};
use session::BrowserSession;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let log_dir = match &cli.command {
        Commands::Crawl(args) => Some(args.log_dir.as_path()),
        _ => None,
    };
    let (subscriber, _log_guard) = logging::build_subscriber(level, log_dir)?;
    subscriber.init();

    match cli.command {
        Commands::Crawl(args) => run_crawl(args, !cli.quiet).await,
        Commands::Config(args) => print_config(&args),
        Commands::Export(args) => run_export(&args),
    }
}

async fn run_crawl(args: CrawlArgs, show_progress: bool) -> Result<()> {
    let started = Instant::now();
    let config = AppConfig::load(&args)?;
    info!("Catalog scraper starting from {}", config.walker.root_url);

    let should_stop = shutdown::install().context("Failed to install signal handlers")?;

    let exporter = CatalogExporter::create(&config.output_dir)
        .with_context(|| format!("Failed to prepare output under {}", config.output_dir.display()))?;
    let run_dir = exporter.run_dir().to_path_buf();

    let progress = CrawlProgress::new(show_progress);
    let mut sink = ProgressSink::new(exporter, &progress);
    let walker = CatalogWalker::new(config.walker).with_shutdown_flag(should_stop);
    let mut session = BrowserSession::new(ChromeLauncher::new(config.browser));

    let outcome = walker.walk(&mut session, &mut sink).await;
    session.dispose();

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            progress.finish("✗ Crawl aborted".to_string());
            info!("Whole process took: {}", HumanDuration(started.elapsed()));
            return Err(e).context("Catalog crawl aborted");
        }
    };

    match &summary.interrupted_at {
        Some(next) => {
            progress.finish(format!("✗ Crawl interrupted ({} titles)", summary.titles_emitted));
            warn!(
                "Crawl interrupted, partial results are in {}. Continue with --resume-from {}",
                run_dir.display(),
                next
            );
        }
        None => progress.finish(format!("✓ Crawl completed ({} titles)", summary.titles_emitted)),
    }
    for skipped in &summary.titles_skipped {
        warn!("Skipped anime {}: {}", skipped.name, skipped.reason);
    }
    for skipped in &summary.series_skipped {
        warn!("Skipped series {}: {}", skipped.name, skipped.reason);
    }
    info!(
        "Crawl completed: {} titles saved to {} ({} players without source, {} players failed)",
        summary.titles_emitted,
        run_dir.display(),
        summary.players_degraded,
        summary.players_failed
    );
    info!("Whole process took: {}", HumanDuration(started.elapsed()));
    Ok(())
}

fn print_config(args: &CrawlArgs) -> Result<()> {
    let config = AppConfig::load(args)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn run_export(args: &ExportArgs) -> Result<()> {
    let titles = exporter::load_run_dir(&args.run_dir)
        .with_context(|| format!("Failed to read run directory {}", args.run_dir.display()))?;
    exporter::export(&titles, &args.output, args.format.into())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!("Exported {} titles to {}", titles.len(), args.output.display());
    Ok(())
}
