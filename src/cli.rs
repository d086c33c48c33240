use clap::{Args, Parser, Subcommand, ValueEnum};
use exporter::ExportFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "catalog-scraper")]
#[command(version)]
#[command(about = "Walks an anime catalog site and exports every title's episodes and video sources", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (warnings and errors only, no progress)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CrawlArgs {
    /// JSON configuration file; missing fields keep their defaults
    #[arg(short, long, env = "CATALOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Catalog root page
    #[arg(long, env = "CATALOG_ROOT_URL")]
    pub root_url: Option<String>,

    /// Skip every title before the first URL containing this text
    #[arg(long, env = "CATALOG_RESUME_FROM")]
    pub resume_from: Option<String>,

    /// Base directory for run output
    #[arg(short, long, env = "CATALOG_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Directory for the daily rolling log file
    #[arg(long, env = "CATALOG_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Run directory written by a previous crawl
    pub run_dir: PathBuf,

    /// Destination file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = FormatArg::Json)]
    pub format: FormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk the catalog and export every title
    Crawl(CrawlArgs),

    /// Print the effective configuration as JSON
    Config(CrawlArgs),

    /// Merge a finished run directory into one JSON or CSV file
    Export(ExportArgs),
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "catalog-scraper",
            "crawl",
            "--root-url",
            "https://example.com/",
            "--resume-from",
            "naruto",
            "--output",
            "./out",
            "--headed",
        ])
        .unwrap();

        let Commands::Crawl(args) = cli.command else {
            panic!("expected crawl command");
        };
        assert_eq!(args.root_url.as_deref(), Some("https://example.com/"));
        assert_eq!(args.resume_from.as_deref(), Some("naruto"));
        assert_eq!(args.output, Some(PathBuf::from("./out")));
        assert!(args.headed);
        assert_eq!(args.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_export_command() {
        let cli = Cli::try_parse_from([
            "catalog-scraper",
            "export",
            "./results/20240101_120000",
            "-o",
            "catalog.csv",
            "--format",
            "csv",
        ])
        .unwrap();

        let Commands::Export(args) = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(args.run_dir, PathBuf::from("./results/20240101_120000"));
        assert_eq!(args.output, PathBuf::from("catalog.csv"));
        assert_eq!(ExportFormat::from(args.format), ExportFormat::Csv);

        let cli = Cli::try_parse_from(["catalog-scraper", "export", "run", "-o", "all.json"]).unwrap();
        let Commands::Export(args) = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(args.format, FormatArg::Json);
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::try_parse_from(["catalog-scraper", "config", "-q"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Config(_)));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let cli = Cli::try_parse_from(["catalog-scraper", "crawl", "-v", "-q"]);
        assert!(cli.is_err());
    }
}
