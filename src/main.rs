//! CLI entry point for the transit feed quality tool.
//!
//! Provides subcommands for a full download/validate/analyze run, for each
//! stage on its own, and for listing what the configured sources offer.

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_feed_quality::config::{
    DEFAULT_CATALOG_URL, DEFAULT_CONCURRENCY, DEFAULT_ERRORS_TO_IGNORE, DEFAULT_JSON_OUTPUT,
    DEFAULT_WARNINGS_TO_IGNORE, DEFAULT_WORKBOOK_OUTPUT, IgnoreSet, PipelineConfig,
};
use transit_feed_quality::output::ExportReport;
use transit_feed_quality::pipeline;
use transit_feed_quality::validator::ValidatorCommand;

#[derive(Parser)]
#[command(name = "transit_feed_quality")]
#[command(
    about = "Download transit feeds, validate their realtime data and summarize the findings",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// CSV manifest with region_id,title,gtfs_url,gtfs_rt_url rows
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// MobilityDatabase refresh token; enables the catalog source
    #[arg(long, env = "MOBILITYDATA_REFRESH_TOKEN", hide_env_values = true)]
    api_key: Option<String>,

    /// Catalog API base URL
    #[arg(long, default_value = DEFAULT_CATALOG_URL)]
    catalog_url: String,

    /// Maximum number of feeds processed at once
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Retries after a timeout, connection error or 5xx response
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Keep static GTFS files that are already on disk
    #[arg(long, default_value_t = false)]
    skip_existing: bool,
}

#[derive(Args)]
struct ReportArgs {
    /// Comma-separated error codes to leave out of the report
    #[arg(long, default_value = DEFAULT_ERRORS_TO_IGNORE)]
    ignore_errors: String,

    /// Comma-separated warning codes to leave out of the report
    #[arg(long, default_value = DEFAULT_WARNINGS_TO_IGNORE)]
    ignore_warnings: String,

    /// JSON report path
    #[arg(long, default_value = DEFAULT_JSON_OUTPUT)]
    json: PathBuf,

    /// Also write an xlsx workbook (defaults to analysis-summary.xlsx)
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = DEFAULT_WORKBOOK_OUTPUT)]
    xlsx: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, validate and analyze every configured feed
    Run {
        /// Directory holding one subdirectory per feed
        #[arg(short, long, default_value = "feeds")]
        root: PathBuf,

        #[command(flatten)]
        sources: SourceArgs,

        #[command(flatten)]
        report: ReportArgs,

        /// Analyze what is already on disk without downloading
        #[arg(long, default_value_t = false)]
        no_download: bool,

        /// Skip the validator and analyze existing results
        #[arg(long, default_value_t = false)]
        no_validate: bool,

        /// Validator command; {gtfs}, {realtime} and {feed} are replaced per feed
        #[arg(long, env = "GTFS_RT_VALIDATOR", value_name = "COMMAND")]
        validator: Option<String>,
    },
    /// Download every configured feed into the root directory
    Download {
        #[arg(short, long, default_value = "feeds")]
        root: PathBuf,

        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Summarize validator results already under the root directory
    Analyze {
        #[arg(short, long, default_value = "feeds")]
        root: PathBuf,

        #[command(flatten)]
        report: ReportArgs,
    },
    /// List the feeds the configured sources would download
    ListFeeds {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

impl SourceArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        config.csv_manifest = self.csv.clone();
        config.catalog_api_key = self.api_key.clone();
        config.catalog_base_url = self.catalog_url.clone();
        config.concurrency = self.concurrency;
        config.force_download = !self.skip_existing;
        config.fetch.timeout = Duration::from_secs(self.timeout);
        config.fetch.max_retries = self.retries;
    }
}

impl ReportArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        config.ignore = IgnoreSet::parse(&self.ignore_errors, &self.ignore_warnings);
        config.json_output = self.json.clone();
        config.workbook_output = self.xlsx.clone();
    }
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_feed_quality.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_feed_quality.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _file_guard = init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            root,
            sources,
            report,
            no_download,
            no_validate,
            validator,
        } => {
            let mut config = PipelineConfig::new(root);
            sources.apply(&mut config);
            report.apply(&mut config);
            config.download = !no_download;
            config.validate = !no_validate;
            config.validator = validator.as_deref().and_then(ValidatorCommand::parse);
            config.check()?;

            let summary = pipeline::run(&config).await?;
            if let Some(downloads) = &summary.downloads {
                info!(
                    downloaded = downloads.downloaded(),
                    skipped = downloads.skipped(),
                    failed = downloads.failed(),
                    bytes = downloads.bytes_downloaded(),
                    "Downloads"
                );
            }
            check_exports(&summary.exports)?;
        }
        Commands::Download { root, sources } => {
            let mut config = PipelineConfig::new(root);
            sources.apply(&mut config);
            config.check()?;

            let report = pipeline::download(&config).await?;
            for failure in report.feed_failures() {
                warn!(
                    region_id = %failure.region_id,
                    stage = ?failure.stage,
                    reason = %failure.reason,
                    "Feed failed"
                );
            }
        }
        Commands::Analyze { root, report } => {
            let mut config = PipelineConfig::new(root);
            report.apply(&mut config);
            config.download = false;
            config.validate = false;
            config.check()?;

            let summary = pipeline::run(&config).await?;
            check_exports(&summary.exports)?;
        }
        Commands::ListFeeds { sources } => {
            let mut config = PipelineConfig::new("feeds");
            sources.apply(&mut config);
            config.check()?;

            let (feeds, failures) = pipeline::list_feeds(&config).await;
            for (source, feed) in &feeds {
                info!(
                    source = %source,
                    region_id = %feed.region_id,
                    title = %feed.title,
                    gtfs_url = %feed.gtfs_url,
                    has_realtime = feed.gtfs_rt_url.is_some(),
                    "Feed"
                );
            }
            for failure in &failures {
                warn!(source = %failure.source, reason = %failure.reason, "Source problem");
            }

            let with_realtime = feeds.iter().filter(|(_, f)| f.gtfs_rt_url.is_some()).count();
            info!(
                total = feeds.len(),
                with_realtime,
                source_failures = failures.len(),
                "Feed list summary"
            );
        }
    }

    Ok(())
}

fn check_exports(exports: &ExportReport) -> Result<()> {
    if exports.is_ok() {
        return Ok(());
    }
    if let Err(e) = &exports.json {
        warn!(error = %e, "JSON report missing");
    }
    if let Some(Err(e)) = &exports.workbook {
        warn!(error = %e, "Workbook missing");
    }
    bail!("one or more reports could not be written")
}
