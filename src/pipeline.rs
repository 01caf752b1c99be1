//! One full run: download, validate, analyze, export.
//!
//! Every stage after setup is best effort. Per-feed and per-source failures
//! are collected into the report; only an unusable root directory stops the
//! run.

use crate::analyzers::analyzer::ResultsAnalyzer;
use crate::analyzers::types::{AnalysisOutput, FeedFailure, SourceFailure};
use crate::config::PipelineConfig;
use crate::downloader::{DownloadReport, Downloader};
use crate::error::{AnalysisError, ConfigError, PipelineError};
use crate::fetch::BasicClient;
use crate::infra::mobilitydata::MobilityDataClient;
use crate::layout::discover_feeds;
use crate::output::{ExportReport, export_all};
use crate::sources::{CatalogSource, CsvManifestSource, FeedDescriptor, FeedSource};
use crate::validator::{CommandValidator, FeedValidator, ValidationReport, validate_all};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct RunSummary {
    /// `None` when downloading was turned off.
    pub downloads: Option<DownloadReport>,
    /// `None` when validation was turned off or had no command.
    pub validation: Option<ValidationReport>,
    pub output: AnalysisOutput,
    pub exports: ExportReport,
}

/// Sources the configuration names, plus the ones that could not be built.
pub fn build_sources(config: &PipelineConfig) -> (Vec<Arc<dyn FeedSource>>, Vec<SourceFailure>) {
    let mut sources: Vec<Arc<dyn FeedSource>> = Vec::new();
    let mut failures = Vec::new();

    if !config.has_source() {
        warn!(reason = %ConfigError::NoSource, "Nothing will be downloaded");
        return (sources, failures);
    }

    let client = match BasicClient::new(&config.fetch) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Cannot build HTTP client");
            failures.push(SourceFailure::new("http", &e));
            return (sources, failures);
        }
    };

    if let Some(path) = &config.csv_manifest {
        sources.push(Arc::new(CsvManifestSource::new(
            path.clone(),
            client.clone(),
            config.fetch.clone(),
        )));
    }

    if let Some(key) = &config.catalog_api_key {
        match MobilityDataClient::new(&config.catalog_base_url, key, &config.fetch) {
            Ok(api) => sources.push(Arc::new(CatalogSource::new(
                api,
                client.clone(),
                config.fetch.clone(),
            ))),
            Err(e) => {
                error!(error = %e, "Catalog source unavailable");
                failures.push(SourceFailure::new("catalog", &e));
            }
        }
    }

    (sources, failures)
}

/// Every feed the configured sources would download, without fetching them.
pub async fn list_feeds(
    config: &PipelineConfig,
) -> (Vec<(String, FeedDescriptor)>, Vec<SourceFailure>) {
    let (sources, mut failures) = build_sources(config);
    let mut feeds = Vec::new();

    for source in &sources {
        match source.list_feeds().await {
            Ok(listing) => {
                failures.extend(
                    listing
                        .rejected
                        .iter()
                        .map(|e| SourceFailure::new(source.name(), e)),
                );
                feeds.extend(
                    listing
                        .feeds
                        .into_iter()
                        .map(|d| (source.name().to_string(), d)),
                );
            }
            Err(e) => {
                error!(source = source.name(), error = %e, "Feed source failed");
                failures.push(SourceFailure::new(source.name(), &e));
            }
        }
    }

    (feeds, failures)
}

async fn create_root(config: &PipelineConfig) -> Result<(), PipelineError> {
    tokio::fs::create_dir_all(&config.root)
        .await
        .map_err(|source| PipelineError::WorkingDir {
            path: config.root.clone(),
            source,
        })
}

/// Runs only the download stage.
pub async fn download(config: &PipelineConfig) -> Result<DownloadReport, PipelineError> {
    create_root(config).await?;
    let (sources, mut failures) = build_sources(config);
    let mut report = Downloader::new(&config.root, config.force_download, config.concurrency)
        .run(&sources)
        .await;
    failures.append(&mut report.source_failures);
    report.source_failures = failures;
    Ok(report)
}

#[tracing::instrument(skip_all, fields(root = %config.root.display()))]
pub async fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let downloads = if config.download {
        Some(download(config).await?)
    } else {
        create_root(config).await?;
        None
    };

    let validation = if !config.validate {
        None
    } else if let Some(command) = &config.validator {
        let feeds = discover_feeds(&config.root).map_err(|source| AnalysisError::Root {
            path: config.root.clone(),
            source,
        })?;
        let validator: Arc<dyn FeedValidator> = Arc::new(CommandValidator::new(command.clone()));
        Some(validate_all(validator, feeds, config.concurrency).await)
    } else {
        warn!("No validator command configured, using existing results only");
        None
    };

    let mut run_failures: Vec<FeedFailure> = Vec::new();
    let mut source_failures = Vec::new();
    if let Some(report) = &downloads {
        run_failures.extend(report.feed_failures());
        source_failures.extend(report.source_failures.iter().cloned());
    }
    if let Some(report) = &validation {
        run_failures.extend(report.failures.iter().cloned());
    }

    let output = ResultsAnalyzer::new(&config.root, config.ignore.clone())
        .with_failures(run_failures, source_failures)
        .analyze()?;

    let exports = export_all(
        &output,
        &config.json_output,
        config.workbook_output.as_deref(),
    );

    info!(
        feeds = output.totals.feeds_discovered,
        errors = output.totals.errors,
        warnings = output.totals.warnings,
        exports_ok = exports.is_ok(),
        "Run complete"
    );

    Ok(RunSummary {
        downloads,
        validation,
        output,
        exports,
    })
}
