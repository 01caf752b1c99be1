use crate::analyzers::aggregate::{build_totals, code_summaries, rankings, summarize_feed};
use crate::analyzers::diagnostics::{read_results_file, results_files};
use crate::analyzers::types::{
    AnalysisOutput, FailureStage, FeedFailure, FeedRef, FeedSummary, SourceFailure,
};
use crate::config::IgnoreSet;
use crate::error::AnalysisError;
use crate::layout::{OnDiskFeed, discover_feeds};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Consolidates validator results for every feed under a root directory.
pub struct ResultsAnalyzer {
    root: PathBuf,
    ignore: IgnoreSet,
    run_failures: Vec<FeedFailure>,
    source_failures: Vec<SourceFailure>,
}

/// How one feed directory fared.
enum FeedOutcome {
    Analyzed(FeedSummary),
    NotValidated(FeedRef),
    Failed(FeedFailure),
}

impl ResultsAnalyzer {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreSet) -> Self {
        Self {
            root: root.into(),
            ignore,
            run_failures: Vec::new(),
            source_failures: Vec::new(),
        }
    }

    /// Carries failures from earlier stages into the report unchanged.
    pub fn with_failures(mut self, feeds: Vec<FeedFailure>, sources: Vec<SourceFailure>) -> Self {
        self.run_failures = feeds;
        self.source_failures = sources;
        self
    }

    /// Reads every feed's results once and builds the report.
    ///
    /// Only an unreadable root is fatal; a bad results file is recorded
    /// against its feed and that feed is left out of every total.
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    pub fn analyze(self) -> Result<AnalysisOutput, AnalysisError> {
        let feeds = discover_feeds(&self.root).map_err(|source| AnalysisError::Root {
            path: self.root.clone(),
            source,
        })?;

        let mut summaries = Vec::new();
        let mut not_validated = Vec::new();
        let mut analysis_errors = Vec::new();

        for feed in &feeds {
            match self.analyze_feed(feed) {
                FeedOutcome::Analyzed(summary) => summaries.push(summary),
                FeedOutcome::NotValidated(feed_ref) => not_validated.push(feed_ref),
                FeedOutcome::Failed(failure) => analysis_errors.push(failure),
            }
        }

        summaries.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        not_validated.sort();
        analysis_errors.sort_by(|a, b| a.region_id.cmp(&b.region_id));

        let totals = build_totals(&summaries, not_validated.len(), analysis_errors.len());
        info!(
            analyzed = totals.feeds_analyzed,
            not_validated = totals.feeds_not_validated,
            analysis_errors = totals.feeds_with_analysis_errors,
            errors = totals.errors,
            warnings = totals.warnings,
            "Analysis complete"
        );

        let mut run_failures = self.run_failures;
        run_failures.sort_by(|a, b| (&a.region_id, a.stage).cmp(&(&b.region_id, b.stage)));

        Ok(AnalysisOutput {
            generated_at: Utc::now(),
            root: self.root,
            ignored: self.ignore,
            totals,
            codes: code_summaries(&summaries),
            rankings: rankings(&summaries),
            feeds: summaries,
            not_validated,
            analysis_errors,
            run_failures,
            source_failures: self.source_failures,
        })
    }

    fn analyze_feed(&self, feed: &OnDiskFeed) -> FeedOutcome {
        let feed_ref = FeedRef {
            region_id: feed.descriptor.region_id.clone(),
            title: feed.descriptor.title.clone(),
        };
        let files = match results_files(&feed.directory) {
            Ok(files) => files,
            Err(e) => {
                let reason = format!("cannot list {}: {e}", feed.directory.display());
                return excluded(&feed_ref, reason);
            }
        };

        if files.is_empty() {
            debug!(region_id = %feed_ref.region_id, "No validator results");
            return FeedOutcome::NotValidated(feed_ref);
        }

        let mut snapshots = Vec::with_capacity(files.len());
        for path in &files {
            match read_results_file(path, &feed_ref.region_id) {
                Ok(diagnostics) => snapshots.push(diagnostics),
                Err(e) => return excluded(&feed_ref, e.to_string()),
            }
        }

        FeedOutcome::Analyzed(summarize_feed(
            &feed_ref,
            &feed.directory,
            snapshots,
            &self.ignore,
        ))
    }
}

fn excluded(feed: &FeedRef, reason: String) -> FeedOutcome {
    warn!(region_id = %feed.region_id, reason = %reason, "Feed excluded from analysis");
    FeedOutcome::Failed(FeedFailure {
        region_id: feed.region_id.clone(),
        title: feed.title.clone(),
        stage: FailureStage::Analysis,
        reason,
    })
}
