//! Data types used by the analysis pipeline.

use crate::config::IgnoreSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// One validator finding against a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    /// `region_id` of the feed the finding belongs to.
    pub feed: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A feed named in a report list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedRef {
    pub region_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Download,
    Realtime,
    Validation,
    Analysis,
}

/// A per-feed failure surfaced in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFailure {
    pub region_id: String,
    pub title: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// A source that contributed nothing, or rejected part of its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

impl SourceFailure {
    pub fn new(source: &str, reason: &impl fmt::Display) -> Self {
        Self {
            source: source.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Post-filter results for one validated feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSummary {
    pub region_id: String,
    pub title: String,
    pub directory: PathBuf,
    /// Validator results files read for this feed.
    pub snapshots: usize,
    /// Snapshots with no errors left after filtering.
    pub clean_snapshots: usize,
    pub grade: String,
    pub error_count: usize,
    pub warning_count: usize,
    pub error_codes: BTreeMap<String, usize>,
    pub warning_codes: BTreeMap<String, usize>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Batch-wide occurrence count for one code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSummary {
    pub code: String,
    pub severity: Severity,
    pub title: String,
    pub occurrences: usize,
    /// Number of analyzed feeds with at least one occurrence.
    pub feeds: usize,
    /// `feeds` over the number of analyzed feeds.
    pub feed_share: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub region_id: String,
    pub title: String,
    pub count: usize,
}

/// Worst feeds first; ties break on `region_id` ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rankings {
    pub by_errors: Vec<RankEntry>,
    pub by_warnings: Vec<RankEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub feeds_discovered: usize,
    pub feeds_analyzed: usize,
    pub feeds_not_validated: usize,
    pub feeds_with_analysis_errors: usize,
    pub errors: usize,
    pub warnings: usize,
    pub feeds_with_errors: usize,
    pub feeds_with_warnings: usize,
    pub mean_errors_per_feed: f64,
    pub stddev_errors_per_feed: f64,
}

/// The consolidated report for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub generated_at: DateTime<Utc>,
    pub root: PathBuf,
    pub ignored: IgnoreSet,
    pub totals: Totals,
    pub codes: Vec<CodeSummary>,
    pub rankings: Rankings,
    /// Sorted by `region_id`.
    pub feeds: Vec<FeedSummary>,
    pub not_validated: Vec<FeedRef>,
    pub analysis_errors: Vec<FeedFailure>,
    pub run_failures: Vec<FeedFailure>,
    pub source_failures: Vec<SourceFailure>,
}
