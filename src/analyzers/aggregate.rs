use crate::analyzers::grade::grade;
use crate::analyzers::types::{
    CodeSummary, Diagnostic, FeedRef, FeedSummary, RankEntry, Rankings, Severity, Totals,
};
use crate::config::IgnoreSet;
use std::collections::BTreeMap;
use std::path::Path;

/// Drops every diagnostic the ignore set suppresses. Applying it to its own
/// output changes nothing.
pub fn apply_ignore(diagnostics: Vec<Diagnostic>, ignore: &IgnoreSet) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .filter(|d| !ignore.suppresses(d))
        .collect()
}

/// Tallies one feed's snapshots (one diagnostics list per results file).
///
/// The grade is the share of snapshots left without errors after
/// filtering, on the A+..F scale.
pub fn summarize_feed(
    feed: &FeedRef,
    directory: &Path,
    snapshots: Vec<Vec<Diagnostic>>,
    ignore: &IgnoreSet,
) -> FeedSummary {
    let snapshot_count = snapshots.len();
    let mut clean_snapshots = 0;
    let mut error_codes = BTreeMap::new();
    let mut warning_codes = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for snapshot in snapshots {
        let kept = apply_ignore(snapshot, ignore);
        if kept.iter().all(|d| d.severity != Severity::Error) {
            clean_snapshots += 1;
        }
        for d in &kept {
            let counts = match d.severity {
                Severity::Error => &mut error_codes,
                Severity::Warning => &mut warning_codes,
            };
            *counts.entry(d.code.clone()).or_insert(0usize) += 1;
        }
        diagnostics.extend(kept);
    }

    let clean_ratio = if snapshot_count == 0 {
        0.0
    } else {
        clean_snapshots as f64 / snapshot_count as f64
    };

    FeedSummary {
        region_id: feed.region_id.clone(),
        title: feed.title.clone(),
        directory: directory.to_path_buf(),
        snapshots: snapshot_count,
        clean_snapshots,
        grade: grade(clean_ratio),
        error_count: error_codes.values().sum(),
        warning_count: warning_codes.values().sum(),
        error_codes,
        warning_codes,
        diagnostics,
    }
}

/// Batch-wide totals. Counts are sums over `feeds` only, so feeds that were
/// not validated or failed analysis contribute nothing.
pub fn build_totals(
    feeds: &[FeedSummary],
    not_validated: usize,
    analysis_errors: usize,
) -> Totals {
    let per_feed_errors: Vec<f64> = feeds.iter().map(|f| f.error_count as f64).collect();
    let avg = mean(&per_feed_errors);

    Totals {
        feeds_discovered: feeds.len() + not_validated + analysis_errors,
        feeds_analyzed: feeds.len(),
        feeds_not_validated: not_validated,
        feeds_with_analysis_errors: analysis_errors,
        errors: feeds.iter().map(|f| f.error_count).sum(),
        warnings: feeds.iter().map(|f| f.warning_count).sum(),
        feeds_with_errors: feeds.iter().filter(|f| f.error_count > 0).count(),
        feeds_with_warnings: feeds.iter().filter(|f| f.warning_count > 0).count(),
        mean_errors_per_feed: avg,
        stddev_errors_per_feed: stddev(&per_feed_errors, avg),
    }
}

/// Per-code summaries, most frequent first, ties by code.
pub fn code_summaries(feeds: &[FeedSummary]) -> Vec<CodeSummary> {
    let mut by_code: BTreeMap<(Severity, String), CodeSummary> = BTreeMap::new();

    for feed in feeds {
        let tallies = [
            (Severity::Error, &feed.error_codes),
            (Severity::Warning, &feed.warning_codes),
        ];
        for (severity, codes) in tallies {
            for (code, count) in codes {
                let entry = by_code
                    .entry((severity, code.clone()))
                    .or_insert_with(|| CodeSummary {
                        code: code.clone(),
                        severity,
                        title: rule_title(feed, severity, code),
                        occurrences: 0,
                        feeds: 0,
                        feed_share: 0.0,
                    });
                entry.occurrences += count;
                entry.feeds += 1;
            }
        }
    }

    let analyzed = feeds.len();
    let mut summaries: Vec<CodeSummary> = by_code
        .into_values()
        .map(|mut s| {
            s.feed_share = if analyzed == 0 {
                0.0
            } else {
                s.feeds as f64 / analyzed as f64
            };
            s
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.severity.cmp(&b.severity))
            .then_with(|| a.code.cmp(&b.code))
    });
    summaries
}

fn rule_title(feed: &FeedSummary, severity: Severity, code: &str) -> String {
    feed.diagnostics
        .iter()
        .find(|d| d.severity == severity && d.code == code)
        .map(|d| d.message.clone())
        .unwrap_or_default()
}

/// Feeds with at least one finding of `severity`, worst first, ties by
/// `region_id` ascending.
pub fn rank_feeds(feeds: &[FeedSummary], severity: Severity) -> Vec<RankEntry> {
    let mut ranked: Vec<RankEntry> = feeds
        .iter()
        .map(|f| RankEntry {
            region_id: f.region_id.clone(),
            title: f.title.clone(),
            count: match severity {
                Severity::Error => f.error_count,
                Severity::Warning => f.warning_count,
            },
        })
        .filter(|r| r.count > 0)
        .collect();

    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.region_id.cmp(&b.region_id)));
    ranked
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around `mean`.
fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn rankings(feeds: &[FeedSummary]) -> Rankings {
    Rankings {
        by_errors: rank_feeds(feeds, Severity::Error),
        by_warnings: rank_feeds(feeds, Severity::Warning),
    }
}
