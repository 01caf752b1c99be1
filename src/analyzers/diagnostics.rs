//! Reading validator output.
//!
//! The validator writes one `*.results.json` per realtime snapshot: a JSON
//! array of rules that fired, each with the occurrences that triggered it.
//!
//! ```json
//! [
//!   {
//!     "errorMessage": {
//!       "validationRule": { "errorId": "E017", "severity": "ERROR", "title": "..." }
//!     },
//!     "occurrenceList": [ { "prefix": "trip_id 1234" } ]
//!   }
//! ]
//! ```

use crate::analyzers::types::{Diagnostic, Severity};
use crate::error::AnalysisError;
use crate::layout::RESULTS_SUFFIX;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleResult {
    error_message: ErrorMessage,
    #[serde(default)]
    occurrence_list: Vec<Occurrence>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorMessage {
    validation_rule: ValidationRule,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationRule {
    error_id: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct Occurrence {
    #[serde(default)]
    prefix: Option<String>,
}

impl ValidationRule {
    /// Falls back to the code prefix (`E…` / `W…`) when the severity is
    /// missing or unrecognized.
    fn severity(&self) -> Severity {
        match self.severity.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("ERROR") => Severity::Error,
            Some("WARNING") => Severity::Warning,
            _ if self.error_id.starts_with(['W', 'w']) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Flattens validator output into one [`Diagnostic`] per occurrence. A rule
/// listed without occurrences still counts once.
pub fn parse_results(json: &str, feed: &str) -> Result<Vec<Diagnostic>, serde_json::Error> {
    let rules: Vec<RuleResult> = serde_json::from_str(json)?;
    let mut diagnostics = Vec::new();

    for rule in rules {
        let validation_rule = rule.error_message.validation_rule;
        let severity = validation_rule.severity();
        let code = validation_rule.error_id.trim().to_ascii_uppercase();
        let make = |location: Option<String>| Diagnostic {
            code: code.clone(),
            severity,
            feed: feed.to_string(),
            message: validation_rule.title.clone(),
            location,
        };

        if rule.occurrence_list.is_empty() {
            diagnostics.push(make(None));
        } else {
            diagnostics.extend(rule.occurrence_list.into_iter().map(|o| make(o.prefix)));
        }
    }

    Ok(diagnostics)
}

pub fn read_results_file(path: &Path, feed: &str) -> Result<Vec<Diagnostic>, AnalysisError> {
    let content = fs::read_to_string(path).map_err(|e| AnalysisError::ResultsFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_results(&content, feed).map_err(|e| AnalysisError::ResultsFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Every results file beneath `dir`, sorted by path.
pub fn results_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(RESULTS_SUFFIX))
        {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "errorMessage": {"validationRule": {"errorId": "E017", "severity": "ERROR", "title": "GTFS-rt content changed but has the same header timestamp"}},
            "occurrenceList": [{"prefix": "1"}, {"prefix": "2"}]
        },
        {
            "errorMessage": {"validationRule": {"errorId": "W007", "severity": "WARNING", "title": "Refresh interval is more than 35 seconds"}},
            "occurrenceList": []
        }
    ]"#;

    #[test]
    fn test_each_occurrence_is_a_diagnostic() {
        let diagnostics = parse_results(SAMPLE, "R1").unwrap();

        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[0].code, "E017");
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].location.as_deref(), Some("1"));
        assert_eq!(diagnostics[2].code, "W007");
        assert_eq!(diagnostics[2].severity, Severity::Warning);
        assert_eq!(diagnostics[2].feed, "R1");
    }

    #[test]
    fn test_missing_severity_falls_back_to_code_prefix() {
        let json = r#"[{"errorMessage": {"validationRule": {"errorId": "W001"}}}]"#;
        let diagnostics = parse_results(json, "R1").unwrap();
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse_results("{not json", "R1").is_err());
    }

    #[test]
    fn test_results_files_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let rt = dir.path().join("gtfs-realtime");
        fs::create_dir_all(&rt).unwrap();
        fs::write(rt.join("2.pb.results.json"), "[]").unwrap();
        fs::write(rt.join("1.pb.results.json"), "[]").unwrap();
        fs::write(rt.join("1.pb"), "").unwrap();
        fs::write(dir.path().join("feed.json"), "{}").unwrap();

        let files = results_files(dir.path()).unwrap();

        assert_eq!(files, vec![rt.join("1.pb.results.json"), rt.join("2.pb.results.json")]);
    }

    #[test]
    fn test_results_files_skips_directories_and_reports_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(nested.join("odd.results.json")).unwrap();
        fs::write(nested.join("3.pb.results.json"), "[]").unwrap();

        let files = results_files(dir.path()).unwrap();

        assert_eq!(files, vec![nested.join("3.pb.results.json")]);
        assert!(results_files(&dir.path().join("missing")).is_err());
    }
}
