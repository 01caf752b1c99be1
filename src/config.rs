//! Run configuration, built once and passed into [`crate::pipeline::run`].

use crate::analyzers::types::{Diagnostic, Severity};
use crate::error::ConfigError;
use crate::validator::ValidatorCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ERRORS_TO_IGNORE: &str = "E017,E018";
pub const DEFAULT_WARNINGS_TO_IGNORE: &str = "W007,W008";
pub const DEFAULT_JSON_OUTPUT: &str = "analysis-summary.json";
pub const DEFAULT_WORKBOOK_OUTPUT: &str = "analysis-summary.xlsx";
pub const DEFAULT_CATALOG_URL: &str = "https://api.mobilitydatabase.org";
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Diagnostic codes excluded from reporting, scoped by severity.
///
/// An error is only ever checked against `errors` and a warning only
/// against `warnings`, so `W007` in the error list has no effect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreSet {
    pub errors: BTreeSet<String>,
    pub warnings: BTreeSet<String>,
}

impl IgnoreSet {
    /// Parses two comma-separated code lists such as `"E017,E018"`.
    pub fn parse(errors: &str, warnings: &str) -> Self {
        Self {
            errors: parse_codes(errors),
            warnings: parse_codes(warnings),
        }
    }

    pub fn suppresses(&self, diagnostic: &Diagnostic) -> bool {
        match diagnostic.severity {
            Severity::Error => self.errors.contains(&diagnostic.code),
            Severity::Warning => self.warnings.contains(&diagnostic.code),
        }
    }
}

fn parse_codes(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

/// Per-request network limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Everything one run needs. Immutable once built.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding one subdirectory per feed.
    pub root: PathBuf,
    pub download: bool,
    /// Re-download static GTFS files even when already on disk.
    pub force_download: bool,
    pub validate: bool,
    pub csv_manifest: Option<PathBuf>,
    pub catalog_api_key: Option<String>,
    pub catalog_base_url: String,
    pub ignore: IgnoreSet,
    pub json_output: PathBuf,
    pub workbook_output: Option<PathBuf>,
    pub concurrency: usize,
    pub fetch: FetchConfig,
    pub validator: Option<ValidatorCommand>,
}

impl PipelineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            download: true,
            force_download: true,
            validate: true,
            csv_manifest: None,
            catalog_api_key: None,
            catalog_base_url: DEFAULT_CATALOG_URL.to_string(),
            ignore: IgnoreSet::parse(DEFAULT_ERRORS_TO_IGNORE, DEFAULT_WARNINGS_TO_IGNORE),
            json_output: PathBuf::from(DEFAULT_JSON_OUTPUT),
            workbook_output: None,
            concurrency: DEFAULT_CONCURRENCY,
            fetch: FetchConfig::default(),
            validator: None,
        }
    }

    pub fn has_source(&self) -> bool {
        self.csv_manifest.is_some() || self.catalog_api_key.is_some()
    }

    /// Rejects values no run could work with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "concurrency",
                message: "must be at least 1".into(),
            });
        }
        if self.fetch.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "timeout",
                message: "must be greater than zero".into(),
            });
        }
        if let Some(key) = &self.catalog_api_key {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "api_key",
                    message: "must not be blank".into(),
                });
            }
        }
        Ok(())
    }
}
