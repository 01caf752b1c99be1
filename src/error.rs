//! Error taxonomy for the feed quality pipeline.
//!
//! Only [`PipelineError`] is fatal to a run. Every other error is scoped to a
//! single source, feed, or output format and is recorded in the run's report
//! instead of being propagated.

use std::path::PathBuf;
use thiserror::Error;

/// A configuration problem detected before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a CSV manifest nor a catalog API key was supplied.
    #[error("no feed source configured (provide a CSV manifest or a catalog API key)")]
    NoSource,

    #[error("invalid configuration value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Failure of one feed source to produce its feed list.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A manifest row that cannot become a feed. Logged and skipped.
    #[error("malformed manifest row {line}: {reason}")]
    MalformedRow { line: u64, reason: String },

    /// The catalog rejected (or never received) the API key.
    #[error("catalog authentication failed: {0}")]
    Auth(String),

    #[error("cannot read manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("catalog request failed: {0}")]
    Catalog(String),
}

/// Failure to materialize one feed on disk.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("invalid URL `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("realtime snapshot from {url} is not a GTFS-RT message: {message}")]
    InvalidSnapshot { url: String, message: String },

    /// Another feed in the run already owns the directory this one maps to.
    #[error("feed {region_id} maps to {directory}, already used by feed {owner}")]
    DirectoryClash {
        region_id: String,
        directory: PathBuf,
        owner: String,
    },

    #[error("download task aborted: {0}")]
    Aborted(String),
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Timeouts, connection failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Timeout { .. } | DownloadError::Http { .. } => true,
            DownloadError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failure of the external validator for one feed.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The feed has nothing the validator could run against.
    #[error("feed {0} has no realtime snapshots to validate")]
    Unavailable(String),

    #[error("cannot start validator `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("validator exited with {status} for feed {region_id}")]
    Failed { region_id: String, status: String },
}

/// Errors raised while reading validator results.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The feed root itself could not be enumerated. Fatal.
    #[error("cannot enumerate feed root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One results file is unreadable. Recorded against its feed.
    #[error("cannot read results file {path}: {message}")]
    ResultsFile { path: PathBuf, message: String },
}

/// Failure to write one output format.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("workbook export failed: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot create working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}
