//! Report serialization.
//!
//! Both formats are views of the same [`AnalysisOutput`]; nothing here
//! computes anything beyond layout.

mod workbook;

pub use workbook::export_workbook;

use crate::analyzers::types::AnalysisOutput;
use crate::error::ExportError;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Writes the report as pretty-printed UTF-8 JSON.
pub fn export_json(output: &AnalysisOutput, path: &Path) -> Result<(), ExportError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, output)?;
    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), ExportError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| ExportError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Outcome of each requested format. One failing never stops the other.
#[derive(Debug)]
pub struct ExportReport {
    pub json: Result<PathBuf, ExportError>,
    /// `None` when no workbook was requested.
    pub workbook: Option<Result<PathBuf, ExportError>>,
}

impl ExportReport {
    pub fn is_ok(&self) -> bool {
        self.json.is_ok() && !matches!(self.workbook, Some(Err(_)))
    }
}

pub fn export_all(
    output: &AnalysisOutput,
    json_path: &Path,
    workbook_path: Option<&Path>,
) -> ExportReport {
    let json = export_json(output, json_path).map(|()| json_path.to_path_buf());
    log_export("json", json_path, &json);

    let workbook = workbook_path.map(|path| {
        let result = export_workbook(output, path).map(|()| path.to_path_buf());
        log_export("workbook", path, &result);
        result
    });

    ExportReport { json, workbook }
}

fn log_export(format: &str, path: &Path, result: &Result<PathBuf, ExportError>) {
    match result {
        Ok(_) => info!(format, path = %path.display(), "Report written"),
        Err(e) => error!(format, path = %path.display(), error = %e, "Report export failed"),
    }
}
