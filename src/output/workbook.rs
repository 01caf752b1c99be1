use crate::analyzers::types::{AnalysisOutput, FeedFailure};
use crate::error::ExportError;
use crate::output::ensure_parent;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::Path;

/// Writes the report as an xlsx workbook with one sheet per view.
pub fn export_workbook(output: &AnalysisOutput, path: &Path) -> Result<(), ExportError> {
    ensure_parent(path)?;
    let header = Format::new().set_bold();
    let mut workbook = Workbook::new();

    summary_sheet(workbook.add_worksheet(), output, &header)?;
    feeds_sheet(workbook.add_worksheet(), output, &header)?;
    codes_sheet(workbook.add_worksheet(), output, &header)?;
    not_validated_sheet(workbook.add_worksheet(), output, &header)?;
    failures_sheet(workbook.add_worksheet(), output, &header)?;

    workbook.save(path)?;
    Ok(())
}

fn header_row(sheet: &mut Worksheet, titles: &[&str], format: &Format) -> Result<(), XlsxError> {
    for (col, title) in titles.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, format)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn summary_sheet(
    sheet: &mut Worksheet,
    output: &AnalysisOutput,
    header: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name("Summary")?;
    header_row(sheet, &["Metric", "Value"], header)?;
    sheet.set_column_width(0, 32)?;

    let t = &output.totals;
    let counts = [
        ("Feeds discovered", t.feeds_discovered),
        ("Feeds analyzed", t.feeds_analyzed),
        ("Feeds not validated", t.feeds_not_validated),
        ("Feeds with analysis errors", t.feeds_with_analysis_errors),
        ("Errors", t.errors),
        ("Warnings", t.warnings),
        ("Feeds with errors", t.feeds_with_errors),
        ("Feeds with warnings", t.feeds_with_warnings),
    ];

    let mut row = 1;
    sheet.write_string(row, 0, "Generated at")?;
    sheet.write_string(row, 1, output.generated_at.to_rfc3339())?;
    row += 1;
    sheet.write_string(row, 0, "Feed root")?;
    sheet.write_string(row, 1, output.root.display().to_string())?;
    for (label, value) in counts {
        row += 1;
        sheet.write_string(row, 0, label)?;
        sheet.write_number(row, 1, value as f64)?;
    }
    row += 1;
    sheet.write_string(row, 0, "Mean errors per feed")?;
    sheet.write_number(row, 1, t.mean_errors_per_feed)?;
    row += 1;
    sheet.write_string(row, 0, "Std dev of errors per feed")?;
    sheet.write_number(row, 1, t.stddev_errors_per_feed)?;
    row += 1;
    sheet.write_string(row, 0, "Ignored errors")?;
    sheet.write_string(row, 1, join(&output.ignored.errors))?;
    row += 1;
    sheet.write_string(row, 0, "Ignored warnings")?;
    sheet.write_string(row, 1, join(&output.ignored.warnings))?;
    Ok(())
}

fn join<'a>(codes: impl IntoIterator<Item = &'a String>) -> String {
    codes.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn feeds_sheet(
    sheet: &mut Worksheet,
    output: &AnalysisOutput,
    header: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name("Feeds")?;
    header_row(
        sheet,
        &[
            "Region ID",
            "Title",
            "Grade",
            "Snapshots",
            "Clean snapshots",
            "Errors",
            "Warnings",
            "Error codes",
            "Warning codes",
        ],
        header,
    )?;
    sheet.set_column_width(1, 30)?;

    for (i, feed) in output.feeds.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &feed.region_id)?;
        sheet.write_string(row, 1, &feed.title)?;
        sheet.write_string(row, 2, &feed.grade)?;
        sheet.write_number(row, 3, feed.snapshots as f64)?;
        sheet.write_number(row, 4, feed.clean_snapshots as f64)?;
        sheet.write_number(row, 5, feed.error_count as f64)?;
        sheet.write_number(row, 6, feed.warning_count as f64)?;
        sheet.write_string(row, 7, join(feed.error_codes.keys()))?;
        sheet.write_string(row, 8, join(feed.warning_codes.keys()))?;
    }
    Ok(())
}

fn codes_sheet(
    sheet: &mut Worksheet,
    output: &AnalysisOutput,
    header: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name("Codes")?;
    header_row(
        sheet,
        &["Code", "Severity", "Title", "Occurrences", "Feeds", "Share of feeds"],
        header,
    )?;
    sheet.set_column_width(2, 60)?;

    for (i, code) in output.codes.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &code.code)?;
        sheet.write_string(row, 1, code.severity.to_string())?;
        sheet.write_string(row, 2, &code.title)?;
        sheet.write_number(row, 3, code.occurrences as f64)?;
        sheet.write_number(row, 4, code.feeds as f64)?;
        sheet.write_number(row, 5, code.feed_share)?;
    }
    Ok(())
}

fn not_validated_sheet(
    sheet: &mut Worksheet,
    output: &AnalysisOutput,
    header: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name("Not Validated")?;
    header_row(sheet, &["Region ID", "Title"], header)?;

    for (i, feed) in output.not_validated.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &feed.region_id)?;
        sheet.write_string(row, 1, &feed.title)?;
    }
    Ok(())
}

fn failures_sheet(
    sheet: &mut Worksheet,
    output: &AnalysisOutput,
    header: &Format,
) -> Result<(), XlsxError> {
    sheet.set_name("Failures")?;
    header_row(sheet, &["Region ID / Source", "Title", "Stage", "Reason"], header)?;
    sheet.set_column_width(3, 80)?;

    let feed_failures = output.run_failures.iter().chain(&output.analysis_errors);
    let mut row = 0;
    for FeedFailure {
        region_id,
        title,
        stage,
        reason,
    } in feed_failures
    {
        row += 1;
        sheet.write_string(row, 0, region_id)?;
        sheet.write_string(row, 1, title)?;
        sheet.write_string(row, 2, format!("{stage:?}").to_lowercase())?;
        sheet.write_string(row, 3, reason)?;
    }
    for failure in &output.source_failures {
        row += 1;
        sheet.write_string(row, 0, &failure.source)?;
        sheet.write_string(row, 2, "source")?;
        sheet.write_string(row, 3, &failure.reason)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_output;
    use std::fs;

    #[test]
    fn test_workbook_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/analysis-summary.xlsx");

        export_workbook(&sample_output(), &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn test_empty_report_still_has_every_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.xlsx");
        let mut output = sample_output();
        output.feeds.clear();
        output.codes.clear();
        output.not_validated.clear();
        output.analysis_errors.clear();
        output.run_failures.clear();
        output.source_failures.clear();

        assert!(export_workbook(&output, &path).is_ok());
        assert!(path.is_file());
    }
}
