//! CSV export of assembled report tables.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::ReportError;
use crate::ga4::ReportSource;
use crate::query::QuerySpec;
use crate::report::{ReportFetcher, ReportTable};

/// Column rewritten by date normalization.
const DATE_COLUMN: &str = "date";

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Rewrite GA4 `YYYYMMDD` dates to `YYYY-MM-DD`.
    pub normalize_dates: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            normalize_dates: true,
        }
    }
}

/// Write the table as CSV: header row, then one record per row carrying the
/// values as GA4 sent them.
pub fn write_csv<W: Write>(table: &ReportTable, writer: W) -> Result<(), ReportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(table.columns())?;
    for row in table.rows() {
        csv_writer.write_record(row.raw_values())?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write the table to `path`, creating missing parent directories.
pub fn write_csv_file(table: &ReportTable, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_csv(table, file)
}

impl<S: ReportSource> ReportFetcher<S> {
    /// Fetch the full report and write it to `destination` as CSV.
    pub async fn export_report(
        &self,
        spec: &QuerySpec,
        destination: &Path,
        options: ExportOptions,
    ) -> Result<(), ReportError> {
        let mut table = self.fetch_report(spec).await?;
        if table.is_empty() {
            tracing::warn!("Report returned no rows, writing header only");
        }

        if options.normalize_dates {
            let converted = table.normalize_dates(DATE_COLUMN);
            if converted > 0 {
                tracing::debug!(rows = converted, "Normalized date column");
            }
        }

        write_csv_file(&table, destination)?;
        tracing::info!(
            path = %destination.display(),
            rows = table.len(),
            "Report exported"
        );
        Ok(())
    }
}
