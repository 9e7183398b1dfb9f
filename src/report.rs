//! Paginated report fetching and row normalization.

use chrono::NaiveDate;
use std::fmt;

use crate::config::API_ROW_LIMIT;
use crate::error::ReportError;
use crate::ga4::{MetricType, ReportSource, RunReportResponse};
use crate::query::QuerySpec;

/// Default page size for runReport pagination.
pub const MAX_ROWS_PER_REQUEST: u64 = 100_000;

/// A single table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl CellValue {
    /// Type a raw metric value according to its header. Values that do not
    /// parse are kept as text.
    pub fn from_metric(raw: &str, metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::TypeInteger => raw
                .parse()
                .map(CellValue::Integer)
                .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
            MetricType::MetricTypeUnspecified | MetricType::Other => {
                CellValue::Text(raw.to_string())
            }
            _ => raw
                .parse()
                .map(CellValue::Float)
                .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Float(x) => write!(f, "{}", x),
        }
    }
}

/// One report row: dimension values followed by metric values, typed and
/// as the text GA4 sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    values: Vec<CellValue>,
    raw: Vec<String>,
}

impl ReportRow {
    pub fn new(raw: Vec<String>, values: Vec<CellValue>) -> Self {
        Self { values, raw }
    }

    #[allow(dead_code)]
    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn raw_values(&self) -> &[String] {
        &self.raw
    }
}

/// The assembled report, rows in arrival order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportTable {
    columns: Vec<String>,
    rows: Vec<ReportRow>,
}

impl ReportTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Look up a cell by row index and column name.
    #[allow(dead_code)]
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.values.get(index)
    }

    /// Append the rows of one page, checking them against the request shape.
    /// Returns the number of rows received.
    pub fn append_page(
        &mut self,
        spec: &QuerySpec,
        response: &RunReportResponse,
    ) -> Result<usize, ReportError> {
        check_headers(
            "dimension",
            &spec.dimensions,
            response.dimension_headers.iter().map(|h| h.name.as_str()),
        )?;
        check_headers(
            "metric",
            &spec.metrics,
            response.metric_headers.iter().map(|h| h.name.as_str()),
        )?;

        let metric_types: Vec<MetricType> = (0..spec.metrics.len())
            .map(|i| {
                response
                    .metric_headers
                    .get(i)
                    .map(|h| h.metric_type)
                    .unwrap_or_default()
            })
            .collect();

        self.rows.reserve(response.rows.len());
        for row in &response.rows {
            if row.dimension_values.len() != spec.dimensions.len()
                || row.metric_values.len() != spec.metrics.len()
            {
                return Err(ReportError::MalformedResponse(format!(
                    "row {} has {} dimension and {} metric values, expected {} and {}",
                    self.rows.len(),
                    row.dimension_values.len(),
                    row.metric_values.len(),
                    spec.dimensions.len(),
                    spec.metrics.len()
                )));
            }

            let raw = row
                .dimension_values
                .iter()
                .chain(&row.metric_values)
                .map(|cell| cell.value.clone())
                .collect();
            let values = row
                .dimension_values
                .iter()
                .map(|cell| CellValue::Text(cell.value.clone()))
                .chain(
                    row.metric_values
                        .iter()
                        .zip(&metric_types)
                        .map(|(cell, t)| CellValue::from_metric(&cell.value, *t)),
                )
                .collect();
            self.rows.push(ReportRow::new(raw, values));
        }

        Ok(response.rows.len())
    }

    /// Rewrite `YYYYMMDD` values of the named column to `YYYY-MM-DD`.
    /// Values in any other form are left untouched.
    pub fn normalize_dates(&mut self, column: &str) -> usize {
        let Some(index) = self.column_index(column) else {
            return 0;
        };

        let mut converted = 0;
        for row in &mut self.rows {
            if let Some(CellValue::Text(text)) = row.values.get_mut(index) {
                if let Ok(date) = NaiveDate::parse_from_str(text, "%Y%m%d") {
                    *text = date.format("%Y-%m-%d").to_string();
                    row.raw[index] = text.clone();
                    converted += 1;
                }
            }
        }
        converted
    }
}

/// Headers are optional on the wire but must match the request when sent.
fn check_headers<'a>(
    kind: &str,
    requested: &[String],
    received: impl Iterator<Item = &'a str>,
) -> Result<(), ReportError> {
    let received: Vec<&str> = received.collect();
    if received.is_empty() {
        return Ok(());
    }
    if received.len() != requested.len()
        || received.iter().zip(requested).any(|(got, want)| *got != want.as_str())
    {
        return Err(ReportError::MalformedResponse(format!(
            "{} headers {:?} do not match requested {:?}",
            kind, received, requested
        )));
    }
    Ok(())
}

/// Pagination cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Fetching { offset: u64 },
    Done,
}

/// Two-state pagination machine: `Fetching` self-loops while more rows may
/// exist and moves to `Done` on a short page or once the row-count hint is
/// reached.
#[derive(Debug, Clone)]
pub struct Pagination {
    page_size: u64,
    state: FetchState,
}

impl Pagination {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            state: FetchState::Fetching { offset: 0 },
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Record a received page.
    pub fn advance(&mut self, rows_returned: u64, row_count: Option<u64>) -> FetchState {
        let FetchState::Fetching { offset } = self.state else {
            return FetchState::Done;
        };

        let next_offset = offset + rows_returned;
        let short_page = rows_returned < self.page_size;
        let hint_reached = row_count.is_some_and(|total| next_offset >= total);

        self.state = if short_page || hint_reached {
            FetchState::Done
        } else {
            FetchState::Fetching {
                offset: next_offset,
            }
        };
        self.state
    }
}

/// Fetches complete reports by walking runReport pages.
#[derive(Debug, Clone)]
pub struct ReportFetcher<S> {
    source: S,
    property: String,
    page_size: u64,
}

impl<S: ReportSource> ReportFetcher<S> {
    pub fn new(source: S, property: impl Into<String>) -> Self {
        Self {
            source,
            property: property.into(),
            page_size: MAX_ROWS_PER_REQUEST,
        }
    }

    /// Override the page size, clamped to what the API accepts.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.clamp(1, API_ROW_LIMIT);
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetch every row of the report. Pages are requested one at a time and
    /// any failure aborts the whole fetch.
    pub async fn fetch_report(&self, spec: &QuerySpec) -> Result<ReportTable, ReportError> {
        spec.validate()?;

        let mut table = ReportTable::new(spec.columns());
        let mut pagination = Pagination::new(self.page_size);

        tracing::info!(
            property = %self.property,
            start = %spec.date_range.start,
            end = %spec.date_range.end,
            dimensions = spec.dimensions.len(),
            metrics = spec.metrics.len(),
            "Starting paginated report fetch"
        );

        while let FetchState::Fetching { offset } = pagination.state() {
            let request = spec.to_request(&self.property, self.page_size, offset);
            let response = match self.source.run_report(&request).await {
                Ok(response) => response,
                Err(source) => {
                    tracing::error!(
                        offset,
                        status = ?source.status(),
                        error = %source,
                        "Report request failed"
                    );
                    return Err(ReportError::Fetch {
                        offset,
                        rows_fetched: table.len(),
                        source,
                    });
                }
            };

            let returned = table.append_page(spec, &response)?;
            tracing::info!(offset, rows = returned, total = ?response.row_count, "Fetched report page");
            pagination.advance(returned as u64, response.row_count);
        }

        tracing::info!(rows = table.len(), "Report fetch complete");
        Ok(table)
    }
}
