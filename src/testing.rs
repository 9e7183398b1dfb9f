//! In-memory `ReportSource` used by unit tests.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::Mutex;

use crate::error::FetchError;
use crate::ga4::{
    CellWire, DimensionHeader, MetricHeader, MetricType, ReportSource, Row, RunReportRequest,
    RunReportResponse,
};

type ErrorFactory = Box<dyn Fn() -> FetchError + Send + Sync>;

/// Serves a fixed `date`/`sessions` result set, honouring limit and offset.
pub struct FakeSource {
    rows: Vec<(String, i64)>,
    report_row_count: bool,
    failure: Option<(usize, ErrorFactory)>,
    requests: Mutex<Vec<RunReportRequest>>,
}

impl FakeSource {
    /// `total` rows with consecutive dates starting 2025-01-01.
    pub fn with_rows(total: usize) -> Self {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date");
        let rows = (0..total)
            .map(|i| {
                let date = start + Duration::days(i as i64);
                (date.format("%Y%m%d").to_string(), (i as i64 + 1) * 10)
            })
            .collect();
        Self::from_rows(rows)
    }

    pub fn from_rows(rows: Vec<(String, i64)>) -> Self {
        Self {
            rows,
            report_row_count: true,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Omit the `rowCount` hint from responses.
    pub fn without_row_count(mut self) -> Self {
        self.report_row_count = false;
        self
    }

    /// Fail the request with the given zero-based index.
    pub fn fail_on_request<F>(mut self, index: usize, error: F) -> Self
    where
        F: Fn() -> FetchError + Send + Sync + 'static,
    {
        self.failure = Some((index, Box::new(error)));
        self
    }

    pub fn row_dates(&self) -> Vec<String> {
        self.rows.iter().map(|(date, _)| date.clone()).collect()
    }

    pub fn requests(&self) -> Vec<RunReportRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.requests().iter().map(|r| r.offset).collect()
    }
}

#[async_trait]
impl ReportSource for FakeSource {
    async fn run_report(
        &self,
        request: &RunReportRequest,
    ) -> Result<RunReportResponse, FetchError> {
        let index = {
            let mut requests = self.requests.lock().expect("request log poisoned");
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some((fail_at, error)) = &self.failure {
            if *fail_at == index {
                return Err(error());
            }
        }

        let start = (request.offset as usize).min(self.rows.len());
        let end = start
            .saturating_add(request.limit as usize)
            .min(self.rows.len());

        let rows = self.rows[start..end]
            .iter()
            .map(|(date, sessions)| Row {
                dimension_values: vec![CellWire {
                    value: date.clone(),
                }],
                metric_values: vec![CellWire {
                    value: sessions.to_string(),
                }],
            })
            .collect();

        Ok(RunReportResponse {
            dimension_headers: vec![DimensionHeader {
                name: "date".to_string(),
            }],
            metric_headers: vec![MetricHeader {
                name: "sessions".to_string(),
                metric_type: MetricType::TypeInteger,
            }],
            rows,
            row_count: (self.report_row_count && !self.rows.is_empty())
                .then_some(self.rows.len() as u64),
        })
    }
}
