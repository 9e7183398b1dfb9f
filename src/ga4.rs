//! Google Analytics Data API v1beta wire types and `runReport` client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::FetchError;

/// runReport request body.
///
/// `property` travels in the URL path, not in the body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReportRequest {
    #[serde(skip_serializing)]
    pub property: String,
    pub date_ranges: Vec<DateRange>,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_filter: Option<FilterExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_filter: Option<FilterExpression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_bys: Vec<OrderBy>,
    pub limit: u64,
    pub offset: u64,
    pub keep_empty_rows: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dimension {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Metric {
    pub name: String,
}

/// Boolean filter tree; exactly one member is set on the wire.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpression {
    AndGroup(FilterExpressionList),
    OrGroup(FilterExpressionList),
    Filter(Filter),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilterExpressionList {
    pub expressions: Vec<FilterExpression>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field_name: String,
    #[serde(flatten)]
    pub condition: FilterCondition,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FilterCondition {
    StringFilter(StringFilter),
    NumericFilter(NumericFilter),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StringFilter {
    pub match_type: MatchType,
    pub value: String,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Contains,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NumericFilter {
    pub operation: NumericOperation,
    pub value: NumericValue,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumericOperation {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum NumericValue {
    Int64Value(i64),
    DoubleValue(f64),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderBy {
    #[serde(flatten)]
    pub field: OrderByField,
    pub desc: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum OrderByField {
    Dimension(DimensionOrderBy),
    Metric(MetricOrderBy),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionOrderBy {
    pub dimension_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricOrderBy {
    pub metric_name: String,
}

/// runReport response. Zero-row responses omit `rows` and `rowCount`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReportResponse {
    #[serde(default)]
    pub dimension_headers: Vec<DimensionHeader>,
    #[serde(default)]
    pub metric_headers: Vec<MetricHeader>,
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Total rows in the result, regardless of limit/offset.
    #[serde(default)]
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DimensionHeader {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricHeader {
    pub name: String,
    #[serde(rename = "type", default)]
    pub metric_type: MetricType,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    #[default]
    MetricTypeUnspecified,
    TypeInteger,
    TypeFloat,
    TypeSeconds,
    TypeMilliseconds,
    TypeMinutes,
    TypeHours,
    TypeStandard,
    TypeCurrency,
    TypeFeet,
    TypeMiles,
    TypeMeters,
    TypeKilometers,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(default)]
    pub dimension_values: Vec<CellWire>,
    #[serde(default)]
    pub metric_values: Vec<CellWire>,
}

/// A single `{ "value": ... }` cell.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellWire {
    #[serde(default)]
    pub value: String,
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Anything that can answer a runReport request.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn run_report(&self, request: &RunReportRequest)
        -> Result<RunReportResponse, FetchError>;
}

/// HTTP client for the Data API.
#[derive(Clone)]
pub struct Ga4Client {
    base_url: String,
    http_client: Client,
    auth: TokenProvider,
}

impl Ga4Client {
    /// Create a new client.
    pub fn new(
        base_url: impl Into<String>,
        auth: TokenProvider,
        timeout: std::time::Duration,
    ) -> Result<Self, FetchError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::HttpClientInit(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            auth,
        })
    }

    pub fn from_config(config: &Config, auth: TokenProvider) -> Result<Self, FetchError> {
        Self::new(config.api_base_url.clone(), auth, config.timeout())
    }

    fn report_url(&self, property: &str) -> String {
        format!(
            "{}/properties/{}:runReport",
            self.base_url,
            urlencoding::encode(property)
        )
    }

    /// Execute POST request.
    async fn execute_post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        tracing::debug!(url = %url, "Data API POST request");

        let token = self.auth.get_token().await?;

        let response = self
            .http_client
            .post(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, FetchError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            tracing::trace!(body = %truncate(&body, 500), "Data API response");
            Ok(serde_json::from_str(&body)?)
        } else {
            tracing::debug!(status = %status, body = %truncate(&body, 500), "Data API error response");
            Err(classify_error(status, &body))
        }
    }
}

#[async_trait]
impl ReportSource for Ga4Client {
    async fn run_report(
        &self,
        request: &RunReportRequest,
    ) -> Result<RunReportResponse, FetchError> {
        let url = self.report_url(&request.property);
        self.execute_post(&url, request).await
    }
}

impl std::fmt::Debug for Ga4Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ga4Client")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Map a non-success response onto the error taxonomy.
fn classify_error(status: StatusCode, body: &str) -> FetchError {
    let (message, remote_status) = match serde_json::from_str::<GoogleErrorResponse>(body) {
        Ok(parsed) => (parsed.error.message, parsed.error.status),
        Err(_) => (body.to_string(), String::new()),
    };

    match (status, remote_status.as_str()) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _)
        | (_, "UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            FetchError::Authentication { status, message }
        }
        (StatusCode::BAD_REQUEST, _) | (_, "INVALID_ARGUMENT") => {
            FetchError::InvalidQuery { status, message }
        }
        _ => FetchError::Remote { status, message },
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}
