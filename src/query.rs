//! Report query definition and its translation into runReport payloads.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ReportError;
use crate::ga4::{
    DateRange, Dimension, DimensionOrderBy, Filter, FilterCondition, FilterExpression,
    FilterExpressionList, MatchType, Metric, MetricOrderBy, NumericFilter, NumericOperation,
    NumericValue, OrderBy, OrderByField, RunReportRequest, StringFilter,
};

/// A report date, either absolute or resolved by the Data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Absolute(NaiveDate),
    Today,
    Yesterday,
    DaysAgo(u32),
}

impl DateSpec {
    pub fn as_absolute(&self) -> Option<NaiveDate> {
        match self {
            DateSpec::Absolute(date) => Some(*date),
            _ => None,
        }
    }
}

impl FromStr for DateSpec {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "today" => return Ok(DateSpec::Today),
            "yesterday" => return Ok(DateSpec::Yesterday),
            _ => {}
        }
        if let Some(days) = s.strip_suffix("daysAgo") {
            return days
                .parse::<u32>()
                .map(DateSpec::DaysAgo)
                .map_err(|_| ReportError::InvalidSpec(format!("invalid relative date '{}'", s)));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(DateSpec::Absolute)
            .map_err(|_| {
                ReportError::InvalidSpec(format!(
                    "invalid date '{}': expected YYYY-MM-DD, today, yesterday or NdaysAgo",
                    s
                ))
            })
    }
}

impl fmt::Display for DateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSpec::Absolute(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateSpec::Today => f.write_str("today"),
            DateSpec::Yesterday => f.write_str("yesterday"),
            DateSpec::DaysAgo(days) => write!(f, "{}daysAgo", days),
        }
    }
}

/// Inclusive report date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangeSpec {
    pub start: DateSpec,
    pub end: DateSpec,
}

/// Allowed values for one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionFilter {
    /// Exact match against any of the values.
    OneOf(Vec<String>),
    /// Substring match.
    Contains(String),
}

impl DimensionFilter {
    fn kind(&self) -> &'static str {
        match self {
            DimensionFilter::OneOf(_) => "exact match",
            DimensionFilter::Contains(_) => "substring match",
        }
    }

    fn to_expression(&self, dimension: &str) -> FilterExpression {
        match self {
            DimensionFilter::OneOf(values) if values.len() == 1 => {
                string_filter(dimension, MatchType::Exact, &values[0])
            }
            DimensionFilter::OneOf(values) => FilterExpression::OrGroup(FilterExpressionList {
                expressions: values
                    .iter()
                    .map(|value| string_filter(dimension, MatchType::Exact, value))
                    .collect(),
            }),
            DimensionFilter::Contains(value) => {
                string_filter(dimension, MatchType::Contains, value)
            }
        }
    }
}

fn string_filter(field: &str, match_type: MatchType, value: &str) -> FilterExpression {
    FilterExpression::Filter(Filter {
        field_name: field.to_string(),
        condition: FilterCondition::StringFilter(StringFilter {
            match_type,
            value: value.to_string(),
            case_sensitive: true,
        }),
    })
}

/// Numeric condition on a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCondition {
    pub metric: String,
    pub operation: NumericOperation,
    pub value: NumericValue,
}

/// Sort order for orderBys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBySpec {
    pub field: String,
    pub order: SortOrder,
}

impl FromStr for OrderBySpec {
    type Err = ReportError;

    /// Parses `field`, `field:asc` or `field:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, order) = match s.rsplit_once(':') {
            Some((field, dir)) => {
                let order = match dir.trim().to_ascii_lowercase().as_str() {
                    "asc" => SortOrder::Asc,
                    "desc" => SortOrder::Desc,
                    other => {
                        return Err(ReportError::InvalidSpec(format!(
                            "invalid sort direction '{}' (expected asc or desc)",
                            other
                        )))
                    }
                };
                (field, order)
            }
            None => (s, SortOrder::Asc),
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(ReportError::InvalidSpec("empty order-by field".into()));
        }
        Ok(OrderBySpec {
            field: field.to_string(),
            order,
        })
    }
}

/// Parse a `dimension=value1,value2` filter argument.
pub fn parse_one_of(arg: &str) -> Result<(String, DimensionFilter), ReportError> {
    let (dimension, values) = arg.split_once('=').ok_or_else(|| {
        ReportError::InvalidSpec(format!(
            "invalid filter '{}': expected dimension=value[,value...]",
            arg
        ))
    })?;
    let values: Vec<String> = values
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Ok((dimension.trim().to_string(), DimensionFilter::OneOf(values)))
}

/// Parse a `dimension~substring` filter argument.
pub fn parse_contains(arg: &str) -> Result<(String, DimensionFilter), ReportError> {
    let (dimension, value) = arg.split_once('~').ok_or_else(|| {
        ReportError::InvalidSpec(format!(
            "invalid filter '{}': expected dimension~substring",
            arg
        ))
    })?;
    Ok((
        dimension.trim().to_string(),
        DimensionFilter::Contains(value.to_string()),
    ))
}

/// Parse a `metric<op>value` condition such as `sessions>=100`.
/// Operators: `>=`, `<=`, `>`, `<`, `=`.
pub fn parse_metric_condition(arg: &str) -> Result<MetricCondition, ReportError> {
    const OPERATORS: [(&str, NumericOperation); 5] = [
        (">=", NumericOperation::GreaterThanOrEqual),
        ("<=", NumericOperation::LessThanOrEqual),
        (">", NumericOperation::GreaterThan),
        ("<", NumericOperation::LessThan),
        ("=", NumericOperation::Equal),
    ];

    let invalid = || {
        ReportError::InvalidSpec(format!(
            "invalid metric filter '{}': expected metric>=value (operators >=, <=, >, <, =)",
            arg
        ))
    };

    let (position, token, operation) = OPERATORS
        .iter()
        .filter_map(|(token, operation)| arg.find(token).map(|pos| (pos, *token, *operation)))
        .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
        .ok_or_else(invalid)?;

    let metric = arg[..position].trim();
    let raw = arg[position + token.len()..].trim();
    if metric.is_empty() || raw.is_empty() {
        return Err(invalid());
    }

    let value = match raw.parse::<i64>() {
        Ok(n) => NumericValue::Int64Value(n),
        Err(_) => raw
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .map(NumericValue::DoubleValue)
            .ok_or_else(invalid)?,
    };

    Ok(MetricCondition {
        metric: metric.to_string(),
        operation,
        value,
    })
}

/// Everything needed to describe one report, independent of pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub date_range: DateRangeSpec,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    /// OR within a dimension, AND across dimensions.
    pub filters: BTreeMap<String, DimensionFilter>,
    pub metric_filters: Vec<MetricCondition>,
    pub order_bys: Vec<OrderBySpec>,
}

impl QuerySpec {
    pub fn new(start: DateSpec, end: DateSpec) -> Self {
        Self {
            date_range: DateRangeSpec { start, end },
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: BTreeMap::new(),
            metric_filters: Vec::new(),
            order_bys: Vec::new(),
        }
    }

    pub fn dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(name.into());
        self
    }

    pub fn metric(mut self, name: impl Into<String>) -> Self {
        self.metrics.push(name.into());
        self
    }

    /// Add a dimension filter. A `OneOf` on a dimension that already has
    /// one widens the allowed set; mixing exact and substring filters on one
    /// dimension is rejected.
    pub fn with_filter(
        mut self,
        dimension: impl Into<String>,
        filter: DimensionFilter,
    ) -> Result<Self, ReportError> {
        let dimension = dimension.into();
        let Some(existing) = self.filters.get_mut(&dimension) else {
            self.filters.insert(dimension, filter);
            return Ok(self);
        };

        match (existing, filter) {
            (DimensionFilter::OneOf(existing), DimensionFilter::OneOf(values)) => {
                for value in values {
                    if !existing.contains(&value) {
                        existing.push(value);
                    }
                }
            }
            (existing, filter) => {
                return Err(ReportError::InvalidSpec(format!(
                    "conflicting filters on '{}': {} and {}",
                    dimension,
                    existing.kind(),
                    filter.kind()
                )));
            }
        }
        Ok(self)
    }

    pub fn metric_filter(mut self, condition: MetricCondition) -> Self {
        self.metric_filters.push(condition);
        self
    }

    pub fn order_by(mut self, order_by: OrderBySpec) -> Self {
        self.order_bys.push(order_by);
        self
    }

    /// Output columns: dimensions followed by metrics, in request order.
    pub fn columns(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .chain(self.metrics.iter())
            .cloned()
            .collect()
    }

    /// Local checks that do not need the remote schema.
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.dimensions.is_empty() {
            return Err(ReportError::InvalidSpec(
                "at least one dimension is required".into(),
            ));
        }
        if self.metrics.is_empty() {
            return Err(ReportError::InvalidSpec(
                "at least one metric is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for column in self.dimensions.iter().chain(self.metrics.iter()) {
            if column.trim().is_empty() {
                return Err(ReportError::InvalidSpec("empty field name".into()));
            }
            if !seen.insert(column.as_str()) {
                return Err(ReportError::InvalidSpec(format!(
                    "field '{}' requested more than once",
                    column
                )));
            }
        }

        for (dimension, filter) in &self.filters {
            if let DimensionFilter::OneOf(values) = filter {
                if values.is_empty() {
                    return Err(ReportError::InvalidSpec(format!(
                        "filter on '{}' has no values",
                        dimension
                    )));
                }
            }
        }

        if let (Some(start), Some(end)) = (
            self.date_range.start.as_absolute(),
            self.date_range.end.as_absolute(),
        ) {
            if start > end {
                return Err(ReportError::InvalidSpec(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }

        Ok(())
    }

    /// Fold the filters mapping into an AND of per-dimension ORs.
    pub fn dimension_filter_expression(&self) -> Option<FilterExpression> {
        if self.filters.is_empty() {
            return None;
        }
        Some(FilterExpression::AndGroup(FilterExpressionList {
            expressions: self
                .filters
                .iter()
                .map(|(dimension, filter)| filter.to_expression(dimension))
                .collect(),
        }))
    }

    pub fn metric_filter_expression(&self) -> Option<FilterExpression> {
        if self.metric_filters.is_empty() {
            return None;
        }
        Some(FilterExpression::AndGroup(FilterExpressionList {
            expressions: self
                .metric_filters
                .iter()
                .map(|condition| {
                    FilterExpression::Filter(Filter {
                        field_name: condition.metric.clone(),
                        condition: FilterCondition::NumericFilter(NumericFilter {
                            operation: condition.operation,
                            value: condition.value,
                        }),
                    })
                })
                .collect(),
        }))
    }

    /// Order-bys for the request. Without explicit ordering the rows are
    /// ordered by the requested dimensions so offsets address a stable order.
    pub fn request_order_bys(&self) -> Vec<OrderBy> {
        if self.order_bys.is_empty() {
            return self
                .dimensions
                .iter()
                .map(|dimension| OrderBy {
                    field: OrderByField::Dimension(DimensionOrderBy {
                        dimension_name: dimension.clone(),
                    }),
                    desc: false,
                })
                .collect();
        }

        self.order_bys
            .iter()
            .map(|spec| {
                let field = if self.metrics.contains(&spec.field) {
                    OrderByField::Metric(MetricOrderBy {
                        metric_name: spec.field.clone(),
                    })
                } else {
                    OrderByField::Dimension(DimensionOrderBy {
                        dimension_name: spec.field.clone(),
                    })
                };
                OrderBy {
                    field,
                    desc: spec.order == SortOrder::Desc,
                }
            })
            .collect()
    }

    /// Build the request for one page.
    pub fn to_request(&self, property: &str, limit: u64, offset: u64) -> RunReportRequest {
        RunReportRequest {
            property: property.to_string(),
            date_ranges: vec![DateRange {
                start_date: self.date_range.start.to_string(),
                end_date: self.date_range.end.to_string(),
            }],
            dimensions: self
                .dimensions
                .iter()
                .map(|name| Dimension { name: name.clone() })
                .collect(),
            metrics: self
                .metrics
                .iter()
                .map(|name| Metric { name: name.clone() })
                .collect(),
            dimension_filter: self.dimension_filter_expression(),
            metric_filter: self.metric_filter_expression(),
            order_bys: self.request_order_bys(),
            limit,
            offset,
            keep_empty_rows: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_spec() -> QuerySpec {
        QuerySpec::new(DateSpec::DaysAgo(30), DateSpec::Today)
            .dimension("date")
            .metric("sessions")
    }

    #[test]
    fn test_date_spec_parsing() {
        assert_eq!("today".parse::<DateSpec>().unwrap(), DateSpec::Today);
        assert_eq!("yesterday".parse::<DateSpec>().unwrap(), DateSpec::Yesterday);
        assert_eq!("30daysAgo".parse::<DateSpec>().unwrap(), DateSpec::DaysAgo(30));
        assert_eq!(
            "2025-06-01".parse::<DateSpec>().unwrap(),
            DateSpec::Absolute(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
        );
        assert!("xdaysAgo".parse::<DateSpec>().is_err());
        assert!("2025/06/01".parse::<DateSpec>().is_err());
    }

    #[test]
    fn test_date_spec_display() {
        assert_eq!(DateSpec::DaysAgo(7).to_string(), "7daysAgo");
        assert_eq!(
            DateSpec::Absolute(NaiveDate::from_ymd_opt(2025, 1, 9).unwrap()).to_string(),
            "2025-01-09"
        );
    }

    #[test]
    fn test_filter_translation_and_of_ors() {
        let spec = base_spec()
            .dimension("continent")
            .dimension("deviceCategory")
            .with_filter(
                "continent",
                DimensionFilter::OneOf(vec!["Europe".into(), "Asia".into()]),
            )
            .unwrap()
            .with_filter("deviceCategory", DimensionFilter::OneOf(vec!["mobile".into()]))
            .unwrap();

        let request = spec.to_request("123", 100, 0);
        let value = serde_json::to_value(&request).unwrap();

        let exact = |field: &str, value: &str| {
            json!({"filter": {
                "fieldName": field,
                "stringFilter": {"matchType": "EXACT", "value": value, "caseSensitive": true}
            }})
        };
        assert_eq!(
            value["dimensionFilter"],
            json!({"andGroup": {"expressions": [
                {"orGroup": {"expressions": [
                    exact("continent", "Europe"),
                    exact("continent", "Asia")
                ]}},
                exact("deviceCategory", "mobile")
            ]}})
        );
    }

    #[test]
    fn test_repeated_one_of_widens_allowed_set() {
        let spec = base_spec()
            .with_filter("country", DimensionFilter::OneOf(vec!["France".into()]))
            .unwrap()
            .with_filter(
                "country",
                DimensionFilter::OneOf(vec!["Spain".into(), "France".into()]),
            )
            .unwrap();
        assert_eq!(
            spec.filters["country"],
            DimensionFilter::OneOf(vec!["France".into(), "Spain".into()])
        );
    }

    #[test]
    fn test_mixed_filter_kinds_on_one_dimension_rejected() {
        let err = base_spec()
            .with_filter("pagePath", DimensionFilter::OneOf(vec!["/".into()]))
            .unwrap()
            .with_filter("pagePath", DimensionFilter::Contains("/blog".into()))
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidSpec(_)));
        assert!(err.to_string().contains("conflicting filters on 'pagePath'"));

        let err = base_spec()
            .with_filter("pagePath", DimensionFilter::Contains("/blog".into()))
            .unwrap()
            .with_filter("pagePath", DimensionFilter::Contains("/news".into()))
            .unwrap_err();
        assert!(err.to_string().contains("conflicting filters"));
    }

    #[test]
    fn test_contains_filter() {
        let spec = base_spec()
            .with_filter("pagePath", DimensionFilter::Contains("/blog".into()))
            .unwrap();
        let value = serde_json::to_value(spec.dimension_filter_expression()).unwrap();
        assert_eq!(
            value["andGroup"]["expressions"][0]["filter"]["stringFilter"]["matchType"],
            "CONTAINS"
        );
    }

    #[test]
    fn test_no_filters_omitted() {
        let value = serde_json::to_value(base_spec().to_request("123", 10, 0)).unwrap();
        assert!(value.get("dimensionFilter").is_none());
        assert!(value.get("metricFilter").is_none());
    }

    #[test]
    fn test_metric_filter() {
        let spec = base_spec()
            .metric_filter(parse_metric_condition("sessions>100").unwrap())
            .metric_filter(parse_metric_condition("bounceRate<=0.5").unwrap());
        let value = serde_json::to_value(spec.to_request("123", 10, 0)).unwrap();
        assert_eq!(
            value["metricFilter"],
            json!({"andGroup": {"expressions": [
                {"filter": {
                    "fieldName": "sessions",
                    "numericFilter": {"operation": "GREATER_THAN", "value": {"int64Value": 100}}
                }},
                {"filter": {
                    "fieldName": "bounceRate",
                    "numericFilter": {"operation": "LESS_THAN_OR_EQUAL", "value": {"doubleValue": 0.5}}
                }}
            ]}})
        );
    }

    #[test]
    fn test_metric_condition_parsing() {
        let condition = parse_metric_condition("sessions >= 100").unwrap();
        assert_eq!(condition.metric, "sessions");
        assert_eq!(condition.operation, NumericOperation::GreaterThanOrEqual);
        assert_eq!(condition.value, NumericValue::Int64Value(100));

        let condition = parse_metric_condition("screenPageViews=3").unwrap();
        assert_eq!(condition.operation, NumericOperation::Equal);

        let condition = parse_metric_condition("averageSessionDuration<12.5").unwrap();
        assert_eq!(condition.operation, NumericOperation::LessThan);
        assert_eq!(condition.value, NumericValue::DoubleValue(12.5));

        assert!(parse_metric_condition("sessions").is_err());
        assert!(parse_metric_condition(">=100").is_err());
        assert!(parse_metric_condition("sessions>=").is_err());
        assert!(parse_metric_condition("sessions>=many").is_err());
    }

    #[test]
    fn test_default_order_by_dimensions() {
        let spec = base_spec().dimension("deviceCategory");
        let value = serde_json::to_value(spec.request_order_bys()).unwrap();
        assert_eq!(
            value,
            json!([
                {"dimension": {"dimensionName": "date"}, "desc": false},
                {"dimension": {"dimensionName": "deviceCategory"}, "desc": false}
            ])
        );
    }

    #[test]
    fn test_explicit_order_by_metric_and_dimension() {
        let spec = base_spec()
            .order_by("sessions:desc".parse().unwrap())
            .order_by("date:asc".parse().unwrap());
        let value = serde_json::to_value(spec.request_order_bys()).unwrap();
        assert_eq!(
            value,
            json!([
                {"metric": {"metricName": "sessions"}, "desc": true},
                {"dimension": {"dimensionName": "date"}, "desc": false}
            ])
        );
    }

    #[test]
    fn test_order_by_parsing() {
        let spec: OrderBySpec = "sessions:desc".parse().unwrap();
        assert_eq!(spec.field, "sessions");
        assert_eq!(spec.order, SortOrder::Desc);

        let spec: OrderBySpec = "date".parse().unwrap();
        assert_eq!(spec.order, SortOrder::Asc);

        assert!("date:sideways".parse::<OrderBySpec>().is_err());
        assert!(":desc".parse::<OrderBySpec>().is_err());
    }

    #[test]
    fn test_filter_arg_parsing() {
        let (dimension, filter) = parse_one_of("continent=Europe, Asia").unwrap();
        assert_eq!(dimension, "continent");
        assert_eq!(
            filter,
            DimensionFilter::OneOf(vec!["Europe".into(), "Asia".into()])
        );

        let (dimension, filter) = parse_contains("pagePath~/blog").unwrap();
        assert_eq!(dimension, "pagePath");
        assert_eq!(filter, DimensionFilter::Contains("/blog".into()));

        assert!(parse_one_of("continent").is_err());
        assert!(parse_contains("pagePath=/blog").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(base_spec().validate().is_ok());

        let no_metrics = QuerySpec::new(DateSpec::Today, DateSpec::Today).dimension("date");
        assert!(no_metrics.validate().is_err());

        let no_dimensions = QuerySpec::new(DateSpec::Today, DateSpec::Today).metric("sessions");
        assert!(no_dimensions.validate().is_err());

        let duplicate = base_spec().dimension("date");
        let err = duplicate.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let empty_filter = base_spec()
            .with_filter("country", DimensionFilter::OneOf(vec![]))
            .unwrap();
        assert!(empty_filter.validate().is_err());
    }

    #[test]
    fn test_validation_date_order() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let spec = QuerySpec::new(DateSpec::Absolute(start), DateSpec::Absolute(end))
            .dimension("date")
            .metric("sessions");
        assert!(spec.validate().is_err());

        let same_day = QuerySpec::new(DateSpec::Absolute(end), DateSpec::Absolute(end))
            .dimension("date")
            .metric("sessions");
        assert!(same_day.validate().is_ok());

        let relative = QuerySpec::new(DateSpec::Absolute(start), DateSpec::Yesterday)
            .dimension("date")
            .metric("sessions");
        assert!(relative.validate().is_ok());
    }

    #[test]
    fn test_request_pagination_fields() {
        let request = base_spec().to_request("123", 500, 1500);
        assert_eq!(request.property, "123");
        assert_eq!(request.limit, 500);
        assert_eq!(request.offset, 1500);
        assert!(request.keep_empty_rows);
        assert_eq!(request.date_ranges[0].start_date, "30daysAgo");
        assert_eq!(request.date_ranges[0].end_date, "today");
    }
}
