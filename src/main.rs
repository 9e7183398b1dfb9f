//! GA4 Report Exporter
//!
//! Pulls a complete Google Analytics 4 report through the Data API and
//! writes it to CSV.

mod auth;
mod config;
mod error;
mod export;
mod ga4;
mod query;
mod report;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::auth::TokenProvider;
use crate::config::Config;
use crate::export::ExportOptions;
use crate::ga4::Ga4Client;
use crate::query::{
    parse_contains, parse_metric_condition, parse_one_of, DateSpec, OrderBySpec, QuerySpec,
};
use crate::report::ReportFetcher;

#[derive(Parser, Debug)]
#[command(name = "ga4-report")]
#[command(author, version, about = "Export Google Analytics 4 reports to CSV", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Start date: YYYY-MM-DD, today, yesterday or NdaysAgo
    #[arg(long, default_value = "30daysAgo")]
    start: DateSpec,

    /// End date: YYYY-MM-DD, today, yesterday or NdaysAgo
    #[arg(long, default_value = "today")]
    end: DateSpec,

    /// Dimension names (repeatable or comma-separated)
    #[arg(long = "dimension", value_delimiter = ',', required = true)]
    dimensions: Vec<String>,

    /// Metric names (repeatable or comma-separated)
    #[arg(long = "metric", value_delimiter = ',', required = true)]
    metrics: Vec<String>,

    /// Exact-match filter, e.g. `continent=Europe,Asia` (repeats widen the set)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Substring filter, e.g. `pagePath~/blog`
    #[arg(long = "contains")]
    contains: Vec<String>,

    /// Metric condition, e.g. `sessions>=100` (operators >=, <=, >, <, =)
    #[arg(long = "metric-filter")]
    metric_filters: Vec<String>,

    /// Ordering, e.g. `sessions:desc` (defaults to the dimensions ascending)
    #[arg(long = "order-by")]
    order_bys: Vec<OrderBySpec>,

    /// Output CSV path (default: exports/<timestamp>/ga4_report.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep GA4's YYYYMMDD date format
    #[arg(long)]
    raw_dates: bool,

    /// Rows per request (overrides max_rows_per_request)
    #[arg(long)]
    page_size: Option<u64>,
}

impl Args {
    fn query_spec(&self) -> anyhow::Result<QuerySpec> {
        let mut spec = QuerySpec::new(self.start, self.end);
        for dimension in &self.dimensions {
            spec = spec.dimension(dimension.trim());
        }
        for metric in &self.metrics {
            spec = spec.metric(metric.trim());
        }

        for arg in &self.filters {
            let (dimension, filter) = parse_one_of(arg)?;
            spec = spec.with_filter(dimension, filter)?;
        }
        for arg in &self.contains {
            let (dimension, filter) = parse_contains(arg)?;
            spec = spec.with_filter(dimension, filter)?;
        }
        for arg in &self.metric_filters {
            spec = spec.metric_filter(parse_metric_condition(arg)?);
        }
        for order_by in &self.order_bys {
            spec = spec.order_by(order_by.clone());
        }

        spec.validate()?;
        Ok(spec)
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_output_path() -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    PathBuf::from("exports")
        .join(timestamp.to_string())
        .join("ga4_report.csv")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    init_tracing(args.debug || config.debug);

    tracing::debug!(
        config = %args.config.display(),
        base_url = %config.api_base_url,
        "GA4 report exporter starting"
    );

    let spec = args.query_spec().context("invalid report query")?;

    let auth = TokenProvider::from_config(&config).context("failed to set up credentials")?;
    let client = Ga4Client::from_config(&config, auth)?;
    let property = config.property()?;
    let fetcher = ReportFetcher::new(client, property)
        .with_page_size(args.page_size.unwrap_or(config.max_rows_per_request));
    tracing::debug!(page_size = fetcher.page_size(), "Report fetcher ready");

    let output = args.output.clone().unwrap_or_else(default_output_path);
    let options = ExportOptions {
        normalize_dates: !args.raw_dates,
    };

    if let Err(e) = fetcher.export_report(&spec, &output, options).await {
        tracing::error!(error = %e, "Report generation failed");
        if e.fetch_error().is_some_and(|source| source.is_authentication()) {
            tracing::error!(
                property,
                "Check the configured access token or service account key and its access to the property"
            );
        }
        return Err(e.into());
    }

    tracing::info!("Report generation completed successfully");
    Ok(())
}
