//! Unified error types for the GA4 report exporter.

use reqwest::StatusCode;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Authentication-related errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Token request failed with status {status}: {body}")]
    TokenRequestFailed { status: StatusCode, body: String },

    #[error("Token parse error: {0}")]
    TokenParse(String),

    #[error("Failed to read service account key: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Invalid service account key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("No credentials configured")]
    NoCredentials,

    #[error("Failed to create HTTP client: {0}")]
    HttpClientInit(String),
}

/// Errors from a single runReport round-trip.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Credential error: {0}")]
    Credentials(#[from] AuthError),

    #[error("Authentication rejected ({status}): {message}")]
    Authentication { status: StatusCode, message: String },

    #[error("Invalid query ({status}): {message}")]
    InvalidQuery { status: StatusCode, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote error ({status}): {message}")]
    Remote { status: StatusCode, message: String },

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to create HTTP client: {0}")]
    HttpClientInit(String),
}

impl FetchError {
    /// HTTP status reported by the remote service, if it answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Authentication { status, .. }
            | FetchError::InvalidQuery { status, .. }
            | FetchError::Remote { status, .. } => Some(*status),
            FetchError::Credentials(AuthError::TokenRequestFailed { status, .. }) => Some(*status),
            FetchError::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// True for rejected or unobtainable credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            FetchError::Authentication { .. } | FetchError::Credentials(_)
        )
    }
}

/// Errors surfaced by report fetching and export.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Invalid report query: {0}")]
    InvalidSpec(String),

    #[error("Request failed at offset {offset} after {rows_fetched} rows: {source}")]
    Fetch {
        offset: u64,
        rows_fetched: usize,
        source: FetchError,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// The underlying fetch failure, if the report aborted on a page request.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            ReportError::Fetch { source, .. } => Some(source),
            _ => None,
        }
    }
}
