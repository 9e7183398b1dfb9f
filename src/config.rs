//! Configuration management for the GA4 report exporter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Google Analytics Data API base URL.
const DEFAULT_API_BASE_URL: &str = "https://analyticsdata.googleapis.com/v1beta";

/// Largest `limit` the Data API accepts on a single runReport call.
pub const API_ROW_LIMIT: u64 = 250_000;

pub const PROPERTY_ID_ENV: &str = "GA4_PROPERTY_ID";
pub const CREDENTIALS_PATH_ENV: &str = "GA4_CREDENTIALS_PATH";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// GA4 property identifier (the numeric part of `properties/{id}`)
    pub property_id: Option<String>,

    /// Path to the service account key JSON file
    pub credentials_path: Option<PathBuf>,

    /// Pre-issued OAuth2 access token; takes precedence over the key file
    pub access_token: Option<String>,

    /// Data API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Buffer before token expiration to refresh (seconds)
    #[serde(default = "default_token_buffer")]
    pub token_refresh_buffer_seconds: u64,

    /// Page size used for runReport pagination
    #[serde(default = "default_max_rows")]
    pub max_rows_per_request: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_token_buffer() -> u64 {
    60
}

fn default_max_rows() -> u64 {
    crate::report::MAX_ROWS_PER_REQUEST
}

impl Default for Config {
    fn default() -> Self {
        Self {
            property_id: None,
            credentials_path: None,
            access_token: None,
            api_base_url: default_api_base_url(),
            debug: false,
            timeout_seconds: default_timeout(),
            token_refresh_buffer_seconds: default_token_buffer(),
            max_rows_per_request: default_max_rows(),
        }
    }
}

impl Config {
    /// Load configuration from a file path, falling back to the environment
    /// (and a `.env` file) for the property and credentials.
    ///
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Fill unset fields from environment lookups.
    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if is_blank(self.property_id.as_deref()) {
            if let Some(id) = non_empty(PROPERTY_ID_ENV) {
                self.property_id = Some(id.trim().to_string());
            }
        }
        if self.credentials_path.is_none() {
            if let Some(path) = non_empty(CREDENTIALS_PATH_ENV) {
                self.credentials_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        let property_id = match self.property_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(ConfigError::MissingField(format!(
                    "property_id (or {})",
                    PROPERTY_ID_ENV
                )))
            }
        };
        if !property_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid(format!(
                "property_id '{}' must be numeric",
                property_id
            )));
        }

        if is_blank(self.access_token.as_deref()) && self.credentials_path.is_none() {
            return Err(ConfigError::MissingField(format!(
                "credentials_path (or {}) or access_token",
                CREDENTIALS_PATH_ENV
            )));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "api_base_url '{}' must be an http(s) URL",
                self.api_base_url
            )));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.max_rows_per_request == 0 || self.max_rows_per_request > API_ROW_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_rows_per_request must be between 1 and {}",
                API_ROW_LIMIT
            )));
        }

        Ok(())
    }

    /// Get the validated property identifier.
    pub fn property(&self) -> Result<&str, ConfigError> {
        self.property_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::MissingField("property_id".into()))
    }

    /// Get timeout as Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Get token refresh buffer as chrono Duration.
    pub fn token_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_refresh_buffer_seconds as i64)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
