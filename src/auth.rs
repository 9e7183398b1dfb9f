//! OAuth2 service account authentication for the Google Analytics Data API.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::AuthError;

const ANALYTICS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Service account key file as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, AuthError> {
        let key: Self =
            serde_json::from_str(content).map_err(|e| AuthError::InvalidKey(e.to_string()))?;

        if let Some(ref key_type) = key.key_type {
            if key_type != "service_account" {
                return Err(AuthError::InvalidKey(format!(
                    "unsupported key type '{}'",
                    key_type
                )));
            }
        }
        if key.client_email.is_empty() {
            return Err(AuthError::InvalidKey("client_email is empty".into()));
        }
        Ok(key)
    }
}

/// Claims of the signed JWT exchanged for an access token.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// OAuth2 token response from Google.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: String,
    expires_in: i64,
}

/// Cached token with expiration tracking.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Check if token is expired (with buffer).
    fn is_expired(&self, buffer: Duration) -> bool {
        Utc::now() + buffer >= self.expires_at
    }
}

#[derive(Clone)]
enum Credentials {
    Static(String),
    ServiceAccount(Arc<ServiceAccountKey>),
}

/// Supplies bearer tokens for Data API calls.
/// Either hands out a pre-issued token or performs the service account
/// JWT bearer exchange, caching the result until shortly before expiry.
#[derive(Clone)]
pub struct TokenProvider {
    credentials: Credentials,
    http_client: Client,
    token_buffer: Duration,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl TokenProvider {
    /// Build a provider from configuration. A configured `access_token`
    /// takes precedence over `credentials_path`.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        match (&config.access_token, &config.credentials_path) {
            (Some(token), _) if !token.trim().is_empty() => Self::new(
                Credentials::Static(token.clone()),
                config.timeout(),
                config.token_buffer(),
            ),
            (_, Some(path)) => Self::with_service_account(
                ServiceAccountKey::from_file(path)?,
                config.timeout(),
                config.token_buffer(),
            ),
            _ => Err(AuthError::NoCredentials),
        }
    }

    pub fn with_static_token(token: impl Into<String>) -> Result<Self, AuthError> {
        Self::new(
            Credentials::Static(token.into()),
            std::time::Duration::from_secs(30),
            Duration::zero(),
        )
    }

    pub fn with_service_account(
        key: ServiceAccountKey,
        timeout: std::time::Duration,
        token_buffer: Duration,
    ) -> Result<Self, AuthError> {
        Self::new(Credentials::ServiceAccount(Arc::new(key)), timeout, token_buffer)
    }

    fn new(
        credentials: Credentials,
        timeout: std::time::Duration,
        token_buffer: Duration,
    ) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::HttpClientInit(e.to_string()))?;

        Ok(Self {
            credentials,
            http_client,
            token_buffer,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let key = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(key) => key,
        };

        {
            let cache = self.token_cache.read().await;
            if let Some(ref cached) = *cache {
                if !cached.is_expired(self.token_buffer) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        self.fetch_token(key).await
    }

    /// Exchange a freshly signed assertion for an access token.
    async fn fetch_token(&self, key: &ServiceAccountKey) -> Result<String, AuthError> {
        let assertion = sign_assertion(key, Utc::now())?;
        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode(JWT_BEARER_GRANT),
            urlencoding::encode(&assertion)
        );

        tracing::debug!(
            token_uri = %key.token_uri,
            client_email = %key.client_email,
            "Requesting access token"
        );

        let response = self
            .http_client
            .post(&key.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token request failed");
            return Err(AuthError::TokenRequestFailed { status, body });
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            AuthError::TokenParse(format!("Failed to parse token response: {}", e))
        })?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        tracing::debug!(
            expires_at = %expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
            "Access token acquired"
        );

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                access_token: token_response.access_token.clone(),
                expires_at,
            });
        }

        Ok(token_response.access_token)
    }
}

/// Sign the RS256 JWT assertion for the JWT bearer grant.
fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, AuthError> {
    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: ANALYTICS_READONLY_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(&header, &claims, &encoding_key)?)
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.credentials {
            Credentials::Static(_) => f
                .debug_struct("TokenProvider")
                .field("mode", &"static")
                .finish(),
            Credentials::ServiceAccount(key) => f
                .debug_struct("TokenProvider")
                .field("mode", &"service_account")
                .field("client_email", &key.client_email)
                .finish(),
        }
    }
}
