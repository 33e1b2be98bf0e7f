//! HTTP client for the Gerrit REST API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::RestConfig;

use super::GerritReview;

/// Connection timeout for HTTP requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Prefix Gerrit puts in front of JSON bodies to defeat XSSI.
const MAGIC_PREFIX: &str = ")]}'";

/// Errors from REST operations.
#[derive(Error, Debug)]
pub enum RestError {
    #[error("REST endpoint not configured")]
    NotConfigured,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("REST request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("REST request timed out")]
    Timeout,
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// HTTP methods the API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Safe to resend after a server error.
    #[must_use]
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Self::Post)
    }

    fn as_reqwest(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// Issues REST calls relative to a server base URL.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Send a request and return the decoded JSON body.
    ///
    /// An empty body decodes to `Value::Null`.
    async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, RestError>;

    async fn get(&self, endpoint: &str) -> Result<Value, RestError> {
        self.request(HttpMethod::Get, endpoint, None).await
    }

    async fn post(&self, endpoint: &str, body: Option<&Value>) -> Result<Value, RestError> {
        self.request(HttpMethod::Post, endpoint, body).await
    }

    async fn put(&self, endpoint: &str, body: Option<&Value>) -> Result<Value, RestError> {
        self.request(HttpMethod::Put, endpoint, body).await
    }

    async fn delete(&self, endpoint: &str) -> Result<Value, RestError> {
        self.request(HttpMethod::Delete, endpoint, None).await
    }

    /// Post a review on one revision of a change.
    async fn review(
        &self,
        change: &str,
        revision: &str,
        review: &GerritReview,
    ) -> Result<Value, RestError> {
        let endpoint = format!("changes/{change}/revisions/{revision}/review");
        tracing::debug!(endpoint = %endpoint, "Posting review");
        self.post(&endpoint, Some(&review.to_json())).await
    }
}

/// HTTP basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Build an HTTP client with proper timeout configuration.
fn build_http_client(timeout: Duration) -> Result<Client, RestError> {
    Ok(Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()?)
}

/// Determine if a request should be retried based on status code and attempt count.
fn should_retry(method: HttpMethod, status_code: u16, attempt: u32) -> bool {
    if attempt >= MAX_RETRIES || !method.is_idempotent() {
        return false;
    }
    (500..600).contains(&status_code)
}

/// Exponential backoff: 1s, 2s, 4s.
fn calculate_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt)
}

/// Remove the anti-XSSI prefix, if present.
fn strip_magic_prefix(text: &str) -> &str {
    text.strip_prefix(MAGIC_PREFIX).unwrap_or(text)
}

fn parse_body(text: &str) -> Result<Value, RestError> {
    let text = strip_magic_prefix(text).trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| RestError::Parse(e.to_string()))
}

/// `reqwest`-backed client for one server.
#[derive(Debug, Clone)]
pub struct GerritRestClient {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl GerritRestClient {
    /// Client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Self, RestError> {
        Self::with_timeout(base_url, credentials, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`GerritRestClient::new`] with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn with_timeout(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: Url::parse(&base)?,
            credentials,
        })
    }

    /// Client described by the `[rest]` config section.
    ///
    /// Credentials are used only when both the username and the password
    /// variable are set.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` when no URL is set.
    pub fn from_config(config: &RestConfig) -> Result<Self, RestError> {
        let url = config.url.as_deref().ok_or(RestError::NotConfigured)?;
        let credentials = config
            .username
            .as_ref()
            .zip(config.password())
            .map(|(user, password)| Credentials::new(user, password));
        Self::with_timeout(url, credentials, Duration::from_secs(config.timeout_secs))
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Full URL for `endpoint`; authenticated calls go under `a/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the joined URL is invalid.
    pub fn make_url(&self, endpoint: &str) -> Result<Url, RestError> {
        let endpoint = endpoint.trim_start_matches('/');
        let path = if self.credentials.is_some() {
            format!("a/{endpoint}")
        } else {
            endpoint.to_string()
        };
        Ok(self.base_url.join(&path)?)
    }
}

#[async_trait]
impl RestTransport for GerritRestClient {
    async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, RestError> {
        let url = self.make_url(endpoint)?;

        let mut attempt = 0;
        loop {
            tracing::debug!(method = %method, url = %url, attempt, "Sending REST request");
            let mut request = self
                .client
                .request(method.as_reqwest(), url.clone())
                .header("Accept", "application/json");
            if let Some(credentials) = &self.credentials {
                request = request.basic_auth(&credentials.username, Some(&credentials.password));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                let text = response.text().await?;
                return parse_body(&text);
            }

            let status_code = status.as_u16();
            if should_retry(method, status_code, attempt) {
                let backoff = calculate_backoff(attempt);
                tracing::warn!(status = status_code, backoff = ?backoff, "Server error, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            return Err(RestError::Http {
                status: status_code,
                body: text.trim().to_string(),
            });
        }
    }
}
