//! Device-state sources polled by the [`EventNormalizer`](crate::EventNormalizer).
//!
//! [`HttpDeviceSource`] reads the full state table of a home-automation hub
//! (`GET {base_url}/api/states`) using a bearer credential.

use std::time::Duration;

use async_trait::async_trait;
use tessera_core::retry::TimedOut;

/// Default timeout for a single state fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while fetching raw device records.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The fetch did not finish within its time bound.
    #[error(transparent)]
    Timeout(#[from] TimedOut),

    /// The source returned a non-2xx status code.
    #[error("Device source returned HTTP {0}")]
    HttpStatus(u16),

    /// The body was not a JSON array of records.
    #[error("Unexpected device source response: {0}")]
    Payload(String),
}

/// Anything that can produce the current set of raw device records.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Fetch every raw record the source currently exposes.
    async fn fetch_states(&self) -> Result<Vec<serde_json::Value>, SourceError>;
}

/// HTTP client for a hub exposing `GET /api/states`.
pub struct HttpDeviceSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpDeviceSource {
    /// Create a source with its own client bounded by `timeout`.
    ///
    /// * `base_url` - e.g. `http://homeassistant.local:8123`.
    /// * `token` - long-lived access token; sent as a bearer credential.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    /// Create a source reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl DeviceSource for HttpDeviceSource {
    async fn fetch_states(&self) -> Result<Vec<serde_json::Value>, SourceError> {
        let response = self
            .client
            .get(format!("{}/api/states", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        match response.json::<serde_json::Value>().await? {
            serde_json::Value::Array(records) => Ok(records),
            other => Err(SourceError::Payload(format!(
                "expected a JSON array, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
