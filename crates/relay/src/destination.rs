//! Named external destinations events can be relayed to.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::event::Event;
use tessera_core::retry::TimedOut;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for a single delivery or probe attempt.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    /// The attempt did not finish within its time bound.
    #[error(transparent)]
    Timeout(#[from] TimedOut),

    /// The underlying HTTP request failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Destination returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

impl DestinationError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, connection failures, 5xx, 408 and 429 are transient. Other
    /// 4xx responses are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            DestinationError::Timeout(_) => true,
            DestinationError::Request(e) => !(e.is_builder() || e.is_decode()),
            DestinationError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
        }
    }
}

/// Decode a successful reply body. JSON is kept as-is, anything else is
/// carried as a string and an empty body becomes `null`.
pub(crate) fn opaque_reply(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

/// An external system that accepts forwarded events.
///
/// Implementations perform exactly one attempt per call; retries and
/// timeouts are applied by the caller.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Send `event`, returning the destination's (opaque) reply.
    async fn deliver(&self, event: &Event) -> Result<serde_json::Value, DestinationError>;

    /// Single liveness probe.
    async fn probe(&self) -> Result<(), DestinationError>;
}

/// Name → destination table shared by the gateway and the health check.
///
/// Cheap to clone; destinations are reference-counted.
#[derive(Clone, Default)]
pub struct Destinations {
    inner: BTreeMap<String, Arc<dyn Destination>>,
}

impl Destinations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `destination` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, destination: Arc<dyn Destination>) {
        self.inner.insert(name.into(), destination);
    }

    pub fn with(mut self, name: impl Into<String>, destination: Arc<dyn Destination>) -> Self {
        self.insert(name, destination);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Destination>> {
        self.inner.get(name)
    }

    /// Configured names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ---------------------------------------------------------------------------
// HttpDestination
// ---------------------------------------------------------------------------

/// Destination reached over HTTP.
///
/// * deliver: `POST {base_url}/events` with the event as JSON.
/// * probe: `GET {base_url}/health`.
pub struct HttpDestination {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDestination {
    /// Create a destination reusing an existing [`reqwest::Client`]
    /// (connection pooling across destinations).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DestinationError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DestinationError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn deliver(&self, event: &Event) -> Result<serde_json::Value, DestinationError> {
        let response = self
            .client
            .post(format!("{}/events", self.base_url))
            .json(event)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        Ok(opaque_reply(&response.text().await?))
    }

    async fn probe(&self) -> Result<(), DestinationError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }
}
