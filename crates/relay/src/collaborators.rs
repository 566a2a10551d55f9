//! HTTP adapters for the external collaborator interfaces.
//!
//! | Capability                       | Request                        |
//! |----------------------------------|--------------------------------|
//! | `LedgerService::connect`         | `GET  /health`                 |
//! | `LedgerService::verify_identity` | `GET  /identity/{address}`     |
//! | `LedgerService::log_activity`    | `POST /activity`               |
//! | `LedgerService::token_balance`   | `GET  /balance/{address}`      |
//! | `SpatialService::connect`        | `GET  /health`                 |
//! | `SpatialService::region_data`    | `GET  /regions/{region_id}`    |
//! | `SpatialService::zone_data`      | `GET  /zones/{zone_id}`        |
//! | `SpatialService::optimize_resources` | `POST /optimize`           |

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tessera_core::collaborators::{
    ActivityReceipt, CollaboratorError, IdentityVerification, LedgerService, SpatialService,
    TokenBalance,
};

use crate::destination::opaque_reply;

const LEDGER: &str = "ledger";
const SPATIAL: &str = "spatial";

/// Minimal JSON-over-HTTP client bound to one service.
struct ServiceClient {
    service: &'static str,
    client: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    fn new(service: &'static str, client: reqwest::Client, base_url: String) -> Self {
        Self {
            service,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn unavailable(&self, e: reqwest::Error) -> CollaboratorError {
        CollaboratorError::Unavailable {
            service: self.service,
            message: e.to_string(),
        }
    }

    /// Send `request`, turning transport failures and non-2xx statuses into
    /// collaborator errors.
    async fn checked(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let response = request.send().await.map_err(|e| self.unavailable(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                service: self.service,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CollaboratorError> {
        self.checked(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::Decode {
                service: self.service,
                message: e.to_string(),
            })
    }

    /// Like [`send`](Self::send) for replies the caller treats as opaque.
    async fn send_opaque(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, CollaboratorError> {
        let body = self
            .checked(request)
            .await?
            .text()
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(opaque_reply(&body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollaboratorError> {
        self.send(self.client.get(format!("{}{path}", self.base_url))).await
    }

    async fn get_opaque(&self, path: &str) -> Result<serde_json::Value, CollaboratorError> {
        self.send_opaque(self.client.get(format!("{}{path}", self.base_url)))
            .await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CollaboratorError> {
        let request = self.client.post(format!("{}{path}", self.base_url)).json(body);
        self.send(request).await
    }

    async fn post_opaque(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, CollaboratorError> {
        let request = self.client.post(format!("{}{path}", self.base_url)).json(body);
        self.send_opaque(request).await
    }

    async fn connect(&self) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Rejected {
                service: self.service,
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// [`LedgerService`] over HTTP.
pub struct HttpLedgerClient {
    inner: ServiceClient,
}

impl HttpLedgerClient {
    /// * `client` - shared client; its timeout bounds every call.
    /// * `base_url` - e.g. `http://ledger:8080`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(LEDGER, client, base_url.into()),
        }
    }
}

#[async_trait]
impl LedgerService for HttpLedgerClient {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        self.inner.connect().await
    }

    async fn verify_identity(
        &self,
        address: &str,
    ) -> Result<IdentityVerification, CollaboratorError> {
        self.inner.get(&format!("/identity/{address}")).await
    }

    async fn log_activity(
        &self,
        address: &str,
        activity: &serde_json::Value,
    ) -> Result<ActivityReceipt, CollaboratorError> {
        let body = json!({ "address": address, "activity": activity });
        self.inner.post("/activity", &body).await
    }

    async fn token_balance(&self, address: &str) -> Result<TokenBalance, CollaboratorError> {
        self.inner.get(&format!("/balance/{address}")).await
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// [`SpatialService`] over HTTP.
pub struct HttpSpatialClient {
    inner: ServiceClient,
}

impl HttpSpatialClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            inner: ServiceClient::new(SPATIAL, client, base_url.into()),
        }
    }
}

#[async_trait]
impl SpatialService for HttpSpatialClient {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        self.inner.connect().await
    }

    async fn region_data(&self, region_id: &str) -> Result<serde_json::Value, CollaboratorError> {
        self.inner.get_opaque(&format!("/regions/{region_id}")).await
    }

    async fn zone_data(&self, zone_id: &str) -> Result<serde_json::Value, CollaboratorError> {
        self.inner.get_opaque(&format!("/zones/{zone_id}")).await
    }

    async fn optimize_resources(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, CollaboratorError> {
        self.inner.post_opaque("/optimize", request).await
    }
}
