//! Capability interfaces for the external partner services.
//!
//! Tessera does not implement these services; it only consumes them. Each
//! trait exposes a `connect()` liveness probe plus one method per
//! capability. Every call is asynchronous and may fail, and callers must
//! treat failure as routine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure talking to an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The service could not be reached (network, DNS, TLS, timeout).
    #[error("{service} unreachable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {body}")]
    Rejected {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body did not match the expected record shape.
    #[error("{service} sent an unexpected response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Result of an identity verification on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityVerification {
    pub address: String,
    pub verified: bool,
    /// Service-specific extra data.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Acknowledgement of a logged activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReceipt {
    /// Ledger-assigned reference, e.g. a transaction hash.
    pub reference: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Token holdings for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub address: String,
    pub balance: f64,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Ledger/chain service keyed by address identifiers.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Probe that the service is reachable.
    async fn connect(&self) -> Result<(), CollaboratorError>;

    async fn verify_identity(&self, address: &str)
        -> Result<IdentityVerification, CollaboratorError>;

    /// Append an activity record for `address`.
    async fn log_activity(
        &self,
        address: &str,
        activity: &serde_json::Value,
    ) -> Result<ActivityReceipt, CollaboratorError>;

    async fn token_balance(&self, address: &str) -> Result<TokenBalance, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Spatial data
// ---------------------------------------------------------------------------

/// Spatial-data service: regional/zone reads and a resource optimizer.
///
/// Records are returned as raw JSON; their shape belongs to the service.
#[async_trait]
pub trait SpatialService: Send + Sync {
    /// Probe that the service is reachable.
    async fn connect(&self) -> Result<(), CollaboratorError>;

    async fn region_data(&self, region_id: &str) -> Result<serde_json::Value, CollaboratorError>;

    async fn zone_data(&self, zone_id: &str) -> Result<serde_json::Value, CollaboratorError>;

    /// Ask the service to rebalance resources according to `request`.
    async fn optimize_resources(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, CollaboratorError>;
}
