//! Liveness aggregation across destinations.
//!
//! Each destination gets exactly one probe per check, bounded by a timeout
//! and never retried. Probes run concurrently and are independent: an
//! unreachable destination is reported `offline` without affecting the
//! others. Results are computed fresh on every call.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tessera_core::retry::with_timeout;

use crate::destination::{Destination, Destinations};

/// Default bound on a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Binary liveness of one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
}

/// Probes destinations and reports a status per name.
pub struct HealthAggregator {
    destinations: Destinations,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(destinations: Destinations, probe_timeout: Duration) -> Self {
        Self {
            destinations,
            probe_timeout,
        }
    }

    /// Probe every configured destination.
    pub async fn check_all(&self) -> BTreeMap<String, HealthStatus> {
        self.check_health(&self.destinations.names()).await
    }

    /// Probe the named destinations. Unknown names get no entry.
    pub async fn check_health<S: AsRef<str>>(&self, names: &[S]) -> BTreeMap<String, HealthStatus> {
        let mut seen = HashSet::new();
        let probes = names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| seen.insert(*name))
            .filter_map(|name| self.destinations.get(name).map(|d| (name, d.as_ref())))
            .map(|(name, destination)| async move { (name.to_string(), self.probe(name, destination).await) });

        join_all(probes).await.into_iter().collect()
    }

    async fn probe(&self, name: &str, destination: &dyn Destination) -> HealthStatus {
        match with_timeout(self.probe_timeout, destination.probe()).await {
            Ok(Ok(())) => HealthStatus::Online,
            Ok(Err(e)) => {
                tracing::warn!(destination = name, error = %e, "Health probe failed");
                HealthStatus::Offline
            }
            Err(e) => {
                tracing::warn!(destination = name, error = %e, "Health probe timed out");
                HealthStatus::Offline
            }
        }
    }
}
