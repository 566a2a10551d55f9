//! Event forwarding with per-destination retry.
//!
//! [`ForwardingGateway::forward`] sends one event to each requested,
//! configured destination. Destinations are attempted concurrently and in
//! isolation: a slow or failing destination never affects another's result,
//! and the call as a whole never fails. Every attempt is bounded by
//! [`GatewayConfig::attempt_timeout`]; transient failures are retried with
//! exponential backoff up to [`RetryPolicy::max_attempts`] total attempts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tessera_core::event::Event;
use tessera_core::retry::{retry, with_timeout, RetryPolicy};

use crate::destination::{Destination, DestinationError, Destinations};

/// Default bound on a single forward attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of forwarding to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForwardOutcome {
    /// The destination accepted the event; `data` is its reply.
    Delivered { data: serde_json::Value },
    /// Every permitted attempt failed.
    Failed {
        /// Message of the last error.
        message: String,
        /// Whether the last failure was transient, i.e. a later forward
        /// might succeed.
        retryable: bool,
    },
}

impl ForwardOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ForwardOutcome::Delivered { .. })
    }
}

/// Retry and timeout settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// Relays events to named external destinations.
pub struct ForwardingGateway {
    destinations: Destinations,
    config: GatewayConfig,
}

impl ForwardingGateway {
    pub fn new(destinations: Destinations, config: GatewayConfig) -> Self {
        Self {
            destinations,
            config,
        }
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    /// Forward `event` to every name in `targets` that maps to a configured
    /// destination.
    ///
    /// Unknown names are ignored and get no entry. Repeated names are
    /// forwarded once.
    pub async fn forward<S: AsRef<str>>(
        &self,
        event: &Event,
        targets: &[S],
    ) -> BTreeMap<String, ForwardOutcome> {
        let mut requested = HashSet::new();
        let mut deliveries = Vec::new();

        for name in targets.iter().map(AsRef::as_ref) {
            if !requested.insert(name) {
                continue;
            }
            match self.destinations.get(name) {
                Some(destination) => {
                    let destination = Arc::clone(destination);
                    deliveries.push(async move {
                        let outcome = self.deliver_with_retry(name, destination.as_ref(), event).await;
                        (name.to_string(), outcome)
                    });
                }
                None => {
                    tracing::debug!(destination = name, "Ignoring unknown forward destination");
                }
            }
        }

        join_all(deliveries).await.into_iter().collect()
    }

    async fn deliver_with_retry(
        &self,
        name: &str,
        destination: &dyn Destination,
        event: &Event,
    ) -> ForwardOutcome {
        let limit = self.config.attempt_timeout;

        let result = retry(&self.config.retry, DestinationError::is_transient, |attempt| {
            tracing::debug!(destination = name, attempt, event_id = %event.id, "Forwarding event");
            async move {
                match with_timeout(limit, destination.deliver(event)).await {
                    Ok(result) => result,
                    Err(timed_out) => Err(DestinationError::from(timed_out)),
                }
            }
        })
        .await;

        match result {
            Ok(data) => {
                tracing::info!(destination = name, event_id = %event.id, "Event forwarded");
                ForwardOutcome::Delivered { data }
            }
            Err(e) => {
                let retryable = e.is_transient();
                tracing::error!(
                    destination = name,
                    event_id = %event.id,
                    retryable,
                    error = %e,
                    "Forwarding failed",
                );
                ForwardOutcome::Failed {
                    message: e.to_string(),
                    retryable,
                }
            }
        }
    }
}
