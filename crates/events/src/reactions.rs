//! Built-in reactions addressable from rule definitions.
//!
//! [`ReactionSpec`] is the serializable form; [`build`] resolves it against
//! the external [`Collaborators`] available at startup. Reactions that talk
//! to a collaborator spawn the call on the tokio runtime, bounded by
//! [`Collaborators::call_timeout`], and return immediately so bus dispatch
//! never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tessera_core::collaborators::{LedgerService, SpatialService};
use tessera_core::event::Event;
use tessera_core::retry::with_timeout;
use tokio::runtime::Handle;

use crate::rules::{Reaction, ReactionError};

/// Default bound on a single collaborator call made by a reaction.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Serializable description of a reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactionSpec {
    /// Write a structured log line.
    Log {
        #[serde(default)]
        message: Option<String>,
    },

    /// Record the event as an activity of `address` on the ledger.
    LedgerActivity { address: String },

    /// Ask the spatial service to optimize resources for the zone named by
    /// the event attribute `zone_attribute` (default `"zone"`).
    OptimizeResources {
        #[serde(default = "default_zone_attribute")]
        zone_attribute: String,
    },
}

fn default_zone_attribute() -> String {
    "zone".to_string()
}

/// External services reactions may call.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Option<Arc<dyn LedgerService>>,
    pub spatial: Option<Arc<dyn SpatialService>>,
    pub call_timeout: Duration,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            ledger: None,
            spatial: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Resolve `spec` for the rule named `rule` into a runnable reaction.
///
/// Fails when the spec needs a collaborator that is not configured.
pub fn build(
    rule: &str,
    spec: &ReactionSpec,
    collaborators: &Collaborators,
) -> Result<Box<dyn Reaction>, ReactionError> {
    let rule = rule.to_string();

    match spec {
        ReactionSpec::Log { message } => {
            let message = message.clone().unwrap_or_else(|| format!("Rule {rule} fired"));
            Ok(Box::new(move |event: &Event| -> Result<(), ReactionError> {
                tracing::info!(
                    rule = %rule,
                    event_id = %event.id,
                    kind = %event.kind,
                    state = %event.state,
                    "{message}",
                );
                Ok(())
            }))
        }

        ReactionSpec::LedgerActivity { address } => {
            let ledger = collaborators
                .ledger
                .clone()
                .ok_or_else(|| ReactionError::new("ledger service is not configured"))?;
            let address = address.clone();
            let limit = collaborators.call_timeout;

            Ok(Box::new(move |event: &Event| -> Result<(), ReactionError> {
                let handle = current_runtime()?;
                let ledger = Arc::clone(&ledger);
                let address = address.clone();
                let rule = rule.clone();
                let activity = json!({ "rule": rule, "event": event });

                handle.spawn(async move {
                    match with_timeout(limit, ledger.log_activity(&address, &activity)).await {
                        Ok(Ok(receipt)) => {
                            tracing::info!(rule = %rule, reference = %receipt.reference, "Ledger activity logged");
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(rule = %rule, error = %e, "Ledger activity failed");
                        }
                        Err(e) => {
                            tracing::warn!(rule = %rule, error = %e, "Ledger activity timed out");
                        }
                    }
                });
                Ok(())
            }))
        }

        ReactionSpec::OptimizeResources { zone_attribute } => {
            let spatial = collaborators
                .spatial
                .clone()
                .ok_or_else(|| ReactionError::new("spatial service is not configured"))?;
            let zone_attribute = zone_attribute.clone();
            let limit = collaborators.call_timeout;

            Ok(Box::new(move |event: &Event| -> Result<(), ReactionError> {
                let zone = event.attributes.get(&zone_attribute).cloned().ok_or_else(|| {
                    ReactionError::new(format!(
                        "event {} has no {zone_attribute:?} attribute",
                        event.id
                    ))
                })?;
                let handle = current_runtime()?;
                let spatial = Arc::clone(&spatial);
                let rule = rule.clone();
                let request = json!({ "zone": zone, "trigger": event });

                handle.spawn(async move {
                    match with_timeout(limit, spatial.optimize_resources(&request)).await {
                        Ok(Ok(_)) => tracing::info!(rule = %rule, "Resource optimization requested"),
                        Ok(Err(e)) => {
                            tracing::warn!(rule = %rule, error = %e, "Resource optimization failed");
                        }
                        Err(e) => {
                            tracing::warn!(rule = %rule, error = %e, "Resource optimization timed out");
                        }
                    }
                });
                Ok(())
            }))
        }
    }
}

fn current_runtime() -> Result<Handle, ReactionError> {
    Handle::try_current().map_err(|e| ReactionError::new(format!("no async runtime: {e}")))
}
