//! Outbound side of Tessera: relaying events to external partner systems.
//!
//! - [`Destination`] / [`HttpDestination`]: a named external endpoint that
//!   accepts events and exposes a liveness probe.
//! - [`ForwardingGateway`]: fans one event out to named destinations with
//!   bounded, per-destination retries.
//! - [`HealthAggregator`]: one-shot liveness probe of every destination.
//! - [`collaborators`]: HTTP adapters for the ledger and spatial-data
//!   capability interfaces.

pub mod collaborators;
pub mod destination;
pub mod gateway;
pub mod health;

pub use destination::{Destination, DestinationError, Destinations, HttpDestination};
pub use gateway::{ForwardOutcome, ForwardingGateway, GatewayConfig};
pub use health::{HealthAggregator, HealthStatus};
