//! Tessera in-process event pipeline.
//!
//! - [`EventBus`]: synchronous, topic-keyed publish/subscribe hub with
//!   per-handler failure isolation.
//! - [`EventNormalizer`]: polls a [`DeviceSource`] and publishes canonical
//!   events on a source-scoped topic.
//! - [`RuleEngine`]: evaluates data-driven rules against events, runs their
//!   reactions and publishes ritual completions.

pub mod bus;
pub mod normalizer;
pub mod reactions;
pub mod rules;
pub mod source;

pub use bus::{BusMessage, EventBus, HandlerError, SubscriptionId};
pub use normalizer::{EventNormalizer, PollSummary};
pub use rules::{MatchCriteria, Rule, RuleDefinition, RuleEngine};
pub use source::{DeviceSource, HttpDeviceSource, SourceError};
