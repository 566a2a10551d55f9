//! Canonical event shapes routed through the bus and relayed to partners.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{Attributes, Timestamp};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A normalized, source-agnostic device or sensor state change.
///
/// Constructed via [`Event::new`] and enriched with
/// [`with_attributes`](Event::with_attributes) /
/// [`with_attribute`](Event::with_attribute). Events are never mutated once
/// published; subscribers receive shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Device or source identifier, e.g. `"sensor.kitchen_motion"`.
    pub id: String,

    /// Device domain/category, e.g. `"sensor"`.
    pub kind: String,

    /// Current state as reported by the source.
    pub state: String,

    /// Pass-through attributes from the source record.
    #[serde(default)]
    pub attributes: Attributes,

    /// When the state was captured (UTC).
    pub observed_at: Timestamp,
}

impl Event {
    /// Create an event observed now, with no attributes.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            state: state.into(),
            attributes: Attributes::new(),
            observed_at: Utc::now(),
        }
    }

    /// Replace the attribute bag.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set a single attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Override the capture time.
    pub fn observed_at(mut self, at: Timestamp) -> Self {
        self.observed_at = at;
        self
    }

    /// Check the identity invariants every published event must satisfy.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("event id must not be empty".into()));
        }
        if self.kind.trim().is_empty() {
            return Err(CoreError::Validation("event kind must not be empty".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RitualCompletion
// ---------------------------------------------------------------------------

/// Record of one successful rule firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RitualCompletion {
    /// Unique id of this firing (time-ordered).
    pub id: Uuid,

    /// Name of the rule that fired.
    pub rule: String,

    /// The event that triggered the rule.
    pub source_event: Event,

    /// When the reaction completed. Never earlier than
    /// `source_event.observed_at`.
    pub triggered_at: Timestamp,
}

impl RitualCompletion {
    /// Record a firing of `rule` for `event`, stamped now but never before
    /// the event's capture time.
    pub fn new(rule: impl Into<String>, event: &Event) -> Self {
        Self {
            id: Uuid::now_v7(),
            rule: rule.into(),
            source_event: event.clone(),
            triggered_at: Utc::now().max(event.observed_at),
        }
    }
}
