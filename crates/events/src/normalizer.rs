//! Raw device record → canonical [`Event`] normalization.
//!
//! [`EventNormalizer`] polls a [`DeviceSource`], maps every raw record to a
//! canonical event and publishes it on the source-scoped topic
//! (`"<source>.state_changed"`). Failures never escape [`poll`]: a failed
//! fetch is logged and reported in the [`PollSummary`], and a malformed
//! record is skipped without affecting the rest of the batch.
//!
//! Polling is not deduplicated. Publishing the same device state twice
//! yields two events, so subscribers must tolerate repeats.
//!
//! [`poll`]: EventNormalizer::poll

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tessera_core::event::Event;
use tessera_core::retry::with_timeout;
use tessera_core::topics;
use tessera_core::types::{Attributes, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::source::{DeviceSource, SourceError, DEFAULT_FETCH_TIMEOUT};

/// Why a single raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record has no entity_id")]
    MissingId,

    #[error("cannot determine the domain of {0:?}")]
    MissingKind(String),

    #[error("record {0:?} has no scalar state")]
    InvalidState(String),

    #[error("record {0:?} has non-object attributes")]
    InvalidAttributes(String),
}

/// Outcome of one [`EventNormalizer::poll`] cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Events published on the bus.
    pub published: usize,
    /// Records skipped as malformed.
    pub skipped: usize,
    /// Whether the fetch itself failed (nothing was published).
    pub fetch_failed: bool,
}

/// Map one raw record to a canonical event captured at `captured_at`.
///
/// * `id` ← `entity_id`
/// * `kind` ← explicit `domain` field, else the `entity_id` prefix before `.`
/// * `state` ← `state` (numbers and booleans are stringified)
/// * `attributes` ← `attributes` (absent or null means empty)
pub fn normalize(record: &Value, captured_at: Timestamp) -> Result<Event, RecordError> {
    let object = record.as_object().ok_or(RecordError::NotAnObject)?;

    let id = object
        .get("entity_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RecordError::MissingId)?;

    let kind = match object.get("domain").and_then(Value::as_str) {
        Some(domain) if !domain.trim().is_empty() => domain.trim(),
        _ => id
            .split_once('.')
            .map(|(domain, _)| domain)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RecordError::MissingKind(id.to_string()))?,
    };

    let state = match object.get("state") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => return Err(RecordError::InvalidState(id.to_string())),
    };

    let attributes = match object.get("attributes") {
        None | Some(Value::Null) => Attributes::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(RecordError::InvalidAttributes(id.to_string())),
    };

    Ok(Event::new(id, kind, state)
        .with_attributes(attributes)
        .observed_at(captured_at))
}

/// Polls a device source and publishes canonical events.
pub struct EventNormalizer {
    source_name: String,
    topic: String,
    source: Arc<dyn DeviceSource>,
    bus: Arc<EventBus>,
    fetch_timeout: Duration,
}

impl EventNormalizer {
    /// Create a normalizer publishing on `"<source_name>.state_changed"`.
    pub fn new(
        source_name: impl Into<String>,
        source: Arc<dyn DeviceSource>,
        bus: Arc<EventBus>,
    ) -> Self {
        let source_name = source_name.into();
        Self {
            topic: topics::state_changed(&source_name),
            source_name,
            source,
            bus,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound every fetch by `limit` instead of [`DEFAULT_FETCH_TIMEOUT`].
    pub fn with_fetch_timeout(mut self, limit: Duration) -> Self {
        self.fetch_timeout = limit;
        self
    }

    /// Topic this normalizer publishes on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Fetch the current device states once and publish them.
    pub async fn poll(&self) -> PollSummary {
        let fetched = with_timeout(self.fetch_timeout, self.source.fetch_states())
            .await
            .unwrap_or_else(|timed_out| Err(SourceError::from(timed_out)));

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(source = %self.source_name, error = %e, "Device state fetch failed");
                return PollSummary {
                    fetch_failed: true,
                    ..Default::default()
                };
            }
        };

        let captured_at = Utc::now();
        let mut summary = PollSummary::default();

        for record in &records {
            match normalize(record, captured_at) {
                Ok(event) => {
                    self.bus.publish(&self.topic, event);
                    summary.published += 1;
                }
                Err(e) => {
                    tracing::warn!(source = %self.source_name, error = %e, "Skipping malformed device record");
                    summary.skipped += 1;
                }
            }
        }

        tracing::debug!(
            source = %self.source_name,
            published = summary.published,
            skipped = summary.skipped,
            "Device poll complete",
        );

        summary
    }

    /// Poll on a fixed interval until `cancel` is triggered.
    pub async fn run(&self, every: Duration, cancel: CancellationToken) {
        tracing::info!(
            source = %self.source_name,
            interval_secs = every.as_secs(),
            "Event normalizer started",
        );

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(source = %self.source_name, "Event normalizer stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.poll().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_comes_from_entity_domain() {
        let now = Utc::now();
        let event = normalize(
            &json!({
                "entity_id": "sensor.kitchen_motion",
                "state": "on",
                "attributes": { "friendly_name": "Kitchen" },
            }),
            now,
        )
        .unwrap();

        assert_eq!(event.id, "sensor.kitchen_motion");
        assert_eq!(event.kind, "sensor");
        assert_eq!(event.state, "on");
        assert_eq!(event.attributes["friendly_name"], "Kitchen");
        assert_eq!(event.observed_at, now);
    }

    #[test]
    fn explicit_domain_wins() {
        let event = normalize(
            &json!({ "entity_id": "garden_valve", "domain": "valve", "state": "open" }),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(event.kind, "valve");
    }

    #[test]
    fn scalar_states_are_stringified() {
        let numeric = normalize(&json!({ "entity_id": "sensor.t", "state": 21.5 }), Utc::now());
        let boolean = normalize(&json!({ "entity_id": "binary.d", "state": true }), Utc::now());
        assert_eq!(numeric.unwrap().state, "21.5");
        assert_eq!(boolean.unwrap().state, "true");
    }

    #[test]
    fn malformed_records_are_rejected() {
        let now = Utc::now();
        assert_matches!(normalize(&json!([1, 2]), now), Err(RecordError::NotAnObject));
        assert_matches!(normalize(&json!({ "state": "on" }), now), Err(RecordError::MissingId));
        assert_matches!(
            normalize(&json!({ "entity_id": "nodomain", "state": "on" }), now),
            Err(RecordError::MissingKind(_))
        );
        assert_matches!(
            normalize(&json!({ "entity_id": "sensor.a" }), now),
            Err(RecordError::InvalidState(_))
        );
        assert_matches!(
            normalize(&json!({ "entity_id": "sensor.a", "state": "on", "attributes": 3 }), now),
            Err(RecordError::InvalidAttributes(_))
        );
    }
}
