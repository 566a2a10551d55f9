//! In-process, topic-keyed event bus.
//!
//! [`EventBus`] routes [`BusMessage`]s to the handlers subscribed on a topic.
//! Dispatch is synchronous and ordered: `publish` returns once every
//! handler's synchronous body has run, in the order the handlers subscribed.
//! It is designed to be shared via `Arc<EventBus>` across the application.
//!
//! Each handler invocation is isolated. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers still receive the
//! message.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tessera_core::event::{Event, RitualCompletion};

// ---------------------------------------------------------------------------
// BusMessage
// ---------------------------------------------------------------------------

/// Payload routed by the bus. The bus never inspects it.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A canonical device/sensor event.
    Event(Event),
    /// A rule firing recorded by the rule engine.
    RitualCompleted(RitualCompletion),
}

impl BusMessage {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            BusMessage::Event(event) => Some(event),
            BusMessage::RitualCompleted(_) => None,
        }
    }

    pub fn as_completion(&self) -> Option<&RitualCompletion> {
        match self {
            BusMessage::RitualCompleted(completion) => Some(completion),
            BusMessage::Event(_) => None,
        }
    }
}

impl From<Event> for BusMessage {
    fn from(event: Event) -> Self {
        BusMessage::Event(event)
    }
}

impl From<RitualCompletion> for BusMessage {
    fn from(completion: RitualCompletion) -> Self {
        BusMessage::RitualCompleted(completion)
    }
}

// ---------------------------------------------------------------------------
// Handlers & subscriptions
// ---------------------------------------------------------------------------

/// Error returned by a handler to signal that it could not process a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Handler = Arc<dyn Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Synchronous fan-out event bus keyed by topic.
///
/// # Usage
///
/// ```rust
/// use tessera_core::event::Event;
/// use tessera_events::bus::EventBus;
///
/// let bus = EventBus::new();
/// let id = bus.subscribe("homeassistant.state_changed", |message| {
///     println!("{message:?}");
///     Ok(())
/// });
///
/// bus.publish("homeassistant.state_changed", Event::new("sensor.a", "sensor", "on"));
/// bus.unsubscribe(id);
/// ```
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `topic`.
    ///
    /// Handlers on the same topic are invoked in registration order.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(topic = %topic, subscription = id.0, "Subscribed");

        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });

        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    ///
    /// A dispatch already in flight keeps its snapshot and may still call
    /// the removed handler once.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = false;
        topics.retain(|_, subscriptions| {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            removed |= subscriptions.len() != before;
            !subscriptions.is_empty()
        });

        if removed {
            tracing::debug!(subscription = id.0, "Unsubscribed");
        }
        removed
    }

    /// Number of handlers currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Deliver `message` to every handler subscribed to `topic`.
    ///
    /// Returns how many handlers completed successfully. If nobody is
    /// subscribed the message is discarded.
    pub fn publish(&self, topic: &str, message: impl Into<BusMessage>) -> usize {
        let message = message.into();

        // Snapshot, then release the lock so handlers may publish or
        // (un)subscribe re-entrantly.
        let snapshot: Vec<Subscription> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(topic, "No subscribers, message discarded");
            return 0;
        }

        let mut delivered = 0;
        for subscription in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (subscription.handler)(&message)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        topic,
                        subscription = subscription.id.0,
                        error = %e,
                        "Event handler failed",
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        topic,
                        subscription = subscription.id.0,
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked",
                    );
                }
            }
        }

        delivered
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
