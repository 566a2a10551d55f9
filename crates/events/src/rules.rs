//! Rule ("ritual") engine.
//!
//! A [`Rule`] pairs a [`Predicate`] with a [`Reaction`]. The [`RuleEngine`]
//! holds an ordered list of rules and, for every incoming [`Event`],
//! evaluates **all** of them in registration order: every rule whose
//! predicate holds has its reaction run synchronously, and each successful
//! reaction yields exactly one [`RitualCompletion`] published on
//! [`TOPIC_RITUAL_COMPLETED`].
//!
//! A reaction that fails (error or panic) is logged and produces no
//! completion; the remaining rules are still evaluated.
//!
//! Rules are data. [`MatchCriteria`] covers the common matching needs and
//! can be loaded from JSON together with a [`ReactionSpec`] as a
//! [`RuleDefinition`]; arbitrary closures work as predicates and reactions
//! too.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tessera_core::event::{Event, RitualCompletion};
use tessera_core::topics::TOPIC_RITUAL_COMPLETED;
use tessera_core::types::Attributes;

use crate::bus::{panic_message, BusMessage, EventBus, SubscriptionId};
use crate::reactions::{self, Collaborators, ReactionSpec};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Decides whether a rule applies to an event.
pub trait Predicate: Send + Sync {
    fn matches(&self, event: &Event) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn matches(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Declarative predicate: every field that is set must match.
///
/// An empty `MatchCriteria` matches every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchCriteria {
    /// Exact event id.
    pub id: Option<String>,
    /// Event id prefix, e.g. `"sensor.kitchen_"`.
    pub id_prefix: Option<String>,
    pub kind: Option<String>,
    pub state: Option<String>,
    /// Attributes that must be present with exactly these values.
    pub attributes: Attributes,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = Some(prefix.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl Predicate for MatchCriteria {
    fn matches(&self, event: &Event) -> bool {
        self.id.as_ref().is_none_or(|id| *id == event.id)
            && self
                .id_prefix
                .as_ref()
                .is_none_or(|prefix| event.id.starts_with(prefix.as_str()))
            && self.kind.as_ref().is_none_or(|kind| *kind == event.kind)
            && self.state.as_ref().is_none_or(|state| *state == event.state)
            && self
                .attributes
                .iter()
                .all(|(key, expected)| event.attributes.get(key) == Some(expected))
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Error returned by a reaction that could not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ReactionError(pub String);

impl ReactionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Local side effect run when a rule fires.
///
/// Runs synchronously inside bus dispatch. Reactions that need I/O must
/// spawn it and bound it themselves.
pub trait Reaction: Send + Sync {
    fn react(&self, event: &Event) -> Result<(), ReactionError>;
}

impl<F> Reaction for F
where
    F: Fn(&Event) -> Result<(), ReactionError> + Send + Sync,
{
    fn react(&self, event: &Event) -> Result<(), ReactionError> {
        self(event)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A named predicate/reaction pair.
pub struct Rule {
    name: String,
    predicate: Box<dyn Predicate>,
    reaction: Box<dyn Reaction>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Predicate + 'static,
        reaction: impl Reaction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            reaction: Box::new(reaction),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Serializable rule: criteria plus a reaction spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub when: MatchCriteria,
    pub then: ReactionSpec,
}

/// Errors building a rule set.
#[derive(Debug, thiserror::Error)]
pub enum RuleConfigError {
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid rules file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Rule {rule:?}: {message}")]
    Reaction { rule: String, message: String },
}

/// Read a JSON array of [`RuleDefinition`]s from `path`.
pub fn load_definitions(path: &Path) -> Result<Vec<RuleDefinition>, RuleConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| RuleConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| RuleConfigError::Parse {
        path: display,
        source,
    })
}

/// Rule set used when no rules file is configured: log every sensor that
/// switches on.
pub fn default_definitions() -> Vec<RuleDefinition> {
    vec![RuleDefinition {
        name: "sensor-on".into(),
        when: MatchCriteria::new().kind("sensor").state("on"),
        then: ReactionSpec::Log {
            message: Some("Sensor switched on".into()),
        },
    }]
}

// ---------------------------------------------------------------------------
// RuleEngine
// ---------------------------------------------------------------------------

/// Evaluates rules against events and publishes ritual completions.
pub struct RuleEngine {
    rules: Vec<Rule>,
    bus: Arc<EventBus>,
}

impl RuleEngine {
    /// Create an engine with no rules that publishes completions on `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            rules: Vec::new(),
            bus,
        }
    }

    /// Build an engine from serializable definitions, resolving each
    /// reaction spec against the available collaborators.
    pub fn from_definitions(
        bus: Arc<EventBus>,
        definitions: Vec<RuleDefinition>,
        collaborators: &Collaborators,
    ) -> Result<Self, RuleConfigError> {
        let mut engine = Self::new(bus);
        for definition in definitions {
            let reaction = reactions::build(&definition.name, &definition.then, collaborators)
                .map_err(|e| RuleConfigError::Reaction {
                    rule: definition.name.clone(),
                    message: e.to_string(),
                })?;
            engine.rules.push(Rule {
                name: definition.name,
                predicate: Box::new(definition.when),
                reaction,
            });
        }
        Ok(engine)
    }

    /// Append a rule; it is evaluated after every rule already registered.
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    /// Evaluate every rule against `event`.
    ///
    /// Returns the completions that were published, one per successful
    /// reaction, in rule order.
    pub fn handle(&self, event: &Event) -> Vec<RitualCompletion> {
        let mut completions = Vec::new();

        for rule in &self.rules {
            if !rule.predicate.matches(event) {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.reaction.react(event)));
            match outcome {
                Ok(Ok(())) => {
                    let completion = RitualCompletion::new(&rule.name, event);
                    tracing::info!(rule = %rule.name, event_id = %event.id, "Ritual completed");
                    self.bus.publish(TOPIC_RITUAL_COMPLETED, completion.clone());
                    completions.push(completion);
                }
                Ok(Err(e)) => {
                    tracing::warn!(rule = %rule.name, event_id = %event.id, error = %e, "Reaction failed");
                }
                Err(payload) => {
                    tracing::error!(
                        rule = %rule.name,
                        event_id = %event.id,
                        panic = %panic_message(payload.as_ref()),
                        "Reaction panicked",
                    );
                }
            }
        }

        completions
    }

    /// Subscribe the engine to `topic` on its bus.
    ///
    /// The subscription holds only a weak reference; once the engine is
    /// dropped the handler becomes a no-op.
    pub fn attach(self: &Arc<Self>, topic: impl Into<String>) -> SubscriptionId {
        let engine: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(topic, move |message: &BusMessage| {
            if let (Some(engine), Some(event)) = (engine.upgrade(), message.as_event()) {
                engine.handle(event);
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rule_names())
            .finish_non_exhaustive()
    }
}
