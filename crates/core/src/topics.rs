//! Well-known event bus topic names.
//!
//! Topics are opaque strings to the bus; these helpers only keep producers
//! and subscribers agreeing on the spelling.

/// Topic on which the rule engine publishes one message per fired rule.
pub const TOPIC_RITUAL_COMPLETED: &str = "rituals.completed";

/// Suffix of every source-scoped canonical event topic.
const STATE_CHANGED_SUFFIX: &str = "state_changed";

/// Topic carrying canonical events produced from the named integration
/// source, e.g. `"homeassistant.state_changed"`.
pub fn state_changed(source: &str) -> String {
    format!("{source}.{STATE_CHANGED_SUFFIX}")
}
