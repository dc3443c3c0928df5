//! Identifier types for HIVE.
//!
//! Every cross-component reference in HIVE is an opaque identifier:
//! the bus addresses agents by [`AgentName`], the lock manager tracks
//! [`ResourceName`]s, events carry an [`EventId`]. No component ever
//! hands out a shared mutable handle.
//!
//! # Naming Convention
//!
//! Agent names follow the pattern `^[a-z][a-z0-9-]*$` (lowercase,
//! digits, dashes). This keeps topic names (`<agent>-in`, `<agent>-out`)
//! valid across bus backends.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid agent name '{0}': must match ^[a-z][a-z0-9-]*$")]
pub struct InvalidAgentName(pub String);

/// Symbolic name of an agent.
///
/// Agent names double as consumer-group names and as the stem of the
/// agent's topic pair, so they are validated at construction:
/// lowercase ASCII letter first, then lowercase letters, digits, or
/// dashes.
///
/// # Example
///
/// ```
/// use hive_types::AgentName;
///
/// let name = AgentName::new("planner").unwrap();
/// assert_eq!(name.as_str(), "planner");
///
/// assert!(AgentName::new("Planner").is_err());
/// assert!(AgentName::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AgentName(String);

impl AgentName {
    /// Creates a validated agent name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAgentName`] if the name does not match
    /// `^[a-z][a-z0-9-]*$`.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidAgentName> {
        let name = name.into();
        if is_valid_agent_name(&name) {
            Ok(Self(name))
        } else {
            Err(InvalidAgentName(name))
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AgentName {
    type Err = InvalidAgentName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// Deserialization goes through validation so a malformed wire value
// is rejected at decode time, not first use.
impl<'de> Deserialize<'de> for AgentName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

fn is_valid_agent_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Globally unique event identifier (UUID v4).
///
/// # Example
///
/// ```
/// use hive_types::EventId;
///
/// let a = EventId::new();
/// let b = EventId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier.
///
/// Free-form string; the snapshotter mints them as
/// `hive-YYYY-MM-DD-NNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a session id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque intent identifier for cross-event linkage.
///
/// The runtime never interprets these; they exist so downstream
/// consumers can reconstruct causal chains from event metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub String);

impl IntentId {
    /// Creates an intent id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh random intent id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an exclusively lockable resource (typically a file path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(pub String);

impl ResourceName {
    /// Creates a resource name from a string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bus topic name.
///
/// Agents converse over a fixed topic pair derived from their name:
///
/// ```text
/// orchestrator ──publish──► planner-in ──► [planner worker]
/// [planner worker] ──publish──► planner-out ──► orchestrator
/// ```
///
/// # Example
///
/// ```
/// use hive_types::{AgentName, TopicName};
///
/// let agent = AgentName::new("planner").unwrap();
/// assert_eq!(TopicName::input(&agent).as_str(), "planner-in");
/// assert_eq!(TopicName::output(&agent).as_str(), "planner-out");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(pub String);

impl TopicName {
    /// Creates a topic name from a string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Input topic for an agent (`<agent>-in`).
    #[must_use]
    pub fn input(agent: &AgentName) -> Self {
        Self(format!("{agent}-in"))
    }

    /// Output topic for an agent (`<agent>-out`).
    #[must_use]
    pub fn output(agent: &AgentName) -> Self {
        Self(format!("{agent}-out"))
    }

    /// Reply topic used by request/reply (`<topic>-reply`).
    #[must_use]
    pub fn reply(&self) -> Self {
        Self(format!("{}-reply", self.0))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_accepts_convention() {
        assert!(AgentName::new("planner").is_ok());
        assert!(AgentName::new("backend-tester").is_ok());
        assert!(AgentName::new("agent2").is_ok());
    }

    #[test]
    fn agent_name_rejects_violations() {
        assert!(AgentName::new("").is_err());
        assert!(AgentName::new("Planner").is_err());
        assert!(AgentName::new("2agent").is_err());
        assert!(AgentName::new("-agent").is_err());
        assert!(AgentName::new("agent_x").is_err());
    }

    #[test]
    fn agent_name_deserialize_validates() {
        let ok: Result<AgentName, _> = serde_json::from_str("\"planner\"");
        assert!(ok.is_ok());

        let bad: Result<AgentName, _> = serde_json::from_str("\"Planner\"");
        assert!(bad.is_err());
    }

    #[test]
    fn event_ids_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn topic_pair_from_agent() {
        let agent = AgentName::new("codegen").unwrap();
        assert_eq!(TopicName::input(&agent).as_str(), "codegen-in");
        assert_eq!(TopicName::output(&agent).as_str(), "codegen-out");
        assert_eq!(
            TopicName::input(&agent).reply().as_str(),
            "codegen-in-reply"
        );
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::new("hive-2025-01-01-001");
        assert_eq!(id.to_string(), "hive-2025-01-01-001");
    }
}
