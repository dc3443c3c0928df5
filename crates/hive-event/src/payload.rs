//! Payload schemas, one per event kind.
//!
//! Payloads form a closed tagged union selected by the envelope's
//! [`EventKind`]. The union carries one escape hatch: [`Payload::Opaque`]
//! holds any JSON document whose shape the current build does not
//! recognize, so a newer producer's events survive a round trip through
//! an older consumer.

use crate::EventKind;
use hive_types::AgentName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a `tool_call` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Tool being invoked.
    pub tool: String,
    /// Tool arguments, uninterpreted by the runtime.
    #[serde(default)]
    pub args: Value,
}

/// Body of a `state_change` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangePayload {
    /// State before the transition.
    pub from: String,
    /// State after the transition.
    pub to: String,
}

/// Body of a `completion` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    /// Identifier of the completed task.
    pub task: String,
    /// Work product, uninterpreted by the runtime.
    #[serde(default)]
    pub outcome: Value,
}

/// Body of an `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description.
    pub message: String,
    /// Machine-readable code, when the producer has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Body of a `checkpoint` event (the audit-stream record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// Agent the record is about.
    pub agent: AgentName,
    /// Credits consumed so far.
    pub credits_used: u64,
    /// Tokens consumed so far.
    pub tokens_used: u64,
    /// Wall time consumed so far, in milliseconds.
    pub wall_time_ms: u64,
    /// Tool that triggered the tracked call.
    pub tool: String,
    /// Verdict the sentinel returned, as its wire tag.
    pub verdict: String,
}

/// Tagged union of payload bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `tool_call` body.
    ToolCall(ToolCallPayload),
    /// `state_change` body.
    StateChange(StateChangePayload),
    /// `completion` body.
    Completion(CompletionPayload),
    /// `error` body.
    Error(ErrorPayload),
    /// `checkpoint` body.
    Checkpoint(CheckpointPayload),
    /// `session_summary` body: the full canonical summary document.
    SessionSummary(Value),
    /// Escape variant: a body this build cannot interpret.
    ///
    /// Produced at decode time when the typed schema for the kind does
    /// not fit; re-encodes byte-for-byte.
    Opaque(Value),
}

impl Payload {
    /// Returns the [`EventKind`] this payload belongs to, when the
    /// variant determines it. [`Payload::Opaque`] can accompany any
    /// kind and returns `None`.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::ToolCall(_) => Some(EventKind::ToolCall),
            Self::StateChange(_) => Some(EventKind::StateChange),
            Self::Completion(_) => Some(EventKind::Completion),
            Self::Error(_) => Some(EventKind::Error),
            Self::Checkpoint(_) => Some(EventKind::Checkpoint),
            Self::SessionSummary(_) => Some(EventKind::SessionSummary),
            Self::Opaque(_) => None,
        }
    }

    /// Serializes the body to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when a body field
    /// cannot be represented (non-string map keys and the like).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::ToolCall(p) => serde_json::to_value(p),
            Self::StateChange(p) => serde_json::to_value(p),
            Self::Completion(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
            Self::Checkpoint(p) => serde_json::to_value(p),
            Self::SessionSummary(v) | Self::Opaque(v) => Ok(v.clone()),
        }
    }

    /// Rebuilds a payload from a wire value, selecting the schema by
    /// `kind`.
    ///
    /// A value that does not fit the kind's schema lands in
    /// [`Payload::Opaque`] instead of failing: payload schema drift is
    /// forward-compatible by design, while envelope-level invariants
    /// stay strict.
    #[must_use]
    pub fn from_kind_value(kind: EventKind, value: Value) -> Self {
        match kind {
            EventKind::ToolCall => match serde_json::from_value(value.clone()) {
                Ok(p) => Self::ToolCall(p),
                Err(_) => Self::Opaque(value),
            },
            EventKind::StateChange => match serde_json::from_value(value.clone()) {
                Ok(p) => Self::StateChange(p),
                Err(_) => Self::Opaque(value),
            },
            EventKind::Completion => match serde_json::from_value(value.clone()) {
                Ok(p) => Self::Completion(p),
                Err(_) => Self::Opaque(value),
            },
            EventKind::Error => match serde_json::from_value(value.clone()) {
                Ok(p) => Self::Error(p),
                Err(_) => Self::Opaque(value),
            },
            EventKind::Checkpoint => match serde_json::from_value(value.clone()) {
                Ok(p) => Self::Checkpoint(p),
                Err(_) => Self::Opaque(value),
            },
            EventKind::SessionSummary => Self::SessionSummary(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_tracks_variant() {
        let p = Payload::ToolCall(ToolCallPayload {
            tool: "grep".into(),
            args: json!({"pattern": "x"}),
        });
        assert_eq!(p.kind(), Some(EventKind::ToolCall));

        let opaque = Payload::Opaque(json!({"anything": true}));
        assert_eq!(opaque.kind(), None);
    }

    #[test]
    fn typed_round_trip() {
        let p = Payload::Completion(CompletionPayload {
            task: "root-7".into(),
            outcome: json!({"ok": true}),
        });
        let value = p.to_value().unwrap();
        let back = Payload::from_kind_value(EventKind::Completion, value);
        assert_eq!(back, p);
    }

    #[test]
    fn schema_mismatch_becomes_opaque() {
        let drifted = json!({"tool_v2": "grep", "argv": []});
        let back = Payload::from_kind_value(EventKind::ToolCall, drifted.clone());
        assert_eq!(back, Payload::Opaque(drifted));
    }

    #[test]
    fn opaque_survives_reencode() {
        let body = json!({"unknown": {"nested": [1, 2, 3]}});
        let p = Payload::Opaque(body.clone());
        assert_eq!(p.to_value().unwrap(), body);
    }

    #[test]
    fn error_payload_code_optional_on_wire() {
        let p = ErrorPayload {
            message: "boom".into(),
            code: None,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("code").is_none());
    }
}
