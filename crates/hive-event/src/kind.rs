//! Event kind discriminator.
//!
//! The kind set is closed: every event on the wire carries exactly one
//! of these tags, and the tag selects the payload schema. Decoding an
//! unknown tag fails; there is no open extension point at this level
//! (forward compatibility lives in [`Payload::Opaque`]).
//!
//! | Kind | Producer | Typical payload |
//! |------|----------|-----------------|
//! | `tool_call` | workers, orchestrator | tool name + arguments |
//! | `state_change` | runtime | agent state transition |
//! | `completion` | workers | finished task + outcome |
//! | `error` | workers, runtime | failure description |
//! | `checkpoint` | sentinel audit stream | counters at checkpoint |
//! | `session_summary` | snapshotter | full summary document |
//!
//! [`Payload::Opaque`]: crate::Payload::Opaque

use serde::{Deserialize, Serialize};

/// Discriminator for the closed event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A tool invocation request or record.
    ToolCall,
    /// An agent state transition.
    StateChange,
    /// Successful completion of a task.
    Completion,
    /// A failure inside a worker or the runtime.
    Error,
    /// Sentinel audit record emitted on the audit topic.
    Checkpoint,
    /// A session summary document from the snapshotter.
    SessionSummary,
}

impl EventKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::StateChange => "state_change",
            Self::Completion => "completion",
            Self::Error => "error",
            Self::Checkpoint => "checkpoint",
            Self::SessionSummary => "session_summary",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventKind::ToolCall).unwrap(),
            "\"tool_call\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::SessionSummary).unwrap(),
            "\"session_summary\""
        );
    }

    #[test]
    fn unknown_tag_rejected() {
        let result: Result<EventKind, _> = serde_json::from_str("\"pr_created\"");
        assert!(result.is_err());
    }

    #[test]
    fn display_matches_wire_tag() {
        assert_eq!(EventKind::Checkpoint.to_string(), "checkpoint");
    }
}
