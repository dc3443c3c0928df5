//! The event envelope: HIVE's unit of communication.
//!
//! An [`Envelope`] is immutable once constructed. Producers build one,
//! the bus carries it, consumers read it; nothing mutates it in flight.
//!
//! # Wire Form
//!
//! ```text
//! {
//!   "agent": "planner",
//!   "id": "<uuid-v4>",
//!   "meta": {
//!     "context_hash": "",
//!     "credits_used": 3,
//!     "session_id": "hive-2025-06-01-001"
//!   },
//!   "payload": { ... },            // schema selected by "type"
//!   "polarity": 0.5,               // optional
//!   "timestamp": "<RFC3339 UTC>",
//!   "type": "tool_call"
//! }
//! ```
//!
//! Keys are emitted in lexicographic order (see [`crate::codec`]).
//!
//! # Two Clocks
//!
//! Each envelope records a wall-clock instant for human audit and a
//! process-monotonic sequence number for ordering within one producer.
//! Only the wall clock crosses the wire; the sequence is reassigned on
//! decode and excluded from equality.

use crate::{codec, polarity, EventError, EventKind, Payload};
use chrono::{DateTime, Utc};
use hive_types::{AgentName, EventId, IntentId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic sequence for envelope ordering.
static SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Producer-supplied event metadata.
///
/// The named fields are required by the runtime; everything else a
/// producer wants to attach goes into the flattened `extra` map
/// (request/reply correlation ids travel there).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Session the event belongs to.
    pub session_id: SessionId,

    /// Credits consumed by the action this event records.
    pub credits_used: u64,

    /// Context hash at the time of the event. Opaque; may be empty.
    pub context_hash: String,

    /// Intent this event serves, when linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<IntentId>,

    /// Parent intent, when linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intent_id: Option<IntentId>,

    /// Additional producer keys. Opaque to the runtime.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Meta {
    /// Key under which request/reply correlation travels in `extra`.
    pub const CORRELATION_KEY: &'static str = "correlation_id";

    /// Creates metadata for a session with zero credits and an empty
    /// context hash.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            credits_used: 0,
            context_hash: String::new(),
            intent_id: None,
            parent_intent_id: None,
            extra: BTreeMap::new(),
        }
    }

    /// Sets the credits consumed.
    #[must_use]
    pub fn with_credits(mut self, credits: u64) -> Self {
        self.credits_used = credits;
        self
    }

    /// Sets the context hash.
    #[must_use]
    pub fn with_context_hash(mut self, hash: impl Into<String>) -> Self {
        self.context_hash = hash.into();
        self
    }

    /// Sets the intent link.
    #[must_use]
    pub fn with_intent(mut self, intent: IntentId) -> Self {
        self.intent_id = Some(intent);
        self
    }

    /// Sets the parent intent link.
    #[must_use]
    pub fn with_parent_intent(mut self, intent: IntentId) -> Self {
        self.parent_intent_id = Some(intent);
        self
    }

    /// Adds a producer-defined key to `extra`.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Sets the request/reply correlation id.
    #[must_use]
    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_extra(Self::CORRELATION_KEY, Value::String(id.into()))
    }

    /// Returns the correlation id, when present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.extra.get(Self::CORRELATION_KEY).and_then(Value::as_str)
    }
}

/// Wire-shape mirror of [`Envelope`] used by the codec.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    agent: AgentName,
    id: EventId,
    meta: Meta,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    polarity: Option<f64>,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: EventKind,
}

/// One immutable event.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Globally unique identifier.
    pub id: EventId,
    /// Discriminator from the closed kind set.
    pub kind: EventKind,
    /// Wall-clock creation instant (UTC).
    pub timestamp: DateTime<Utc>,
    /// Producer's symbolic name.
    pub agent: AgentName,
    /// Body, schema selected by `kind`.
    pub payload: Payload,
    /// Producer-supplied metadata.
    pub meta: Meta,
    /// Quality annotation in `[-1, +1]`, when present.
    pub polarity: Option<f64>,
    /// Process-monotonic sequence number. Not on the wire.
    seq: u64,
}

// seq is a process-local ordering aid, not part of the event's
// identity; decode(encode(e)) == e holds because of this.
impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.timestamp == other.timestamp
            && self.agent == other.agent
            && self.payload == other.payload
            && self.meta == other.meta
            && self.polarity == other.polarity
    }
}

impl Envelope {
    /// Creates an envelope from a typed payload; the kind is derived
    /// from the payload variant.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] for [`Payload::Opaque`], whose
    /// kind cannot be derived; use [`Envelope::opaque`] for those.
    pub fn new(agent: AgentName, payload: Payload, meta: Meta) -> Result<Self, EventError> {
        let kind = payload.kind().ok_or_else(|| {
            EventError::Malformed("opaque payload requires an explicit kind".into())
        })?;
        Ok(Self::assemble(kind, agent, payload, meta))
    }

    /// Creates an envelope carrying an opaque body under an explicit
    /// kind.
    #[must_use]
    pub fn opaque(kind: EventKind, agent: AgentName, body: Value, meta: Meta) -> Self {
        Self::assemble(kind, agent, Payload::Opaque(body), meta)
    }

    /// Creates a `tool_call` envelope.
    #[must_use]
    pub fn tool_call(agent: AgentName, tool: impl Into<String>, args: Value, meta: Meta) -> Self {
        Self::assemble(
            EventKind::ToolCall,
            agent,
            Payload::ToolCall(crate::ToolCallPayload {
                tool: tool.into(),
                args,
            }),
            meta,
        )
    }

    /// Creates a `state_change` envelope.
    #[must_use]
    pub fn state_change(
        agent: AgentName,
        from: impl Into<String>,
        to: impl Into<String>,
        meta: Meta,
    ) -> Self {
        Self::assemble(
            EventKind::StateChange,
            agent,
            Payload::StateChange(crate::StateChangePayload {
                from: from.into(),
                to: to.into(),
            }),
            meta,
        )
    }

    /// Creates a `completion` envelope.
    #[must_use]
    pub fn completion(
        agent: AgentName,
        task: impl Into<String>,
        outcome: Value,
        meta: Meta,
    ) -> Self {
        Self::assemble(
            EventKind::Completion,
            agent,
            Payload::Completion(crate::CompletionPayload {
                task: task.into(),
                outcome,
            }),
            meta,
        )
    }

    /// Creates an `error` envelope.
    #[must_use]
    pub fn error_event(
        agent: AgentName,
        message: impl Into<String>,
        code: Option<String>,
        meta: Meta,
    ) -> Self {
        Self::assemble(
            EventKind::Error,
            agent,
            Payload::Error(crate::ErrorPayload {
                message: message.into(),
                code,
            }),
            meta,
        )
    }

    /// Creates a `session_summary` envelope carrying the canonical
    /// summary document.
    #[must_use]
    pub fn session_summary(agent: AgentName, document: Value, meta: Meta) -> Self {
        Self::assemble(
            EventKind::SessionSummary,
            agent,
            Payload::SessionSummary(document),
            meta,
        )
    }

    fn assemble(kind: EventKind, agent: AgentName, payload: Payload, meta: Meta) -> Self {
        Self {
            id: EventId::new(),
            kind,
            timestamp: Utc::now(),
            agent,
            payload,
            meta,
            polarity: None,
            seq: next_seq(),
        }
    }

    /// Attaches a polarity annotation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::PolarityOutOfRange`] outside `[-1, +1]`.
    pub fn with_polarity(mut self, value: f64) -> Result<Self, EventError> {
        if !polarity::in_range(value) {
            return Err(EventError::PolarityOutOfRange(value));
        }
        self.polarity = Some(value);
        Ok(self)
    }

    /// Returns the process-monotonic sequence number assigned at
    /// construction (or at decode).
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Encodes to canonical JSON bytes.
    ///
    /// Deterministic: the same envelope always yields the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] when a payload body cannot be
    /// represented as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        codec::to_canonical_bytes(&self.to_wire()?)
    }

    /// Encodes to a canonical JSON string.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Envelope::encode`].
    pub fn canonical_json(&self) -> Result<String, EventError> {
        codec::to_canonical_string(&self.to_wire()?)
    }

    fn to_wire(&self) -> Result<WireEnvelope, EventError> {
        Ok(WireEnvelope {
            agent: self.agent.clone(),
            id: self.id,
            meta: self.meta.clone(),
            payload: self
                .payload
                .to_value()
                .map_err(|e| EventError::Encode(e.to_string()))?,
            polarity: self.polarity,
            timestamp: self.timestamp,
            kind: self.kind,
        })
    }

    /// Decodes an envelope from wire bytes.
    ///
    /// Validation is whole-or-nothing: an unknown kind tag, an invalid
    /// agent name, a negative counter, or an out-of-range polarity all
    /// reject the event without producing a partial decode. Payload
    /// schema drift does not reject (see [`Payload::from_kind_value`]).
    ///
    /// # Errors
    ///
    /// [`EventError::Malformed`] or [`EventError::PolarityOutOfRange`].
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;

        if let Some(p) = wire.polarity {
            if !polarity::in_range(p) {
                return Err(EventError::PolarityOutOfRange(p));
            }
        }

        Ok(Self {
            id: wire.id,
            kind: wire.kind,
            timestamp: wire.timestamp,
            agent: wire.agent,
            payload: Payload::from_kind_value(wire.kind, wire.payload),
            meta: wire.meta,
            polarity: wire.polarity,
            seq: next_seq(),
        })
    }
}
