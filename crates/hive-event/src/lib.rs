//! Event envelope and canonical codec for HIVE.
//!
//! Everything agents say to each other travels as an [`Envelope`]: an
//! immutable value with a closed [`EventKind`] set, a typed [`Payload`]
//! union, producer [`Meta`], and an optional polarity annotation.
//!
//! ```text
//! ┌──────────┐  Envelope   ┌─────────┐  Envelope   ┌──────────┐
//! │ Producer │ ──────────► │   Bus   │ ──────────► │ Consumer │
//! │  agent   │   encode()  │ (topic) │   decode()  │  agent   │
//! └──────────┘             └─────────┘             └──────────┘
//! ```
//!
//! # Contracts
//!
//! - **Immutability**: an envelope is never mutated after construction.
//! - **Determinism**: [`Envelope::encode`] routes through the canonical
//!   codec ([`codec`]); equal envelopes produce identical bytes. This
//!   is the prerequisite for reproducible context hashes.
//! - **Whole-or-nothing decode**: [`Envelope::decode`] rejects any
//!   invariant violation with [`EventError::Malformed`]; no partial
//!   values escape.
//! - **Polarity filter**: consumers apply [`polarity::passes`] with a
//!   configured threshold (default `-0.5`); events without polarity
//!   always pass. See [`polarity::from_garbage`] for the migration from
//!   the legacy boolean flag.
//!
//! # Example
//!
//! ```
//! use hive_event::{Envelope, Meta};
//! use hive_types::{AgentName, SessionId};
//! use serde_json::json;
//!
//! let agent = AgentName::new("planner").unwrap();
//! let meta = Meta::new(SessionId::new("hive-2025-06-01-001")).with_credits(1);
//! let event = Envelope::tool_call(agent, "grep", json!({"pattern": "fn "}), meta);
//!
//! let bytes = event.encode().unwrap();
//! let back = Envelope::decode(&bytes).unwrap();
//! assert_eq!(back, event);
//! ```

pub mod codec;
mod envelope;
mod error;
mod kind;
mod payload;
pub mod polarity;

pub use envelope::{Envelope, Meta};
pub use error::EventError;
pub use kind::EventKind;
pub use payload::{
    CheckpointPayload, CompletionPayload, ErrorPayload, Payload, StateChangePayload,
    ToolCallPayload,
};
pub use polarity::DEFAULT_POLARITY_THRESHOLD;
