//! Core types for the HIVE multi-agent coordination runtime.
//!
//! This crate is the bottom of the workspace dependency graph:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  hive-cli                                            │
//! ├──────────────────────────────────────────────────────┤
//! │  hive-runtime   (sentinel, locks, agents, snapshot)  │
//! ├──────────────────────────────────────────────────────┤
//! │  hive-bus       (topics, delivery)                   │
//! │  hive-event     (envelope, codec)                    │
//! ├──────────────────────────────────────────────────────┤
//! │  hive-types     ◄── HERE                             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! It provides:
//!
//! - Identifier newtypes ([`AgentName`], [`EventId`], [`SessionId`],
//!   [`IntentId`], [`ResourceName`], [`TopicName`])
//! - The [`ErrorCode`] trait every workspace error implements
//! - Level-tagged [`Warning`] entries used by summaries and reports
//!
//! Components reference each other only through these opaque
//! identifiers; shared mutable handles never cross a component
//! boundary.

mod error;
mod id;
mod warning;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{
    AgentName, EventId, IntentId, InvalidAgentName, ResourceName, SessionId, TopicName,
};
pub use warning::{WarnLevel, Warning};
