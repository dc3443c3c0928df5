//! Agent runtime: lifecycles, routing, enforcement.
//!
//! The runtime owns every agent record and is the only component that
//! starts or stops agent tasks. Governors (sentinel, lock manager)
//! request terminations over their abort channels; the runtime
//! executes them.
//!
//! # State Machine
//!
//! ```text
//!            spawn                  verdict = Throttle
//!   (start) ─────────► running ──────────────────────► throttled
//!                       ▲  │                               │
//!                       │  │ verdict = Abort               │ delay elapsed
//!                       │  │ OR wall-time exceeded         ▼
//!                       │  │ OR unhandled error         running
//!                       │  └──► aborting ──► dead
//!                       │                     │
//!                       └─────── restart ◄────┘  (unhandled error only,
//!                                                 up to the restart limit)
//! ```
//!
//! # Message Routing
//!
//! An agent named `x` consumes topic `x-in` (consumer group `x`) and
//! publishes its outputs to `x-out`. Wiring `x-out` into some other
//! agent's `-in` topic is the orchestrator's job.
//!
//! # Concurrency
//!
//! Each agent is one tokio task. Within an agent, messages are handled
//! one at a time; across agents, scheduling is parallel. The only
//! suspension points are: awaiting an incoming message, awaiting a
//! lock, awaiting a throttle delay, and awaiting a publish under
//! backpressure. Cancellation is cooperative at each of those points,
//! with a hard kill after `cancellation_grace_ms`.

mod builtin;
mod runtime;
mod worker;

pub use builtin::{EchoWorker, SinkWorker};
pub use runtime::{AgentHandle, AgentRuntime};
pub use worker::{Worker, WorkerContext};

use hive_types::{AgentName, ErrorCode, TopicName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AgentCaps;
use crate::lock::LockError;

/// Lifecycle state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Record created; worker task not yet running.
    Spawning,
    /// Consuming messages.
    Running,
    /// Observing a sentinel-suggested delay.
    Throttled,
    /// Cooperative cancellation in progress.
    Aborting,
    /// Terminal. Restarted only by a fresh `spawn`.
    Dead,
}

impl AgentState {
    /// Wire tag for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Throttled => "throttled",
            Self::Aborting => "aborting",
            Self::Dead => "dead",
        }
    }

    /// Returns `true` for [`AgentState::Dead`].
    #[must_use]
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to spawn one agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Symbolic name; also the consumer group and topic stem.
    pub name: AgentName,
    /// Cap overrides; `None` takes the configured defaults.
    pub caps: Option<AgentCaps>,
    /// Input topic override; `None` takes `<name>-in`.
    pub input_topic: Option<TopicName>,
    /// Restart limit override; `None` takes the configured default.
    pub restart_limit: Option<u32>,
}

impl AgentSpec {
    /// Creates a spec with defaults for everything but the name.
    #[must_use]
    pub fn new(name: AgentName) -> Self {
        Self {
            name,
            caps: None,
            input_topic: None,
            restart_limit: None,
        }
    }

    /// Overrides the agent's caps.
    #[must_use]
    pub fn with_caps(mut self, caps: AgentCaps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Overrides the input topic.
    #[must_use]
    pub fn with_input_topic(mut self, topic: TopicName) -> Self {
        self.input_topic = Some(topic);
        self
    }

    /// Overrides the restart limit.
    #[must_use]
    pub fn with_restart_limit(mut self, limit: u32) -> Self {
        self.restart_limit = Some(limit);
        self
    }
}

/// Errors from runtime operations (spawn/terminate).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The named agent has no record.
    #[error("unknown agent '{0}'")]
    Unknown(AgentName),

    /// An agent with this name is already live.
    #[error("agent '{0}' already exists")]
    Duplicate(AgentName),

    /// Subscribing the worker to its input topic failed.
    #[error("failed to spawn '{agent}': {source}")]
    Spawn {
        agent: AgentName,
        #[source]
        source: hive_bus::BusError,
    },
}

impl ErrorCode for AgentError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unknown(_) => "AGENT_UNKNOWN",
            Self::Duplicate(_) => "AGENT_DUPLICATE",
            Self::Spawn { .. } => "AGENT_SPAWN",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}

/// Errors a worker's `on_event` can surface.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Unhandled failure inside the worker; the restart policy
    /// applies.
    #[error("worker failed: {0}")]
    Failed(String),

    /// The agent is over budget or was chosen as a deadlock victim;
    /// terminated without restart.
    #[error("worker aborted: {0}")]
    Aborted(String),

    /// Lock protocol violation (double acquire, release of a lock not
    /// held). A bug in the worker, surfaced as-is.
    #[error("lock protocol violation: {0}")]
    Protocol(#[source] LockError),
}

impl ErrorCode for WorkerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Failed(_) => "AGENT_WORKER_FAILED",
            Self::Aborted(_) => "AGENT_ABORTED",
            Self::Protocol(_) => "AGENT_LOCK_PROTOCOL",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_types::assert_error_code;

    #[test]
    fn state_tags_are_snake_case() {
        assert_eq!(AgentState::Spawning.as_str(), "spawning");
        assert_eq!(AgentState::Dead.to_string(), "dead");
        assert_eq!(
            serde_json::to_string(&AgentState::Throttled).unwrap(),
            "\"throttled\""
        );
    }

    #[test]
    fn error_codes_follow_convention() {
        let name = AgentName::new("a").unwrap();
        assert_error_code(&AgentError::Unknown(name.clone()), "AGENT_");
        assert_error_code(&AgentError::Duplicate(name), "AGENT_");
        assert_error_code(&WorkerError::Failed("x".into()), "AGENT_");
        assert_error_code(&WorkerError::Aborted("x".into()), "AGENT_");
    }

    #[test]
    fn only_worker_failures_are_recoverable() {
        assert!(WorkerError::Failed("x".into()).is_recoverable());
        assert!(!WorkerError::Aborted("x".into()).is_recoverable());
    }

    #[test]
    fn spec_builder() {
        let name = AgentName::new("planner").unwrap();
        let spec = AgentSpec::new(name.clone())
            .with_restart_limit(1)
            .with_input_topic(TopicName::new("custom-in"));
        assert_eq!(spec.name, name);
        assert_eq!(spec.restart_limit, Some(1));
        assert_eq!(spec.input_topic, Some(TopicName::new("custom-in")));
        assert!(spec.caps.is_none());
    }
}
