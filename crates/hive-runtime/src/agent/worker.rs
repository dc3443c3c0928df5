//! The worker seam and its capability context.
//!
//! A [`Worker`] is the behavior of one agent: it consumes envelopes
//! from the agent's input topic and returns envelopes to publish on
//! the output topic. Everything a worker may do against shared
//! resources (charging the sentinel before an action, acquiring and
//! releasing locks) goes through its [`WorkerContext`], so the
//! governors see every chargeable step before it happens.

use crate::agent::{AgentState, WorkerError};
use crate::lock::{LockError, LockManager};
use crate::sentinel::{CreditSentinel, Verdict};
use async_trait::async_trait;
use hive_event::{Envelope, Meta};
use hive_types::{AgentName, ResourceName, SessionId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Behavior of one agent.
///
/// Implementations handle one message at a time; the runtime never
/// calls `on_event` concurrently for the same agent.
#[async_trait]
pub trait Worker: Send {
    /// Handles one incoming envelope, returning envelopes to publish
    /// on the agent's output topic.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Aborted`] ends the agent without restart
    ///   (budget exhausted, deadlock victim).
    /// - [`WorkerError::Failed`] invokes the restart policy.
    /// - [`WorkerError::Protocol`] surfaces a lock-protocol bug.
    async fn on_event(
        &mut self,
        event: Envelope,
        ctx: &mut WorkerContext,
    ) -> Result<Vec<Envelope>, WorkerError>;
}

/// Capabilities handed to a worker by the runtime.
pub struct WorkerContext {
    agent: AgentName,
    session: SessionId,
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    cancel: CancellationToken,
    state: Arc<Mutex<AgentState>>,
    last_checkpoint: Arc<Mutex<Option<String>>>,
}

impl WorkerContext {
    pub(crate) fn new(
        agent: AgentName,
        session: SessionId,
        sentinel: Arc<CreditSentinel>,
        locks: Arc<LockManager>,
        cancel: CancellationToken,
        state: Arc<Mutex<AgentState>>,
        last_checkpoint: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            agent,
            session,
            sentinel,
            locks,
            cancel,
            state,
            last_checkpoint,
        }
    }

    /// Name of the agent this context belongs to.
    #[must_use]
    pub fn agent(&self) -> &AgentName {
        &self.agent
    }

    /// Session the agent runs in.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Fresh metadata pre-filled with the session id.
    #[must_use]
    pub fn meta(&self) -> Meta {
        Meta::new(self.session.clone())
    }

    /// Returns `true` once termination has been requested; workers
    /// doing long computations between suspension points should check
    /// this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Charges the sentinel for a proposed action and applies the
    /// verdict:
    ///
    /// - `Throttle`: the agent state flips to `throttled` and this
    ///   call sleeps out the suggested delay before returning.
    /// - `Checkpoint`: a checkpoint reference is recorded on the agent
    ///   record before returning (the caller's persistence duty).
    /// - `Abort`: returns [`WorkerError::Aborted`]; do not proceed.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Aborted`] on an abort verdict or when cancelled
    /// mid-throttle.
    pub async fn charge(
        &self,
        tool: &str,
        credits: u64,
        tokens: u64,
    ) -> Result<Verdict, WorkerError> {
        let verdict = self.sentinel.track(&self.agent, tool, credits, tokens);
        match verdict {
            Verdict::Abort => Err(WorkerError::Aborted(format!(
                "sentinel abort on tool '{tool}'"
            ))),
            Verdict::Throttle => {
                *self.state.lock() = AgentState::Throttled;
                debug!(agent = %self.agent, tool, "throttled");
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        return Err(WorkerError::Aborted("cancelled while throttled".into()));
                    }
                    () = tokio::time::sleep(verdict.suggested_delay()) => {}
                }
                *self.state.lock() = AgentState::Running;
                Ok(verdict)
            }
            Verdict::Checkpoint => {
                let credits_now = self
                    .sentinel
                    .metrics()
                    .agents
                    .get(&self.agent)
                    .map_or(0, |m| m.credits_used);
                *self.last_checkpoint.lock() = Some(format!("{}@{credits_now}", self.agent));
                debug!(agent = %self.agent, credits = credits_now, "checkpoint persisted");
                Ok(verdict)
            }
            Verdict::Warn => {
                warn!(agent = %self.agent, tool, "approaching soft cap");
                Ok(verdict)
            }
            Verdict::Allow => Ok(verdict),
        }
    }

    /// Acquires an exclusive lock, suspending while contended.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Aborted`] when this wait broke a deadlock,
    ///   was cancelled by termination, or the agent is shutting down.
    /// - [`WorkerError::Protocol`] on double acquire.
    pub async fn lock(&self, resource: &ResourceName) -> Result<(), WorkerError> {
        tokio::select! {
            () = self.cancel.cancelled() => {
                Err(WorkerError::Aborted("cancelled while awaiting lock".into()))
            }
            result = self.locks.acquire(&self.agent, resource) => match result {
                Ok(()) => Ok(()),
                Err(e @ (LockError::Deadlock { .. } | LockError::Cancelled { .. })) => {
                    Err(WorkerError::Aborted(e.to_string()))
                }
                Err(e) => Err(WorkerError::Protocol(e)),
            }
        }
    }

    /// Releases a held lock.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Protocol`] when the agent does not hold it.
    pub fn unlock(&self, resource: &ResourceName) -> Result<(), WorkerError> {
        self.locks
            .release(&self.agent, resource)
            .map_err(WorkerError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentCaps;
    use crate::sentinel::{AuditSink, SentinelConfig};

    fn context(soft: u64, hard: u64) -> (WorkerContext, Arc<CreditSentinel>) {
        let agent = AgentName::new("w").unwrap();
        let (sentinel, _rx) = CreditSentinel::new(
            SentinelConfig {
                global_hard_cap: 10_000,
                checkpoint_interval: 50,
                warn_threshold: 0.80,
                throttle_threshold: 0.95,
                default_caps: AgentCaps {
                    soft_cap: soft,
                    hard_cap: hard,
                    wall_time_limit_ms: 60_000,
                },
            },
            AuditSink::null(),
        );
        let (locks, _lock_rx) = LockManager::new();
        let ctx = WorkerContext::new(
            agent,
            SessionId::new("s"),
            sentinel.clone(),
            locks,
            CancellationToken::new(),
            Arc::new(Mutex::new(AgentState::Running)),
            Arc::new(Mutex::new(None)),
        );
        (ctx, sentinel)
    }

    #[tokio::test]
    async fn charge_allows_and_commits() {
        let (ctx, sentinel) = context(100, 200);
        let verdict = ctx.charge("t", 10, 5).await.unwrap();
        assert_eq!(verdict, Verdict::Allow);
        assert_eq!(sentinel.metrics().agents[ctx.agent()].credits_used, 10);
    }

    #[tokio::test]
    async fn charge_records_checkpoint_reference() {
        let (ctx, _sentinel) = context(10_000, 20_000);
        let verdict = ctx.charge("t", 50, 0).await.unwrap();
        assert_eq!(verdict, Verdict::Checkpoint);
        assert_eq!(
            ctx.last_checkpoint.lock().as_deref(),
            Some("w@50")
        );
    }

    #[tokio::test]
    async fn charge_abort_is_terminal_error() {
        let (ctx, _sentinel) = context(100, 110);
        let err = ctx.charge("t", 200, 0).await.unwrap_err();
        assert!(matches!(err, WorkerError::Aborted(_)));
    }

    #[tokio::test]
    async fn lock_round_trip_and_protocol_violation() {
        let (ctx, _sentinel) = context(100, 200);
        let r = ResourceName::new("file.txt");

        ctx.lock(&r).await.unwrap();
        let err = ctx.lock(&r).await.unwrap_err();
        assert!(matches!(err, WorkerError::Protocol(_)));
        ctx.unlock(&r).unwrap();
        assert!(matches!(
            ctx.unlock(&r).unwrap_err(),
            WorkerError::Protocol(_)
        ));
    }
}
