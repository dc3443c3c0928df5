//! The agent supervisor.

use crate::agent::{AgentError, AgentSpec, AgentState, Worker, WorkerContext, WorkerError};
use crate::config::HiveConfig;
use crate::lock::LockManager;
use crate::sentinel::{AbortNotice, CreditSentinel};
use hive_bus::{Backoff, MessageBus, Subscription};
use hive_event::Envelope;
use hive_types::{AgentName, SessionId, TopicName, Warning};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts made to publish one worker output before dropping it.
const PUBLISH_ATTEMPTS: u32 = 5;

struct AgentRecord {
    state: Arc<Mutex<AgentState>>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    restarts: Arc<AtomicU32>,
    last_checkpoint: Arc<Mutex<Option<String>>>,
}

/// Handle returned from [`AgentRuntime::spawn`].
#[derive(Debug)]
pub struct AgentHandle {
    name: AgentName,
    state: Arc<Mutex<AgentState>>,
}

impl AgentHandle {
    /// Name of the spawned agent.
    #[must_use]
    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }
}

/// Owns agent lifecycles; routes worker outputs; enforces governor
/// verdicts.
pub struct AgentRuntime {
    bus: Arc<dyn MessageBus>,
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    session: SessionId,
    config: HiveConfig,
    agents: Mutex<BTreeMap<AgentName, AgentRecord>>,
    warnings: Arc<Mutex<Vec<Warning>>>,
}

impl AgentRuntime {
    /// Creates a runtime over the shared bus and governors.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        sentinel: Arc<CreditSentinel>,
        locks: Arc<LockManager>,
        session: SessionId,
        config: HiveConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            sentinel,
            locks,
            session,
            config,
            agents: Mutex::new(BTreeMap::new()),
            warnings: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Session this runtime serves.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Drains a governor's abort feed, terminating each named agent.
    ///
    /// Both the sentinel's and the lock manager's feeds are wired
    /// through here; termination is idempotent, so overlapping
    /// notices are harmless.
    pub fn spawn_abort_listener(
        self: &Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<AbortNotice>,
    ) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                info!(agent = %notice.agent, reason = %notice.reason, "abort requested");
                let warning = match notice.kind {
                    crate::sentinel::AbortKind::Deadlock => Warning::warn(
                        "deadlock",
                        format!("agent '{}': {}", notice.agent, notice.reason),
                    ),
                    _ => Warning::error(
                        "agent_aborted",
                        format!("agent '{}': {}", notice.agent, notice.reason),
                    ),
                };
                runtime.record_warning(warning);
                if let Err(e) = runtime
                    .terminate_with_reason(&notice.agent, &notice.reason)
                    .await
                {
                    debug!(agent = %notice.agent, error = %e, "abort target not in runtime");
                }
            }
        })
    }

    /// Spawns an agent: registers its budget, subscribes `<name>-in`,
    /// and starts the worker loop.
    ///
    /// # Errors
    ///
    /// - [`AgentError::Duplicate`] when the name is already live.
    /// - [`AgentError::Spawn`] when the input subscription fails.
    pub async fn spawn(
        &self,
        spec: AgentSpec,
        worker: Box<dyn Worker>,
    ) -> Result<AgentHandle, AgentError> {
        let name = spec.name.clone();
        {
            let agents = self.agents.lock();
            if let Some(record) = agents.get(&name) {
                if !record.state.lock().is_dead() {
                    return Err(AgentError::Duplicate(name));
                }
            }
        }

        let caps = spec
            .caps
            .unwrap_or_else(|| self.config.caps_for(name.as_str()));
        self.sentinel.register(&name, &caps);

        let input_topic = spec
            .input_topic
            .unwrap_or_else(|| TopicName::input(&name));
        let subscription = self
            .bus
            .subscribe(&input_topic, name.as_str())
            .await
            .map_err(|source| AgentError::Spawn {
                agent: name.clone(),
                source,
            })?;

        let state = Arc::new(Mutex::new(AgentState::Spawning));
        let cancel = CancellationToken::new();
        let restarts = Arc::new(AtomicU32::new(0));
        let last_checkpoint = Arc::new(Mutex::new(None));

        let ctx = WorkerContext::new(
            name.clone(),
            self.session.clone(),
            self.sentinel.clone(),
            self.locks.clone(),
            cancel.clone(),
            state.clone(),
            last_checkpoint.clone(),
        );

        let shell = WorkerShell {
            name: name.clone(),
            subscription,
            output_topic: TopicName::output(&name),
            bus: self.bus.clone(),
            sentinel: self.sentinel.clone(),
            locks: self.locks.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            restarts: restarts.clone(),
            restart_limit: spec.restart_limit.unwrap_or(self.config.restart_limit),
            warnings: self.warnings.clone(),
        };
        let join = tokio::spawn(shell.run(worker, ctx));

        self.agents.lock().insert(
            name.clone(),
            AgentRecord {
                state: state.clone(),
                cancel,
                join: Some(join),
                restarts,
                last_checkpoint,
            },
        );

        self.emit_state_change(&name, AgentState::Spawning, AgentState::Running)
            .await;
        info!(agent = %name, topic = %input_topic, "agent spawned");
        Ok(AgentHandle { name, state })
    }

    /// Terminates an agent cooperatively, hard-killing after the
    /// configured grace.
    ///
    /// # Errors
    ///
    /// [`AgentError::Unknown`] when no record exists for the name.
    pub async fn terminate(&self, agent: &AgentName) -> Result<(), AgentError> {
        self.terminate_with_reason(agent, "terminated by request").await
    }

    /// [`AgentRuntime::terminate`] with an explicit reason for the
    /// log and warning trail.
    pub async fn terminate_with_reason(
        &self,
        agent: &AgentName,
        reason: &str,
    ) -> Result<(), AgentError> {
        let (cancel, join, state) = {
            let mut agents = self.agents.lock();
            let record = agents
                .get_mut(agent)
                .ok_or_else(|| AgentError::Unknown(agent.clone()))?;
            if record.state.lock().is_dead() {
                return Ok(());
            }
            *record.state.lock() = AgentState::Aborting;
            (
                record.cancel.clone(),
                record.join.take(),
                record.state.clone(),
            )
        };

        debug!(agent = %agent, reason, "terminating");
        cancel.cancel();

        if let Some(mut join) = join {
            let grace = Duration::from_millis(self.config.cancellation_grace_ms);
            if tokio::time::timeout(grace, &mut join).await.is_err() {
                join.abort();
                error!(agent = %agent, grace_ms = grace.as_millis() as u64, "hard kill");
                self.warnings.lock().push(Warning::error(
                    "cancellation",
                    format!("agent '{agent}' did not yield within {}ms; killed", grace.as_millis()),
                ));
            }
        }

        // Cleanup is idempotent with the worker loop's own epilogue.
        self.locks.cancel_waits(agent);
        self.locks.release_all(agent);
        self.sentinel.retire(agent);
        *state.lock() = AgentState::Dead;
        self.emit_state_change(agent, AgentState::Aborting, AgentState::Dead)
            .await;
        info!(agent = %agent, reason, "agent dead");
        Ok(())
    }

    /// Current state of every known agent.
    #[must_use]
    pub fn health(&self) -> BTreeMap<AgentName, AgentState> {
        self.agents
            .lock()
            .iter()
            .map(|(name, record)| (name.clone(), *record.state.lock()))
            .collect()
    }

    /// Last checkpoint reference per agent.
    #[must_use]
    pub fn checkpoints(&self) -> BTreeMap<AgentName, Option<String>> {
        self.agents
            .lock()
            .iter()
            .map(|(name, record)| (name.clone(), record.last_checkpoint.lock().clone()))
            .collect()
    }

    /// Restart count per agent.
    #[must_use]
    pub fn restart_counts(&self) -> BTreeMap<AgentName, u32> {
        self.agents
            .lock()
            .iter()
            .map(|(name, record)| (name.clone(), record.restarts.load(Ordering::Relaxed)))
            .collect()
    }

    /// Warnings accumulated since start (restart exhaustion, hard
    /// kills). Snapshot input.
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().clone()
    }

    /// Records a warning for the next session summary.
    pub fn record_warning(&self, warning: Warning) {
        self.warnings.lock().push(warning);
    }

    /// Returns `true` when every known agent is dead.
    #[must_use]
    pub fn all_dead(&self) -> bool {
        let agents = self.agents.lock();
        !agents.is_empty() && agents.values().all(|r| r.state.lock().is_dead())
    }

    /// Drains all agents. The final snapshot is the orchestrator's
    /// call to make, after this returns.
    ///
    /// Drain order is deterministic (name order); the bus retains any
    /// in-flight events, so an upstream agent dying before its
    /// downstream peers loses nothing.
    pub async fn shutdown(&self) {
        let names: Vec<AgentName> = self.agents.lock().keys().cloned().collect();
        for name in names {
            let _ = self.terminate_with_reason(&name, "shutdown").await;
        }
    }

    async fn emit_state_change(&self, agent: &AgentName, from: AgentState, to: AgentState) {
        let event = Envelope::state_change(
            agent.clone(),
            from.as_str(),
            to.as_str(),
            hive_event::Meta::new(self.session.clone()),
        );
        if let Err(e) = self.bus.publish(&TopicName::output(agent), event).await {
            debug!(agent = %agent, error = %e, "state change event dropped");
        }
    }
}

/// Everything one worker loop needs, bundled for the spawned task.
struct WorkerShell {
    name: AgentName,
    subscription: Subscription,
    output_topic: TopicName,
    bus: Arc<dyn MessageBus>,
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    state: Arc<Mutex<AgentState>>,
    cancel: CancellationToken,
    restarts: Arc<AtomicU32>,
    restart_limit: u32,
    warnings: Arc<Mutex<Vec<Warning>>>,
}

impl WorkerShell {
    /// The agent's main loop: one message at a time, suspension only
    /// at the enumerated points.
    async fn run(self, mut worker: Box<dyn Worker>, mut ctx: WorkerContext) {
        *self.state.lock() = AgentState::Running;
        let mut backoff = Backoff::new();

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                maybe = self.subscription.recv() => match maybe {
                    Some(event) => event,
                    None => {
                        debug!(agent = %self.name, "input topic closed");
                        break;
                    }
                },
            };

            match worker.on_event(event, &mut ctx).await {
                Ok(outputs) => {
                    backoff.reset();
                    for output in outputs {
                        publish_with_retry(
                            self.bus.as_ref(),
                            &self.output_topic,
                            output,
                            &self.cancel,
                        )
                        .await;
                    }
                }
                Err(WorkerError::Aborted(reason)) => {
                    // Governor decision; the abort listener finishes
                    // the terminate path. No restart in this session.
                    warn!(agent = %self.name, reason, "worker aborted");
                    break;
                }
                Err(err) => {
                    let attempt = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt > self.restart_limit {
                        error!(agent = %self.name, error = %err, "restart budget exhausted");
                        self.warnings.lock().push(Warning::error(
                            "agent_restart_exhausted",
                            format!(
                                "agent '{}' exceeded {} restarts: {err}",
                                self.name, self.restart_limit
                            ),
                        ));
                        break;
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        agent = %self.name,
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "worker error, restarting"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // Epilogue: idempotent with terminate_with_reason.
        *self.state.lock() = AgentState::Dead;
        self.locks.cancel_waits(&self.name);
        self.locks.release_all(&self.name);
        self.sentinel.retire(&self.name);
        debug!(agent = %self.name, "worker loop ended");
    }
}

/// Publishes one output, retrying transient failures on the shared
/// backoff schedule. An output that still fails is dropped with an
/// error log: losing one event is recoverable downstream
/// (at-least-once consumers), losing the agent is not.
async fn publish_with_retry(
    bus: &dyn MessageBus,
    topic: &TopicName,
    event: Envelope,
    cancel: &CancellationToken,
) {
    use hive_types::ErrorCode;

    let mut backoff = Backoff::new();
    for attempt in 1..=PUBLISH_ATTEMPTS {
        match bus.publish(topic, event.clone()).await {
            Ok(()) => return,
            Err(e) if e.is_recoverable() && attempt < PUBLISH_ATTEMPTS => {
                let delay = backoff.next_delay();
                debug!(topic = %topic, error = %e, attempt, "publish retry");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "output event dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSpec, EchoWorker};
    use crate::sentinel::{AuditSink, SentinelConfig};
    use hive_bus::MemoryBus;
    use hive_event::{Meta, Payload};
    use serde_json::json;

    struct Fixture {
        bus: Arc<MemoryBus>,
        runtime: Arc<AgentRuntime>,
        _listeners: Vec<JoinHandle<()>>,
    }

    fn agent(name: &str) -> AgentName {
        AgentName::new(name).unwrap()
    }

    fn fixture(config: HiveConfig) -> Fixture {
        let bus: Arc<MemoryBus> = Arc::new(MemoryBus::new());
        let (sentinel, sentinel_rx) =
            CreditSentinel::new(SentinelConfig::from(&config), AuditSink::null());
        let (locks, lock_rx) = LockManager::new();
        let runtime = AgentRuntime::new(
            bus.clone(),
            sentinel,
            locks,
            SessionId::new("hive-test"),
            config,
        );
        let listeners = vec![
            runtime.spawn_abort_listener(sentinel_rx),
            runtime.spawn_abort_listener(lock_rx),
        ];
        Fixture {
            bus,
            runtime,
            _listeners: listeners,
        }
    }

    fn tool_call(session: &str, tool: &str) -> Envelope {
        Envelope::tool_call(
            agent("driver"),
            tool,
            json!({}),
            Meta::new(SessionId::new(session)),
        )
    }

    #[tokio::test]
    async fn spawn_routes_and_echo_replies() {
        let f = fixture(HiveConfig::default());
        let name = agent("echo");

        let out = f
            .bus
            .subscribe(&TopicName::output(&name), "test")
            .await
            .unwrap();
        f.runtime
            .spawn(AgentSpec::new(name.clone()), Box::new(EchoWorker::default()))
            .await
            .unwrap();

        f.bus
            .publish(&TopicName::input(&name), tool_call("s", "grep"))
            .await
            .unwrap();

        // First the spawn state-change, then the completion.
        let mut saw_completion = false;
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), out.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event.payload, Payload::Completion(_)) {
                saw_completion = true;
                break;
            }
        }
        assert!(saw_completion);
        assert_eq!(f.runtime.health()[&name], AgentState::Running);
    }

    #[tokio::test]
    async fn duplicate_spawn_rejected() {
        let f = fixture(HiveConfig::default());
        let name = agent("solo");
        f.runtime
            .spawn(AgentSpec::new(name.clone()), Box::new(EchoWorker::default()))
            .await
            .unwrap();
        let err = f
            .runtime
            .spawn(AgentSpec::new(name), Box::new(EchoWorker::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Duplicate(_)));
    }

    #[tokio::test]
    async fn terminate_reaches_dead_and_releases_locks() {
        let f = fixture(HiveConfig::default());
        let name = agent("worker");
        f.runtime
            .spawn(AgentSpec::new(name.clone()), Box::new(EchoWorker::default()))
            .await
            .unwrap();

        f.runtime.terminate(&name).await.unwrap();
        assert_eq!(f.runtime.health()[&name], AgentState::Dead);
        // Idempotent.
        f.runtime.terminate(&name).await.unwrap();
    }

    #[tokio::test]
    async fn terminate_unknown_is_error() {
        let f = fixture(HiveConfig::default());
        let err = f.runtime.terminate(&agent("ghost")).await.unwrap_err();
        assert!(matches!(err, AgentError::Unknown(_)));
    }

    struct FailingWorker;

    #[async_trait::async_trait]
    impl Worker for FailingWorker {
        async fn on_event(
            &mut self,
            _event: Envelope,
            _ctx: &mut WorkerContext,
        ) -> Result<Vec<Envelope>, WorkerError> {
            Err(WorkerError::Failed("synthetic".into()))
        }
    }

    #[tokio::test]
    async fn restart_budget_exhaustion_leaves_dead_with_warning() {
        let f = fixture(HiveConfig::default());
        let name = agent("flaky");
        f.runtime
            .spawn(
                AgentSpec::new(name.clone()).with_restart_limit(1),
                Box::new(FailingWorker),
            )
            .await
            .unwrap();

        let input = TopicName::input(&name);
        f.bus.publish(&input, tool_call("s", "a")).await.unwrap();
        f.bus.publish(&input, tool_call("s", "b")).await.unwrap();

        // First failure restarts (after ~100ms backoff); second
        // exhausts the limit of 1.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if f.runtime.health()[&name].is_dead() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("agent should die after exhausting restarts");

        assert_eq!(f.runtime.restart_counts()[&name], 2);
        assert!(f
            .runtime
            .warnings()
            .iter()
            .any(|w| w.code == "agent_restart_exhausted"));
    }

    #[tokio::test]
    async fn sentinel_abort_terminates_without_restart() {
        let mut config = HiveConfig::default();
        config.agents.insert(
            "greedy".into(),
            crate::config::AgentCaps {
                soft_cap: 2,
                hard_cap: 3,
                wall_time_limit_ms: 60_000,
            },
        );
        let f = fixture(config);
        let name = agent("greedy");
        f.runtime
            .spawn(AgentSpec::new(name.clone()), Box::new(EchoWorker::default()))
            .await
            .unwrap();

        let input = TopicName::input(&name);
        // Each echo charges 1 credit; the 4th pushes past hard_cap=3.
        for i in 0..5 {
            f.bus
                .publish(&input, tool_call("s", &format!("t{i}")))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if f.runtime.health()[&name].is_dead() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("agent should be aborted by the sentinel");

        // Aborts do not consume the restart budget.
        assert_eq!(f.runtime.restart_counts()[&name], 0);
    }

    #[tokio::test]
    async fn shutdown_drains_everyone() {
        let f = fixture(HiveConfig::default());
        for name in ["a", "b", "c"] {
            f.runtime
                .spawn(AgentSpec::new(agent(name)), Box::new(EchoWorker::default()))
                .await
                .unwrap();
        }
        f.runtime.shutdown().await;
        assert!(f.runtime.all_dead());
    }
}
