//! Cycle orchestrator.
//!
//! Drives one coordination cycle end to end:
//!
//! 1. Gate on the treasury's runway (halt below 30 days).
//! 2. Publish a root task, tagged with a fresh intent id, to the
//!    entry topic.
//! 3. Forward events between agents per the declarative wiring map,
//!    applying the polarity filter as a conforming consumer.
//! 4. End when a `completion` tagged with the root intent appears,
//!    when every agent is dead, when the sentinel reports a global
//!    abort, or when the deadline passes.
//! 5. Snapshot, persist/emit the summary, and report.
//!
//! Recoverable conditions (one agent restarting, transient bus
//! failures) are absorbed silently; unrecoverable ones surface as the
//! cycle outcome plus a level-tagged warning. The orchestrator is the
//! single owner of the governor components; there is no process-wide
//! mutable state anywhere in the runtime.

use crate::agent::{AgentError, AgentHandle, AgentRuntime, AgentSpec, Worker};
use crate::config::{AuditSinkSpec, HiveConfig};
use crate::lock::{LockManager, DETECT_PERIOD};
use crate::sentinel::{AuditSink, CreditSentinel, SentinelConfig, WATCHDOG_PERIOD};
use crate::snapshot::{mint_session_id, SessionSummary, SnapshotError, Snapshotter, Treasury, Vcs};
use chrono::Utc;
use hive_bus::{BusError, MessageBus};
use hive_event::{polarity, Envelope, EventKind, Meta};
use hive_types::{AgentName, ErrorCode, IntentId, SessionId, TopicName, Warning};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cycles halt when the treasury reports fewer runway days than this.
pub const MIN_RUNWAY_DAYS: i64 = 30;

/// Topic the session summary event is emitted on.
pub const SUMMARY_TOPIC: &str = "session-summary";

/// Poll period for the dead/global-abort checks while waiting.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The bus failed while wiring or starting the cycle.
    #[error("cycle bus failure: {0}")]
    Bus(#[from] BusError),

    /// The final snapshot could not be produced.
    #[error("cycle snapshot failure: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The audit sink could not be constructed at bootstrap.
    #[error("cycle bootstrap failure: {0}")]
    Bootstrap(#[from] crate::sentinel::SentinelError),
}

impl ErrorCode for CycleError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bus(_) => "CYCLE_BUS",
            Self::Snapshot(_) => "CYCLE_SNAPSHOT",
            Self::Bootstrap(_) => "CYCLE_BOOTSTRAP",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Bus(e) => e.is_recoverable(),
            Self::Snapshot(e) => e.is_recoverable(),
            Self::Bootstrap(_) => false,
        }
    }
}

/// One forwarding rule: everything passing the polarity filter on
/// `from` is republished to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Source topic (some agent's `-out`).
    pub from: TopicName,
    /// Destination topic (some agent's `-in`).
    pub to: TopicName,
}

/// Declarative wiring between agents.
///
/// # Example
///
/// ```
/// use hive_runtime::orchestrator::WiringMap;
/// use hive_types::AgentName;
///
/// let planner = AgentName::new("planner").unwrap();
/// let codegen = AgentName::new("codegen").unwrap();
/// // planner-out feeds codegen-in; codegen-out is watched for the
/// // cycle's completion.
/// let wiring = WiringMap::pipeline(&[planner, codegen]);
/// assert_eq!(wiring.routes().len(), 1);
/// assert_eq!(wiring.watched().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WiringMap {
    routes: Vec<Route>,
    watch: Vec<TopicName>,
}

impl WiringMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a forwarding route.
    #[must_use]
    pub fn route(mut self, from: TopicName, to: TopicName) -> Self {
        self.routes.push(Route { from, to });
        self
    }

    /// Adds a topic to observe for completion without forwarding.
    #[must_use]
    pub fn watch(mut self, topic: TopicName) -> Self {
        self.watch.push(topic);
        self
    }

    /// Chains agents into a pipeline: each agent's `-out` feeds the
    /// next agent's `-in`; the last `-out` is watched for completion.
    #[must_use]
    pub fn pipeline(agents: &[AgentName]) -> Self {
        let mut map = Self::new();
        for pair in agents.windows(2) {
            map = map.route(TopicName::output(&pair[0]), TopicName::input(&pair[1]));
        }
        if let Some(last) = agents.last() {
            map = map.watch(TopicName::output(last));
        }
        map
    }

    /// Forwarding routes.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Watch-only topics.
    #[must_use]
    pub fn watched(&self) -> &[TopicName] {
        &self.watch
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The root task's completion was observed.
    Completed,
    /// The sentinel crossed the global hard cap.
    GlobalAbort,
    /// The configured deadline passed.
    DeadlineExceeded,
    /// Every agent reached `dead` before completion.
    AllAgentsDead,
    /// The treasury gate refused to start the cycle.
    InsufficientRunway,
}

impl CycleOutcome {
    /// Stable tag for logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::GlobalAbort => "global_abort",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::AllAgentsDead => "all_agents_dead",
            Self::InsufficientRunway => "insufficient_runway",
        }
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// The final session summary.
    pub summary: SessionSummary,
}

impl CycleReport {
    /// Maps the report onto the process exit-code contract:
    /// 0 completed, 1 completed with a recovered agent abort,
    /// 2 global abort / deadline / nothing left running.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            CycleOutcome::Completed => {
                let agent_lost = self
                    .summary
                    .warnings
                    .iter()
                    .any(|w| w.code == "agent_aborted" || w.code == "agent_restart_exhausted");
                i32::from(agent_lost)
            }
            _ => 2,
        }
    }
}

/// The root task published at the top of a cycle.
#[derive(Debug, Clone)]
pub struct RootTask {
    /// Tool named in the root `tool_call`.
    pub tool: String,
    /// Arguments for it.
    pub args: Value,
}

impl RootTask {
    /// Creates a root task.
    #[must_use]
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Top-level coordinator owning the governor components.
pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    runtime: Arc<AgentRuntime>,
    treasury: Arc<dyn Treasury>,
    vcs: Arc<dyn Vcs>,
    config: HiveConfig,
    session: SessionId,
    wiring: WiringMap,
    entry_topic: Option<TopicName>,
    background: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Boots the full coordination stack over a bus: sentinel with
    /// its watchdog, lock manager with its cycle detector, agent
    /// runtime with both abort listeners.
    ///
    /// # Errors
    ///
    /// [`CycleError::Bootstrap`] when the configured audit sink
    /// cannot be opened.
    pub fn bootstrap(
        config: HiveConfig,
        bus: Arc<dyn MessageBus>,
        treasury: Arc<dyn Treasury>,
        vcs: Arc<dyn Vcs>,
    ) -> Result<Self, CycleError> {
        let session = mint_session_id(Utc::now(), 1);

        let audit = match &config.audit_sink {
            AuditSinkSpec::Csv(path) => AuditSink::csv(path)?,
            AuditSinkSpec::Topic(name) => AuditSink::topic(
                bus.clone(),
                TopicName::new(name.clone()),
                session.clone(),
            ),
        };

        let (sentinel, sentinel_rx) = CreditSentinel::new(SentinelConfig::from(&config), audit);
        let (locks, lock_rx) = LockManager::new();
        let runtime = AgentRuntime::new(
            bus.clone(),
            sentinel.clone(),
            locks.clone(),
            session.clone(),
            config.clone(),
        );

        let background = vec![
            sentinel.spawn_watchdog(WATCHDOG_PERIOD),
            locks.spawn_detector(DETECT_PERIOD),
            runtime.spawn_abort_listener(sentinel_rx),
            runtime.spawn_abort_listener(lock_rx),
        ];

        info!(session = %session, "orchestrator booted");
        Ok(Self {
            bus,
            sentinel,
            locks,
            runtime,
            treasury,
            vcs,
            config,
            session,
            wiring: WiringMap::new(),
            entry_topic: None,
            background,
        })
    }

    /// Installs the wiring map.
    #[must_use]
    pub fn with_wiring(mut self, wiring: WiringMap) -> Self {
        self.wiring = wiring;
        self
    }

    /// Sets the topic the root task is published to.
    #[must_use]
    pub fn with_entry_topic(mut self, topic: TopicName) -> Self {
        self.entry_topic = Some(topic);
        self
    }

    /// Session this orchestrator coordinates.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// The agent runtime, for callers that manage agents directly.
    #[must_use]
    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    /// Spawns an agent into this orchestrator's runtime.
    ///
    /// # Errors
    ///
    /// See [`AgentRuntime::spawn`].
    pub async fn spawn_agent(
        &self,
        spec: AgentSpec,
        worker: Box<dyn Worker>,
    ) -> Result<AgentHandle, AgentError> {
        self.runtime.spawn(spec, worker).await
    }

    /// Runs one cycle to completion and returns its report.
    ///
    /// # Errors
    ///
    /// [`CycleError`] when the cycle cannot start (bus) or the final
    /// snapshot fails. Conditions during the cycle are outcomes, not
    /// errors.
    pub async fn run_cycle(&self, task: RootTask) -> Result<CycleReport, CycleError> {
        let epoch = Utc::now();
        let snapshotter = Snapshotter::new(
            self.sentinel.clone(),
            self.locks.clone(),
            self.runtime.clone(),
            self.vcs.clone(),
            self.session.clone(),
            epoch,
        );

        let runway = self.treasury.runway_days();
        if runway < MIN_RUNWAY_DAYS {
            warn!(runway, "treasury runway below threshold; summoning");
            self.runtime.record_warning(Warning::error(
                "treasury_summon",
                format!("runway {runway} days is below {MIN_RUNWAY_DAYS}; cycles halted"),
            ));
            let summary = snapshotter.snapshot()?;
            return Ok(CycleReport {
                outcome: CycleOutcome::InsufficientRunway,
                summary,
            });
        }

        let root = IntentId::random();
        let entry = self
            .entry_topic
            .clone()
            .unwrap_or_else(|| TopicName::new("root-in"));
        let orchestrator_name = AgentName::new("orchestrator").expect("static name is valid");
        let root_event = Envelope::tool_call(
            orchestrator_name,
            task.tool.clone(),
            task.args.clone(),
            Meta::new(self.session.clone()).with_intent(root.clone()),
        );

        // Observers first, so nothing published during setup is missed.
        let cancel = CancellationToken::new();
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let mut observers = Vec::new();
        for route in self.wiring.routes() {
            observers.push(
                self.spawn_observer(
                    route.from.clone(),
                    Some(route.to.clone()),
                    root.clone(),
                    done_tx.clone(),
                    cancel.clone(),
                )
                .await?,
            );
        }
        for topic in self.wiring.watched() {
            observers.push(
                self.spawn_observer(
                    topic.clone(),
                    None,
                    root.clone(),
                    done_tx.clone(),
                    cancel.clone(),
                )
                .await?,
            );
        }

        info!(intent = %root, topic = %entry, tool = %task.tool, "cycle started");
        self.bus.publish(&entry, root_event).await?;

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.deadline_ms);
        let outcome = loop {
            tokio::select! {
                _ = done_rx.recv() => break CycleOutcome::Completed,
                () = tokio::time::sleep_until(deadline) => break CycleOutcome::DeadlineExceeded,
                () = tokio::time::sleep(WAIT_POLL) => {
                    if self.sentinel.global_abort_seen() {
                        break CycleOutcome::GlobalAbort;
                    }
                    if self.runtime.all_dead() {
                        break CycleOutcome::AllAgentsDead;
                    }
                }
            }
        };

        cancel.cancel();
        for observer in observers {
            let _ = observer.await;
        }

        match outcome {
            CycleOutcome::Completed | CycleOutcome::AllAgentsDead => {}
            CycleOutcome::DeadlineExceeded => {
                self.runtime.record_warning(Warning::error(
                    "deadline",
                    format!("cycle deadline of {}ms exceeded", self.config.deadline_ms),
                ));
            }
            CycleOutcome::GlobalAbort => {
                self.runtime.record_warning(Warning::error(
                    "global_abort",
                    "global hard cap reached; cycle ended",
                ));
            }
            CycleOutcome::InsufficientRunway => unreachable!("handled before the wait loop"),
        }

        let summary = snapshotter.snapshot()?;
        if let Some(path) = &self.config.summary_path {
            summary.persist(path)?;
        }
        match summary.to_event() {
            Ok(event) => {
                if let Err(e) = self.bus.publish(&TopicName::new(SUMMARY_TOPIC), event).await {
                    debug!(error = %e, "summary event dropped");
                }
            }
            Err(e) => debug!(error = %e, "summary event not built"),
        }

        info!(outcome = %outcome, hash = %summary.context_hash, "cycle ended");
        Ok(CycleReport { outcome, summary })
    }

    /// Drains all agents and stops background tasks.
    pub async fn shutdown(mut self) {
        self.runtime.shutdown().await;
        for handle in self.background.drain(..) {
            handle.abort();
        }
    }

    async fn spawn_observer(
        &self,
        from: TopicName,
        forward_to: Option<TopicName>,
        root: IntentId,
        done: mpsc::Sender<()>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, CycleError> {
        let sub = self.bus.subscribe(&from, "orchestrator").await?;
        let bus = self.bus.clone();
        let threshold = self.config.polarity_threshold;

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => return,
                    maybe = sub.recv() => match maybe {
                        Some(event) => event,
                        None => return,
                    },
                };

                // Conforming consumer: drop below-threshold polarity.
                if !polarity::passes(event.polarity, threshold) {
                    debug!(topic = %from, event = %event.id, "filtered by polarity");
                    continue;
                }

                if event.kind == EventKind::Completion
                    && event.meta.intent_id.as_ref() == Some(&root)
                {
                    let _ = done.try_send(());
                }

                if let Some(to) = &forward_to {
                    if let Err(e) = bus.publish(to, event).await {
                        warn!(from = %from, to = %to, error = %e, "forward failed");
                    }
                }
            }
        }))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for handle in &self.background {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::StaticTreasury;
    use crate::snapshot::NullVcs;
    use hive_bus::MemoryBus;
    use rust_decimal::Decimal;

    fn agent(name: &str) -> AgentName {
        AgentName::new(name).unwrap()
    }

    #[test]
    fn pipeline_wiring_chains_and_watches() {
        let wiring = WiringMap::pipeline(&[agent("a"), agent("b"), agent("c")]);
        assert_eq!(
            wiring.routes(),
            &[
                Route {
                    from: TopicName::new("a-out"),
                    to: TopicName::new("b-in"),
                },
                Route {
                    from: TopicName::new("b-out"),
                    to: TopicName::new("c-in"),
                },
            ]
        );
        assert_eq!(wiring.watched(), &[TopicName::new("c-out")]);
    }

    #[tokio::test]
    async fn runway_gate_halts_cycle() {
        let config = HiveConfig {
            audit_sink: AuditSinkSpec::Topic("audit".into()),
            ..Default::default()
        };
        // 29 days of runway: below the gate.
        let treasury = Arc::new(StaticTreasury::new(
            Decimal::from(29u32),
            Decimal::from(1u32),
        ));
        let orchestrator = Orchestrator::bootstrap(
            config,
            Arc::new(MemoryBus::new()),
            treasury,
            Arc::new(NullVcs),
        )
        .unwrap();

        let report = orchestrator
            .run_cycle(RootTask::new("noop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(report.outcome, CycleOutcome::InsufficientRunway);
        assert_eq!(report.exit_code(), 2);
        assert!(report
            .summary
            .warnings
            .iter()
            .any(|w| w.code == "treasury_summon"));
    }

    #[test]
    fn exit_codes_follow_contract() {
        let mut summary = {
            // Minimal consistent summary for the report.
            let base = crate::snapshot::SessionSummary {
                version: crate::snapshot::SUMMARY_VERSION.to_owned(),
                timestamp: Utc::now(),
                session_id: SessionId::new("s"),
                build_id: "b".to_owned(),
                tooling_version: "t".to_owned(),
                repo: crate::snapshot::RepoFacts {
                    head: "unknown".into(),
                    dirty: "unknown".into(),
                    open_work_items: None,
                },
                credits: crate::snapshot::CreditFacts {
                    used: 0,
                    remaining: 1000,
                    cap: 1000,
                    max_per_agent: Default::default(),
                    checkpoint_saved: None,
                },
                agents: Default::default(),
                locks: Default::default(),
                next_tasks: Vec::new(),
                warnings: Vec::new(),
                extensions: Default::default(),
                context_hash: String::new(),
            };
            base
        };

        let ok = CycleReport {
            outcome: CycleOutcome::Completed,
            summary: summary.clone(),
        };
        assert_eq!(ok.exit_code(), 0);

        summary
            .warnings
            .push(Warning::error("agent_aborted", "agent 'x': hard cap"));
        let recovered = CycleReport {
            outcome: CycleOutcome::Completed,
            summary: summary.clone(),
        };
        assert_eq!(recovered.exit_code(), 1);

        let fatal = CycleReport {
            outcome: CycleOutcome::DeadlineExceeded,
            summary,
        };
        assert_eq!(fatal.exit_code(), 2);
    }
}
