//! Credit sentinel: the resource governor.
//!
//! Every chargeable action an agent wants to take goes through
//! [`CreditSentinel::track`] *before* it executes. The sentinel owns
//! the credit ledger outright (counters are mutated nowhere else) and
//! answers with one rung of the verdict ladder:
//!
//! ```text
//! track(agent, tool, credits, tokens)
//!     │
//!     ├─ would cross global hard cap ──────────► Abort
//!     ├─ would cross agent hard cap ───────────► Abort
//!     ├─ wall-time limit already exceeded ─────► Abort
//!     ├─ > 95% of soft cap ────────────────────► Throttle (delay ≥ 1s)
//!     ├─ checkpoint interval reached ──────────► Checkpoint
//!     ├─ > 80% of soft cap ────────────────────► Warn
//!     └─ otherwise ────────────────────────────► Allow
//! ```
//!
//! First match wins. On any non-abort verdict the counters are
//! committed atomically with the decision; on `Abort` nothing is
//! committed and an [`AbortNotice`] is pushed for the agent runtime,
//! which owns termination. A checkpoint is a duty imposed on the
//! caller (persist your state before proceeding); the sentinel itself
//! only records the new checkpoint watermark.
//!
//! `track` is linearizable: one mutex over the whole ledger gives all
//! callers a single total order of verdicts and makes lost updates
//! impossible.
//!
//! An independent watchdog task scans running agents about once a
//! second and forces the same abort path for any agent that outlived
//! its wall-time limit between calls.

mod audit;

pub use audit::{AuditRecord, AuditSink, CsvAudit, TopicAudit};

use crate::config::{AgentCaps, HiveConfig};
use chrono::{DateTime, Utc};
use hive_types::{AgentName, ErrorCode};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delay the sentinel suggests to a throttled caller.
pub const THROTTLE_DELAY: Duration = Duration::from_secs(1);

/// Default watchdog scan period.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// The five-level decision ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Proceed.
    Allow,
    /// Proceed; the agent is past the warn threshold of its soft cap.
    Warn,
    /// Proceed only after delaying at least [`THROTTLE_DELAY`].
    Throttle,
    /// Persist agent state before proceeding.
    Checkpoint,
    /// Do not proceed; the agent is being terminated.
    Abort,
}

impl Verdict {
    /// Wire/audit tag for this verdict.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Throttle => "throttle",
            Self::Checkpoint => "checkpoint",
            Self::Abort => "abort",
        }
    }

    /// Delay the caller must observe before its next operation.
    #[must_use]
    pub fn suggested_delay(&self) -> Duration {
        match self {
            Self::Throttle => THROTTLE_DELAY,
            _ => Duration::ZERO,
        }
    }

    /// Returns `true` for [`Verdict::Abort`].
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel errors (audit plumbing only; `track` itself cannot fail).
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The audit sink could not be opened or written.
    #[error("audit sink i/o failure at '{path}': {source}")]
    AuditIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SentinelError {
    pub(crate) fn audit_io(path: &Path, source: std::io::Error) -> Self {
        Self::AuditIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ErrorCode for SentinelError {
    fn code(&self) -> &'static str {
        match self {
            Self::AuditIo { .. } => "SENTINEL_AUDIT_IO",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Why a governor wants an agent gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// A credit cap (agent or global) would be crossed.
    Budget,
    /// The wall-time limit was exceeded.
    WallTime,
    /// The agent was selected to break a wait-for cycle.
    Deadlock,
}

/// Request from the sentinel (or lock manager) to terminate an agent.
///
/// Carried over a channel: the governor decides, the agent runtime
/// executes. No component reaches into another's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortNotice {
    /// Agent to terminate.
    pub agent: AgentName,
    /// Human-readable cause.
    pub reason: String,
    /// Classification for the warning trail.
    pub kind: AbortKind,
}

/// Tuning knobs for the sentinel, derived from [`HiveConfig`].
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Ceiling on the sum of all agents' credits.
    pub global_hard_cap: u64,
    /// Credits between checkpoint verdicts.
    pub checkpoint_interval: u64,
    /// Soft-cap fraction that triggers `Warn`.
    pub warn_threshold: f64,
    /// Soft-cap fraction that triggers `Throttle`.
    pub throttle_threshold: f64,
    /// Caps applied to agents first seen by `track`.
    pub default_caps: AgentCaps,
}

impl From<&HiveConfig> for SentinelConfig {
    fn from(config: &HiveConfig) -> Self {
        Self {
            global_hard_cap: config.global_hard_cap,
            checkpoint_interval: config.checkpoint_interval,
            warn_threshold: config.warn_threshold,
            throttle_threshold: config.throttle_threshold,
            default_caps: AgentCaps {
                soft_cap: config.default_soft_cap,
                hard_cap: config.default_hard_cap,
                wall_time_limit_ms: config.default_wall_time_ms,
            },
        }
    }
}

/// Per-agent budget record. Exists from first observation until the
/// process exits; counters only ever grow.
#[derive(Debug, Clone)]
struct AgentBudget {
    credits_used: u64,
    tokens_used: u64,
    wall_time_ms: u64,
    tool_calls: u64,
    soft_cap: u64,
    hard_cap: u64,
    wall_time_limit_ms: u64,
    last_checkpoint_credits: u64,
    last_checkpoint_at: Option<DateTime<Utc>>,
    started: Instant,
    alive: bool,
}

impl AgentBudget {
    fn new(caps: &AgentCaps) -> Self {
        Self {
            credits_used: 0,
            tokens_used: 0,
            wall_time_ms: 0,
            tool_calls: 0,
            soft_cap: caps.soft_cap.max(1),
            hard_cap: caps.hard_cap.max(1),
            wall_time_limit_ms: caps.wall_time_limit_ms,
            last_checkpoint_credits: 0,
            last_checkpoint_at: None,
            started: Instant::now(),
            alive: true,
        }
    }
}

#[derive(Default)]
struct Ledger {
    agents: BTreeMap<AgentName, AgentBudget>,
    global_credits: u64,
}

/// Per-agent counters in a [`MetricsReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentMetrics {
    pub credits_used: u64,
    pub tokens_used: u64,
    pub wall_time_ms: u64,
    pub tool_calls: u64,
    pub soft_cap: u64,
    pub hard_cap: u64,
    pub last_checkpoint_credits: u64,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub alive: bool,
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsReport {
    /// Sum of all agents' credits.
    pub global_credits: u64,
    /// Configured global ceiling.
    pub global_hard_cap: u64,
    /// Configured checkpoint cadence.
    pub checkpoint_interval: u64,
    /// Per-agent counters, sorted by name.
    pub agents: BTreeMap<AgentName, AgentMetrics>,
}

/// The resource governor.
pub struct CreditSentinel {
    config: SentinelConfig,
    ledger: Mutex<Ledger>,
    audit: AuditSink,
    abort_tx: mpsc::UnboundedSender<AbortNotice>,
    global_abort: AtomicBool,
    team_id: String,
}

impl CreditSentinel {
    /// Creates a sentinel and the abort feed the agent runtime drains.
    #[must_use]
    pub fn new(
        config: SentinelConfig,
        audit: AuditSink,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AbortNotice>) {
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let sentinel = Arc::new(Self {
            config,
            ledger: Mutex::new(Ledger::default()),
            audit,
            abort_tx,
            global_abort: AtomicBool::new(false),
            team_id: "default".to_owned(),
        });
        (sentinel, abort_rx)
    }

    /// Registers an agent with explicit caps, starting its wall clock.
    ///
    /// Re-registering an existing agent restarts its wall clock and
    /// marks it live again but keeps its counters: credits are
    /// monotone for the process lifetime.
    pub fn register(&self, agent: &AgentName, caps: &AgentCaps) {
        let mut ledger = self.ledger.lock();
        match ledger.agents.get_mut(agent) {
            Some(budget) => {
                budget.started = Instant::now();
                budget.alive = true;
            }
            None => {
                ledger.agents.insert(agent.clone(), AgentBudget::new(caps));
            }
        }
    }

    /// Marks an agent as no longer running (terminated by the
    /// runtime). The budget record itself stays for the process
    /// lifetime.
    pub fn retire(&self, agent: &AgentName) {
        if let Some(budget) = self.ledger.lock().agents.get_mut(agent) {
            budget.alive = false;
        }
    }

    /// Adjudicates one proposed action. See the module docs for the
    /// ladder; this method is the linearization point for all
    /// verdicts.
    pub fn track(&self, agent: &AgentName, tool: &str, credits: u64, tokens: u64) -> Verdict {
        let now = Utc::now();
        let (verdict, wall_time_ms, abort_reason) = self.decide(agent, credits, tokens);

        self.audit.record(&AuditRecord {
            team_id: self.team_id.clone(),
            timestamp: now,
            agent: agent.clone(),
            tokens,
            credits,
            wall_time_ms,
            tool: tool.to_owned(),
            verdict,
        });

        if let Some((reason, kind)) = abort_reason {
            warn!(agent = %agent, tool, reason, "sentinel abort");
            let _ = self.abort_tx.send(AbortNotice {
                agent: agent.clone(),
                reason: reason.to_owned(),
                kind,
            });
        } else {
            debug!(agent = %agent, tool, credits, verdict = %verdict, "tracked");
        }

        verdict
    }

    fn decide(
        &self,
        agent: &AgentName,
        credits: u64,
        tokens: u64,
    ) -> (Verdict, u64, Option<(&'static str, AbortKind)>) {
        let cfg = &self.config;
        let mut ledger = self.ledger.lock();
        let global_credits = ledger.global_credits;

        let budget = ledger
            .agents
            .entry(agent.clone())
            .or_insert_with(|| AgentBudget::new(&cfg.default_caps));
        budget.wall_time_ms = budget.started.elapsed().as_millis() as u64;
        let wall_time_ms = budget.wall_time_ms;

        if !budget.alive {
            // Already aborted; keep refusing without re-notifying.
            return (Verdict::Abort, wall_time_ms, None);
        }

        let projected = budget.credits_used.saturating_add(credits);
        let soft_ratio = projected as f64 / budget.soft_cap as f64;

        let (verdict, abort_reason) = if global_credits.saturating_add(credits)
            > cfg.global_hard_cap
        {
            self.global_abort.store(true, Ordering::Relaxed);
            (
                Verdict::Abort,
                Some(("global hard cap exceeded", AbortKind::Budget)),
            )
        } else if projected > budget.hard_cap {
            (
                Verdict::Abort,
                Some(("agent hard cap exceeded", AbortKind::Budget)),
            )
        } else if budget.wall_time_ms > budget.wall_time_limit_ms {
            (
                Verdict::Abort,
                Some(("wall-time limit exceeded", AbortKind::WallTime)),
            )
        } else if soft_ratio > cfg.throttle_threshold {
            (Verdict::Throttle, None)
        } else if projected > 0 && projected % cfg.checkpoint_interval == 0 {
            (Verdict::Checkpoint, None)
        } else if soft_ratio > cfg.warn_threshold {
            (Verdict::Warn, None)
        } else {
            (Verdict::Allow, None)
        };

        if verdict.is_abort() {
            budget.alive = false;
        } else {
            budget.credits_used = projected;
            budget.tokens_used = budget.tokens_used.saturating_add(tokens);
            budget.tool_calls += 1;
            if verdict == Verdict::Checkpoint {
                budget.last_checkpoint_credits = projected;
                budget.last_checkpoint_at = Some(Utc::now());
            }
            ledger.global_credits = ledger.global_credits.saturating_add(credits);
        }

        (verdict, wall_time_ms, abort_reason)
    }

    /// `true` once any decision hit the global hard cap.
    #[must_use]
    pub fn global_abort_seen(&self) -> bool {
        self.global_abort.load(Ordering::Relaxed)
    }

    /// Configured checkpoint cadence.
    #[must_use]
    pub fn checkpoint_interval(&self) -> u64 {
        self.config.checkpoint_interval
    }

    /// Configured global ceiling.
    #[must_use]
    pub fn global_hard_cap(&self) -> u64 {
        self.config.global_hard_cap
    }

    /// Point-in-time copy of the ledger for snapshots and the CLI.
    ///
    /// Wall-time counters are reported as last committed (by `track`
    /// or the watchdog), not recomputed here, so two back-to-back
    /// reports with no intervening activity are identical.
    #[must_use]
    pub fn metrics(&self) -> MetricsReport {
        let ledger = self.ledger.lock();
        MetricsReport {
            global_credits: ledger.global_credits,
            global_hard_cap: self.config.global_hard_cap,
            checkpoint_interval: self.config.checkpoint_interval,
            agents: ledger
                .agents
                .iter()
                .map(|(name, b)| {
                    (
                        name.clone(),
                        AgentMetrics {
                            credits_used: b.credits_used,
                            tokens_used: b.tokens_used,
                            wall_time_ms: b.wall_time_ms,
                            tool_calls: b.tool_calls,
                            soft_cap: b.soft_cap,
                            hard_cap: b.hard_cap,
                            last_checkpoint_credits: b.last_checkpoint_credits,
                            last_checkpoint_at: b.last_checkpoint_at,
                            alive: b.alive,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Starts the wall-time watchdog.
    ///
    /// Scans running agents every `period` (≤ 1 s in production) and
    /// forces the abort path for any that outlived their limit.
    pub fn spawn_watchdog(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let sentinel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sentinel.scan_wall_time();
            }
        })
    }

    fn scan_wall_time(&self) {
        let mut expired = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            for (name, budget) in &mut ledger.agents {
                if !budget.alive {
                    continue;
                }
                budget.wall_time_ms = budget.started.elapsed().as_millis() as u64;
                if budget.wall_time_ms > budget.wall_time_limit_ms {
                    budget.alive = false;
                    expired.push((name.clone(), budget.wall_time_ms, budget.wall_time_limit_ms));
                }
            }
        }

        for (agent, wall_time_ms, limit) in expired {
            warn!(agent = %agent, wall_time_ms, limit, "watchdog abort");
            self.audit.record(&AuditRecord {
                team_id: self.team_id.clone(),
                timestamp: Utc::now(),
                agent: agent.clone(),
                tokens: 0,
                credits: 0,
                wall_time_ms,
                tool: "watchdog".to_owned(),
                verdict: Verdict::Abort,
            });
            let _ = self.abort_tx.send(AbortNotice {
                agent,
                reason: format!("wall-time limit exceeded: {wall_time_ms}ms > {limit}ms"),
                kind: AbortKind::WallTime,
            });
        }
    }
}
