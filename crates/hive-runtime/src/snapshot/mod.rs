//! Session snapshotter: deterministic, hashable state summaries.
//!
//! A [`SessionSummary`] aggregates governor, lock, and runtime state
//! with environment facts into one document whose canonical JSON form
//! is byte-identical for identical inputs. Its `context_hash`
//! (SHA-256 over the canonical bytes with the hash field zeroed) is
//! what makes a session resumable: a restarted process can verify it
//! is looking at the same logical state it left behind.
//!
//! # Consistency
//!
//! Every input accessor ([`CreditSentinel::metrics`],
//! [`LockManager::holdings`], [`AgentRuntime::health`]) is
//! linearizable, and none of them recomputes time-dependent values,
//! so sampling them in sequence at a quiescent point (cycle end,
//! shutdown) yields a consistent cut, and two back-to-back snapshots
//! with no intervening activity are byte-identical, hash included.
//!
//! # Failure Posture
//!
//! Environment probes may fail; failed fields are recorded as
//! `"unknown"` (or `null` for the work-item list), never omitted.

mod env;

pub use env::{
    GitVcs, NullVcs, StaticTreasury, Treasury, Vcs, INFINITE_RUNWAY_DAYS,
};

use crate::agent::{AgentRuntime, AgentState};
use crate::lock::{LockHoldings, LockManager};
use crate::sentinel::CreditSentinel;
use chrono::{DateTime, Utc};
use hive_event::{codec, Envelope, Meta};
use hive_types::{AgentName, ErrorCode, SessionId, Warning};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Summary schema version.
pub const SUMMARY_VERSION: &str = "1.0";

/// Tooling identifier stamped into every summary.
pub const TOOLING_VERSION: &str = concat!("hive-", env!("CARGO_PKG_VERSION"));

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The summary could not be canonically encoded.
    #[error("failed to encode summary: {0}")]
    Encode(String),

    /// Persisting the summary failed.
    #[error("failed to persist summary to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for SnapshotError {
    fn code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "SNAPSHOT_ENCODE",
            Self::Io { .. } => "SNAPSHOT_IO",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Version-control facts, `"unknown"` where the probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFacts {
    /// HEAD commit hash or `"unknown"`.
    pub head: String,
    /// `"true"`, `"false"`, or `"unknown"`.
    pub dirty: String,
    /// Open external work items; `null` when the probe failed.
    pub open_work_items: Option<Vec<String>>,
}

/// Credit accounting block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditFacts {
    /// Sum of all agents' credits.
    pub used: u64,
    /// `cap - used`.
    pub remaining: u64,
    /// Global hard cap.
    pub cap: u64,
    /// Per-agent high-water marks.
    pub max_per_agent: BTreeMap<AgentName, u64>,
    /// Most recent checkpoint instant across agents.
    pub checkpoint_saved: Option<DateTime<Utc>>,
}

/// One agent's line in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFacts {
    /// Lifecycle state.
    pub state: AgentState,
    /// Credits consumed.
    pub credits: u64,
    /// Tokens consumed.
    pub tokens: u64,
    /// Wall time consumed, ms.
    pub wall_time_ms: u64,
    /// Restarts performed.
    pub restarts: u32,
}

/// The reproducible session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Schema version ([`SUMMARY_VERSION`]).
    pub version: String,
    /// Cycle epoch (stable across snapshots of the same cycle).
    pub timestamp: DateTime<Utc>,
    /// Session identifier.
    pub session_id: SessionId,
    /// `<short-head>-<epoch-seconds>`.
    pub build_id: String,
    /// Tooling identifier.
    pub tooling_version: String,
    /// Version-control facts.
    pub repo: RepoFacts,
    /// Credit accounting.
    pub credits: CreditFacts,
    /// Per-agent facts, sorted by name.
    pub agents: BTreeMap<AgentName, AgentFacts>,
    /// Current lock holders and waiters.
    pub locks: LockHoldings,
    /// Pending work for the next cycle.
    pub next_tasks: Vec<String>,
    /// Everything absorbed during the session, level-tagged.
    pub warnings: Vec<Warning>,
    /// Free extension map for future fields.
    pub extensions: BTreeMap<String, Value>,
    /// `sha256:<hex>` over the canonical form with this field zeroed.
    pub context_hash: String,
}

impl SessionSummary {
    /// Computes the summary's content hash.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Encode`] when canonical encoding fails.
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let mut zeroed = self.clone();
        zeroed.context_hash = String::new();
        let bytes = codec::to_canonical_bytes(&zeroed)
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let digest = Sha256::digest(&bytes);
        Ok(format!("sha256:{}", hex::encode(digest)))
    }

    /// Canonical JSON rendering; the persisted and emitted form.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Encode`] when canonical encoding fails.
    pub fn canonical_json(&self) -> Result<String, SnapshotError> {
        codec::to_canonical_string(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    /// Checks internal consistency. Returns human-readable problems;
    /// empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.version != SUMMARY_VERSION {
            problems.push(format!(
                "version '{}' != expected '{SUMMARY_VERSION}'",
                self.version
            ));
        }

        let hash_ok = self
            .context_hash
            .strip_prefix("sha256:")
            .is_some_and(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()));
        if !hash_ok {
            problems.push(format!("malformed context_hash '{}'", self.context_hash));
        } else {
            match self.compute_hash() {
                Ok(expected) if expected != self.context_hash => {
                    problems.push("context_hash does not match content".to_owned());
                }
                Ok(_) => {}
                Err(e) => problems.push(format!("context_hash not verifiable: {e}")),
            }
        }

        if self.credits.used + self.credits.remaining != self.credits.cap {
            problems.push(format!(
                "credit arithmetic mismatch: {} + {} != {}",
                self.credits.used, self.credits.remaining, self.credits.cap
            ));
        }

        problems
    }

    /// Wraps the summary into a `session_summary` bus event.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Encode`] when canonical encoding fails.
    pub fn to_event(&self) -> Result<Envelope, SnapshotError> {
        let document = codec::to_canonical_value(self)
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;
        let agent = AgentName::new("snapshotter").expect("static name is valid");
        let meta = Meta::new(self.session_id.clone()).with_context_hash(self.context_hash.clone());
        Ok(Envelope::session_summary(agent, document, meta))
    }

    /// Persists the canonical form to `path`.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Io`] on filesystem failure.
    pub fn persist(&self, path: &Path) -> Result<(), SnapshotError> {
        let text = self.canonical_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(path, text).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Mints a session id of the form `hive-YYYY-MM-DD-NNN`.
#[must_use]
pub fn mint_session_id(now: DateTime<Utc>, seq: u32) -> SessionId {
    SessionId::new(format!("hive-{}-{seq:03}", now.format("%Y-%m-%d")))
}

/// Builds summaries from live components.
pub struct Snapshotter {
    sentinel: Arc<CreditSentinel>,
    locks: Arc<LockManager>,
    runtime: Arc<AgentRuntime>,
    vcs: Arc<dyn Vcs>,
    session: SessionId,
    epoch: DateTime<Utc>,
    next_tasks: Vec<String>,
    extensions: BTreeMap<String, Value>,
}

impl Snapshotter {
    /// Creates a snapshotter.
    ///
    /// `epoch` is the cycle's start instant; it (not the wall clock at
    /// call time) is stamped into summaries so repeated snapshots of
    /// unchanged state stay byte-identical.
    #[must_use]
    pub fn new(
        sentinel: Arc<CreditSentinel>,
        locks: Arc<LockManager>,
        runtime: Arc<AgentRuntime>,
        vcs: Arc<dyn Vcs>,
        session: SessionId,
        epoch: DateTime<Utc>,
    ) -> Self {
        Self {
            sentinel,
            locks,
            runtime,
            vcs,
            session,
            epoch,
            next_tasks: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Sets the pending-task list carried into the summary.
    #[must_use]
    pub fn with_next_tasks(mut self, tasks: Vec<String>) -> Self {
        self.next_tasks = tasks;
        self
    }

    /// Adds an extension entry.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Builds a summary from the current state.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Encode`] when hashing fails.
    pub fn snapshot(&self) -> Result<SessionSummary, SnapshotError> {
        let metrics = self.sentinel.metrics();
        let holdings = self.locks.holdings();
        let health = self.runtime.health();
        let restarts = self.runtime.restart_counts();

        let head = self.vcs.head_commit();
        let short_head = head.as_deref().map_or("0000000", |h| &h[..h.len().min(7)]);
        let repo = RepoFacts {
            head: head.clone().unwrap_or_else(|| "unknown".to_owned()),
            dirty: match self.vcs.is_dirty() {
                Some(true) => "true".to_owned(),
                Some(false) => "false".to_owned(),
                None => "unknown".to_owned(),
            },
            open_work_items: self.vcs.open_work_items(),
        };
        let build_id = format!("{short_head}-{}", self.epoch.timestamp());

        let mut agents = BTreeMap::new();
        let mut max_per_agent = BTreeMap::new();
        let mut checkpoint_saved: Option<DateTime<Utc>> = None;
        for (name, m) in &metrics.agents {
            let state = health.get(name).copied().unwrap_or(if m.alive {
                AgentState::Running
            } else {
                AgentState::Dead
            });
            agents.insert(
                name.clone(),
                AgentFacts {
                    state,
                    credits: m.credits_used,
                    tokens: m.tokens_used,
                    wall_time_ms: m.wall_time_ms,
                    restarts: restarts.get(name).copied().unwrap_or(0),
                },
            );
            max_per_agent.insert(name.clone(), m.credits_used);
            if let Some(at) = m.last_checkpoint_at {
                checkpoint_saved = Some(checkpoint_saved.map_or(at, |prev| prev.max(at)));
            }
        }

        let credits = CreditFacts {
            used: metrics.global_credits,
            remaining: metrics.global_hard_cap.saturating_sub(metrics.global_credits),
            cap: metrics.global_hard_cap,
            max_per_agent,
            checkpoint_saved,
        };

        let warnings = self.assemble_warnings(&credits, &agents, &repo, &holdings);

        let mut summary = SessionSummary {
            version: SUMMARY_VERSION.to_owned(),
            timestamp: self.epoch,
            session_id: self.session.clone(),
            build_id,
            tooling_version: TOOLING_VERSION.to_owned(),
            repo,
            credits,
            agents,
            locks: holdings,
            next_tasks: self.next_tasks.clone(),
            warnings,
            extensions: self.extensions.clone(),
            context_hash: String::new(),
        };
        summary.context_hash = summary.compute_hash()?;
        Ok(summary)
    }

    fn assemble_warnings(
        &self,
        credits: &CreditFacts,
        agents: &BTreeMap<AgentName, AgentFacts>,
        repo: &RepoFacts,
        _holdings: &LockHoldings,
    ) -> Vec<Warning> {
        let mut warnings = Vec::new();

        if credits.cap > 0 {
            let usage_pct = credits.used as f64 / credits.cap as f64 * 100.0;
            if usage_pct >= 90.0 {
                warnings.push(Warning::error(
                    "credit_limit",
                    format!("Credit usage critical: {usage_pct:.1}%"),
                ));
            } else if usage_pct >= 80.0 {
                warnings.push(Warning::warn(
                    "credit_high",
                    format!("Credit usage high: {usage_pct:.1}%"),
                ));
            }
        }

        let dead: Vec<&str> = agents
            .iter()
            .filter(|(_, facts)| facts.state.is_dead())
            .map(|(name, _)| name.as_str())
            .collect();
        if !dead.is_empty() {
            warnings.push(Warning::warn(
                "agents_dead",
                format!("Agents no longer running: {}", dead.join(", ")),
            ));
        }

        if repo.dirty == "true" {
            warnings.push(Warning::warn(
                "git_dirty",
                "Working tree has uncommitted changes",
            ));
        }

        // Conditions the runtime absorbed during the session
        // (governor aborts, deadlocks broken, hard kills).
        warnings.extend(self.runtime.warnings());
        warnings
    }
}
