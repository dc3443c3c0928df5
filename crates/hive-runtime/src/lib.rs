//! HIVE runtime: the coordination substrate.
//!
//! Autonomous workers ("agents") consume tasks from bus topics, emit
//! structured events, and compete for bounded shared resources. This
//! crate is the substrate that keeps that safe:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                            │
//! │   treasury gate · root task · wiring map · cycle outcome       │
//! └────────────────────────────────────────────────────────────────┘
//!      │ owns                                           │ samples
//!      ▼                                                ▼
//! ┌───────────────┐ ┌──────────────┐ ┌─────────────┐ ┌─────────────┐
//! │ CreditSentinel│ │ LockManager  │ │ AgentRuntime│ │ Snapshotter │
//! │ verdict ladder│ │ deadlock     │ │ lifecycles, │ │ hashable    │
//! │ + watchdog    │ │ resolution   │ │ routing     │ │ summaries   │
//! └───────────────┘ └──────────────┘ └─────────────┘ └─────────────┘
//!      │ AbortNotice      │ AbortNotice      ▲
//!      └──────────────────┴──────────────────┘
//! ```
//!
//! Ownership is strict: the sentinel owns credit records, the lock
//! manager owns lock records, the runtime owns agent records, and the
//! orchestrator owns all three. Governors never reach into the
//! runtime: they push [`AbortNotice`]s over channels and the runtime
//! executes terminations. All cross-component references are opaque
//! identifiers from `hive-types`.
//!
//! # Quick Start
//!
//! ```no_run
//! use hive_runtime::agent::{AgentSpec, EchoWorker};
//! use hive_runtime::config::HiveConfig;
//! use hive_runtime::orchestrator::{Orchestrator, RootTask, WiringMap};
//! use hive_runtime::snapshot::{NullVcs, StaticTreasury};
//! use hive_bus::MemoryBus;
//! use hive_types::{AgentName, TopicName};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HiveConfig::default();
//! let treasury = Arc::new(StaticTreasury::from(&config.treasury));
//! let orchestrator = Orchestrator::bootstrap(
//!     config,
//!     Arc::new(MemoryBus::new()),
//!     treasury,
//!     Arc::new(NullVcs),
//! )?;
//!
//! let echo = AgentName::new("echo")?;
//! let orchestrator = orchestrator
//!     .with_entry_topic(TopicName::input(&echo))
//!     .with_wiring(WiringMap::pipeline(&[echo.clone()]));
//! orchestrator
//!     .spawn_agent(AgentSpec::new(echo), Box::new(EchoWorker::default()))
//!     .await?;
//!
//! let report = orchestrator
//!     .run_cycle(RootTask::new("demo", serde_json::json!({})))
//!     .await?;
//! println!("{}: {}", report.outcome, report.summary.context_hash);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod lock;
pub mod orchestrator;
pub mod sentinel;
pub mod snapshot;

pub use agent::{AgentRuntime, AgentSpec, AgentState, Worker, WorkerContext};
pub use config::{ConfigError, ConfigLoader, HiveConfig};
pub use lock::{LockError, LockManager};
pub use orchestrator::{CycleOutcome, CycleReport, Orchestrator, RootTask, WiringMap};
pub use sentinel::{AbortKind, AbortNotice, CreditSentinel, SentinelError, Verdict};
pub use snapshot::{SessionSummary, Snapshotter};
