//! HIVE CLI - multi-agent coordination runtime.
//!
//! # Configuration
//!
//! Configuration is loaded from three layers, highest priority last:
//!
//! 1. Default values
//! 2. `hive.toml` (working directory, or `--config <path>`)
//! 3. Environment variables
//!
//! # Environment Variables
//!
//! - `GLOBAL_HARD_CAP`: global credit ceiling
//! - `CHECKPOINT_INTERVAL`: credits between checkpoint verdicts
//! - `DEFAULT_WALL_TIME_MS`: default per-agent wall-time limit
//! - `CANCELLATION_GRACE_MS`: cancel grace before hard kill
//! - `BUS_MODE`: `mock` or `broker`
//! - `BROKER_BOOTSTRAP`: broker contact string
//! - `AUDIT_SINK`: `csv:<path>` or `topic:<name>`
//! - `POLARITY_THRESHOLD`: consumer filtering threshold
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | cycle completed |
//! | 1 | recoverable error (an agent was aborted) |
//! | 2 | global abort (budget, deadline) |
//! | 3 | configuration error |

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use hive_bus::{MemoryBus, MessageBus};
use hive_runtime::agent::{AgentSpec, EchoWorker};
use hive_runtime::config::{ConfigLoader, HiveConfig};
use hive_runtime::orchestrator::{CycleError, Orchestrator, RootTask, WiringMap};
use hive_runtime::snapshot::{GitVcs, SessionSummary, StaticTreasury, Vcs};
use hive_types::{AgentName, ErrorCode, TopicName};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const EXIT_GLOBAL_ABORT: i32 = 2;
const EXIT_CONFIG: i32 = 3;

/// HIVE - multi-agent coordination runtime
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
struct Args {
    /// Explicit config file (defaults to ./hive.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run coordination cycles
    Run {
        /// Bus selection: in-process mock or live broker
        #[arg(long, value_enum, default_value_t = Mode::Mock)]
        mode: Mode,

        /// Run one cycle or keep cycling until a failure
        #[arg(long, value_enum, default_value_t = Cycle::Single)]
        cycle: Cycle,

        /// Tool named in the root task
        #[arg(long, default_value = "bootstrap")]
        task: String,
    },

    /// Session summary utilities
    Summary {
        #[command(subcommand)]
        command: SummaryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SummaryCommand {
    /// Validate a persisted session summary (schema, hash, arithmetic)
    Validate {
        /// Path to the summary JSON
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// In-process bus; no external infrastructure
    Mock,
    /// Broker-backed bus (requires the `broker` build)
    Live,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Cycle {
    /// One cycle, then exit
    Single,
    /// Cycle until an outcome other than completion
    Continuous,
}

fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let code = match dispatch(args) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal");
            EXIT_GLOBAL_ABORT
        }
    };
    std::process::exit(code);
}

fn dispatch(args: Args) -> Result<i32> {
    match args.command {
        Command::Run { mode, cycle, task } => {
            let config = match load_config(args.config.as_ref()) {
                Ok(config) => config,
                Err(e) => {
                    error!(code = e.code(), error = %e, "configuration error");
                    return Ok(EXIT_CONFIG);
                }
            };
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(config, mode, cycle, task))
        }
        Command::Summary {
            command: SummaryCommand::Validate { path },
        } => validate_summary(&path),
    }
}

fn load_config(
    path: Option<&PathBuf>,
) -> Result<HiveConfig, hive_runtime::ConfigError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    loader.load()
}

async fn run(config: HiveConfig, mode: Mode, cycle: Cycle, task: String) -> Result<i32> {
    let bus: Arc<dyn MessageBus> = match mode {
        Mode::Mock => Arc::new(MemoryBus::with_capacity(config.bus.capacity)),
        Mode::Live => match build_broker_bus(&config) {
            Ok(bus) => bus,
            Err(message) => {
                error!(error = %message, "configuration error");
                return Ok(EXIT_CONFIG);
            }
        },
    };

    let treasury = Arc::new(StaticTreasury::from(&config.treasury));
    let vcs: Arc<dyn Vcs> = Arc::new(GitVcs::new("."));

    let echo = AgentName::new("echo").expect("static name is valid");
    let orchestrator = match Orchestrator::bootstrap(config, bus, treasury, vcs) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            // A sink that cannot be opened is a deployment problem,
            // same class as a bad cap.
            error!(error = %e, "configuration error");
            return Ok(EXIT_CONFIG);
        }
    };
    let orchestrator = orchestrator
        .with_entry_topic(TopicName::input(&echo))
        .with_wiring(WiringMap::pipeline(&[echo.clone()]));

    orchestrator
        .spawn_agent(AgentSpec::new(echo), Box::new(EchoWorker::default()))
        .await?;

    let mut exit = 0;
    loop {
        let report = match orchestrator
            .run_cycle(RootTask::new(task.clone(), serde_json::json!({})))
            .await
        {
            Ok(report) => report,
            Err(e @ CycleError::Bootstrap(_)) => {
                error!(error = %e, "configuration error");
                exit = EXIT_CONFIG;
                break;
            }
            Err(e) => {
                error!(error = %e, "cycle failed");
                exit = EXIT_GLOBAL_ABORT;
                break;
            }
        };

        info!(
            outcome = %report.outcome,
            credits_used = report.summary.credits.used,
            hash = %report.summary.context_hash,
            "cycle finished"
        );
        for warning in &report.summary.warnings {
            info!(level = %warning.level, code = %warning.code, "{}", warning.msg);
        }

        exit = report.exit_code();
        if cycle == Cycle::Single || exit != 0 {
            break;
        }
    }

    orchestrator.shutdown().await;
    Ok(exit)
}

#[cfg(feature = "broker")]
fn build_broker_bus(config: &HiveConfig) -> Result<Arc<dyn MessageBus>, String> {
    if config.bus.mode != hive_runtime::config::BusMode::Broker {
        // --mode live overrides a config still pointing at the mock.
        tracing::warn!("bus mode forced to broker by --mode live");
    }
    let bootstrap = config
        .bus
        .broker_bootstrap
        .as_deref()
        .ok_or_else(|| "BROKER_BOOTSTRAP is required for live mode".to_owned())?;
    hive_bus::BrokerBus::connect(bootstrap)
        .map(|bus| Arc::new(bus) as Arc<dyn MessageBus>)
        .map_err(|e| e.to_string())
}

#[cfg(not(feature = "broker"))]
fn build_broker_bus(_config: &HiveConfig) -> Result<Arc<dyn MessageBus>, String> {
    Err("this build has no broker support (enable the 'broker' feature)".to_owned())
}

fn validate_summary(path: &PathBuf) -> Result<i32> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot read summary");
            return Ok(EXIT_CONFIG);
        }
    };
    let summary: SessionSummary = match serde_json::from_str(&text) {
        Ok(summary) => summary,
        Err(e) => {
            error!(path = %path.display(), error = %e, "not a session summary");
            return Ok(1);
        }
    };

    let problems = summary.validate();
    if problems.is_empty() {
        println!("ok: {}", summary.context_hash);
        Ok(0)
    } else {
        for problem in &problems {
            println!("problem: {problem}");
        }
        Ok(1)
    }
}
