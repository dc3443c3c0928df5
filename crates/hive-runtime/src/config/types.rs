//! Configuration types.
//!
//! All types implement [`Default`] with the documented fallback values,
//! so a config file only needs to state what it changes.

use hive_types::TopicName;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure.
///
/// Merged from three layers: compile-time defaults, the optional
/// `hive.toml` file, and environment variables (highest priority).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Hard ceiling on the sum of all agents' credits.
    pub global_hard_cap: u64,

    /// Credits between checkpoint verdicts for one agent.
    pub checkpoint_interval: u64,

    /// Soft-cap fraction above which `Warn` is returned.
    pub warn_threshold: f64,

    /// Soft-cap fraction above which `Throttle` is returned.
    pub throttle_threshold: f64,

    /// Per-agent credit caps for agents not listed in `agents`.
    pub default_soft_cap: u64,

    /// Per-agent hard cap for agents not listed in `agents`.
    pub default_hard_cap: u64,

    /// Wall-time limit for agents not listed in `agents`, ms.
    pub default_wall_time_ms: u64,

    /// Grace between cooperative cancel and hard kill, ms.
    pub cancellation_grace_ms: u64,

    /// Restarts allowed per agent after unhandled worker errors.
    pub restart_limit: u32,

    /// Polarity filtering threshold for conforming consumers.
    pub polarity_threshold: f64,

    /// Cycle deadline, ms.
    pub deadline_ms: u64,

    /// Where to persist session summaries, when set.
    pub summary_path: Option<PathBuf>,

    /// Bus selection.
    pub bus: BusConfig,

    /// Audit sink selection.
    pub audit_sink: AuditSinkSpec,

    /// Per-agent cap overrides, keyed by agent name.
    pub agents: BTreeMap<String, AgentCaps>,

    /// Treasury facts for the runway gate.
    pub treasury: TreasuryConfig,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            global_hard_cap: 1000,
            checkpoint_interval: 50,
            warn_threshold: 0.80,
            throttle_threshold: 0.95,
            default_soft_cap: 150,
            default_hard_cap: 200,
            default_wall_time_ms: 45_000,
            cancellation_grace_ms: 5_000,
            restart_limit: 3,
            polarity_threshold: hive_event::DEFAULT_POLARITY_THRESHOLD,
            deadline_ms: 300_000,
            summary_path: None,
            bus: BusConfig::default(),
            audit_sink: AuditSinkSpec::default(),
            agents: BTreeMap::new(),
            treasury: TreasuryConfig::default(),
        }
    }
}

impl HiveConfig {
    /// Validates cross-field constraints after all layers merged.
    ///
    /// # Errors
    ///
    /// Returns [`super::ConfigError::InvalidSetting`] for impossible
    /// values (zero caps, thresholds outside `(0, 1]`, warn above
    /// throttle).
    pub fn validate(&self) -> Result<(), super::ConfigError> {
        use super::ConfigError;

        if self.global_hard_cap == 0 {
            return Err(ConfigError::invalid_setting(
                "global_hard_cap",
                "must be positive",
            ));
        }
        for (name, threshold) in [
            ("warn_threshold", self.warn_threshold),
            ("throttle_threshold", self.throttle_threshold),
        ] {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(ConfigError::invalid_setting(name, "must be in (0, 1]"));
            }
        }
        if self.warn_threshold >= self.throttle_threshold {
            return Err(ConfigError::invalid_setting(
                "warn_threshold",
                "must be below throttle_threshold",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::invalid_setting(
                "checkpoint_interval",
                "must be positive",
            ));
        }
        for (name, caps) in &self.agents {
            if caps.soft_cap == 0 || caps.hard_cap == 0 {
                return Err(ConfigError::invalid_setting(
                    format!("agents.{name}"),
                    "caps must be positive",
                ));
            }
        }
        if self.bus.mode == BusMode::Broker && self.bus.broker_bootstrap.is_none() {
            return Err(ConfigError::invalid_setting(
                "bus.broker_bootstrap",
                "required when bus mode is 'broker'",
            ));
        }
        Ok(())
    }

    /// Caps for a named agent, falling back to the defaults.
    #[must_use]
    pub fn caps_for(&self, agent: &str) -> AgentCaps {
        self.agents.get(agent).cloned().unwrap_or(AgentCaps {
            soft_cap: self.default_soft_cap,
            hard_cap: self.default_hard_cap,
            wall_time_limit_ms: self.default_wall_time_ms,
        })
    }
}

/// Per-agent credit and wall-time caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCaps {
    /// Advisory ceiling; warn/throttle thresholds apply against it.
    pub soft_cap: u64,
    /// Enforced ceiling; crossing it aborts the agent.
    pub hard_cap: u64,
    /// Wall-time limit since spawn, ms.
    #[serde(default = "default_wall_time")]
    pub wall_time_limit_ms: u64,
}

fn default_wall_time() -> u64 {
    45_000
}

/// Bus selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Which implementation carries traffic.
    pub mode: BusMode,
    /// Broker contact string, required for [`BusMode::Broker`].
    pub broker_bootstrap: Option<String>,
    /// Per-topic capacity of the in-process bus.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: BusMode::Mock,
            broker_bootstrap: None,
            capacity: hive_bus::DEFAULT_CAPACITY,
        }
    }
}

/// Bus implementation selector (`BUS_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    /// In-process bus; no external infrastructure.
    #[default]
    Mock,
    /// Kafka-family broker.
    Broker,
}

impl FromStr for BusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "broker" => Ok(Self::Broker),
            other => Err(format!("unknown bus mode '{other}' (expected 'mock' or 'broker')")),
        }
    }
}

/// Audit sink selection (`AUDIT_SINK`).
///
/// Exactly one variant is active per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "target")]
pub enum AuditSinkSpec {
    /// Append RFC-4180 rows to a CSV file.
    Csv(PathBuf),
    /// Publish `checkpoint` events on a dedicated bus topic.
    Topic(String),
}

impl Default for AuditSinkSpec {
    fn default() -> Self {
        Self::Csv(PathBuf::from("metrics.csv"))
    }
}

impl AuditSinkSpec {
    /// Returns the topic name for topic sinks.
    #[must_use]
    pub fn topic(&self) -> Option<TopicName> {
        match self {
            Self::Topic(name) => Some(TopicName::new(name.clone())),
            Self::Csv(_) => None,
        }
    }
}

impl FromStr for AuditSinkSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("csv:") {
            if path.is_empty() {
                return Err("empty csv path".into());
            }
            return Ok(Self::Csv(PathBuf::from(path)));
        }
        if let Some(topic) = s.strip_prefix("topic:") {
            if topic.is_empty() {
                return Err("empty topic name".into());
            }
            return Ok(Self::Topic(topic.to_owned()));
        }
        Err(format!(
            "unknown audit sink '{s}' (expected 'csv:<path>' or 'topic:<name>')"
        ))
    }
}

/// Treasury facts used by the orchestrator's runway gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    /// Current balance.
    pub balance: Decimal,
    /// Spend per day; zero means infinite runway.
    pub burn_rate_per_day: Decimal,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            balance: Decimal::from(1000u32),
            burn_rate_per_day: Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let c = HiveConfig::default();
        assert_eq!(c.global_hard_cap, 1000);
        assert_eq!(c.checkpoint_interval, 50);
        assert_eq!(c.warn_threshold, 0.80);
        assert_eq!(c.throttle_threshold, 0.95);
        assert_eq!(c.default_wall_time_ms, 45_000);
        assert_eq!(c.cancellation_grace_ms, 5_000);
        assert_eq!(c.restart_limit, 3);
        assert_eq!(c.polarity_threshold, -0.5);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn caps_fall_back_to_defaults() {
        let mut c = HiveConfig::default();
        c.agents.insert(
            "planner".into(),
            AgentCaps {
                soft_cap: 50,
                hard_cap: 60,
                wall_time_limit_ms: 10_000,
            },
        );

        assert_eq!(c.caps_for("planner").soft_cap, 50);
        assert_eq!(c.caps_for("unlisted").soft_cap, 150);
        assert_eq!(c.caps_for("unlisted").wall_time_limit_ms, 45_000);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let c = HiveConfig {
            warn_threshold: 0.97,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_requires_bootstrap_for_broker() {
        let c = HiveConfig {
            bus: BusConfig {
                mode: BusMode::Broker,
                broker_bootstrap: None,
                capacity: 16,
            },
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn audit_sink_parses() {
        assert_eq!(
            "csv:/tmp/m.csv".parse::<AuditSinkSpec>().unwrap(),
            AuditSinkSpec::Csv(PathBuf::from("/tmp/m.csv"))
        );
        assert_eq!(
            "topic:audit".parse::<AuditSinkSpec>().unwrap(),
            AuditSinkSpec::Topic("audit".into())
        );
        assert!("file:x".parse::<AuditSinkSpec>().is_err());
        assert!("csv:".parse::<AuditSinkSpec>().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let text = r#"
global_hard_cap = 500

[agents.planner]
soft_cap = 50
hard_cap = 60

[treasury]
balance = 250
"#;
        let c: HiveConfig = toml::from_str(text).unwrap();
        assert_eq!(c.global_hard_cap, 500);
        assert_eq!(c.agents["planner"].hard_cap, 60);
        assert_eq!(c.treasury.balance, Decimal::from(250u32));
        // Unset fields keep their defaults.
        assert_eq!(c.checkpoint_interval, 50);
    }
}
