//! Layered runtime configuration.
//!
//! Defaults → `hive.toml` → environment variables, with validation
//! after the merge. Configuration problems are fatal at startup and
//! map to exit code 3; the runtime never limps along on a half-parsed
//! config.

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::{ConfigLoader, CONFIG_FILE};
pub use types::{
    AgentCaps, AuditSinkSpec, BusConfig, BusMode, HiveConfig, TreasuryConfig,
};
