//! Configuration loader with layered merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Config file (`hive.toml` in the working directory, or an
//!    explicit path)
//! 3. Environment variables (highest priority)
//!
//! # Recognized Environment Variables
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `GLOBAL_HARD_CAP` | global credit ceiling (integer) |
//! | `CHECKPOINT_INTERVAL` | credits between checkpoints (integer) |
//! | `DEFAULT_WALL_TIME_MS` | default per-agent wall-time limit |
//! | `CANCELLATION_GRACE_MS` | cancel grace before hard kill |
//! | `BUS_MODE` | `mock` or `broker` |
//! | `BROKER_BOOTSTRAP` | broker contact string |
//! | `AUDIT_SINK` | `csv:<path>` or `topic:<name>` |
//! | `POLARITY_THRESHOLD` | consumer filtering threshold (float) |
//!
//! Any unparseable value is a fatal configuration error (exit code 3).

use super::{ConfigError, HiveConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "hive.toml";

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use hive_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_file("deploy/hive.toml")
///     .load()
///     .expect("config");
/// assert!(config.global_hard_cap > 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    /// Creates a loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an explicit config file path.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skips the environment layer. Useful for deterministic tests.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and merges configuration from all layers, then validates.
    ///
    /// A missing default config file is ignored; an explicitly named
    /// file must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable/unparseable files, bad
    /// env values, or impossible settings.
    pub fn load(&self) -> Result<HiveConfig, ConfigError> {
        let mut config = HiveConfig::default();

        match &self.file {
            Some(path) => config = load_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    config = load_file(default_path)?;
                }
            }
        }

        if !self.skip_env {
            apply_env_vars(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_file(path: &Path) -> Result<HiveConfig, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = toml::from_str(&text).map_err(|e| ConfigError::parse_toml(path, e))?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

fn apply_env_vars(config: &mut HiveConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_parse::<u64>("GLOBAL_HARD_CAP")? {
        config.global_hard_cap = v;
    }
    if let Some(v) = env_parse::<u64>("CHECKPOINT_INTERVAL")? {
        config.checkpoint_interval = v;
    }
    if let Some(v) = env_parse::<u64>("DEFAULT_WALL_TIME_MS")? {
        config.default_wall_time_ms = v;
    }
    if let Some(v) = env_parse::<u64>("CANCELLATION_GRACE_MS")? {
        config.cancellation_grace_ms = v;
    }
    if let Some(v) = env_parse::<f64>("POLARITY_THRESHOLD")? {
        config.polarity_threshold = v;
    }
    if let Some(v) = env_parse("BUS_MODE")? {
        config.bus.mode = v;
    }
    if let Ok(v) = std::env::var("BROKER_BOOTSTRAP") {
        config.bus.broker_bootstrap = Some(v);
    }
    if let Some(v) = env_parse("AUDIT_SINK")? {
        config.audit_sink = v;
    }
    Ok(())
}

fn env_parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid_env_var(name, e.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditSinkSpec, BusMode};
    use std::io::Write;

    #[test]
    fn defaults_without_file_or_env() {
        let config = ConfigLoader::new().skip_env_vars().load().unwrap();
        assert_eq!(config, HiveConfig::default());
    }

    #[test]
    fn explicit_file_must_exist() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/hive.toml")
            .skip_env_vars()
            .load();
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global_hard_cap = 42").unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .skip_env_vars()
            .load()
            .unwrap();
        assert_eq!(config.global_hard_cap, 42);
        assert_eq!(config.checkpoint_interval, 50);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global_hard_cap = \"not a number\"").unwrap();

        let result = ConfigLoader::new()
            .with_file(file.path())
            .skip_env_vars()
            .load();
        assert!(matches!(result, Err(ConfigError::ParseToml { .. })));
    }

    #[test]
    fn env_parse_helper_reports_variable_name() {
        // Parsed directly to avoid mutating process env in tests.
        let err = "abc"
            .parse::<u64>()
            .map_err(|e| ConfigError::invalid_env_var("GLOBAL_HARD_CAP", e.to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("GLOBAL_HARD_CAP"));
    }

    #[test]
    fn bus_mode_and_audit_sink_parse_like_env_values() {
        assert_eq!("mock".parse::<BusMode>().unwrap(), BusMode::Mock);
        assert_eq!("broker".parse::<BusMode>().unwrap(), BusMode::Broker);
        assert!("kafka".parse::<BusMode>().is_err());
        assert!("topic:audit".parse::<AuditSinkSpec>().is_ok());
    }
}
