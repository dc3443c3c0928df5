//! Level-tagged warnings for session summaries and cycle reports.
//!
//! Every recoverable condition the runtime absorbs (deadlock broken,
//! agent aborted, dirty working tree) surfaces as a [`Warning`] in the
//! next session summary rather than crashing anything.

use serde::{Deserialize, Serialize};

/// Severity of a warning entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum WarnLevel {
    /// Informational; no action needed.
    #[default]
    Info,
    /// Degraded but operating; worth a look.
    Warn,
    /// Something was lost (an agent, a budget); needs attention.
    Error,
}

impl std::fmt::Display for WarnLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One warning entry.
///
/// `code` is a stable snake_case tag for programmatic filtering
/// (`credit_limit`, `agent_aborted`, `deadlock`, ...); `msg` is for
/// humans.
///
/// # Example
///
/// ```
/// use hive_types::{WarnLevel, Warning};
///
/// let w = Warning::warn("credit_high", "Credit usage high: 84.0%");
/// assert_eq!(w.level, WarnLevel::Warn);
/// assert_eq!(w.code, "credit_high");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Severity level.
    pub level: WarnLevel,
    /// Stable machine-readable tag.
    pub code: String,
    /// Human-readable message.
    pub msg: String,
}

impl Warning {
    /// Creates a warning with an explicit level.
    #[must_use]
    pub fn new(level: WarnLevel, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            level,
            code: code.into(),
            msg: msg.into(),
        }
    }

    /// Creates an `info`-level warning.
    #[must_use]
    pub fn info(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(WarnLevel::Info, code, msg)
    }

    /// Creates a `warn`-level warning.
    #[must_use]
    pub fn warn(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(WarnLevel::Warn, code, msg)
    }

    /// Creates an `error`-level warning.
    #[must_use]
    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(WarnLevel::Error, code, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&WarnLevel::Error).unwrap(), "\"error\"");
        assert_eq!(serde_json::to_string(&WarnLevel::Info).unwrap(), "\"info\"");
    }

    #[test]
    fn constructors_set_level() {
        assert_eq!(Warning::info("a", "b").level, WarnLevel::Info);
        assert_eq!(Warning::warn("a", "b").level, WarnLevel::Warn);
        assert_eq!(Warning::error("a", "b").level, WarnLevel::Error);
    }

    #[test]
    fn level_ordering() {
        assert!(WarnLevel::Info < WarnLevel::Warn);
        assert!(WarnLevel::Warn < WarnLevel::Error);
    }
}
