//! Configuration errors.
//!
//! Every variant here is fatal at startup and maps to process exit
//! code 3. Nothing is recoverable: a bad cap or an unparseable
//! environment variable will not fix itself on retry.

use hive_types::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the config file as TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable held an unparseable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    /// A setting is structurally valid but semantically impossible.
    #[error("invalid setting '{name}': {message}")]
    InvalidSetting { name: String, message: String },
}

impl ConfigError {
    /// Creates a read-file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error.
    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid env var error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid setting error.
    pub fn invalid_setting(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "CONFIG_READ_FILE",
            Self::ParseToml { .. } => "CONFIG_PARSE",
            Self::InvalidEnvVar { .. } => "CONFIG_INVALID_ENV_VAR",
            Self::InvalidSetting { .. } => "CONFIG_INVALID_SETTING",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_types::assert_error_code;

    #[test]
    fn codes_follow_convention() {
        assert_error_code(&ConfigError::invalid_env_var("GLOBAL_HARD_CAP", "x"), "CONFIG_");
        assert_error_code(&ConfigError::invalid_setting("warn_threshold", "x"), "CONFIG_");
    }

    #[test]
    fn display_names_the_variable() {
        let err = ConfigError::invalid_env_var("GLOBAL_HARD_CAP", "expected integer");
        assert!(err.to_string().contains("GLOBAL_HARD_CAP"));
        assert!(err.to_string().contains("expected integer"));
    }
}
