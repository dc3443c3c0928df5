//! Bus errors.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`BusError::Full`] | `BUS_FULL` | No |
//! | [`BusError::Unavailable`] | `BUS_UNAVAILABLE` | Yes |
//! | [`BusError::Timeout`] | `BUS_TIMEOUT` | Yes |
//! | [`BusError::Codec`] | `BUS_CODEC` | No |
//!
//! `Unavailable` is the transient case: callers retry it with the
//! schedule in [`crate::Backoff`]. `Full` is fatal for the publish
//! attempt that hit it; the mock's retention for that topic is
//! saturated and retrying immediately would meet the same wall.

use hive_types::{ErrorCode, TopicName};
use thiserror::Error;

/// Message bus error.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The in-process bus is saturated for this topic.
    #[error("bus saturated for topic '{0}'")]
    Full(TopicName),

    /// The transport is (temporarily) unreachable.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A request/reply exchange exceeded its deadline.
    #[error("request timed out on topic '{0}'")]
    Timeout(TopicName),

    /// An envelope could not be encoded or decoded at the transport
    /// boundary.
    #[error("bus codec failure: {0}")]
    Codec(String),
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::Full(_) => "BUS_FULL",
            Self::Unavailable(_) => "BUS_UNAVAILABLE",
            Self::Timeout(_) => "BUS_TIMEOUT",
            Self::Codec(_) => "BUS_CODEC",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_types::assert_error_codes;

    fn all_variants() -> Vec<BusError> {
        vec![
            BusError::Full(TopicName::new("t")),
            BusError::Unavailable("down".into()),
            BusError::Timeout(TopicName::new("t")),
            BusError::Codec("bad".into()),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "BUS_");
    }

    #[test]
    fn recoverability_split() {
        assert!(!BusError::Full(TopicName::new("t")).is_recoverable());
        assert!(BusError::Unavailable("x".into()).is_recoverable());
        assert!(BusError::Timeout(TopicName::new("t")).is_recoverable());
        assert!(!BusError::Codec("x".into()).is_recoverable());
    }
}
