//! Event layer errors.
//!
//! All codes use the `EVENT_` prefix:
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`EventError::Malformed`] | `EVENT_MALFORMED` | No |
//! | [`EventError::PolarityOutOfRange`] | `EVENT_POLARITY_OUT_OF_RANGE` | No |
//! | [`EventError::Encode`] | `EVENT_ENCODE` | No |
//!
//! A malformed event is dropped at decode time; the condition is
//! recorded as a `warn` entry by the consumer and never propagates
//! further. Retrying a decode of the same bytes cannot succeed, so
//! nothing here is recoverable.

use hive_types::ErrorCode;
use thiserror::Error;

/// Event envelope and codec error.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The wire bytes violate an envelope invariant.
    ///
    /// Covers unparseable JSON, unknown `type` tags, invalid agent
    /// names, and negative counters. No partial decode is produced.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Polarity outside `[-1.0, +1.0]` (or not finite).
    #[error("polarity {0} outside [-1.0, +1.0]")]
    PolarityOutOfRange(f64),

    /// A body could not be serialized.
    ///
    /// Indicates a bug in the producer (a payload with non-string map
    /// keys, for instance), not a wire problem.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl ErrorCode for EventError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "EVENT_MALFORMED",
            Self::PolarityOutOfRange(_) => "EVENT_POLARITY_OUT_OF_RANGE",
            Self::Encode(_) => "EVENT_ENCODE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
