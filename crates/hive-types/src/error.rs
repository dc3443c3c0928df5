//! Unified error interface for HIVE.
//!
//! Every error enum in the workspace implements [`ErrorCode`], giving
//! callers a stable machine-readable code and a retry hint without
//! matching on concrete types across crate boundaries.
//!
//! # Code Format
//!
//! - UPPER_SNAKE_CASE, prefixed per crate: `EVENT_`, `BUS_`,
//!   `SENTINEL_`, `LOCK_`, `AGENT_`, `SNAPSHOT_`, `CONFIG_`, `CYCLE_`
//! - Stable once defined (codes are an API contract)
//!
//! # Recoverability
//!
//! `is_recoverable()` answers one question: can a retry of the same
//! operation succeed? Transient conditions (bus unavailable, request
//! timeout) are recoverable; protocol violations, malformed input, and
//! configuration errors are not.
//!
//! # Example
//!
//! ```
//! use hive_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum LedgerError {
//!     Saturated,
//!     UnknownAgent,
//! }
//!
//! impl ErrorCode for LedgerError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Saturated => "LEDGER_SATURATED",
//!             Self::UnknownAgent => "LEDGER_UNKNOWN_AGENT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Saturated)
//!     }
//! }
//!
//! assert!(LedgerError::Saturated.is_recoverable());
//! ```

/// Machine-readable error code and retry hint.
pub trait ErrorCode {
    /// Returns the stable UPPER_SNAKE_CASE code for this error.
    fn code(&self) -> &'static str;

    /// Returns `true` if retrying the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code follows HIVE conventions.
///
/// Checks the expected prefix, non-emptiness, and UPPER_SNAKE_CASE
/// shape. Used in each crate's error tests to keep codes honest.
///
/// # Panics
///
/// Panics with a descriptive message on violation.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'"
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE"
    );
}

/// Asserts conventions over every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum SampleError {
        Transient,
        Permanent,
    }

    impl ErrorCode for SampleError {
        fn code(&self) -> &'static str {
            match self {
                Self::Transient => "SAMPLE_TRANSIENT",
                Self::Permanent => "SAMPLE_PERMANENT",
            }
        }

        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    #[test]
    fn error_code_trait() {
        assert_eq!(SampleError::Transient.code(), "SAMPLE_TRANSIENT");
        assert!(SampleError::Transient.is_recoverable());
        assert!(!SampleError::Permanent.is_recoverable());
    }

    #[test]
    fn assert_helpers_accept_valid_codes() {
        assert_error_codes(&[SampleError::Transient, SampleError::Permanent], "SAMPLE_");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn assert_helper_rejects_wrong_prefix() {
        assert_error_code(&SampleError::Transient, "OTHER_");
    }

    #[test]
    fn snake_case_shape() {
        assert!(is_upper_snake_case("BUS_FULL"));
        assert!(is_upper_snake_case("CODE_2"));
        assert!(!is_upper_snake_case(""));
        assert!(!is_upper_snake_case("bus_full"));
        assert!(!is_upper_snake_case("_BUS"));
        assert!(!is_upper_snake_case("BUS__FULL"));
    }
}
