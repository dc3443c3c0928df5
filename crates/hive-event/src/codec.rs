//! Canonical JSON encoding.
//!
//! Reproducible hashes and byte-identical re-emissions both rest on one
//! property: the same value always serializes to the same bytes. The
//! canonical form is JSON with object keys in lexicographic order and
//! numbers in their shortest round-trippable representation.
//!
//! Serialization is routed through [`serde_json::Value`], whose object
//! type is a `BTreeMap`: key order falls out of the map itself rather
//! than struct declaration order, so nested maps, flattened maps, and
//! hand-built documents all canonicalize the same way.

use crate::EventError;
use serde::Serialize;
use serde_json::Value;

/// Serializes any value to its canonical JSON [`Value`] form.
///
/// # Errors
///
/// Returns [`EventError::Encode`] when the value cannot be represented
/// as JSON.
pub fn to_canonical_value<T: Serialize>(value: &T) -> Result<Value, EventError> {
    serde_json::to_value(value).map_err(|e| EventError::Encode(e.to_string()))
}

/// Serializes any value to its canonical JSON string.
///
/// Equal inputs yield byte-identical output.
///
/// # Errors
///
/// Returns [`EventError::Encode`] when the value cannot be represented
/// as JSON.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, EventError> {
    let canonical = to_canonical_value(value)?;
    serde_json::to_string(&canonical).map_err(|e| EventError::Encode(e.to_string()))
}

/// Serializes any value to canonical JSON bytes.
///
/// # Errors
///
/// Returns [`EventError::Encode`] when the value cannot be represented
/// as JSON.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EventError> {
    to_canonical_string(value).map(String::into_bytes)
}
