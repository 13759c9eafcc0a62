//! Error taxonomy for the bridge boundary
//!
//! Every Python exception is caught at the boundary and converted into a
//! string-carrying `BridgeError`; native `PyErr` values never escape into
//! host code, and nothing is retried or swallowed.

use pyo3::exceptions::{PyAttributeError, PyTypeError};
use pyo3::{PyErr, Python};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Session operation before `start` or after `stop`.
    #[error("interpreter session is not running")]
    NotRunning,

    /// `start` called on a session that already left the Uninitialized state.
    #[error("interpreter session is already running")]
    AlreadyRunning,

    /// The foreign side raised during a call; carries the exception's
    /// display form (`Type: message`).
    #[error("python call failed: {0}")]
    ForeignCall(String),

    #[error("attribute `{0}` not found")]
    AttributeNotFound(String),

    #[error("attribute `{0}` is read-only")]
    ReadOnlyAttribute(String),

    /// Module or source-file loading failed on the Python side.
    #[error("module load failed: {0}")]
    Load(String),

    /// Expression evaluation raised, or produced a non-numeric result.
    #[error("evaluation failed: {0}")]
    Eval(String),

    /// A host value the codec cannot represent in Python.
    #[error("unsupported host value: {0}")]
    UnsupportedValue(String),

    /// A Python value the codec cannot represent host-side.
    #[error("unrepresentable python value: {0}")]
    UnrepresentableForeignValue(String),
}

/// Classify a failed `setattr` per Python semantics: read-only rejections
/// (`AttributeError: ... read-only`, property without a setter, slots and
/// builtin types raising `TypeError`) vs. a genuinely missing attribute.
pub(crate) fn classify_setattr_error(py: Python<'_>, err: &PyErr, name: &str) -> BridgeError {
    let message = err.to_string();
    if err.is_instance_of::<PyTypeError>(py) {
        return BridgeError::ReadOnlyAttribute(name.to_string());
    }
    if err.is_instance_of::<PyAttributeError>(py) {
        let lower = message.to_lowercase();
        // CPython wording varies by version: "can't set attribute" (≤3.10),
        // "property ... has no setter" (3.11+), "read-only" for slots/builtins.
        if lower.contains("read-only")
            || lower.contains("readonly")
            || lower.contains("can't set")
            || lower.contains("no setter")
        {
            return BridgeError::ReadOnlyAttribute(name.to_string());
        }
        return BridgeError::AttributeNotFound(name.to_string());
    }
    BridgeError::ForeignCall(message)
}

/// Classify a failed `getattr`: `AttributeError` means the attribute is
/// absent; anything else (a raising property getter, say) is a foreign
/// call failure.
pub(crate) fn classify_getattr_error(py: Python<'_>, err: &PyErr, name: &str) -> BridgeError {
    if err.is_instance_of::<PyAttributeError>(py) {
        BridgeError::AttributeNotFound(name.to_string())
    } else {
        BridgeError::ForeignCall(err.to_string())
    }
}
