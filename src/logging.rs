//! Logging utilities for the bridge
//!
//! Lightweight structured logging for session transitions, dispatch and
//! codec activity. Uses `tracing` with per-target events so embedders can
//! filter bridge noise independently of their own telemetry.

// Re-export tracing macros for use throughout the bridge
pub use tracing::{debug, error, info, trace, warn, Level};

/// Initialize bridge logging with sensible defaults
///
/// Safe to call more than once; later calls are no-ops if a global
/// subscriber is already installed. Debug builds log at DEBUG, release
/// builds at INFO, both overridable through the standard env filter.
pub fn init_bridge_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("pybridge=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("pybridge=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Log a foreign call entering the interpreter
#[inline]
pub(crate) fn log_foreign_call(type_tag: &str, args_count: usize, asynchronous: bool) {
    trace!(
        target: "dispatch",
        type_tag,
        args_count,
        asynchronous,
        "entering foreign call"
    );
}

/// Log a foreign call failure
#[inline]
pub(crate) fn log_foreign_error(type_tag: &str, error: &str) {
    error!(
        target: "dispatch",
        type_tag,
        error,
        "foreign call failed"
    );
}

/// Log a session state transition
#[inline]
pub(crate) fn log_session_transition(from: &str, to: &str) {
    info!(
        target: "session",
        from,
        to,
        "session state transition"
    );
}
