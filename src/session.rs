//! Interpreter session - lifecycle of the embedded CPython runtime
//!
//! Design: a process-wide singleton with an explicit state machine,
//! Uninitialized → Running → Stopped (terminal), instead of ambient
//! global state. Typical embedding constraint: one interpreter per
//! process, one start per process. `stop()` marks the session Stopped
//! but never finalizes CPython, since pyo3 cannot safely re-initialize a
//! finalized interpreter; stale handles fail with a lifecycle error
//! rather than reaching freed memory.

use std::sync::{Arc, Weak};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use pyo3::prelude::*;
use tracing::{debug, info};

use crate::dispatch::{self, Dispatcher, DEFAULT_WORKERS};
use crate::errors::{BridgeError, Result};
use crate::logging;
use crate::object::{ForeignObject, ObjectInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Running,
    Stopped,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Running => "Running",
            SessionState::Stopped => "Stopped",
        }
    }
}

/// State shared between the session, its handles and the dispatcher.
pub(crate) struct SessionShared {
    state: RwLock<SessionState>,
    /// Ordered, append-only; duplicates permitted (Python resolves in
    /// order, extra entries are harmless).
    search_paths: Mutex<Vec<String>>,
    /// Weak back-references for diagnostics only; the session does not
    /// own handle destruction order.
    live_handles: Mutex<Vec<Weak<ObjectInner>>>,
    dispatcher: OnceCell<Dispatcher>,
}

impl SessionShared {
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if *self.state.read() == SessionState::Running {
            Ok(())
        } else {
            Err(BridgeError::NotRunning)
        }
    }

    pub(crate) fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.get()
    }

    pub(crate) fn register_handle(&self, inner: &Arc<ObjectInner>) {
        let mut handles = self.live_handles.lock();
        // Amortized sweep: dropping dead entries before the vector would
        // grow keeps the registry proportional to live handles, however
        // many short-lived handles a long run churns through.
        if handles.len() == handles.capacity() {
            handles.retain(|weak| weak.strong_count() > 0);
        }
        handles.push(Arc::downgrade(inner));
    }

    fn live_handle_count(&self) -> usize {
        let mut handles = self.live_handles.lock();
        handles.retain(|weak| weak.strong_count() > 0);
        handles.len()
    }
}

/// The process-wide interpreter session.
pub struct InterpreterSession {
    shared: Arc<SessionShared>,
}

static GLOBAL: Lazy<InterpreterSession> = Lazy::new(|| InterpreterSession {
    shared: Arc::new(SessionShared {
        state: RwLock::new(SessionState::Uninitialized),
        search_paths: Mutex::new(Vec::new()),
        live_handles: Mutex::new(Vec::new()),
        dispatcher: OnceCell::new(),
    }),
});

/// Session shared state for tests that exercise the codec and handle
/// registry below the lifecycle gate (the codec itself does not check
/// session state; its callers do).
#[cfg(test)]
pub(crate) fn global_shared() -> Arc<SessionShared> {
    GLOBAL.shared.clone()
}

impl InterpreterSession {
    pub fn global() -> &'static InterpreterSession {
        &GLOBAL
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Start the embedded interpreter. One-shot: any later call, including
    /// after `stop()`, fails with `AlreadyRunning`.
    ///
    /// `runtime_path` points at an alternate Python runtime; it must be
    /// applied before the very first interpreter initialization, so it is
    /// exported as `PYTHONHOME` here.
    pub fn start(&self, runtime_path: Option<&str>) -> Result<()> {
        let mut state = self.shared.state.write();
        if *state != SessionState::Uninitialized {
            return Err(BridgeError::AlreadyRunning);
        }
        if let Some(path) = runtime_path {
            std::env::set_var("PYTHONHOME", path);
        }
        pyo3::prepare_freethreaded_python();
        dispatch::with_interpreter(|py| {
            info!(target: "session", version = py.version(), "python interpreter started");
            Ok(())
        })?;
        self.shared
            .dispatcher
            .get_or_init(|| Dispatcher::new(DEFAULT_WORKERS));
        *state = SessionState::Running;
        logging::log_session_transition(
            SessionState::Uninitialized.name(),
            SessionState::Running.name(),
        );
        Ok(())
    }

    /// Stop the session. In-flight asynchronous calls that already began
    /// run to completion; queued or later calls resolve with `NotRunning`.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            if *state != SessionState::Running {
                return Err(BridgeError::NotRunning);
            }
            *state = SessionState::Stopped;
        }
        info!(
            target: "session",
            live_handles = self.shared.live_handle_count(),
            "session stopped"
        );
        logging::log_session_transition(
            SessionState::Running.name(),
            SessionState::Stopped.name(),
        );
        Ok(())
    }

    /// Append a directory to Python's module search path.
    pub fn append_search_path(&self, path: &str) -> Result<()> {
        self.shared.ensure_running()?;
        dispatch::with_interpreter(|py| {
            py.import("sys")
                .and_then(|sys| sys.getattr("path"))
                .and_then(|sys_path| sys_path.call_method1("append", (path,)))
                .map(|_| ())
                .map_err(|e| BridgeError::ForeignCall(e.to_string()))
        })?;
        self.shared.search_paths.lock().push(path.to_string());
        debug!(target: "session", path, "search path appended");
        Ok(())
    }

    /// Search paths appended so far, in append order.
    pub fn search_paths(&self) -> Vec<String> {
        self.shared.search_paths.lock().clone()
    }

    /// Load a Python source file as a module-like object.
    pub fn open_file(&self, path: &str) -> Result<ForeignObject> {
        self.shared.ensure_running()?;
        let source = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Load(format!("{path}: {e}")))?;
        let module_name = std::path::Path::new(path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("embedded")
            .to_string();
        dispatch::with_interpreter(|py| {
            let module = PyModule::from_code(py, &source, path, &module_name)
                .map_err(|e| BridgeError::Load(e.to_string()))?;
            ForeignObject::new(&self.shared, py, module)
        })
    }

    /// Import a module by name through the search path.
    pub fn import_module(&self, name: &str) -> Result<ForeignObject> {
        self.shared.ensure_running()?;
        dispatch::with_interpreter(|py| {
            let module = py
                .import(name)
                .map_err(|e| BridgeError::Load(e.to_string()))?;
            ForeignObject::new(&self.shared, py, module)
        })
    }

    /// Evaluate a Python expression and return its numeric result.
    pub fn evaluate(&self, expression: &str) -> Result<f64> {
        self.shared.ensure_running()?;
        dispatch::with_interpreter(|py| {
            let value = py
                .eval(expression, None, None)
                .map_err(|e| BridgeError::Eval(e.to_string()))?;
            value
                .extract::<f64>()
                .map_err(|_| BridgeError::Eval(format!("result is not numeric: {expression}")))
        })
    }

    /// Handles issued by this session that are still alive host-side.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handle_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyo3::Python;

    #[test]
    fn test_handle_registry_stays_bounded() {
        let shared = global_shared();
        Python::with_gil(|py| {
            for _ in 0..4096 {
                let value = py.eval("object()", None, None).unwrap();
                // Dropped immediately; only the weak entry remains.
                let _handle = ForeignObject::new(&shared, py, value).unwrap();
            }
        });
        // Without opportunistic pruning this would sit at ~4096.
        let registered = shared.live_handles.lock().len();
        assert!(
            registered < 1024,
            "dead weak entries accumulated: {registered}"
        );
    }
}
