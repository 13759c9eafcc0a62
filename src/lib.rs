//! PyBridge - embed CPython in a Rust host as an in-process subsystem
//!
//! The bridge manages the interpreter lifecycle, exposes Python modules
//! and objects as callable [`ForeignObject`] proxies, and marshals values
//! across the runtime boundary in both directions. Foreign calls run
//! either synchronously on the caller's thread or asynchronously on a
//! worker pool, so a blocking Python call never has to stall the host.
//!
//! ```no_run
//! use pybridge::HostValue;
//!
//! pybridge::start_interpreter(None)?;
//! pybridge::append_sys_path("./fixtures")?;
//! let module = pybridge::import_module("mathutil")?;
//! let square = module.get_attribute("square")?;
//! let result = square.as_object().unwrap().call(&[HostValue::Number(7.0)])?;
//! assert_eq!(result.as_number(), Some(49.0));
//! # Ok::<(), pybridge::BridgeError>(())
//! ```

// Core modules
pub mod codec;
pub mod errors;
pub mod logging;
pub mod object;
pub mod session;

mod dispatch;

// Re-export commonly used items
pub use codec::HostValue;
pub use errors::{BridgeError, Result};
pub use object::ForeignObject;
pub use session::{InterpreterSession, SessionState};

/// Start the process-wide embedded interpreter. Optionally points Python
/// at an alternate runtime location (applied before first initialization).
pub fn start_interpreter(runtime_path: Option<&str>) -> Result<()> {
    InterpreterSession::global().start(runtime_path)
}

/// Append a directory to the interpreter's module search path.
pub fn append_sys_path(path: &str) -> Result<()> {
    InterpreterSession::global().append_search_path(path)
}

/// Load a Python source file and return a handle to the resulting module.
pub fn open_file(filename: &str) -> Result<ForeignObject> {
    InterpreterSession::global().open_file(filename)
}

/// Import a module by name through the search path.
pub fn import_module(name: &str) -> Result<ForeignObject> {
    InterpreterSession::global().import_module(name)
}

/// Evaluate a Python expression and return its numeric result.
pub fn evaluate(expression: &str) -> Result<f64> {
    InterpreterSession::global().evaluate(expression)
}
