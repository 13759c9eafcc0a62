//! Foreign object handles and the proxy protocol
//!
//! Design: one uniform handle type over every kind of Python object
//! (modules, functions, classes, instances). No per-type wrapper classes;
//! the capability surface is fixed: call, get/set attribute, repr, type
//! tag. A handle is an `Arc` over the owned Python reference, so cloning
//! is a host-side retention and the underlying Python refcount drops only
//! when the last host clone is gone.
//!
//! Every operation checks the owning session first: after `stop()` the
//! handle is inert and fails with a lifecycle error instead of touching
//! the interpreter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::PyTuple;

use crate::codec::{self, HostValue};
use crate::dispatch::{self, Job};
use crate::errors::{classify_getattr_error, classify_setattr_error, BridgeError, Result};
use crate::logging;
use crate::session::SessionShared;

pub(crate) struct ObjectInner {
    object: Py<PyAny>,
    type_tag: String,
    session: Arc<SessionShared>,
}

/// Reference-counted handle to a live Python object.
#[derive(Clone)]
pub struct ForeignObject {
    inner: Arc<ObjectInner>,
}

impl ForeignObject {
    /// Wrap a Python object. Computes and caches the type tag; registers a
    /// weak back-reference with the session for diagnostics.
    pub(crate) fn new(
        session: &Arc<SessionShared>,
        py: Python<'_>,
        value: &PyAny,
    ) -> Result<Self> {
        let type_tag = value
            .get_type()
            .name()
            .map_err(|e| BridgeError::UnrepresentableForeignValue(e.to_string()))?
            .to_string();
        let inner = Arc::new(ObjectInner {
            object: value.into_py(py),
            type_tag,
            session: session.clone(),
        });
        session.register_handle(&inner);
        Ok(ForeignObject { inner })
    }

    /// Python type name of the wrapped object, cached at creation. Stays
    /// readable after the session stops (it is host-side data).
    pub fn type_tag(&self) -> &str {
        &self.inner.type_tag
    }

    /// Number of host-side references sharing this handle.
    pub fn host_ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Synchronous invocation. Blocks the calling thread for the whole
    /// foreign call, holding the interpreter entry lock.
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        self.inner.session.ensure_running()?;
        logging::log_foreign_call(self.type_tag(), args.len(), false);
        dispatch::with_interpreter(|py| self.invoke(py, args))
    }

    /// Asynchronous invocation. Returns immediately; `callback` fires
    /// exactly once, in completion order. Lifecycle and codec failures
    /// are detected before dispatch and delivered on the calling thread;
    /// everything else arrives on a worker thread.
    pub fn call_async<F>(&self, args: Vec<HostValue>, callback: F)
    where
        F: FnOnce(Result<HostValue>) + Send + 'static,
    {
        logging::log_foreign_call(self.type_tag(), args.len(), true);
        if self.inner.session.ensure_running().is_err() {
            callback(Err(BridgeError::NotRunning));
            return;
        }
        for arg in &args {
            if let Err(err) = codec::ensure_encodable(arg) {
                callback(Err(err));
                return;
            }
        }
        let Some(dispatcher) = self.inner.session.dispatcher() else {
            callback(Err(BridgeError::NotRunning));
            return;
        };
        dispatcher.submit(Job {
            handle: self.clone(),
            args,
            deliver: Box::new(callback),
        });
    }

    /// Asynchronous invocation as a single-resolution future. Same
    /// execution path and error surface as [`call_async`](Self::call_async).
    pub fn call_async_awaitable(
        &self,
        args: Vec<HostValue>,
    ) -> impl Future<Output = Result<HostValue>> + Send + 'static {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.call_async(args, move |result| {
            // Receiver may have been dropped; the call still ran.
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(BridgeError::NotRunning)) }
    }

    /// Read an attribute of the wrapped object.
    pub fn get_attribute(&self, name: &str) -> Result<HostValue> {
        self.inner.session.ensure_running()?;
        dispatch::with_interpreter(|py| {
            let target = self.inner.object.as_ref(py);
            match target.getattr(name) {
                Ok(attr) => codec::decode(py, &self.inner.session, attr),
                Err(err) => Err(classify_getattr_error(py, &err, name)),
            }
        })
    }

    /// Write an attribute of the wrapped object. Not transactional; a
    /// failing Python `__setattr__` leaves whatever state Python defines.
    pub fn set_attribute(&self, name: &str, value: &HostValue) -> Result<()> {
        self.inner.session.ensure_running()?;
        dispatch::with_interpreter(|py| {
            let encoded = codec::encode(py, value)?;
            let target = self.inner.object.as_ref(py);
            target
                .setattr(name, encoded)
                .map_err(|err| classify_setattr_error(py, &err, name))
        })
    }

    /// Python `repr()` of the wrapped object.
    pub fn repr(&self) -> Result<String> {
        self.inner.session.ensure_running()?;
        dispatch::with_interpreter(|py| {
            let target = self.inner.object.as_ref(py);
            target
                .repr()
                .and_then(|s| s.to_str().map(str::to_string))
                .map_err(|err| BridgeError::ForeignCall(err.to_string()))
        })
    }

    /// Hand the wrapped object back to Python by reference (refcount bump,
    /// no copy).
    pub(crate) fn to_object(&self, py: Python<'_>) -> PyObject {
        self.inner.object.clone_ref(py)
    }

    pub(crate) fn session(&self) -> &Arc<SessionShared> {
        &self.inner.session
    }

    /// Core call path shared by the sync and async routes. Caller holds
    /// the entry lock and the GIL.
    pub(crate) fn invoke(&self, py: Python<'_>, args: &[HostValue]) -> Result<HostValue> {
        let target = self.inner.object.as_ref(py);
        if !target.is_callable() {
            return Err(BridgeError::ForeignCall(format!(
                "'{}' object is not callable",
                self.type_tag()
            )));
        }
        let mut encoded = Vec::with_capacity(args.len());
        for arg in args {
            encoded.push(codec::encode(py, arg)?);
        }
        match target.call1(PyTuple::new(py, encoded)) {
            Ok(result) => codec::decode(py, &self.inner.session, result),
            Err(err) => {
                let message = err.to_string();
                logging::log_foreign_error(self.type_tag(), &message);
                Err(BridgeError::ForeignCall(message))
            }
        }
    }
}

/// Handle equality is identity: two handles are equal when they share the
/// same host-side retention, not when they wrap equal Python values.
impl PartialEq for ForeignObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("type_tag", &self.inner.type_tag)
            .field("host_refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}
