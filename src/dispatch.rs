//! Call dispatcher - execution context for every interpreter entry
//!
//! Design: one process-wide entry mutex serializes all foreign calls. The
//! GIL alone does not give whole-call mutual exclusion (CPython drops it
//! around blocking calls and at every switch interval), so the bridge
//! holds the entry lock for the full duration of each call. Synchronous
//! calls take it on the calling thread; asynchronous calls are queued on
//! an unbounded channel and taken by a fixed pool of worker threads, each
//! acquiring the lock itself. Throughput is bounded by the entry lock,
//! not by worker count.

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use pyo3::Python;
use tracing::trace;

use crate::codec::HostValue;
use crate::errors::{BridgeError, Result};
use crate::object::ForeignObject;

/// Width of the async worker pool. More workers only deepen the queue in
/// front of the entry lock.
pub(crate) const DEFAULT_WORKERS: usize = 4;

static FOREIGN_ENTRY: Mutex<()> = parking_lot::const_mutex(());

/// Enter the interpreter: entry lock first, then the GIL. Never held
/// across a host suspension point; callbacks fire after release.
pub(crate) fn with_interpreter<R>(f: impl FnOnce(Python<'_>) -> Result<R>) -> Result<R> {
    let _entry = FOREIGN_ENTRY.lock();
    Python::with_gil(f)
}

pub(crate) type Callback = Box<dyn FnOnce(Result<HostValue>) + Send + 'static>;

/// One queued asynchronous call.
pub(crate) struct Job {
    pub(crate) handle: ForeignObject,
    pub(crate) args: Vec<HostValue>,
    pub(crate) deliver: Callback,
}

pub(crate) struct Dispatcher {
    tx: Sender<Job>,
}

impl Dispatcher {
    pub(crate) fn new(workers: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        for index in 0..workers {
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("pybridge-worker-{index}"))
                .spawn(move || worker_loop(rx))
                .expect("failed to spawn bridge worker thread");
        }
        Self { tx }
    }

    /// Queue a job. Every job delivers its callback exactly once, even
    /// when the pool is gone.
    pub(crate) fn submit(&self, job: Job) {
        if let Err(err) = self.tx.send(job) {
            let job = err.into_inner();
            (job.deliver)(Err(BridgeError::NotRunning));
        }
    }
}

fn worker_loop(rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        let Job {
            handle,
            args,
            deliver,
        } = job;
        trace!(
            target: "dispatch",
            type_tag = handle.type_tag(),
            args_count = args.len(),
            "worker picked up call"
        );
        // A job dequeued after stop() still gets a terminal resolution.
        let result = if handle.session().ensure_running().is_err() {
            Err(BridgeError::NotRunning)
        } else {
            with_interpreter(|py| handle.invoke(py, &args))
        };
        // Deliver outside the entry lock so a callback may re-enter the bridge.
        deliver(result);
    }
}
