//! Per-stage worker: one filter, its input pipe, its output pipe, one
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::debug;

use crate::filter::{Filter, FilterHandle};
use crate::pipe::Pipe;

/// Drives one filter from its own thread: pop from the input pipe, process,
/// push into the output pipe.
///
/// At most one worker is alive per stage, so the filter itself never has to
/// be thread-safe.
pub struct StageWorker<F: Filter> {
    in_pipe: Arc<Pipe<F::In>>,
    filter: FilterHandle<F>,
    out_pipe: Arc<Pipe<F::Out>>,
    flags: Arc<Flags>,
    /// Serialises lifecycle transitions and owns the worker handle.
    lifecycle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Flags {
    running: AtomicBool,
    filtering: AtomicBool,
}

impl<F: Filter> StageWorker<F> {
    pub fn new(
        in_pipe: Arc<Pipe<F::In>>,
        filter: FilterHandle<F>,
        out_pipe: Arc<Pipe<F::Out>>,
    ) -> Self {
        StageWorker {
            in_pipe,
            filter,
            out_pipe,
            flags: Arc::new(Flags::default()),
            lifecycle: Mutex::new(None),
        }
    }

    /// Whether the stage currently has a live worker.
    pub fn is_filtering(&self) -> bool {
        self.flags.filtering.load(Ordering::Acquire)
    }

    /// Enable both pipes and spawn the worker, unless one is already alive.
    pub fn start(&self) {
        let mut worker = self.lifecycle.lock();
        self.in_pipe.enable();
        self.out_pipe.enable();
        self.flags.filtering.store(true, Ordering::Release);
        if worker.is_none() {
            self.flags.running.store(true, Ordering::Release);
            let in_pipe = self.in_pipe.clone();
            let filter = self.filter.clone();
            let out_pipe = self.out_pipe.clone();
            let flags = self.flags.clone();
            debug!("starting stage worker");
            *worker = Some(thread::spawn(move || run(in_pipe, filter, out_pipe, flags)));
        }
    }

    /// Stop and join the worker. Calling it twice, or on a stage that never
    /// started, is safe.
    pub fn stop(&self) {
        let mut worker = self.lifecycle.lock();
        self.flags.running.store(false, Ordering::Release);
        // Unblocks a worker parked on either pipe.
        self.in_pipe.reset();
        self.in_pipe.disable();
        self.out_pipe.disable();
        self.flags.filtering.store(false, Ordering::Release);
        if let Some(handle) = worker.take() {
            debug!("stopping stage worker");
            let _ = handle.join();
        }
    }

    /// Reset the wrapped filter. A running stage is bounced around the
    /// reset so no `process` call is in flight while it happens.
    pub fn reset(&self) {
        if self.is_filtering() {
            self.stop();
            self.filter.reset();
            self.start();
        } else {
            self.filter.reset();
        }
    }
}

impl<F: Filter> Drop for StageWorker<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: Filter>(
    in_pipe: Arc<Pipe<F::In>>,
    filter: FilterHandle<F>,
    out_pipe: Arc<Pipe<F::Out>>,
    flags: Arc<Flags>,
) {
    loop {
        let item = in_pipe.wait_pop();
        if !flags.running.load(Ordering::Acquire) {
            break;
        }
        match item {
            Some(value) => out_pipe.push(filter.process(value)),
            // The upstream stage disabled its end of the pipe but this one
            // has not been stopped yet; spin gently until either changes.
            None => thread::yield_now(),
        }
    }
}

/// Type-erased lifecycle face of a stage, letting a pipeline drive workers
/// of different signatures uniformly.
pub(crate) trait StageControl: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn reset(&self);
    fn is_filtering(&self) -> bool;
}

impl<F: Filter> StageControl for StageWorker<F> {
    fn start(&self) {
        StageWorker::start(self)
    }

    fn stop(&self) {
        StageWorker::stop(self)
    }

    fn reset(&self) {
        StageWorker::reset(self)
    }

    fn is_filtering(&self) -> bool {
        StageWorker::is_filtering(self)
    }
}
