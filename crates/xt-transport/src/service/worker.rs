//! Long-lived worker loops on dedicated OS threads.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::error::TransportError;

/// A consumer loop that owns one channel role.
pub trait WorkerLoop: Send + Sync + 'static {
    /// Run until interrupted. Called once, on the worker's own thread.
    fn run(&self);

    /// Ask the loop to stop. Safe to call from any thread, any number of times.
    fn interrupt(&self);

    /// Whether `run` is currently executing.
    fn is_alive(&self) -> bool;

    /// Thread name, also used in log fields.
    fn name(&self) -> &'static str;
}

/// Owns the thread running a [`WorkerLoop`].
pub struct WorkerHandle {
    worker: Arc<dyn WorkerLoop>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start `worker` on a new named thread.
    pub fn spawn(worker: Arc<dyn WorkerLoop>) -> io::Result<Self> {
        let runner = Arc::clone(&worker);
        let thread = thread::Builder::new()
            .name(worker.name().to_string())
            .spawn(move || runner.run())?;

        info!(worker = worker.name(), "Worker started");
        Ok(Self {
            worker,
            thread: Some(thread),
        })
    }

    pub fn interrupt(&self) {
        self.worker.interrupt();
    }

    pub fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }

    pub fn name(&self) -> &'static str {
        self.worker.name()
    }

    /// Interrupt the loop and wait for its thread to exit.
    pub fn shutdown(&mut self) -> Result<(), TransportError> {
        self.worker.interrupt();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let worker = self.worker.name();
        if thread.join().is_err() {
            warn!(worker, "Worker thread panicked");
            return Err(TransportError::WorkerPanicked { worker });
        }
        info!(worker, "Worker stopped");
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
