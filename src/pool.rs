//! Fixed-size worker pool.
//!
//! Factories run their I/O loops on a pool thread and the selector variants
//! dispatch every read to the pool, so the selector thread only polls.

use crossbeam_channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A cloneable handle to a fixed set of worker threads.
///
/// Workers exit once every handle has been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
    name: Arc<str>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) named `<name>-<n>`.
    pub fn new(size: usize, name: &str) -> std::io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        for n in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        // A panicking job must not take the worker down with it
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("Worker job panicked");
                        }
                    }
                    debug!("Worker exiting");
                })?;
        }
        Ok(Self {
            sender,
            size,
            name: name.into(),
        })
    }

    /// Queues `job` for execution on the next free worker.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            error!(pool = %self.name, "Worker pool is gone, dropping job");
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
