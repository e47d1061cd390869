//! Fixed-size worker pool over a bounded crossbeam queue.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::infrastructure::config::TraversalConfig;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job handed back by [`WorkerPool::try_submit`].
pub enum Rejected {
    /// The queue is at capacity.
    Full(Job),
    /// The pool has been shut down.
    Closed(Job),
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Rejected::Full"),
            Self::Closed(_) => f.write_str("Rejected::Closed"),
        }
    }
}

pub struct WorkerPool {
    tx: RwLock<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("open", &self.tx.read().is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Start `threads` workers sharing a queue of `capacity` jobs.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for zero threads or capacity, and
    /// [`Error::Io`] if a worker thread cannot be spawned.
    pub fn new(threads: usize, capacity: usize) -> Result<Self> {
        if threads == 0 || capacity == 0 {
            return Err(Error::InvalidArgument(
                "worker pool needs at least one thread and one queue slot".into(),
            ));
        }
        let (tx, rx) = channel::bounded::<Job>(capacity);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("folio-traverse-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker = i, "Job panicked");
                        }
                    }
                })?;
            handles.push(handle);
        }
        debug!(threads, capacity, "Worker pool started");
        Ok(Self {
            tx: RwLock::new(Some(tx)),
            handles: Mutex::new(handles),
            threads,
        })
    }

    /// # Errors
    /// Same as [`WorkerPool::new`].
    pub fn from_config(config: &TraversalConfig) -> Result<Self> {
        Self::new(config.worker_threads, config.queue_capacity)
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue `job`, blocking while the queue is full.
    ///
    /// # Errors
    /// Returns [`Error::TraversalFailure`] once the pool is shut down.
    pub fn submit(&self, job: Job) -> Result<()> {
        let tx = self.tx.read().clone();
        match tx {
            Some(tx) => tx
                .send(job)
                .map_err(|_| Error::TraversalFailure("worker pool is shut down".into())),
            None => Err(Error::TraversalFailure("worker pool is shut down".into())),
        }
    }

    /// Queue `job` without blocking.
    ///
    /// # Errors
    /// Hands the job back when the queue is full or the pool is closed.
    pub fn try_submit(&self, job: Job) -> std::result::Result<(), Rejected> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(Rejected::Closed(job));
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => Rejected::Full(job),
            TrySendError::Disconnected(job) => Rejected::Closed(job),
        })
    }

    /// Close the queue, let workers drain it and join them.
    pub fn shutdown(&self) {
        let Some(tx) = self.tx.write().take() else {
            return;
        };
        drop(tx);
        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            // A worker dropping the last pool handle cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        debug!(threads = self.threads, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
