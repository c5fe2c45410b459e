//! Bounded pool of worker threads with private scratch memory
//!
//! Workers share one FIFO queue guarded by a mutex and sleep on a condition
//! variable while it is empty. Each worker owns one [`KernelBuffers`] for its
//! whole life, so scratch memory is never shared between threads.
//!
//! Resizing is a full stop, drain and restart. Jobs still queued when the
//! pool stops are abandoned, never run. A job that panics is failed and its
//! worker carries on with the next one.

use crate::config::validate_thread_count;
use crate::error::{Error, Result};
use gna_kernels::KernelBuffers;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work executed by one worker.
pub trait Job: Send + Sync {
    /// Run on the calling worker with its scratch memory.
    fn run(&self, buffers: &mut KernelBuffers);

    /// Called instead of [`Job::run`] when the pool stops before the job started.
    fn abandon(&self);

    /// Called after [`Job::run`] panicked with `reason`.
    fn fail(&self, reason: &str);
}

struct Queue {
    jobs: VecDeque<Arc<dyn Job>>,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    live_buffers: AtomicUsize,
}

/// Scratch memory counted while alive.
struct WorkerBuffers {
    buffers: KernelBuffers,
    shared: Arc<Shared>,
}

impl Drop for WorkerBuffers {
    fn drop(&mut self) {
        self.shared.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `thread_count` workers, each with its own scratch memory.
    ///
    /// Fails without leaving any worker behind when a buffer or a thread
    /// cannot be created.
    pub fn new(thread_count: u32) -> Result<Self> {
        validate_thread_count(thread_count)?;
        let pool = Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    stopped: true,
                }),
                available: Condvar::new(),
                live_buffers: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        };
        let mut workers = pool.workers.lock();
        pool.launch(&mut workers, thread_count)?;
        drop(workers);
        Ok(pool)
    }

    /// Append a job to the queue and wake one idle worker.
    pub fn enqueue(&self, job: Arc<dyn Job>) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            return Err(Error::PoolStopped);
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop, drain and relaunch with `thread_count` workers.
    ///
    /// Callers must not resize while requests are outstanding: jobs still
    /// queued are abandoned. When the new workers cannot be created the pool
    /// is left stopped with no workers.
    pub fn set_thread_count(&self, thread_count: u32) -> Result<()> {
        validate_thread_count(thread_count)?;
        let mut workers = self.workers.lock();
        let abandoned = self.stop_and_join(&mut workers);
        tracing::debug!(thread_count, abandoned, "worker_pool_resizing");
        self.launch(&mut workers, thread_count)
    }

    /// Signal every worker to exit and wait for them.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        self.stop_and_join(&mut workers);
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Scratch-memory instances currently owned by workers.
    pub fn live_buffers(&self) -> usize {
        self.shared.live_buffers.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    fn launch(&self, workers: &mut Vec<JoinHandle<()>>, thread_count: u32) -> Result<()> {
        self.launch_with(workers, thread_count, || Ok(KernelBuffers::new()?))
    }

    /// Allocate every worker's buffers, then reopen the queue and spawn.
    ///
    /// The queue stays stopped when any allocation fails.
    fn launch_with(
        &self,
        workers: &mut Vec<JoinHandle<()>>,
        thread_count: u32,
        mut allocate: impl FnMut() -> Result<KernelBuffers>,
    ) -> Result<()> {
        let buffers = (0..thread_count)
            .map(|_| allocate().map(|buffers| self.track_buffers(buffers)))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|error| {
                tracing::error!(%error, thread_count, "worker_buffers_allocation_failed")
            })?;
        self.shared.queue.lock().stopped = false;

        for (index, buffers) in buffers.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("gna-worker-{index}"))
                .spawn(move || worker_loop(&shared, buffers, index));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    tracing::error!(%error, index, "worker_spawn_failed");
                    self.stop_and_join(workers);
                    return Err(Error::ResourceAllocation(format!(
                        "worker thread {index}: {error}"
                    )));
                }
            }
        }
        tracing::debug!(threads = workers.len(), "worker_pool_started");
        Ok(())
    }

    fn track_buffers(&self, buffers: KernelBuffers) -> WorkerBuffers {
        self.shared.live_buffers.fetch_add(1, Ordering::SeqCst);
        WorkerBuffers {
            buffers,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the number of abandoned jobs.
    fn stop_and_join(&self, workers: &mut Vec<JoinHandle<()>>) -> usize {
        let abandoned: Vec<_> = {
            let mut queue = self.shared.queue.lock();
            queue.stopped = true;
            queue.jobs.drain(..).collect()
        };
        self.shared.available.notify_all();

        if !abandoned.is_empty() {
            tracing::warn!(count = abandoned.len(), "queued_jobs_abandoned");
        }
        for job in &abandoned {
            job.abandon();
        }

        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker_panicked");
            }
        }
        abandoned.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut workers = self.workers.lock();
        self.stop_and_join(&mut workers);
    }
}

fn worker_loop(shared: &Shared, mut buffers: WorkerBuffers, index: usize) {
    tracing::debug!(worker = index, "worker_started");
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.stopped {
                    tracing::debug!(worker = index, "worker_stopped");
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                shared.available.wait(&mut queue);
            }
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&mut buffers.buffers)));
        if let Err(payload) = outcome {
            let reason = panic_reason(payload.as_ref());
            tracing::error!(worker = index, %reason, "job_panicked");
            job.fail(&reason);
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
