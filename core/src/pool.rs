//! Executors that run dispatched request tasks.
//!
//! # Design
//! `ThreadPool` is a cached pool: a job goes to an idle worker if one is
//! waiting, otherwise a new worker is spawned (up to an optional cap). Jobs
//! travel over a crossbeam channel. A worker that sits idle for the keep-alive
//! period reclaims itself, so a quiet client holds no threads.
//!
//! The idle count is claimed by submitters with a CAS before sending, and by
//! timed-out workers before exiting. An exiting worker gives up its slot
//! before a last look at the queue, and a submitter that sees no workers
//! after sending spawns one, so a job is never left queued with every worker
//! gone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{trace, warn};

use crate::config::ClientOptions;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs, usually on some other thread.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs every job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

struct PoolState {
    name: String,
    keep_alive: Duration,
    max_workers: Option<usize>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    spawned: AtomicUsize,
}

impl PoolState {
    fn claim_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn reserve_worker(&self) -> bool {
        let max = self.max_workers;
        self.workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .is_ok()
    }
}

/// A growable worker pool with idle reclamation.
pub struct ThreadPool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    state: Arc<PoolState>,
}

impl ThreadPool {
    pub fn new(keep_alive: Duration, max_workers: Option<usize>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            state: Arc::new(PoolState {
                name: "async-http-worker".to_string(),
                keep_alive,
                max_workers: max_workers.map(|n| n.max(1)),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    /// Unbounded workers, reclaimed after 60 idle seconds.
    pub fn cached() -> Self {
        Self::new(DEFAULT_KEEP_ALIVE, None)
    }

    /// At most `max_workers` threads. Extra jobs queue.
    pub fn bounded(max_workers: usize) -> Self {
        Self::new(DEFAULT_KEEP_ALIVE, Some(max_workers))
    }

    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(options.pool_keep_alive(), options.max_workers)
    }

    /// Live worker threads.
    pub fn worker_count(&self) -> usize {
        self.state.workers.load(Ordering::SeqCst)
    }

    /// Workers waiting for a job.
    pub fn idle_count(&self) -> usize {
        self.state.idle.load(Ordering::SeqCst)
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    fn spawn_worker(&self) -> bool {
        if !self.state.reserve_worker() {
            return true;
        }
        let index = self.state.spawned.fetch_add(1, Ordering::Relaxed);
        let receiver = self.receiver.clone();
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(format!("{}-{index}", self.state.name))
            .spawn(move || worker_loop(receiver, state));
        match spawned {
            Ok(_) => {
                trace!(worker = index, "worker spawned");
                true
            }
            Err(e) => {
                self.state.workers.fetch_sub(1, Ordering::SeqCst);
                warn!(error = %e, "failed to spawn worker");
                self.worker_count() > 0
            }
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::cached()
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        if !self.state.claim_idle() && !self.spawn_worker() {
            warn!("no worker available; running job inline");
            job();
            return;
        }
        // The pool holds a receiver, so the channel cannot be disconnected.
        if let Err(rejected) = self.sender.send(job) {
            (rejected.into_inner())();
            return;
        }
        if self.worker_count() == 0 {
            self.spawn_worker();
        }
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!("job panicked; worker continues");
    }
}

fn worker_loop(receiver: Receiver<Job>, state: Arc<PoolState>) {
    loop {
        match receiver.recv_timeout(state.keep_alive) {
            Ok(job) => {
                run_job(job);
                state.idle.fetch_add(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !state.claim_idle() {
                    continue;
                }
                state.workers.fetch_sub(1, Ordering::SeqCst);
                match receiver.try_recv() {
                    Ok(job) => {
                        state.workers.fetch_add(1, Ordering::SeqCst);
                        run_job(job);
                        state.idle.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        trace!("idle worker reclaimed");
                        return;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                state.workers.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}
