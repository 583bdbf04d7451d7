//! Bounded worker pool.
//!
//! [`TaskExecutor`] runs at most `max_threads` units of work at a time. A
//! submission spawns a new worker thread while fewer than `max_threads` are
//! active; otherwise it waits in an unbounded FIFO queue. A worker that
//! finishes its unit takes the next queued one, and exits when the queue is
//! empty. No idle threads are kept.
//!
//! # Shutdown
//!
//! - [`TaskExecutor::shutdown`] rejects new submissions; running and queued
//!   units still complete.
//! - [`TaskExecutor::shutdown_now`] additionally interrupts running units
//!   (see [`interrupt`]) and hands back the queued ones without running them.
//! - [`TaskExecutor::await_termination`] blocks until no worker is left.

pub mod interrupt;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{TaskError, TaskFailure};
use crate::types::task::TaskId;

pub use interrupt::{current_interrupt, is_interrupted, sleep_interruptibly, Interrupt};

use interrupt::CurrentInterruptGuard;

/// One unit of work for the executor.
///
/// Jobs submitted on behalf of a task carry its id, so that the units handed
/// back by [`TaskExecutor::shutdown_now`] can be traced to their tasks.
pub struct Job {
    task_id: Option<TaskId>,
    body: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Wraps a closure.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            task_id: None,
            body: Box::new(body),
        }
    }

    /// Wraps a closure that runs the task `task_id`.
    pub fn for_task<F>(task_id: TaskId, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            task_id: Some(task_id),
            body: Box::new(body),
        }
    }

    /// The task this job runs, if it was created with [`Job::for_task`].
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Runs the job on the calling thread.
    pub fn run(self) {
        (self.body)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// Creates the OS threads workers run on.
pub trait ThreadFactory: Send + Sync {
    /// Starts `body` on a new thread.
    fn spawn(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// Spawns threads named `{prefix}-{n}` with `n` counting from 1.
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    counter: AtomicU64,
}

impl NamedThreadFactory {
    /// Creates a factory for the given name prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        thread::Builder::new()
            .name(format!("{}-{}", self.prefix, n))
            .spawn(body)
            .map(|_| ())
    }
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    /// Workers spawned and not yet exited.
    active: usize,
    /// Interrupt handles of units currently running, keyed by worker.
    running: HashMap<u64, Interrupt>,
    shutdown: bool,
    /// Set by `shutdown_now`; units starting afterwards begin interrupted.
    stopped: bool,
}

struct Pool {
    max_threads: usize,
    factory: Arc<dyn ThreadFactory>,
    state: Mutex<PoolState>,
    idle: Condvar,
    next_worker: AtomicU64,
}

/// A bounded pool of lazily spawned worker threads with a FIFO queue.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use background_tasks::executor::{Job, NamedThreadFactory, TaskExecutor};
///
/// let executor = TaskExecutor::new(2, Arc::new(NamedThreadFactory::new("doc"))).unwrap();
/// let done = Arc::new(AtomicUsize::new(0));
/// for _ in 0..5 {
///     let done = done.clone();
///     executor.submit(Job::new(move || {
///         done.fetch_add(1, Ordering::SeqCst);
///     })).unwrap();
/// }
/// executor.shutdown();
/// assert!(executor.await_termination(Duration::from_secs(5)));
/// assert_eq!(done.load(Ordering::SeqCst), 5);
/// assert!(executor.submit(Job::new(|| {})).is_err());
/// ```
pub struct TaskExecutor {
    pool: Arc<Pool>,
}

impl TaskExecutor {
    /// Creates an executor running at most `max_threads` units at a time.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidArgument`] if `max_threads` is zero.
    pub fn new(max_threads: usize, factory: Arc<dyn ThreadFactory>) -> Result<Self, TaskError> {
        if max_threads == 0 {
            return Err(TaskError::invalid_argument("max_threads must be positive"));
        }
        Ok(Self {
            pool: Arc::new(Pool {
                max_threads,
                factory,
                state: Mutex::new(PoolState::default()),
                idle: Condvar::new(),
                next_worker: AtomicU64::new(0),
            }),
        })
    }

    /// Maximum number of concurrently running units.
    pub fn max_threads(&self) -> usize {
        self.pool.max_threads
    }

    /// Runs `job` on a new worker if one is available, otherwise queues it.
    ///
    /// Never blocks on execution.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Rejected`] after shutdown, and
    /// [`TaskError::Spawn`] if the thread factory fails. In both cases the
    /// job is dropped without running.
    pub fn submit(&self, job: Job) -> Result<(), TaskError> {
        let mut state = self.pool.state.lock();
        if state.shutdown {
            return Err(TaskError::Rejected);
        }
        if state.active >= self.pool.max_threads {
            tracing::debug!(
                task_id = ?job.task_id(),
                queued = state.queue.len() + 1,
                "All workers busy, queueing job"
            );
            state.queue.push_back(job);
            return Ok(());
        }
        state.active += 1;
        drop(state);

        if let Err(err) = self.spawn_worker(Some(job)) {
            tracing::error!(error = %err, "Failed to spawn worker thread");
            self.release_failed_worker();
            return Err(TaskError::Spawn(err));
        }
        Ok(())
    }

    /// Starts a worker for a slot already counted in `active`. A worker
    /// without a first job starts on the queue.
    fn spawn_worker(&self, first: Option<Job>) -> io::Result<()> {
        let worker_id = self.pool.next_worker.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(&self.pool);
        tracing::debug!(
            worker_id,
            task_id = ?first.as_ref().and_then(Job::task_id),
            "Spawning worker"
        );
        self.pool
            .factory
            .spawn(Box::new(move || run_worker(pool, worker_id, first)))
    }

    /// Gives back the slot of a worker that never started.
    ///
    /// Jobs queued while the spawn was in flight counted on that worker, so a
    /// replacement is started for them. If that fails as well they wait for
    /// the next worker.
    fn release_failed_worker(&self) {
        let mut state = self.pool.state.lock();
        state.active -= 1;
        if !state.queue.is_empty() && state.active < self.pool.max_threads {
            state.active += 1;
            drop(state);
            match self.spawn_worker(None) {
                Ok(()) => {
                    tracing::debug!("Replacement worker started for queued jobs");
                    return;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to spawn replacement worker");
                    state = self.pool.state.lock();
                    state.active -= 1;
                }
            }
        }
        if state.active == 0 {
            self.pool.idle.notify_all();
        }
    }

    /// Stops accepting submissions. Running and queued units still complete.
    pub fn shutdown(&self) {
        let mut state = self.pool.state.lock();
        if !state.shutdown {
            tracing::info!(
                active = state.active,
                queued = state.queue.len(),
                "Executor shutting down"
            );
        }
        state.shutdown = true;
    }

    /// Stops accepting submissions, interrupts running units, and returns the
    /// queued units, in submission order, without running them.
    pub fn shutdown_now(&self) -> Vec<Job> {
        let mut state = self.pool.state.lock();
        state.shutdown = true;
        state.stopped = true;
        for interrupt in state.running.values() {
            interrupt.interrupt();
        }
        let drained: Vec<Job> = state.queue.drain(..).collect();
        tracing::info!(
            interrupted = state.running.len(),
            drained = drained.len(),
            "Executor shut down immediately"
        );
        drained
    }

    /// Blocks until no worker is active, or `timeout` elapses.
    ///
    /// Returns whether the pool was idle when the wait ended. A zero timeout
    /// checks without blocking. Waiting never cancels anything.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let mut state = self.pool.state.lock();
        if state.active > 0 && !timeout.is_zero() {
            self.pool
                .idle
                .wait_while_for(&mut state, |s| s.active > 0, timeout);
        }
        state.active == 0
    }

    /// Whether [`shutdown`](Self::shutdown) or
    /// [`shutdown_now`](Self::shutdown_now) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.pool.state.lock().shutdown
    }

    /// Whether the executor is shut down and every worker has exited.
    pub fn is_terminated(&self) -> bool {
        let state = self.pool.state.lock();
        state.shutdown && state.active == 0 && state.queue.is_empty()
    }

    /// Number of live worker threads.
    pub fn active_count(&self) -> usize {
        self.pool.state.lock().active
    }

    /// Number of units waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.pool.state.lock().queue.len()
    }
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.pool.state.lock();
        f.debug_struct("TaskExecutor")
            .field("max_threads", &self.pool.max_threads)
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn run_worker(pool: Arc<Pool>, worker_id: u64, first: Option<Job>) {
    let mut next = first;
    loop {
        let job = match next.take() {
            Some(job) => job,
            None => {
                let mut state = pool.state.lock();
                match state.queue.pop_front() {
                    Some(job) => job,
                    None => {
                        state.active -= 1;
                        if state.active == 0 {
                            pool.idle.notify_all();
                        }
                        break;
                    }
                }
            }
        };

        let interrupt = Interrupt::new();
        {
            let mut state = pool.state.lock();
            if state.stopped {
                interrupt.interrupt();
            }
            state.running.insert(worker_id, interrupt.clone());
        }

        let task_id = job.task_id();
        {
            let _current = CurrentInterruptGuard::install(interrupt);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                let failure = TaskFailure::from_panic(payload.as_ref());
                tracing::error!(worker_id, task_id = ?task_id, %failure, "Job panicked");
            }
        }

        let mut state = pool.state.lock();
        state.running.remove(&worker_id);
        next = state.queue.pop_front();
        if next.is_none() {
            state.active -= 1;
            if state.active == 0 {
                pool.idle.notify_all();
            }
            break;
        }
    }
    tracing::debug!(worker_id, "Worker exiting, queue empty");
}
