use super::panic_handler::PanicHandler;
use super::task::Task;
use super::worker::{self, WorkerId};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "telemetry")]
use crate::telemetry::{Metrics, MetricsSnapshot};

pub(crate) struct PoolState {
    /// Submissions in FIFO order, tagged with their generation. Canceled
    /// submissions stay here until a worker pops and discards them.
    pub(crate) pending: VecDeque<(Task, u64)>,
    /// Entries of `pending` that are still claimable.
    pub(crate) queued: usize,
    pub(crate) unfinished: usize,
    pub(crate) closing: bool,
    workers: Vec<JoinHandle<()>>,
    nthreads: usize,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<PoolState>,
    /// Signaled when a task is queued or the executor is closing.
    pub(crate) queue_cond: Condvar,
    /// Signaled when `unfinished` drops to zero.
    pub(crate) idle_cond: Condvar,
    pub(crate) panic_handler: PanicHandler,
    #[cfg(feature = "telemetry")]
    pub(crate) metrics: Metrics,
    max_threads: usize,
    thread_name_prefix: String,
    stack_size: Option<usize>,
}

/// Bounded pool of worker threads running [`Task`]s in FIFO order.
///
/// One worker is started up front; more are added lazily while outstanding
/// work exceeds the worker count, up to `max_threads`. Workers are never
/// retired before the executor is deleted.
///
/// Deleting the executor (explicitly with [`Executor::delete`] or by dropping
/// it) requires that no task is still queued: cancel or drain them first,
/// e.g. with [`Executor::wait_idle`].
pub struct Executor {
    shared: Arc<Shared>,
    deleted: bool,
}

impl Executor {
    pub fn new(max_threads: usize) -> Result<Self> {
        let config = ExecutorConfig::builder().max_threads(max_threads).build()?;
        Self::with_config(config)
    }

    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;

        let max_threads = config.worker_threads();
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                pending: VecDeque::new(),
                queued: 0,
                unfinished: 0,
                closing: false,
                workers: Vec::with_capacity(max_threads),
                nthreads: 0,
            }),
            queue_cond: Condvar::new(),
            idle_cond: Condvar::new(),
            panic_handler: PanicHandler::new(config.panic_strategy),
            #[cfg(feature = "telemetry")]
            metrics: Metrics::new(),
            max_threads,
            thread_name_prefix: config.thread_name_prefix,
            stack_size: config.stack_size,
        });

        // The first worker guarantees that submit never has to fail later.
        {
            let mut state = shared.state.lock();
            spawn_worker(&shared, &mut state).map_err(Error::Spawn)?;
        }

        tracing::debug!(max_threads, "executor created");

        Ok(Self {
            shared,
            deleted: false,
        })
    }

    /// Queue `task` for execution. Never blocks on running callbacks.
    ///
    /// # Panics
    ///
    /// If `task` is already queued on an executor.
    pub fn submit(&self, task: &Task) {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        let generation = task.mark_queued(self.key());
        state.pending.push_back((task.clone(), generation));
        state.queued += 1;
        state.unfinished += 1;

        #[cfg(feature = "telemetry")]
        shared.metrics.record_task_submitted();

        if state.unfinished > state.nthreads && state.nthreads < shared.max_threads {
            // Best effort: at least one worker already exists.
            if let Err(e) = spawn_worker(shared, &mut state) {
                tracing::warn!(
                    error = %e,
                    nthreads = state.nthreads,
                    "failed to grow executor, continuing with current workers"
                );
                #[cfg(feature = "telemetry")]
                shared.metrics.record_spawn_failure();
            }
        }

        shared.queue_cond.notify_one();
    }

    /// Wrap `f` in a new [`Task`], submit it and return the handle.
    pub fn execute<F>(&self, f: F) -> Task
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = Task::new(f);
        self.submit(&task);
        task
    }

    /// Remove `task` from the pending queue if no worker has claimed it yet.
    ///
    /// Returns `true` if the task was dequeued; its callback will then never
    /// run for this submission. Returns `false` without side effects if the
    /// task is running, finished, or not queued on this executor.
    ///
    /// Constant time: the queue entry is left in place and skipped by the
    /// worker that eventually pops it.
    pub fn cancel(&self, task: &Task) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        if !task.cancel(self.key()) {
            return false;
        }

        state.queued -= 1;
        state.unfinished -= 1;
        if state.unfinished == 0 {
            shared.idle_cond.notify_all();
        }

        #[cfg(feature = "telemetry")]
        shared.metrics.record_task_canceled();

        true
    }

    /// Block until every submitted task has either finished or been canceled.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.unfinished != 0 {
            self.shared.idle_cond.wait(&mut state);
        }
    }

    /// Like [`Executor::wait_idle`], giving up after `timeout`. Returns
    /// whether the executor became idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.unfinished != 0 {
            if self
                .shared
                .idle_cond
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.unfinished == 0;
            }
        }
        true
    }

    /// Stop and join every worker.
    ///
    /// # Panics
    ///
    /// If tasks are still queued.
    pub fn delete(mut self) {
        self.shutdown();
    }

    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Number of worker threads started so far.
    pub fn num_threads(&self) -> usize {
        self.shared.state.lock().nthreads
    }

    /// Tasks submitted but not yet finished or canceled.
    pub fn unfinished(&self) -> usize {
        self.shared.state.lock().unfinished
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queued
    }

    // Identifies this executor to the tasks queued on it.
    fn key(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    #[cfg(feature = "telemetry")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn shutdown(&mut self) {
        if self.deleted {
            return;
        }
        self.deleted = true;

        let workers = {
            let mut state = self.shared.state.lock();
            state.closing = true;
            self.shared.queue_cond.notify_all();

            // Workers still drain whatever is queued before they exit.
            let queued = state.queued;
            if queued != 0 {
                if !thread::panicking() {
                    drop(state);
                    panic!("executor deleted with {} task(s) still queued", queued);
                }
                tracing::error!(queued, "executor dropped during panic with queued tasks");
            }

            std::mem::take(&mut state.workers)
        };

        let me = thread::current().id();
        let count = workers.len();
        for handle in workers {
            // Dropped from inside one of our own callbacks: that worker exits
            // by itself once it sees `closing`.
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("executor worker terminated abnormally");
            }
        }

        tracing::debug!(workers = count, "executor deleted");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Executor")
            .field("max_threads", &self.shared.max_threads)
            .field("nthreads", &state.nthreads)
            .field("unfinished", &state.unfinished)
            .field("queued", &state.queued)
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> io::Result<()> {
    let id: WorkerId = state.nthreads;
    let name = format!("{}-{}", shared.thread_name_prefix, id);

    let mut builder = thread::Builder::new().name(name);
    if let Some(stack_size) = shared.stack_size {
        builder = builder.stack_size(stack_size);
    }

    let worker_shared = shared.clone();
    let handle = builder.spawn(move || worker::run(worker_shared, id))?;

    state.workers.push(handle);
    state.nthreads += 1;

    #[cfg(feature = "telemetry")]
    shared.metrics.record_thread_spawned();

    Ok(())
}
