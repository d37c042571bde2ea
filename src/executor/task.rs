//! Task representation and lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Where a task is in its lifecycle.
///
/// Every submission of a task gets a new generation. Claiming, finishing and
/// canceling only apply to the generation they were issued for, so a run that
/// ends after the task was queued again cannot mark the newer submission done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Never submitted.
    Created = 0,
    /// Waiting in an executor's pending queue.
    Queued = 1,
    /// Taken by a worker; the callback is running or about to.
    Claimed = 2,
    /// The callback returned (or panicked).
    Done = 3,
    /// Removed from the pending queue before any worker claimed it.
    Canceled = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Queued,
            2 => TaskState::Claimed,
            3 => TaskState::Done,
            _ => TaskState::Canceled,
        }
    }
}

// Low byte: TaskState. Remaining bits: submission generation.
const STATE_BITS: u32 = 8;
const STATE_MASK: u64 = 0xff;

fn pack(generation: u64, state: TaskState) -> u64 {
    (generation << STATE_BITS) | state as u64
}

fn state_of(word: u64) -> TaskState {
    TaskState::from_u8((word & STATE_MASK) as u8)
}

fn generation_of(word: u64) -> u64 {
    word >> STATE_BITS
}

struct TaskInner {
    id: TaskId,
    func: Box<dyn Fn() + Send + Sync + 'static>,
    word: AtomicU64,
    // Key of the executor holding the current submission. Only written by
    // `mark_queued`, so it is stable while the task is queued.
    owner: AtomicUsize,
}

/// A unit of work for an [`Executor`](super::Executor).
///
/// The handle is cheap to clone; the submitter keeps one to cancel the task
/// or inspect its state. A task that is not currently queued may be
/// submitted again, to the same executor or another one.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                func: Box::new(f),
                word: AtomicU64::new(pack(0, TaskState::Created)),
                owner: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn state(&self) -> TaskState {
        state_of(self.inner.word.load(Ordering::Acquire))
    }

    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a new submission on the executor identified by `owner` and
    /// return its generation.
    ///
    /// # Panics
    ///
    /// If the task is already queued.
    pub(crate) fn mark_queued(&self, owner: usize) -> u64 {
        let mut current = self.inner.word.load(Ordering::Acquire);
        loop {
            assert!(
                state_of(current) != TaskState::Queued,
                "{} submitted while already queued",
                self.id()
            );
            let generation = generation_of(current) + 1;
            self.inner.owner.store(owner, Ordering::Release);
            match self.inner.word.compare_exchange_weak(
                current,
                pack(generation, TaskState::Queued),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return generation,
                Err(actual) => current = actual,
            }
        }
    }

    /// Queued -> Claimed. Fails for a stale queue entry, i.e. one whose
    /// submission was canceled or superseded.
    pub(crate) fn claim(&self, generation: u64) -> bool {
        self.transition(generation, TaskState::Queued, TaskState::Claimed)
    }

    /// Claimed -> Done, unless the task was submitted again meanwhile.
    pub(crate) fn finish(&self, generation: u64) {
        self.transition(generation, TaskState::Claimed, TaskState::Done);
    }

    /// Queued -> Canceled, if the current submission belongs to `owner`.
    pub(crate) fn cancel(&self, owner: usize) -> bool {
        let current = self.inner.word.load(Ordering::Acquire);
        if state_of(current) != TaskState::Queued
            || self.inner.owner.load(Ordering::Acquire) != owner
        {
            return false;
        }
        self.transition(generation_of(current), TaskState::Queued, TaskState::Canceled)
    }

    fn transition(&self, generation: u64, from: TaskState, to: TaskState) -> bool {
        self.inner
            .word
            .compare_exchange(
                pack(generation, from),
                pack(generation, to),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn run(&self) {
        (self.inner.func)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
