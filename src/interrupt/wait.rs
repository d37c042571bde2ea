//! Interruptible semaphore and timed waits.

use super::{current, Armed, Interrupted};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct SemInner {
    count: Mutex<u32>,
    cond: Condvar,
}

impl SemInner {
    fn wake_all(&self) {
        let _count = self.count.lock();
        self.cond.notify_all();
    }
}

/// Counting semaphore. Clones share the same counter.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemInner>,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            inner: Arc::new(SemInner {
                count: Mutex::new(initial),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn post(&self) {
        let mut count = self.inner.count.lock();
        *count = count.saturating_add(1);
        self.inner.cond.notify_one();
    }

    /// Uninterruptible wait.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count == 0 {
            self.inner.cond.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn try_wait(&self) -> bool {
        let mut count = self.inner.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn value(&self) -> u32 {
        *self.inner.count.lock()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore").field("value", &self.value()).finish()
    }
}

/// Wait on `sem`, or until the thread's context is raised.
pub fn sem_wait(sem: &Semaphore) -> Result<(), Interrupted> {
    sem_wait_inner(sem, None).map(|_| ())
}

/// Wait on `sem` until `deadline`. `Ok(false)` means the deadline passed.
pub fn sem_wait_until(sem: &Semaphore, deadline: Instant) -> Result<bool, Interrupted> {
    sem_wait_inner(sem, Some(deadline))
}

fn sem_wait_inner(sem: &Semaphore, deadline: Option<Instant>) -> Result<bool, Interrupted> {
    let waker = sem.inner.clone();
    let armed = Armed::arm(current(), move || waker.wake_all());

    let outcome = {
        let mut count = sem.inner.count.lock();
        loop {
            if armed.is_raised() {
                break Err(Interrupted);
            }
            if *count > 0 {
                *count -= 1;
                break Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if sem.inner.cond.wait_until(&mut count, deadline).timed_out() && *count == 0 {
                        if armed.is_raised() {
                            break Err(Interrupted);
                        }
                        break Ok(false);
                    }
                }
                None => sem.inner.cond.wait(&mut count),
            }
        }
    };

    // A raise landing after the token was taken is dropped.
    armed.disarm();
    outcome
}

struct Sleeper {
    lock: Mutex<()>,
    cond: Condvar,
}

/// Block until `deadline`, or until the thread's context is raised.
pub fn wait_until(deadline: Instant) -> Result<(), Interrupted> {
    let sleeper = Arc::new(Sleeper {
        lock: Mutex::new(()),
        cond: Condvar::new(),
    });
    let waker = sleeper.clone();
    let armed = Armed::arm(current(), move || {
        let _guard = waker.lock.lock();
        waker.cond.notify_all();
    });

    let outcome = {
        let mut guard = sleeper.lock.lock();
        loop {
            if armed.is_raised() {
                break Err(Interrupted);
            }
            if Instant::now() >= deadline {
                break Ok(());
            }
            sleeper.cond.wait_until(&mut guard, deadline);
        }
    };

    armed.disarm();
    outcome
}

/// Interruptible sleep.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    wait_until(Instant::now() + duration)
}
