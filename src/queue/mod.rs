//! Thread-safe FIFO queue.
//!
//! [`Queue`] owns its entries from enqueue until dequeue, at which point
//! ownership moves to the caller. The lock and the "non-empty" condition are
//! exposed through [`Queue::lock`] so that callers can fold queue state into
//! wider critical sections: every operation on [`QueueGuard`] assumes the
//! lock is already held.
//!
//! A queue doubles as a killable queue: once [`Queue::kill`] has been called,
//! [`Queue::dequeue_killable`] drains what is left and then reports `None`
//! forever instead of blocking.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    killed: bool,
}

pub struct Queue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                killed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Lock the queue. The lock is released when the guard is dropped.
    pub fn lock(&self) -> QueueGuard<'_, T> {
        QueueGuard {
            state: self.state.lock(),
            cond: &self.cond,
        }
    }

    pub fn enqueue(&self, item: T) {
        self.lock().enqueue(item);
    }

    /// Append a whole chain of entries under a single lock acquisition.
    pub fn enqueue_all<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.lock().enqueue_all(items);
    }

    /// Remove the oldest entry, blocking while the queue is empty.
    pub fn dequeue(&self) -> T {
        let mut guard = self.lock();
        loop {
            if let Some(item) = guard.dequeue() {
                return item;
            }
            guard.wait();
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().dequeue()
    }

    /// Like [`Queue::dequeue`] but gives up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(item) = guard.dequeue() {
                return Some(item);
            }
            if !guard.wait_until(deadline) {
                return guard.dequeue();
            }
        }
    }

    /// Detach every queued entry at once.
    pub fn dequeue_all(&self) -> VecDeque<T> {
        self.lock().dequeue_all()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Set the tombstone: no further entries are expected. Wakes all waiters.
    pub fn kill(&self) {
        let mut guard = self.lock();
        guard.state.killed = true;
        guard.cond.notify_all();
    }

    pub fn is_killed(&self) -> bool {
        self.lock().is_killed()
    }

    /// Dequeue for consumers of a killable queue.
    ///
    /// Blocks while the queue is empty and alive. Once killed, returns the
    /// remaining entries in order and then `None` without ever blocking again.
    pub fn dequeue_killable(&self) -> Option<T> {
        let mut guard = self.lock();
        loop {
            if let Some(item) = guard.dequeue() {
                return Some(item);
            }
            if guard.is_killed() {
                return None;
            }
            guard.wait();
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.lock();
        f.debug_struct("Queue")
            .field("len", &guard.len())
            .field("killed", &guard.is_killed())
            .finish()
    }
}

/// Locked view of a [`Queue`].
pub struct QueueGuard<'a, T> {
    state: MutexGuard<'a, QueueState<T>>,
    cond: &'a Condvar,
}

impl<'a, T> QueueGuard<'a, T> {
    pub fn enqueue(&mut self, item: T) {
        self.state.items.push_back(item);
        self.cond.notify_one();
    }

    pub fn enqueue_all<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        let before = self.state.items.len();
        self.state.items.extend(items);
        match self.state.items.len() - before {
            0 => {}
            1 => {
                self.cond.notify_one();
            }
            _ => {
                self.cond.notify_all();
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.state.items.pop_front()
    }

    pub fn dequeue_all(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.state.items)
    }

    pub fn is_empty(&self) -> bool {
        self.state.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.items.len()
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed
    }

    /// Wake one thread blocked in [`QueueGuard::wait`].
    pub fn signal(&self) {
        self.cond.notify_one();
    }

    /// Wake every thread blocked in [`QueueGuard::wait`].
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }

    /// Atomically release the lock and wait for a signal. Spurious wakeups
    /// are possible; callers re-check their condition.
    pub fn wait(&mut self) {
        self.cond.wait(&mut self.state);
    }

    /// Returns `false` if the deadline passed without a signal.
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        !self.cond.wait_until(&mut self.state, deadline).timed_out()
    }
}

impl<'a, T> fmt::Debug for QueueGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueGuard")
            .field("len", &self.len())
            .field("killed", &self.is_killed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = Queue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue(), Some(1));
        assert_eq!(queue.try_dequeue(), Some(2));
        assert_eq!(queue.try_dequeue(), Some(3));
        assert_eq!(queue.try_dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_chain() {
        let queue = Queue::new();
        queue.enqueue(0);
        queue.enqueue_all(vec![1, 2, 3]);
        queue.enqueue_all(Vec::new());

        let all: Vec<i32> = queue.dequeue_all().into_iter().collect();
        assert_eq!(all, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
        assert!(queue.dequeue_all().is_empty());
    }

    #[test]
    fn test_blocking_dequeue_wakes() {
        let queue = Arc::new(Queue::new());

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.enqueue("block");

        assert_eq!(consumer.join().unwrap(), "block");
    }

    #[test]
    fn test_dequeue_timeout_on_empty() {
        let queue: Queue<u8> = Queue::new();
        let start = Instant::now();
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_killable_drains_then_reports_empty() {
        let queue = Queue::new();
        queue.enqueue_all(vec!['a', 'b']);
        queue.kill();

        assert!(queue.is_killed());
        assert_eq!(queue.dequeue_killable(), Some('a'));
        assert_eq!(queue.dequeue_killable(), Some('b'));
        assert_eq!(queue.dequeue_killable(), None);
        assert_eq!(queue.dequeue_killable(), None);
    }

    #[test]
    fn test_kill_wakes_blocked_consumer() {
        let queue: Arc<Queue<u32>> = Arc::new(Queue::new());

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = queue.dequeue_killable() {
                    seen.push(v);
                }
                seen
            })
        };

        for i in 0..10 {
            queue.enqueue(i);
        }
        queue.kill();

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_guard_combines_external_condition() {
        // A consumer that waits for either an entry or an out-of-band stop
        // request, both observed under the queue lock.
        let queue: Arc<Queue<u32>> = Arc::new(Queue::new());
        let stop = Arc::new(AtomicBool::new(false));

        let consumer = {
            let queue = queue.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut guard = queue.lock();
                loop {
                    if let Some(v) = guard.dequeue() {
                        return Some(v);
                    }
                    if stop.load(Ordering::Acquire) {
                        return None;
                    }
                    guard.wait();
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        {
            let guard = queue.lock();
            stop.store(true, Ordering::Release);
            guard.broadcast();
        }

        assert_eq!(consumer.join().unwrap(), None);
    }
}
