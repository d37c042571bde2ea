//! Cooperative interruption of blocking calls.
//!
//! An [`Interrupt`] is a cancellation token that a thread binds to itself
//! with [`set`]. The interruptible primitives in this module ([`sem_wait`],
//! [`wait_until`], [`poll`], [`read`], ...) behave like their ordinary
//! counterparts but also watch the calling thread's bound context: when
//! another thread calls [`Interrupt::raise`] while the call is blocked, it
//! returns early with an "interrupted" status.
//!
//! Delivery is one-shot. A raise only reaches a waiter that is registered at
//! that moment (an interruptible call in progress, a callback installed with
//! [`register`], or an active [`Forward`]); with nobody listening it is
//! dropped. [`Interrupt::kill`] is the permanent variant: once killed, every
//! interruptible call on that context reports "interrupted" straight away and
//! [`killed`] returns `true`.
//!
//! ```no_run
//! use std::time::Duration;
//! use threadcore::interrupt::{self, Interrupt};
//!
//! let ctx = Interrupt::new();
//! let remote = ctx.clone();
//!
//! let worker = std::thread::spawn(move || {
//!     interrupt::set(Some(ctx));
//!     // Returns Err(Interrupted) as soon as `remote.raise()` lands.
//!     let res = interrupt::sleep(Duration::from_secs(60));
//!     interrupt::set(None);
//!     res
//! });
//!
//! std::thread::sleep(Duration::from_millis(10));
//! remote.raise();
//! # let _ = worker.join();
//! ```

mod wait;

#[cfg(unix)]
mod io;

pub use wait::{sem_wait, sem_wait_until, sleep, wait_until, Semaphore};

#[cfg(unix)]
pub use io::{
    accept, poll, read, readv, recv, recv_from, recvmsg, send, send_to, sendmsg, write, writev,
};

use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type WakeFn = Box<dyn Fn() + Send + Sync + 'static>;

/// Status returned by interruptible waits that were cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation interrupted")]
pub struct Interrupted;

impl From<Interrupted> for std::io::Error {
    fn from(_: Interrupted) -> Self {
        std::io::Error::from(std::io::ErrorKind::Interrupted)
    }
}

struct Inner {
    // Wake callback of whoever currently listens on this context. Invoked
    // with this lock held, so it must never lock the same context again.
    waker: Mutex<Option<WakeFn>>,
    // Set by raise() while a waker is registered, consumed by finish().
    pending: AtomicBool,
    killed: AtomicBool,
    attached: AtomicBool,
}

/// Interruption context. Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                waker: Mutex::new(None),
                pending: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                attached: AtomicBool::new(false),
            }),
        }
    }

    /// Interrupt the call currently blocked on this context, if any.
    pub fn raise(&self) {
        let waker = self.inner.waker.lock();
        if let Some(wake) = waker.as_ref() {
            self.inner.pending.store(true, Ordering::Release);
            wake();
        }
    }

    /// Mark the context as dead for good and interrupt any blocked call.
    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::Release);
        tracing::trace!("interrupt context killed");
        self.raise();
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }

    /// Whether the context is currently bound to some thread.
    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Interrupt) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn prepare(&self, wake: WakeFn) {
        let mut waker = self.inner.waker.lock();
        debug_assert!(
            waker.is_none(),
            "an interrupt waiter is already registered on this context"
        );
        self.inner.pending.store(false, Ordering::Release);
        if self.is_killed() {
            self.inner.pending.store(true, Ordering::Release);
            wake();
        }
        *waker = Some(wake);
    }

    fn finish(&self) -> bool {
        let mut waker = self.inner.waker.lock();
        debug_assert!(waker.is_some(), "no interrupt waiter registered");
        *waker = None;
        self.inner.pending.swap(false, Ordering::AcqRel)
    }

    fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("killed", &self.is_killed())
            .field("attached", &self.is_attached())
            .finish()
    }
}

// Thread slot holding the bound context; detaches it on thread exit.
struct Binding(Option<Interrupt>);

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(ctx) = self.0.take() {
            ctx.inner.attached.store(false, Ordering::Release);
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Binding> = RefCell::new(Binding(None));
    static FORWARD_DEPTH: Cell<usize> = Cell::new(0);
}

/// Bind `ctx` to the calling thread and return the previously bound context.
///
/// A context may be bound to one thread at a time.
pub fn set(ctx: Option<Interrupt>) -> Option<Interrupt> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();

        if let (Some(old), Some(new)) = (slot.0.as_ref(), ctx.as_ref()) {
            if old.ptr_eq(new) {
                return ctx;
            }
        }

        if let Some(new) = ctx.as_ref() {
            let was_attached = new.inner.attached.swap(true, Ordering::AcqRel);
            debug_assert!(
                !was_attached,
                "interrupt context is already bound to another thread"
            );
        }

        let previous = std::mem::replace(&mut slot.0, ctx);
        if let Some(old) = previous.as_ref() {
            old.inner.attached.store(false, Ordering::Release);
        }
        previous
    })
}

/// The context bound to the calling thread, if any.
pub fn current() -> Option<Interrupt> {
    CURRENT.with(|slot| slot.borrow().0.clone())
}

/// Whether the calling thread's context has been killed.
pub fn killed() -> bool {
    CURRENT.with(|slot| slot.borrow().0.as_ref().map_or(false, Interrupt::is_killed))
}

/// Install `callback` to be invoked when the calling thread's context is
/// raised, for blocking calls outside the built-in primitives.
///
/// Must be paired with [`unregister`] before registering another callback or
/// before the thread exits. The callback runs on the raising thread with the
/// context lock held; it must not raise or kill the same context. Does
/// nothing when no context is bound.
pub fn register<F>(callback: F)
where
    F: Fn() + Send + Sync + 'static,
{
    if let Some(ctx) = current() {
        ctx.prepare(Box::new(callback));
    }
}

/// Remove the callback installed by [`register`]. Returns `true` if the
/// context was raised while the callback was installed.
pub fn unregister() -> bool {
    current().map_or(false, |ctx| ctx.finish())
}

/// Redirects raises aimed at the calling thread's context to another one.
///
/// Created by [`forward_start`]; call [`Forward::stop`] (or drop it) before
/// making any other interruptible call on this thread.
pub struct Forward {
    from: Option<Interrupt>,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

/// Start forwarding raises on the calling thread's context to `to`.
///
/// Used when blocking on behalf of another logical owner: the other owner's
/// context gets interrupted whenever ours is. If our context is killed, `to`
/// is killed instead of raised.
pub fn forward_start(to: &Interrupt) -> Forward {
    let from = current();

    if let Some(from_ctx) = from.as_ref() {
        debug_assert!(!from_ctx.ptr_eq(to), "cannot forward a context to itself");

        let source: Weak<Inner> = Arc::downgrade(&from_ctx.inner);
        let target = to.clone();
        from_ctx.prepare(Box::new(move || {
            let source_killed = source
                .upgrade()
                .map_or(false, |inner| inner.killed.load(Ordering::Acquire));
            if source_killed {
                target.kill();
            } else {
                target.raise();
            }
        }));
    }

    FORWARD_DEPTH.with(|depth| depth.set(depth.get() + 1));

    Forward {
        from,
        active: true,
        _not_send: PhantomData,
    }
}

impl Forward {
    /// Stop forwarding. Returns `true` if our context was raised meanwhile.
    pub fn stop(mut self) -> bool {
        self.finish()
    }

    fn finish(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        FORWARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        self.from.take().map_or(false, |ctx| ctx.finish())
    }
}

impl Drop for Forward {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forward")
            .field("from", &self.from)
            .field("active", &self.active)
            .finish()
    }
}

/// Registration of an interruptible call on the thread's bound context.
/// Unregisters on drop.
pub(crate) struct Armed {
    ctx: Option<Interrupt>,
}

impl Armed {
    pub(crate) fn arm<F>(ctx: Option<Interrupt>, wake: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        debug_assert_eq!(
            FORWARD_DEPTH.with(Cell::get),
            0,
            "interruptible call while interrupt forwarding is active"
        );

        if let Some(ctx) = ctx.as_ref() {
            ctx.prepare(Box::new(wake));
        }
        Self { ctx }
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.ctx.as_ref().map_or(false, Interrupt::is_pending)
    }

    pub(crate) fn disarm(mut self) -> bool {
        self.ctx.take().map_or(false, |ctx| ctx.finish())
    }
}

impl Drop for Armed {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.finish();
        }
    }
}
