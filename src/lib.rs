//! threadcore - concurrency core for media pipelines
//!
//! Three independent building blocks that the rest of a playback stack
//! (demuxers, decoders, preparsers, network inputs) is wired together with:
//!
//! - [`Executor`]: a bounded thread pool that grows on demand, runs tasks in
//!   FIFO order and lets callers cancel work that has not started yet.
//! - [`Queue`]: a thread-safe FIFO with an exposed lock and condition, and a
//!   "killable" mode for clean end-of-stream signalling.
//! - [`Interrupt`]: a per-thread cancellation token that wakes blocking waits
//!   and descriptor I/O from another thread.
//!
//! There is no global pool: every executor and queue is created and owned
//! explicitly.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use threadcore::prelude::*;
//!
//! let pool = Executor::new(4).unwrap();
//! let done = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..16 {
//!     let done = done.clone();
//!     pool.execute(move || {
//!         done.fetch_add(1, Ordering::Relaxed);
//!     });
//! }
//!
//! pool.wait_idle();
//! assert_eq!(done.load(Ordering::Relaxed), 16);
//! pool.delete();
//! ```

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod prelude;
pub mod queue;
pub mod telemetry;

// Re-export key types at crate root
pub use config::{ConfigBuilder, ExecutorConfig};
pub use error::{Error, Result};
pub use executor::{Executor, PanicStrategy, Task, TaskId, TaskState};
pub use interrupt::{Interrupt, Interrupted};
pub use queue::{Queue, QueueGuard};
