//! Task execution infrastructure.
//!
//! [`Executor`] is a bounded, demand-grown pool of worker threads consuming a
//! FIFO queue of [`Task`]s. Callbacks run outside the pool lock, so
//! submitting, canceling and waiting only ever contend with each other.

pub mod panic_handler;
pub mod pool;
pub mod task;
mod worker;

pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
pub use pool::Executor;
pub use task::{Task, TaskId, TaskState};
