pub use crate::config::{ConfigBuilder, ExecutorConfig};
pub use crate::error::{Error, Result};
pub use crate::executor::{Executor, PanicStrategy, Task, TaskState};
pub use crate::interrupt::{Interrupt, Interrupted, Semaphore};
pub use crate::queue::Queue;

#[cfg(feature = "telemetry")]
pub use crate::telemetry::MetricsSnapshot;
