use std::panic::{catch_unwind, AssertUnwindSafe};

/// What a worker does when a task callback panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicStrategy {
    /// Abort the process.
    Abort,
    /// Swallow the panic silently; the worker keeps going.
    Isolate,
    /// Log the panic and keep going.
    #[default]
    LogAndContinue,
}

#[derive(Debug)]
pub struct PanicHandler {
    strategy: PanicStrategy,
}

impl PanicHandler {
    pub fn new(strategy: PanicStrategy) -> Self {
        Self { strategy }
    }

    pub fn execute<F, R>(&self, f: F) -> Result<R, PanicInfo>
    where
        F: FnOnce() -> R,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => Ok(result),
            Err(payload) => {
                let info = PanicInfo::from_payload(payload);

                match self.strategy {
                    PanicStrategy::Abort => {
                        tracing::error!(message = %info.message, "task panicked, aborting");
                        std::process::abort();
                    }
                    PanicStrategy::Isolate => {}
                    PanicStrategy::LogAndContinue => {
                        tracing::error!(message = %info.message, "task panicked");
                    }
                }

                Err(info)
            }
        }
    }

}

#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
}

impl PanicInfo {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        Self { message }
    }
}
