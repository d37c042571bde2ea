use crate::error::{Error, Result};
use crate::executor::PanicStrategy;

/// Upper bound accepted for `max_threads`.
pub const MAX_THREADS_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of worker threads; `None` means one per logical CPU.
    pub max_threads: Option<usize>,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    pub panic_strategy: PanicStrategy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "threadcore-worker".to_string(),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.max_threads {
            if n == 0 {
                return Err(Error::config("max_threads must be > 0"));
            }
            if n > MAX_THREADS_LIMIT {
                return Err(Error::config(format!(
                    "max_threads too large (max {})",
                    MAX_THREADS_LIMIT
                )));
            }
        }

        if let Some(size) = self.stack_size {
            if size == 0 {
                return Err(Error::config("stack_size must be > 0"));
            }
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.max_threads
            .unwrap_or_else(num_cpus::get)
            .clamp(1, MAX_THREADS_LIMIT)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ExecutorConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
        }
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = Some(n);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
