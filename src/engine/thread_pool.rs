//! Worker pool used when no engine is supplied
//!
//! Each pool owns a small tokio runtime whose blocking threads run the jobs,
//! driven through a [`TokioEngine`] on that runtime's handle. Dropping the
//! pool shuts the runtime down in the background: queued jobs are dropped and
//! running ones finish on their own, so an abandoned pipeline never waits.

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::{Engine, EngineError, Job, TokioEngine};
use crate::ConfigError;

/// A fixed-width pool of named blocking threads on a private runtime
pub struct ThreadPool {
    name: String,
    size: usize,
    engine: TokioEngine,
    runtime: Mutex<Option<Runtime>>,
}

impl ThreadPool {
    /// Start a pool running at most `size` jobs at once
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        Self::with_name("fluentmap", size)
    }

    /// Start a pool whose threads are named `{name}-worker`
    pub fn with_name(name: impl Into<String>, size: usize) -> Result<Self, ConfigError> {
        let name = name.into();
        if size == 0 {
            return Err(ConfigError::ZeroWorkers(name));
        }

        // One async worker only moves jobs onto the blocking threads.
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(size)
            .thread_name(format!("{}-worker", name))
            .build()
            .map_err(EngineError::from)?;
        let engine = TokioEngine::with_handle(runtime.handle().clone(), size)?;

        debug!(pool = %name, size = size, "Thread pool started");
        Ok(Self {
            name,
            size,
            engine,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Maximum number of jobs running at the same time
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs currently running
    pub fn running(&self) -> usize {
        self.engine.running()
    }

    /// Stop accepting jobs and release the runtime without waiting
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            self.engine.shutdown();
            runtime.shutdown_background();
            debug!(pool = %self.name, "Thread pool shut down");
        }
    }
}

impl Engine for ThreadPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, job: Job) -> Result<(), EngineError> {
        if self.runtime.lock().is_none() {
            return Err(EngineError::ShutDown(self.name.clone()));
        }
        self.engine.submit(job)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Blocking shutdown would panic when dropped from async code.
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("open", &self.runtime.lock().is_some())
            .finish()
    }
}
