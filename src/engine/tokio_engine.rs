//! Engine backed by a tokio runtime's blocking thread pool
//!
//! Each job runs through `spawn_blocking`; a semaphore caps how many run at
//! once, the same way the batch executors limit concurrent jobs.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use super::{Engine, EngineError, Job};
use crate::ConfigError;

/// Runs jobs on a tokio runtime with a bounded number of concurrent workers
#[derive(Debug, Clone)]
pub struct TokioEngine {
    handle: Handle,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl TokioEngine {
    /// Create an engine on the current runtime with one worker per CPU
    pub fn new() -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|e| EngineError::NoRuntime(e.to_string()))?;
        Self::with_handle(handle, num_cpus::get())
    }

    /// Create an engine on an explicit runtime handle
    ///
    /// The handle lets synchronous callers outside the runtime drive the
    /// pipeline while jobs still run on the runtime's threads.
    pub fn with_handle(handle: Handle, max_workers: usize) -> Result<Self, ConfigError> {
        if max_workers == 0 {
            return Err(ConfigError::ZeroWorkers("tokio".to_string()));
        }

        Ok(Self {
            handle,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        })
    }

    /// Replace the worker limit, keeping the runtime
    pub fn with_max_workers(self, max_workers: usize) -> Result<Self, ConfigError> {
        Self::with_handle(self.handle, max_workers)
    }

    /// Maximum number of jobs running at the same time
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of jobs currently running
    pub fn running(&self) -> usize {
        self.max_workers - self.semaphore.available_permits()
    }

    /// Stop accepting jobs; jobs waiting for a worker are dropped
    pub fn shutdown(&self) {
        self.semaphore.close();
        debug!("Tokio engine shut down");
    }
}

impl Engine for TokioEngine {
    fn name(&self) -> &str {
        "tokio"
    }

    fn submit(&self, job: Job) -> Result<(), EngineError> {
        if self.semaphore.is_closed() {
            return Err(EngineError::ShutDown(self.name().to_string()));
        }

        let semaphore = Arc::clone(&self.semaphore);
        self.handle.spawn(async move {
            // A closed semaphore drops the job, which resolves its handle as lost.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!(error = %e, "Blocking job failed to complete");
            }
        });

        Ok(())
    }
}
