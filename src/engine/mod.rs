//! Execution engines
//!
//! An engine is anything that can run a boxed job somewhere, inline or on
//! other threads. The typed side of the contract lives in [`dispatch`]: it
//! wraps a call so its outcome travels back through a oneshot channel, and
//! hands the caller a [`TaskHandle`] to await. Engines therefore never see
//! the call's result type, which keeps [`Engine`] object-safe.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

pub mod thread_pool;
pub mod tokio_engine;

pub use thread_pool::ThreadPool;
pub use tokio_engine::TokioEngine;

/// A type-erased unit of work submitted to an engine
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by execution engines
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine no longer accepts work
    #[error("engine '{0}' has been shut down")]
    ShutDown(String),

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// No runtime was available to run the engine on
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

/// Capability to run jobs, inline or concurrently
pub trait Engine: Send + Sync {
    /// Human-readable engine name used in logs and errors
    fn name(&self) -> &str;

    /// Queue a job for execution
    ///
    /// A job that is accepted but later dropped without running resolves its
    /// handle as [`TaskOutcome::Lost`].
    fn submit(&self, job: Job) -> Result<(), EngineError>;
}

/// Final state of a dispatched call
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The call ran to completion
    Completed(T),
    /// The call panicked; carries the panic message
    Panicked(String),
    /// The job was dropped or refused before it produced a result
    Lost,
}

/// Awaitable handle to a dispatched call
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(TaskOutcome::Lost))
    }
}

/// Submit a call to an engine and get a handle to its outcome
///
/// Panics inside the call are caught and reported as
/// [`TaskOutcome::Panicked`], so engine workers survive them.
pub fn dispatch<E, F, T>(engine: &E, call: F) -> TaskHandle<T>
where
    E: Engine + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let job: Job = Box::new(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(value) => TaskOutcome::Completed(value),
            Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
        };
        // The consumer may have gone away; its result is simply discarded.
        let _ = sender.send(outcome);
    });

    if let Err(e) = engine.submit(job) {
        tracing::warn!(engine = engine.name(), error = %e, "Engine refused job");
    }

    TaskHandle { receiver }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
