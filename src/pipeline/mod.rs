//! Pipeline builder and output stream
//!
//! [`Pipeline`] wires the stages together: the call specifications it is run
//! on (optionally batched), a scheduler bounded by the prefetch window, and a
//! sequencer yielding results in submission or completion order. The result
//! is a [`FluentMap`], which does nothing until it is first polled.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::executor::{block_on_stream, BlockingStream};
use futures::stream::{BoxStream, FusedStream, Stream};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::call::{Arguments, CallSpec, CallSpecs, PlainRows};
use crate::engine::{Engine, ThreadPool};
use crate::{CallError, ConfigError};

mod config;
mod scheduler;
mod sequencer;

pub use config::MapConfig;
pub use scheduler::PipelineStats;

use scheduler::{MapFn, Scheduler, TaskOrder};
use sequencer::{OnReturn, Sequencer};

/// Builder for one mapping run
///
/// `A` is the argument type the mapped function receives, `R` its result,
/// `E` its error and `T` the type yielded after `on_return`.
pub struct Pipeline<A, R, E, T = R> {
    func: MapFn<A, R, E>,
    on_return: OnReturn<R, T>,
    config: MapConfig,
    engine: Option<Arc<dyn Engine>>,
}

impl<A, R, E> Pipeline<A, R, E, R>
where
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Start a pipeline around the function to map
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Arguments<A>) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            on_return: Arc::new(|value: R| value),
            config: MapConfig::default(),
            engine: None,
        }
    }
}

impl<A, R, E, T> Pipeline<A, R, E, T>
where
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    T: Send + 'static,
{
    /// Replace the whole configuration
    pub fn with_config(mut self, config: MapConfig) -> Self {
        self.config = config;
        self
    }

    /// Bound the number of dispatched-but-unconsumed calls
    pub fn with_num_prepare(mut self, num_prepare: usize) -> Self {
        self.config.num_prepare = Some(num_prepare);
        self
    }

    /// Yield results in the order calls finish
    ///
    /// Only meaningful together with an engine that runs calls concurrently.
    pub fn with_sort_by_completion(mut self, sort_by_completion: bool) -> Self {
        self.config.sort_by_completion = sort_by_completion;
        self
    }

    /// Run calls on an external engine instead of an internal worker pool
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Transform every resolved value before it is yielded
    pub fn on_return<U, G>(self, on_return: G) -> Pipeline<A, R, E, U>
    where
        G: Fn(R) -> U + Send + Sync + 'static,
    {
        Pipeline {
            func: self.func,
            on_return: Arc::new(on_return),
            config: self.config,
            engine: self.engine,
        }
    }

    /// The configuration the pipeline will run with
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Build the lazy output stream over `calls`
    ///
    /// Configuration is checked here, before any input is pulled. Without an
    /// external engine a worker pool sized to the window is started for this
    /// run and released when the stream ends or is dropped.
    #[instrument(skip_all, fields(num_prepare = ?self.config.num_prepare, sort_by_completion = self.config.sort_by_completion))]
    pub fn run<C>(self, calls: C) -> Result<FluentMap<T, E>, ConfigError>
    where
        C: IntoIterator<Item = CallSpec<A>>,
        C::IntoIter: Send + 'static,
    {
        self.config.validate()?;

        let (engine, bound) = match self.engine {
            Some(engine) => (engine, self.config.num_prepare),
            None => {
                let workers = self.config.internal_workers();
                let pool: Arc<dyn Engine> = Arc::new(ThreadPool::new(workers)?);
                (pool, Some(workers))
            }
        };
        debug!(engine = engine.name(), bound = ?bound, "Pipeline configured");

        let order = if self.config.sort_by_completion {
            TaskOrder::Completion
        } else {
            TaskOrder::Submission
        };
        let stats = Arc::new(Mutex::new(PipelineStats::default()));
        let scheduler = Scheduler::new(
            calls.into_iter(),
            self.func,
            engine,
            bound,
            order,
            Arc::clone(&stats),
        );

        Ok(FluentMap {
            inner: Sequencer::new(scheduler, self.on_return).into_stream(),
            stats,
            terminated: false,
        })
    }
}

/// Map `func` over plain values with the default configuration
///
/// Each value becomes the sole positional argument of one call; calls run
/// one at a time, exactly like an ordinary lazy map.
pub fn map<A, R, E, F, I>(func: F, inputs: I) -> Result<FluentMap<R, E>, ConfigError>
where
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(Arguments<A>) -> Result<R, E> + Send + Sync + 'static,
    I: IntoIterator<Item = A>,
    I::IntoIter: Send + 'static,
{
    let calls: CallSpecs<PlainRows<I::IntoIter>> = CallSpecs::plain(inputs);
    Pipeline::new(func).run(calls)
}

/// Lazy output of a pipeline run
///
/// Yields one item per call (or per batch), ending after the first error.
pub struct FluentMap<T, E> {
    inner: BoxStream<'static, Result<T, CallError<E>>>,
    stats: Arc<Mutex<PipelineStats>>,
    terminated: bool,
}

impl<T, E> FluentMap<T, E> {
    /// Snapshot of the run's counters
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// Iterate synchronously, blocking the current thread on each item
    ///
    /// Do not call this from inside an async runtime's worker thread.
    pub fn blocking_iter(self) -> BlockingStream<Self> {
        block_on_stream(self)
    }
}

impl<T, E> Stream for FluentMap<T, E> {
    type Item = Result<T, CallError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        let polled = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.terminated = true;
        }
        polled
    }
}

impl<T, E> FusedStream for FluentMap<T, E> {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T, E> std::fmt::Debug for FluentMap<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluentMap")
            .field("stats", &self.stats())
            .field("terminated", &self.terminated)
            .finish()
    }
}
