//! Prefetch scheduler
//!
//! The scheduler owns the prefetch window: every task that has been
//! dispatched but not yet handed to the consumer. `fill` and the `take_*`
//! methods are the only code that touches the window, and both run on the
//! consumer's side, so the window length is the outstanding count and can
//! never exceed the bound. The only state workers write is the failure latch,
//! which holds the lowest index that has failed so far.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use futures::stream::{FuturesOrdered, FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::call::{Arguments, CallSpec};
use crate::engine::{self, Engine, TaskHandle, TaskOutcome};
use crate::CallError;

/// The mapped function, shared with every dispatched call
pub(crate) type MapFn<A, R, E> = Arc<dyn Fn(Arguments<A>) -> Result<R, E> + Send + Sync>;

/// Order in which the scheduler hands back finished tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOrder {
    Submission,
    Completion,
}

/// Counters describing one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Calls handed to the engine
    pub dispatched: usize,
    /// Tasks handed to the consumer
    pub consumed: usize,
    /// Tasks that failed, panicked or were lost
    pub failed: usize,
    /// Tasks dispatched and not yet consumed
    pub outstanding: usize,
    /// Highest value `outstanding` reached
    pub max_outstanding: usize,
}

/// Lowest sequence index that has failed; `usize::MAX` while none has
#[derive(Debug, Clone)]
pub(crate) struct FailureLatch(Arc<AtomicUsize>);

impl Default for FailureLatch {
    fn default() -> Self {
        Self(Arc::new(AtomicUsize::new(usize::MAX)))
    }
}

impl FailureLatch {
    pub(crate) fn trip(&self, index: usize) {
        let previous = self.0.fetch_min(index, Ordering::SeqCst);
        if previous == usize::MAX {
            debug!(index = index, "Failure latch set; no further calls will be dispatched");
        }
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.failed_at().is_some()
    }

    pub(crate) fn failed_at(&self) -> Option<usize> {
        match self.0.load(Ordering::SeqCst) {
            usize::MAX => None,
            index => Some(index),
        }
    }

    /// Whether the call at `index` comes after a known failure
    ///
    /// Calls ahead of the failure still run: their results are yielded
    /// before the failure is.
    pub(crate) fn supersedes(&self, index: usize) -> bool {
        self.failed_at().is_some_and(|failed| index > failed)
    }
}

/// Trips the latch if the call it guards unwinds
struct TripOnUnwind<'a> {
    latch: &'a FailureLatch,
    index: usize,
}

impl Drop for TripOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.latch.trip(self.index);
        }
    }
}

/// What a worker produced for one call
pub(crate) enum CallResult<R, E> {
    Returned(Result<R, E>),
    /// Not run because an earlier call had already failed
    Skipped,
}

/// A task as seen by the consumer
pub(crate) enum Resolved<R, E> {
    Value(R),
    Failed(CallError<E>),
    Cancelled(usize),
}

/// A dispatched call: its sequence index plus the handle to its outcome
pub(crate) struct Task<R, E> {
    index: usize,
    handle: TaskHandle<CallResult<R, E>>,
}

impl<R, E> Future for Task<R, E> {
    type Output = (usize, TaskOutcome<CallResult<R, E>>);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|outcome| (index, outcome))
    }
}

enum Window<R, E> {
    Ordered(FuturesOrdered<Task<R, E>>),
    Unordered(FuturesUnordered<Task<R, E>>),
}

impl<R, E> Window<R, E> {
    fn new(order: TaskOrder) -> Self {
        match order {
            TaskOrder::Submission => Window::Ordered(FuturesOrdered::new()),
            TaskOrder::Completion => Window::Unordered(FuturesUnordered::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Window::Ordered(tasks) => tasks.len(),
            Window::Unordered(tasks) => tasks.len(),
        }
    }

    fn push(&mut self, task: Task<R, E>) {
        match self {
            Window::Ordered(tasks) => tasks.push_back(task),
            Window::Unordered(tasks) => tasks.push(task),
        }
    }

    async fn next(&mut self) -> Option<(usize, TaskOutcome<CallResult<R, E>>)> {
        match self {
            Window::Ordered(tasks) => tasks.next().await,
            Window::Unordered(tasks) => tasks.next().await,
        }
    }
}

/// Dispatches calls into a bounded prefetch window
pub(crate) struct Scheduler<I, A, R, E> {
    calls: Option<I>,
    func: MapFn<A, R, E>,
    engine: Option<Arc<dyn Engine>>,
    window: Window<R, E>,
    order: TaskOrder,
    bound: Option<usize>,
    latch: FailureLatch,
    stats: Arc<Mutex<PipelineStats>>,
}

impl<I, A, R, E> Scheduler<I, A, R, E>
where
    I: Iterator<Item = CallSpec<A>>,
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        calls: I,
        func: MapFn<A, R, E>,
        engine: Arc<dyn Engine>,
        bound: Option<usize>,
        order: TaskOrder,
        stats: Arc<Mutex<PipelineStats>>,
    ) -> Self {
        Self {
            calls: Some(calls),
            func,
            engine: Some(engine),
            window: Window::new(order),
            order,
            bound,
            latch: FailureLatch::default(),
            stats,
        }
    }

    pub(crate) fn order(&self) -> TaskOrder {
        self.order
    }

    fn has_free_slot(&self) -> bool {
        self.bound.map_or(true, |bound| self.window.len() < bound)
    }

    /// Dispatch calls until the window is full, the input runs out or a
    /// failure has been seen
    pub(crate) fn fill(&mut self) {
        while self.calls.is_some() && self.has_free_slot() {
            if self.latch.is_tripped() {
                debug!("Dispatch stopped after failure");
                self.calls = None;
                break;
            }

            match self.calls.as_mut().and_then(Iterator::next) {
                Some(call) => self.dispatch(call),
                None => {
                    debug!("Input exhausted");
                    self.calls = None;
                }
            }
        }

        if self.calls.is_none() && self.window.len() == 0 {
            self.teardown();
        }
    }

    fn dispatch(&mut self, call: CallSpec<A>) {
        let Some(target) = self.engine.as_ref() else {
            return;
        };

        let index = call.index;
        let func = Arc::clone(&self.func);
        let latch = self.latch.clone();
        let handle = engine::dispatch(target.as_ref(), move || {
            if latch.supersedes(index) {
                return CallResult::Skipped;
            }
            let _guard = TripOnUnwind {
                latch: &latch,
                index,
            };
            let result = func(call.into_arguments());
            if result.is_err() {
                latch.trip(index);
            }
            CallResult::Returned(result)
        });
        self.window.push(Task { index, handle });

        let mut stats = self.stats.lock();
        stats.dispatched += 1;
        stats.outstanding = self.window.len();
        stats.max_outstanding = stats.max_outstanding.max(stats.outstanding);
        debug!(index = index, outstanding = stats.outstanding, "Call dispatched");
    }

    /// Oldest outstanding task in submission order
    ///
    /// Suspends until that task resolves, then refills the freed slot.
    pub(crate) async fn take_next(&mut self) -> Option<Resolved<R, E>> {
        debug_assert_eq!(self.order, TaskOrder::Submission);
        self.take().await
    }

    /// Whichever outstanding task finishes first
    pub(crate) async fn take_next_completed(&mut self) -> Option<Resolved<R, E>> {
        debug_assert_eq!(self.order, TaskOrder::Completion);
        self.take().await
    }

    async fn take(&mut self) -> Option<Resolved<R, E>> {
        self.fill();
        let Some((index, outcome)) = self.window.next().await else {
            self.finish();
            return None;
        };

        let resolved = self.resolve(index, outcome);
        {
            let mut stats = self.stats.lock();
            stats.consumed += 1;
            stats.outstanding = self.window.len();
            if matches!(resolved, Resolved::Failed(_)) {
                stats.failed += 1;
            }
        }

        self.fill();
        Some(resolved)
    }

    fn resolve(&self, index: usize, outcome: TaskOutcome<CallResult<R, E>>) -> Resolved<R, E> {
        let error = match outcome {
            TaskOutcome::Completed(CallResult::Returned(Ok(value))) => {
                debug!(index = index, "Call consumed");
                return Resolved::Value(value);
            }
            TaskOutcome::Completed(CallResult::Skipped) => {
                debug!(index = index, "Call skipped after an earlier failure");
                return Resolved::Cancelled(index);
            }
            TaskOutcome::Completed(CallResult::Returned(Err(source))) => {
                CallError::Failed { index, source }
            }
            TaskOutcome::Panicked(message) => CallError::Panicked { index, message },
            TaskOutcome::Lost => CallError::Lost { index },
        };

        self.latch.trip(index);
        warn!(
            index = index,
            outstanding = self.window.len(),
            "Call failed; stopping dispatch"
        );
        Resolved::Failed(error)
    }

    fn teardown(&mut self) {
        if let Some(engine) = self.engine.take() {
            debug!(engine = engine.name(), "Releasing execution engine");
        }
    }

    fn finish(&mut self) {
        self.teardown();
        let stats = self.stats.lock();
        info!(
            dispatched = stats.dispatched,
            consumed = stats.consumed,
            failed = stats.failed,
            max_outstanding = stats.max_outstanding,
            "Pipeline finished"
        );
    }
}
