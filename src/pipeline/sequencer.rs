//! Result sequencer
//!
//! Pulls resolved tasks from the scheduler, applies the `on_return`
//! transform and turns them into the output stream. The first failure ends
//! the stream. Calls skipped because an earlier call failed are never
//! yielded; in submission order that failure always comes first.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use super::scheduler::{Resolved, Scheduler, TaskOrder};
use crate::call::CallSpec;
use crate::CallError;

/// Transform applied to every resolved value before it is yielded
pub(crate) type OnReturn<R, T> = Arc<dyn Fn(R) -> T + Send + Sync>;

pub(crate) struct Sequencer<I, A, R, E, T> {
    scheduler: Scheduler<I, A, R, E>,
    on_return: OnReturn<R, T>,
    /// First call skipped after a failure; reported only if the window
    /// drains without yielding that failure
    cancelled: Option<usize>,
    finished: bool,
}

impl<I, A, R, E, T> Sequencer<I, A, R, E, T>
where
    I: Iterator<Item = CallSpec<A>> + Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(scheduler: Scheduler<I, A, R, E>, on_return: OnReturn<R, T>) -> Self {
        Self {
            scheduler,
            on_return,
            cancelled: None,
            finished: false,
        }
    }

    /// Turn the sequencer into the lazy output stream
    pub(crate) fn into_stream(self) -> BoxStream<'static, Result<T, CallError<E>>> {
        stream::unfold(self, |mut sequencer| async move {
            let item = sequencer.next_item().await?;
            Some((item, sequencer))
        })
        .boxed()
    }

    async fn next_item(&mut self) -> Option<Result<T, CallError<E>>> {
        if self.finished {
            return None;
        }

        loop {
            let resolved = match self.scheduler.order() {
                TaskOrder::Submission => self.scheduler.take_next().await,
                TaskOrder::Completion => self.scheduler.take_next_completed().await,
            };

            match resolved {
                Some(Resolved::Value(value)) => return Some(Ok((self.on_return)(value))),
                Some(Resolved::Failed(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                Some(Resolved::Cancelled(index)) => {
                    self.cancelled.get_or_insert(index);
                }
                None => {
                    self.finished = true;
                    return self.cancelled.map(|index| Err(CallError::Cancelled { index }));
                }
            }
        }
    }
}
