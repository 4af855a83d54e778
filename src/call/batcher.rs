//! Grouping of consecutive calls into batches

use std::iter::FusedIterator;

use super::{CallSpec, Kwargs};

/// Groups consecutive [`CallSpec`]s into batch calls
///
/// Each batch is a single call whose positional argument is the ordered list
/// of the grouped rows' positional arguments. The last batch may be shorter;
/// it is never dropped. A batch carries the index of its first member and an
/// empty keyword mapping.
#[derive(Debug, Clone)]
pub struct Batcher<I> {
    calls: I,
    batch_size: usize,
}

impl<I, A> Batcher<I>
where
    I: Iterator<Item = CallSpec<A>>,
{
    /// Create a batcher; a `batch_size` of 0 or 1 emits single-row batches
    pub fn new(calls: I, batch_size: usize) -> Self {
        Self { calls, batch_size }
    }

    /// Effective number of rows per batch
    pub fn batch_size_hint(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl<I, A> Iterator for Batcher<I>
where
    I: Iterator<Item = CallSpec<A>>,
{
    type Item = CallSpec<Vec<A>>;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.batch_size_hint();
        let mut rows = Vec::with_capacity(size);
        let mut first = None;

        for call in self.calls.by_ref().take(size) {
            first.get_or_insert(call.index);
            rows.push(call.args);
        }

        let index = first?;
        tracing::trace!(first_member = index, rows = rows.len(), "Batch assembled");

        Some(CallSpec {
            index,
            args: rows,
            kwargs: Kwargs::new(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.batch_size_hint();
        let (lo, hi) = self.calls.size_hint();
        (lo.div_ceil(size), hi.map(|hi| hi.div_ceil(size)))
    }
}

impl<I, A> FusedIterator for Batcher<I> where I: FusedIterator<Item = CallSpec<A>> {}
