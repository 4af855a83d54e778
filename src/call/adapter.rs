//! Input adapter turning iterators into lazy call specifications

use std::iter::FusedIterator;

use super::{Arguments, CallSpec, Row};
use crate::call::batcher::Batcher;

/// Lazy, single-pass sequence of [`CallSpec`]s built from input rows
///
/// Pulling one call specification advances the underlying input(s) by exactly
/// one position. Iterate a fresh adapter to start over.
#[derive(Debug, Clone)]
pub struct CallSpecs<R> {
    rows: R,
    next_index: usize,
}

impl<R, A> CallSpecs<R>
where
    R: Iterator<Item = Row<A>>,
{
    /// Adapt already-tagged rows, mixing plain values and explicit calls
    pub fn rows<T>(rows: T) -> Self
    where
        T: IntoIterator<IntoIter = R>,
    {
        Self {
            rows: rows.into_iter(),
            next_index: 0,
        }
    }

    /// Group consecutive calls into batches of `batch_size`
    pub fn batched(self, batch_size: usize) -> Batcher<Self> {
        Batcher::new(self, batch_size)
    }
}

impl<I> CallSpecs<PlainRows<I>>
where
    I: Iterator,
{
    /// Each element becomes the sole positional argument of one call
    pub fn plain<T>(values: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: PlainRows(values.into_iter()),
            next_index: 0,
        }
    }
}

impl<I, A> CallSpecs<ExplicitRows<I>>
where
    I: Iterator<Item = Arguments<A>>,
{
    /// Each element supplies the explicit arguments of one call
    pub fn explicit<T>(calls: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: ExplicitRows(calls.into_iter()),
            next_index: 0,
        }
    }
}

impl<I> CallSpecs<ZippedRows<I>>
where
    I: Iterator,
{
    /// Zip several inputs positionally, stopping at the shortest
    ///
    /// Each call receives one element from every input, in input order. With
    /// no inputs at all the sequence is empty.
    pub fn zipped<T, S>(inputs: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: IntoIterator<IntoIter = I>,
    {
        let inputs: Vec<I> = inputs.into_iter().map(IntoIterator::into_iter).collect();
        Self {
            rows: ZippedRows {
                done: inputs.is_empty(),
                inputs,
            },
            next_index: 0,
        }
    }
}

impl<R, A> Iterator for CallSpecs<R>
where
    R: Iterator<Item = Row<A>>,
{
    type Item = CallSpec<A>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(CallSpec::from_row(index, row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<R, A> FusedIterator for CallSpecs<R> where R: FusedIterator<Item = Row<A>> {}

/// Rows made of plain values
#[derive(Debug, Clone)]
pub struct PlainRows<I>(I);

impl<I: Iterator> Iterator for PlainRows<I> {
    type Item = Row<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(Row::Plain)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Rows made of explicit [`Arguments`]
#[derive(Debug, Clone)]
pub struct ExplicitRows<I>(I);

impl<I, A> Iterator for ExplicitRows<I>
where
    I: Iterator<Item = Arguments<A>>,
{
    type Item = Row<A>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(Row::Explicit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Rows zipped from several homogeneous inputs
#[derive(Debug, Clone)]
pub struct ZippedRows<I> {
    inputs: Vec<I>,
    done: bool,
}

impl<I: Iterator> Iterator for ZippedRows<I> {
    type Item = Row<Vec<I::Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.inputs.is_empty() {
            return None;
        }

        let mut row = Vec::with_capacity(self.inputs.len());
        for input in &mut self.inputs {
            match input.next() {
                Some(value) => row.push(value),
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
        Some(Row::Plain(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done || self.inputs.is_empty() {
            return (0, Some(0));
        }
        self.inputs
            .iter()
            .map(Iterator::size_hint)
            .fold((usize::MAX, None), |(lo, hi), (l, h)| {
                let hi = match (hi, h) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) | (None, Some(a)) => Some(a),
                    (None, None) => None,
                };
                (lo.min(l), hi)
            })
    }
}

impl<I: Iterator> FusedIterator for ZippedRows<I> {}
