//! # fluentmap
//!
//! A lazy, drop-in replacement for mapping a function over one or more
//! iterators, with three additions over a plain element-wise map:
//!
//! - **Batching**: consecutive rows can be grouped into fixed-size batches so
//!   the mapped function decides how to reduce a whole batch.
//! - **Prefetch**: calls run on a concurrent execution engine with a bounded
//!   look-ahead window instead of strictly one at a time.
//! - **Ordering**: results come back in input order (default) or in the order
//!   calls actually finish.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::convert::Infallible;
//! use fluentmap::{Arguments, CallSpecs, Pipeline};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let doubled = Pipeline::new(|call: Arguments<i32>| Ok::<_, Infallible>(call.args * 2))
//!     .with_num_prepare(4)
//!     .on_return(|x| x + 1)
//!     .run(CallSpecs::plain(0..5))?
//!     .blocking_iter()
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! assert_eq!(doubled, vec![1, 3, 5, 7, 9]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`call`]: call specifications, the input adapter and the batcher
//! - [`engine`]: the execution engine contract and its implementations
//! - [`pipeline`]: prefetch scheduling, result sequencing and the public builder

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Call specifications, input adaptation and batching
pub mod call;

/// Execution engines that run dispatched calls
pub mod engine;

/// Prefetch scheduling and result sequencing
pub mod pipeline;

pub use call::{Arguments, Batcher, CallSpec, CallSpecs, Kwargs, Row};
pub use engine::{Engine, EngineError, ThreadPool, TokioEngine};
pub use pipeline::{map, FluentMap, MapConfig, Pipeline, PipelineStats};

/// Invalid pipeline configuration, reported before any input is consumed
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A prefetch window of zero could never dispatch anything
    #[error("num_prepare must be at least 1 when set")]
    ZeroWindow,

    /// An engine was configured without any workers
    #[error("engine '{0}' must have at least one worker")]
    ZeroWorkers(String),

    /// The execution engine could not be set up
    #[error("engine setup failed: {0}")]
    Engine(#[from] EngineError),
}

/// Failure of a single dispatched call, surfaced in place of its result
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The mapped function returned an error
    #[error("call {index} failed: {source}")]
    Failed {
        /// Sequence index of the failing call
        index: usize,
        /// Error returned by the mapped function
        source: E,
    },

    /// The mapped function panicked
    #[error("call {index} panicked: {message}")]
    Panicked {
        /// Sequence index of the panicking call
        index: usize,
        /// Panic payload rendered as text
        message: String,
    },

    /// The engine dropped the call without running it
    #[error("call {index} was lost by the execution engine")]
    Lost {
        /// Sequence index of the lost call
        index: usize,
    },

    /// The call was skipped because an earlier failure stopped the pipeline
    #[error("call {index} was cancelled after a previous failure")]
    Cancelled {
        /// Sequence index of the cancelled call
        index: usize,
    },
}

impl<E> CallError<E> {
    /// Sequence index of the call this error belongs to
    pub fn index(&self) -> usize {
        match self {
            CallError::Failed { index, .. }
            | CallError::Panicked { index, .. }
            | CallError::Lost { index }
            | CallError::Cancelled { index } => *index,
        }
    }

    /// The mapped function's own error, if that is what failed
    pub fn into_source(self) -> Option<E> {
        match self {
            CallError::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this error was caused by the mapped function itself
    pub fn is_call_failure(&self) -> bool {
        matches!(self, CallError::Failed { .. } | CallError::Panicked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_index() {
        let err: CallError<String> = CallError::Failed {
            index: 3,
            source: "mock".to_string(),
        };
        assert_eq!(err.index(), 3);
        assert!(err.is_call_failure());
        assert_eq!(err.into_source(), Some("mock".to_string()));

        let lost: CallError<String> = CallError::Lost { index: 7 };
        assert_eq!(lost.index(), 7);
        assert!(!lost.is_call_failure());
        assert!(lost.into_source().is_none());
    }

    #[test]
    fn test_error_display() {
        let err: CallError<std::io::Error> = CallError::Panicked {
            index: 1,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "call 1 panicked: boom");
        assert_eq!(
            ConfigError::ZeroWindow.to_string(),
            "num_prepare must be at least 1 when set"
        );
    }
}
