//! Call specifications and input normalization
//!
//! Every row of input is resolved once, at the adapter boundary, into a
//! [`CallSpec`]: the positional arguments, keyword arguments and sequence
//! index of a single invocation. Nothing downstream re-inspects the row.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub mod adapter;
pub mod batcher;

pub use adapter::{CallSpecs, ExplicitRows, PlainRows, ZippedRows};
pub use batcher::Batcher;

/// Keyword arguments of a single call
pub type Kwargs = serde_json::Map<String, Value>;

/// Explicit positional and keyword arguments for one input row
///
/// This is also the value the mapped function receives for each call.
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments<A> {
    /// Positional arguments
    pub args: A,
    /// Keyword arguments
    pub kwargs: Kwargs,
}

impl<A> Arguments<A> {
    /// Wrap positional arguments with no keyword arguments
    pub fn new(args: A) -> Self {
        Self {
            args,
            kwargs: Kwargs::new(),
        }
    }

    /// Add a keyword argument
    ///
    /// A value that fails to serialize is logged and stored as `null`; use
    /// [`Arguments::try_kwarg`] to handle the error instead.
    pub fn kwarg(self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => self.insert_kwarg(name, value),
            Err(e) => {
                tracing::warn!(kwarg = %name, error = %e, "Keyword argument failed to serialize; passing null");
                self.insert_kwarg(name, Value::Null)
            }
        }
    }

    /// Add a keyword argument, failing if the value cannot be serialized
    pub fn try_kwarg(
        self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.insert_kwarg(name.into(), value))
    }

    fn insert_kwarg(mut self, name: String, value: Value) -> Self {
        self.kwargs.insert(name, value);
        self
    }

    /// Replace all keyword arguments
    pub fn with_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Look up a keyword argument and deserialize it
    ///
    /// Returns `None` when the argument is absent or has a different shape.
    pub fn kwarg_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.kwargs
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Split into positional and keyword arguments
    pub fn into_parts(self) -> (A, Kwargs) {
        (self.args, self.kwargs)
    }
}

/// A single input row, tagged once at the adapter boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Row<A> {
    /// A plain value, passed as the sole positional argument
    Plain(A),
    /// An explicit call whose arguments are used verbatim
    Explicit(Arguments<A>),
}

impl<A> Row<A> {
    fn into_arguments(self) -> Arguments<A> {
        match self {
            Row::Plain(value) => Arguments::new(value),
            Row::Explicit(arguments) => arguments,
        }
    }
}

impl<A> From<Arguments<A>> for Row<A> {
    fn from(arguments: Arguments<A>) -> Self {
        Row::Explicit(arguments)
    }
}

/// One normalized invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallSpec<A> {
    /// Position of this call in submission order
    pub index: usize,
    /// Positional arguments
    pub args: A,
    /// Keyword arguments
    pub kwargs: Kwargs,
}

impl<A> CallSpec<A> {
    /// Build a call specification from a resolved row
    pub fn from_row(index: usize, row: Row<A>) -> Self {
        let Arguments { args, kwargs } = row.into_arguments();
        Self {
            index,
            args,
            kwargs,
        }
    }

    /// The arguments handed to the mapped function
    pub fn into_arguments(self) -> Arguments<A> {
        Arguments {
            args: self.args,
            kwargs: self.kwargs,
        }
    }
}
