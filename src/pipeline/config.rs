use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Pipeline configuration
///
/// Batching is chosen on the input side (see [`crate::Batcher`]) because it
/// changes the argument type the mapped function receives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Bound on dispatched-but-unconsumed calls; `None` means unbounded
    pub num_prepare: Option<usize>,
    /// Yield results in completion order instead of submission order
    pub sort_by_completion: bool,
}

impl MapConfig {
    /// Default configuration: unbounded window, submission order
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefetch window bound
    pub fn with_num_prepare(mut self, num_prepare: usize) -> Self {
        self.num_prepare = Some(num_prepare);
        self
    }

    /// Select completion-order output
    pub fn with_sort_by_completion(mut self, sort_by_completion: bool) -> Self {
        self.sort_by_completion = sort_by_completion;
        self
    }

    /// Reject configurations that could never make progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.num_prepare {
            Some(0) => Err(ConfigError::ZeroWindow),
            _ => Ok(()),
        }
    }

    /// Window bound and internal worker count when no engine is supplied
    ///
    /// Without an engine an unbounded window degrades to one call at a time.
    pub(crate) fn internal_workers(&self) -> usize {
        self.num_prepare.unwrap_or(1)
    }
}
