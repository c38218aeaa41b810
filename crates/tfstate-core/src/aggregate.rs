//! Collecting independent failures from a batch of writes

use std::fmt;

use crate::error::SyncError;

/// Several independent failures reported together
#[derive(Debug, Clone, Default)]
pub struct AggregateError {
    errors: Vec<SyncError>,
}

impl AggregateError {
    /// Constituent errors in the order they happened
    #[must_use]
    pub fn errors(&self) -> &[SyncError] {
        &self.errors
    }

    /// Number of constituent errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether nothing failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => write!(f, "1 error occurred:")?,
            n => write!(f, "{n} errors occurred:")?,
        }
        for e in &self.errors {
            write!(f, "\n\t* {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Accumulates results of writes that must all be attempted
///
/// Unlike `?`, pushing a failure does not stop the batch.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<SyncError>,
}

impl ErrorCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one write
    pub fn push(&mut self, result: Result<(), SyncError>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// `Ok` if every write succeeded, otherwise all failures at once
    ///
    /// # Errors
    /// Returns `SyncError::Aggregate` holding every collected failure.
    pub fn finish(self) -> Result<(), SyncError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Aggregate(AggregateError {
                errors: self.errors,
            }))
        }
    }
}
