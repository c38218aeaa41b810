//! Core error types for tfstate-core

use thiserror::Error;

use tfstate_store::StoreError;

use crate::aggregate::AggregateError;

/// Errors that can occur while synchronizing state
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// A named upsert failed on the store
    #[error("{task}: {source}")]
    Task {
        /// Human-readable task name
        task: String,
        /// Store failure
        #[source]
        source: StoreError,
    },

    /// Store call failed outside of an upsert
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Listed record lacks a label needed to place it
    #[error("can't determine {label} for {record:?} secret")]
    MissingIdentity {
        /// Record name
        record: String,
        /// What the missing label identifies
        label: &'static str,
    },

    /// A save was handed empty state
    #[error("terraform state is not found in outputs")]
    NoState,

    /// Record could not be built from the given input
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Record exists but does not carry the expected data
    #[error("invalid record {record:?}: {reason}")]
    InvalidRecord {
        /// Record name
        record: String,
        /// What is wrong with it
        reason: String,
    },

    /// Nodes of one group disagree about the group settings
    #[error("node group {group:?}: settings of {first:?} and {second:?} differ")]
    SettingsMismatch {
        /// Node group name
        group: String,
        /// Node whose settings were kept so far
        first: String,
        /// Node with diverging settings
        second: String,
    },

    /// Every attempt of a retried task failed
    #[error("{task}: giving up after {attempts} attempts: {source}")]
    ExhaustedRetries {
        /// Human-readable task name
        task: String,
        /// Attempts made
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: Box<SyncError>,
    },

    /// Several writes of one batch failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Caller cancelled the operation
    #[error("{task}: cancelled")]
    Cancelled {
        /// Human-readable task name
        task: String,
    },
}

impl SyncError {
    /// Check if the retry loop should try again
    ///
    /// Store failures are retried unless the store rejected the request
    /// itself; errors that another attempt cannot fix are surfaced
    /// immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Task { source, .. } | SyncError::Store(source) => !source.is_rejected(),
            SyncError::Aggregate(aggregate) => {
                aggregate.errors().iter().any(SyncError::is_retryable)
            }
            SyncError::MissingIdentity { .. }
            | SyncError::NoState
            | SyncError::InvalidManifest(_)
            | SyncError::InvalidRecord { .. }
            | SyncError::SettingsMismatch { .. }
            | SyncError::ExhaustedRetries { .. }
            | SyncError::Cancelled { .. } => false,
        }
    }

    /// Check if the underlying store failure looks transient
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Task { source, .. } | SyncError::Store(source) => source.is_retryable(),
            SyncError::Aggregate(aggregate) => {
                aggregate.errors().iter().any(SyncError::is_transient)
            }
            _ => false,
        }
    }

    /// Whether the store reported the target as absent
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Task { source, .. } | SyncError::Store(source) => source.is_not_found(),
            _ => false,
        }
    }

    /// Batch failure, looking through an exhausted retry
    #[must_use]
    pub fn aggregate(&self) -> Option<&AggregateError> {
        match self {
            SyncError::Aggregate(aggregate) => Some(aggregate),
            SyncError::ExhaustedRetries { source, .. } => source.aggregate(),
            _ => None,
        }
    }

    /// Error of the last attempt, looking through an exhausted retry
    #[must_use]
    pub fn last_cause(&self) -> &SyncError {
        match self {
            SyncError::ExhaustedRetries { source, .. } => source.last_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfstate_store::{RecordKey, RecordKind};

    fn not_found() -> StoreError {
        StoreError::NotFound(RecordKey::new(RecordKind::Secret, "d8-system", "x"))
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(
            !SyncError::MissingIdentity {
                record: "x".to_string(),
                label: "node name"
            }
            .is_retryable()
        );
        assert!(!SyncError::NoState.is_retryable());
        assert!(
            !SyncError::Cancelled {
                task: "t".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_store_errors_are_retryable() {
        assert!(SyncError::Store(not_found()).is_retryable());
        assert!(
            SyncError::Task {
                task: "t".to_string(),
                source: StoreError::Transport("reset".to_string())
            }
            .is_transient()
        );
    }

    #[test]
    fn test_rejected_writes_are_not_retried() {
        let err = SyncError::Task {
            task: "Secret \"d8-node-terraform-state-a\"".to_string(),
            source: StoreError::Api {
                status: 422,
                message: "invalid label value".to_string(),
            },
        };

        assert!(!err.is_retryable());
        assert!(!SyncError::Store(StoreError::InvalidRecord("x".to_string())).is_retryable());
    }

    #[test]
    fn test_exhausted_keeps_task_name_and_cause() {
        let err = SyncError::ExhaustedRetries {
            task: "Get Cluster UUID".to_string(),
            attempts: 5,
            source: Box::new(SyncError::Store(not_found())),
        };

        assert!(err.to_string().starts_with("Get Cluster UUID: giving up after 5 attempts"));
        assert!(err.last_cause().is_not_found());
        assert!(err.aggregate().is_none());
    }
}
