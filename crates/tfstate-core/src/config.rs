//! Configuration types for the engine

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Retry budgets per kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Intermediate checkpoints
    #[serde(default = "default_checkpoint")]
    pub checkpoint: RetryPolicy,
    /// Final, authoritative saves and deletes
    #[serde(default = "default_final", rename = "final")]
    pub final_save: RetryPolicy,
    /// Fleet reads
    #[serde(default = "default_read")]
    pub read: RetryPolicy,
}

fn default_checkpoint() -> RetryPolicy {
    RetryPolicy::CHECKPOINT
}

fn default_final() -> RetryPolicy {
    RetryPolicy::FINAL
}

fn default_read() -> RetryPolicy {
    RetryPolicy::READ
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            checkpoint: default_checkpoint(),
            final_save: default_final(),
            read: default_read(),
        }
    }
}

impl RetryPolicies {
    /// Same budget for every kind of operation
    #[must_use]
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            checkpoint: policy,
            final_save: policy,
            read: policy,
        }
    }
}

/// Fleet reader behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Fail when nodes of one group carry different settings
    ///
    /// When off, the settings of the lexicographically last record name
    /// win and the mismatch is logged.
    #[serde(default)]
    pub strict_group_settings: bool,
}
