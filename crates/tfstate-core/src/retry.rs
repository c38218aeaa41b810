//! Bounded retry loop with a fixed delay between attempts
//!
//! No backoff growth and no jitter: attempts wait on a human-observable
//! dependency (control plane availability), and operators rely on the total
//! wait being `attempts x delay`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;

/// Attempt budget for one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least one is always made
    pub attempts: u32,
    /// Pause between two attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Best-effort background checkpoints
    pub const CHECKPOINT: Self = Self::new(45, Duration::from_secs(10));
    /// Authoritative final saves
    pub const FINAL: Self = Self::new(45, Duration::from_secs(10));
    /// Reads with an operator waiting on the result
    pub const READ: Self = Self::new(5, Duration::from_secs(5));

    /// Create a policy
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Longest time spent waiting between attempts
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.delay * self.attempts.max(1).saturating_sub(1)
    }
}

/// A named retry loop
#[derive(Debug, Clone)]
pub struct Loop {
    name: String,
    policy: RetryPolicy,
    silent: bool,
    cancel: CancellationToken,
}

impl Loop {
    /// Create a loop logging every attempt
    pub fn new(name: impl Into<String>, policy: RetryPolicy, cancel: &CancellationToken) -> Self {
        Self {
            name: name.into(),
            policy,
            silent: false,
            cancel: cancel.clone(),
        }
    }

    /// Only log at debug level; retry semantics stay the same
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Task name used in logs and errors
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn cancelled(&self) -> SyncError {
        SyncError::Cancelled {
            task: self.name.clone(),
        }
    }

    /// Run `operation` until it succeeds or the budget is spent
    ///
    /// Errors that are not retryable are returned as-is right away.
    ///
    /// # Errors
    /// Returns `SyncError::ExhaustedRetries` wrapping the last failure,
    /// `SyncError::Cancelled` if the token fires, or the first
    /// non-retryable error.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;

        if !self.silent {
            info!(
                task = %self.name,
                attempts,
                max_wait = ?self.policy.total_delay(),
                "starting"
            );
        }

        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled()),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => {
                    if self.silent {
                        debug!(task = %self.name, attempt, "succeeded");
                    } else if attempt > 1 {
                        info!(task = %self.name, attempt, "succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(task = %self.name, error = %e, "not retrying");
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempt >= attempts {
                if self.silent {
                    debug!(task = %self.name, attempts, error = %err, "attempts exhausted");
                } else {
                    error!(task = %self.name, attempts, error = %err, "attempts exhausted");
                }
                return Err(SyncError::ExhaustedRetries {
                    task: self.name.clone(),
                    attempts,
                    source: Box::new(err),
                });
            }

            if self.silent {
                debug!(
                    task = %self.name,
                    attempt,
                    attempts,
                    error = %err,
                    "attempt failed"
                );
            } else {
                warn!(
                    task = %self.name,
                    attempt,
                    attempts,
                    transient = err.is_transient(),
                    error = %err,
                    "attempt failed, retrying in {:?}",
                    self.policy.delay
                );
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled()),
                () = tokio::time::sleep(self.policy.delay) => {}
            }
            attempt += 1;
        }
    }
}
