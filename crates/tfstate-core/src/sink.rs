//! State sinks: destinations for intermediate checkpoints

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::outputs::{ProvisioningOutputs, with_state};

/// Destination invoked by the provisioning engine on every state change
///
/// Absent outputs and outputs with empty state must be a successful no-op:
/// the engine's state file is transiently truncated while it is rewritten,
/// and that must never read as "state cleared".
#[async_trait]
pub trait StateSink: Send + Sync {
    /// Persist the latest full state snapshot
    async fn save_state(&self, outputs: Option<&ProvisioningOutputs>) -> Result<(), SyncError>;
}

/// Counters kept by a `Checkpointer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointStats {
    /// Checkpoints persisted
    pub saved: u64,
    /// Events carrying no state
    pub skipped: u64,
    /// Checkpoints that could not be persisted
    pub failed: u64,
    /// Time of the last persisted checkpoint
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// Engine-facing side of a sink
///
/// Checkpoint failures are logged and swallowed here so that they never
/// abort the provisioning run; a later checkpoint or the final save is
/// expected to succeed.
pub struct Checkpointer {
    sink: Arc<dyn StateSink>,
    stats: Mutex<CheckpointStats>,
}

impl Checkpointer {
    /// Wrap a sink
    pub fn new(sink: Arc<dyn StateSink>) -> Self {
        Self {
            sink,
            stats: Mutex::new(CheckpointStats::default()),
        }
    }

    /// Hand one state snapshot to the sink
    pub async fn checkpoint(&self, outputs: Option<&ProvisioningOutputs>) {
        if with_state(outputs).is_none() {
            debug!("state change without state, skipping checkpoint");
            self.stats.lock().await.skipped += 1;
            return;
        }

        let result = self.sink.save_state(outputs).await;

        let mut stats = self.stats.lock().await;
        match result {
            Ok(()) => {
                stats.saved += 1;
                stats.last_saved_at = Some(Utc::now());
            }
            Err(e) => {
                stats.failed += 1;
                warn!(error = %e, "intermediate state was not saved, continuing");
            }
        }
    }

    /// Snapshot of the counters
    pub async fn stats(&self) -> CheckpointStats {
        self.stats.lock().await.clone()
    }
}
