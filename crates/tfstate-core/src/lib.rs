//! tfstate-core: terraform state synchronization engine
//!
//! Persists provisioning state into a control-plane object store while a
//! provisioning run is in flight, and reconstructs fleet state from those
//! records afterwards.
//!
//! # Architecture
//!
//! - [`StateSync`] binds an [`ObjectStore`](tfstate_store::ObjectStore)
//!   handle to retry budgets and record layout.
//! - [`StateSink`] implementations ([`ClusterStateSaver`],
//!   [`NodeStateSaver`]) take intermediate checkpoints; a [`Checkpointer`]
//!   feeds them and swallows their failures.
//! - Final saves and fleet reads are methods of [`StateSync`].
//! - Every write goes through an [`UpsertTask`] inside a retry [`Loop`].

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod outputs;
mod persist;
pub mod reader;
pub mod retry;
pub mod saver;
pub mod sink;
pub mod task;

pub use aggregate::{AggregateError, ErrorCollector};
pub use config::{ReaderConfig, RetryPolicies};
pub use engine::StateSync;
pub use error::SyncError;
pub use manifest::{Manifest, StateLayout};
pub use outputs::ProvisioningOutputs;
pub use reader::{NodeGroupState, group_node_records};
pub use retry::{Loop, RetryPolicy};
pub use saver::{ClusterStateSaver, NodeStateSaver};
pub use sink::{CheckpointStats, Checkpointer, StateSink};
pub use task::{Protocol, UpsertTask};
pub use tokio_util::sync::CancellationToken;
