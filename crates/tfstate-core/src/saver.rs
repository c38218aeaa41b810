//! Sinks bound to cluster-wide and per-node state records

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use tfstate_store::ObjectStore;

use crate::error::SyncError;
use crate::manifest::{
    CLUSTER_STATE_NAME, Manifest, StateLayout, cluster_state_patch, node_state_patch,
    node_state_record_name,
};
use crate::outputs::{ProvisioningOutputs, with_state};
use crate::retry::{Loop, RetryPolicy};
use crate::sink::StateSink;
use crate::task::UpsertTask;

/// Checkpoints the cluster-wide infrastructure state
pub struct ClusterStateSaver {
    store: Arc<dyn ObjectStore>,
    layout: StateLayout,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ClusterStateSaver {
    /// Create a saver writing through `store`
    pub fn new(
        store: Arc<dyn ObjectStore>,
        layout: StateLayout,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            layout,
            policy,
            cancel,
        }
    }
}

#[async_trait]
impl StateSink for ClusterStateSaver {
    #[instrument(skip_all, name = "cluster_checkpoint")]
    async fn save_state(&self, outputs: Option<&ProvisioningOutputs>) -> Result<(), SyncError> {
        let Some(outputs) = with_state(outputs) else {
            return Ok(());
        };

        let task = UpsertTask::patch_or_create(
            format!("Secret {CLUSTER_STATE_NAME:?}"),
            Manifest::ClusterState {
                state: outputs.state.clone(),
                cloud_discovery: outputs.cloud_discovery.clone(),
            },
            cluster_state_patch(&outputs.state),
        );

        debug!("intermediate save of base infrastructure state");
        let (task, store, layout) = (&task, self.store.as_ref(), &self.layout);
        let result = Loop::new(
            "Save Cluster intermediate Terraform state",
            self.policy,
            &self.cancel,
        )
        .silent()
        .run(move || task.run(store, layout))
        .await;

        match &result {
            Ok(()) => debug!("intermediate base infrastructure state saved"),
            Err(e) => debug!(error = %e, "intermediate base infrastructure state was not saved"),
        }
        result
    }
}

/// Checkpoints the state of one node
///
/// `settings` is `None` for master nodes: their records carry no group
/// settings key. Checkpoints patch only the node's state and leave settings
/// and labels untouched.
pub struct NodeStateSaver {
    store: Arc<dyn ObjectStore>,
    layout: StateLayout,
    policy: RetryPolicy,
    cancel: CancellationToken,
    node_name: String,
    node_group: String,
    settings: Option<Vec<u8>>,
}

impl NodeStateSaver {
    /// Create a saver for one node
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` if the node name cannot be used
    /// in a record name or the group is empty.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        layout: StateLayout,
        policy: RetryPolicy,
        cancel: CancellationToken,
        node_name: impl Into<String>,
        node_group: impl Into<String>,
        settings: Option<Vec<u8>>,
    ) -> Result<Self, SyncError> {
        let node_name = node_name.into();
        let node_group = node_group.into();
        Manifest::node_state(&node_name, &node_group, Vec::new(), None)?;

        Ok(Self {
            store,
            layout,
            policy,
            cancel,
            node_name,
            node_group,
            settings,
        })
    }
}

#[async_trait]
impl StateSink for NodeStateSaver {
    #[instrument(skip_all, name = "node_checkpoint", fields(node = %self.node_name))]
    async fn save_state(&self, outputs: Option<&ProvisioningOutputs>) -> Result<(), SyncError> {
        let Some(outputs) = with_state(outputs) else {
            return Ok(());
        };

        let record_name = node_state_record_name(&self.node_name)?;
        let task = UpsertTask::patch_or_create(
            format!("Secret {record_name:?}"),
            Manifest::NodeState {
                node_name: self.node_name.clone(),
                node_group: self.node_group.clone(),
                state: outputs.state.clone(),
                settings: self.settings.clone(),
            },
            node_state_patch(&outputs.state),
        );

        debug!("intermediate save of node state");
        let (task, store, layout) = (&task, self.store.as_ref(), &self.layout);
        let result = Loop::new(
            format!("Save intermediate Terraform state for Node {:?}", self.node_name),
            self.policy,
            &self.cancel,
        )
        .silent()
        .run(move || task.run(store, layout))
        .await;

        match &result {
            Ok(()) => debug!("intermediate node state saved"),
            Err(e) => debug!(error = %e, "intermediate node state was not saved"),
        }
        result
    }
}
