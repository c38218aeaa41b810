//! Final, authoritative persistence
//!
//! Same record shapes as the checkpoint sinks, written with
//! create-or-update under the final retry budget. Failures propagate: the
//! caller must not carry on believing infrastructure is recorded when it
//! is not.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::aggregate::ErrorCollector;
use crate::engine::StateSync;
use crate::error::SyncError;
use crate::manifest::{
    CLUSTER_STATE_NAME, MASTER_NODE_GROUP, MASTERS_DEVICE_PATH_NAME, Manifest, device_path_patch,
    node_state_record_name,
};
use crate::outputs::{ProvisioningOutputs, with_state};
use crate::retry::Loop;
use crate::task::UpsertTask;

impl StateSync {
    async fn upsert(
        &self,
        loop_name: String,
        task: UpsertTask,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let (task, store, layout) = (&task, self.store.as_ref(), &self.layout);
        Loop::new(loop_name, self.retry.final_save, cancel)
            .run(move || task.run(store, layout))
            .await
    }

    /// Create a node's record holding group settings only
    ///
    /// Called before provisioning starts, so checkpoints find the record in
    /// place and only patch its state.
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` for unusable names, otherwise
    /// the retry loop's error.
    #[instrument(skip(self, settings, cancel), fields(node = %node_name, group = %node_group))]
    pub async fn create_node_state(
        &self,
        node_name: &str,
        node_group: &str,
        settings: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let manifest =
            Manifest::node_state(node_name, node_group, Vec::new(), Some(settings.to_vec()))?;
        let record_name = node_state_record_name(node_name)?;

        self.upsert(
            format!("Create Terraform state for Node {node_name:?}"),
            UpsertTask::create_or_update(format!("Secret {record_name:?}"), manifest),
            cancel,
        )
        .await
    }

    /// Save a worker node's final state
    ///
    /// # Errors
    /// Returns `SyncError::NoState` for empty state,
    /// `SyncError::InvalidManifest` for unusable names, otherwise the retry
    /// loop's error.
    #[instrument(
        skip(self, state, settings, cancel),
        fields(node = %node_name, group = %node_group)
    )]
    pub async fn save_node_state(
        &self,
        node_name: &str,
        node_group: &str,
        state: &[u8],
        settings: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if state.is_empty() {
            return Err(SyncError::NoState);
        }
        let manifest = Manifest::node_state(
            node_name,
            node_group,
            state.to_vec(),
            settings.map(<[u8]>::to_vec),
        )?;
        let record_name = node_state_record_name(node_name)?;

        self.upsert(
            format!("Save Terraform state for Node {node_name:?}"),
            UpsertTask::create_or_update(format!("Secret {record_name:?}"), manifest),
            cancel,
        )
        .await
    }

    /// Save a master node's final state and data device path
    ///
    /// Both records are attempted on every try; failures are reported
    /// together. The device-path record is shared by all masters and is
    /// updated by merge-patch so that each master owns only its key.
    ///
    /// # Errors
    /// Returns `SyncError::NoState` for empty state,
    /// `SyncError::InvalidManifest` for an unusable name, otherwise the
    /// retry loop's error wrapping `SyncError::Aggregate`.
    #[instrument(skip(self, state, device_path, cancel), fields(node = %node_name))]
    pub async fn save_master_node_state(
        &self,
        node_name: &str,
        state: &[u8],
        device_path: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if state.is_empty() {
            return Err(SyncError::NoState);
        }
        let record_name = node_state_record_name(node_name)?;

        let tasks = [
            UpsertTask::create_or_update(
                format!("Secret {record_name:?}"),
                Manifest::node_state(node_name, MASTER_NODE_GROUP, state.to_vec(), None)?,
            ),
            UpsertTask::create_or_update(
                format!("Secret {MASTERS_DEVICE_PATH_NAME:?}"),
                Manifest::MasterDevicePath {
                    node_name: node_name.to_string(),
                    device_path: device_path.to_vec(),
                },
            )
            .update_with_patch(device_path_patch(node_name, device_path)),
        ];

        let (tasks, store, layout) = (&tasks, self.store.as_ref(), &self.layout);
        Loop::new(
            format!("Save Terraform state for master Node {node_name}"),
            self.retry.final_save,
            cancel,
        )
        .run(move || async move {
            let mut errors = ErrorCollector::new();
            for task in tasks {
                errors.push(task.run(store, layout).await);
            }
            errors.finish()
        })
        .await
    }

    /// Save the cluster-wide final state
    ///
    /// # Errors
    /// Returns `SyncError::NoState` for absent or empty outputs, otherwise
    /// the retry loop's error.
    #[instrument(skip_all)]
    pub async fn save_cluster_state(
        &self,
        outputs: Option<&ProvisioningOutputs>,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let Some(outputs) = with_state(outputs) else {
            return Err(SyncError::NoState);
        };

        self.upsert(
            "Save Cluster Terraform state".to_string(),
            UpsertTask::create_or_update(
                format!("Secret {CLUSTER_STATE_NAME:?}"),
                Manifest::ClusterState {
                    state: outputs.state.clone(),
                    cloud_discovery: outputs.cloud_discovery.clone(),
                },
            ),
            cancel,
        )
        .await
    }

    /// Delete a state record by name
    ///
    /// A record that is already gone counts as deleted.
    ///
    /// # Errors
    /// Returns the retry loop's error.
    #[instrument(skip(self, cancel))]
    pub async fn delete_state(
        &self,
        record_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let key = self.layout.state_key(record_name);
        let (key, store) = (&key, self.store.as_ref());

        Loop::new(
            format!("Delete Terraform state {record_name}"),
            self.retry.final_save,
            cancel,
        )
        .run(move || async move {
            match store.delete(key).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => {
                    info!(record = %key, "state record already absent");
                    Ok(())
                }
                Err(e) => Err(SyncError::Store(e)),
            }
        })
        .await
    }

    /// Delete a node's state record
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` for an unusable name, otherwise
    /// the retry loop's error.
    pub async fn delete_node_state(
        &self,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let record_name = node_state_record_name(node_name)?;
        self.delete_state(&record_name, cancel).await
    }
}
