//! Fleet state reader
//!
//! Reconstructs node group state and cluster state from durable records.
//! Every read runs under the read retry budget and builds its result from
//! scratch, so a failed attempt never leaks partial data.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use tfstate_store::{Record, RecordKind};

use crate::engine::StateSync;
use crate::error::SyncError;
use crate::manifest::{keys, labels, node_state_selector};
use crate::retry::Loop;

/// State of all nodes of one group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeGroupState {
    /// Terraform state per node name
    pub state: BTreeMap<String, Vec<u8>>,
    /// Group settings shared by the nodes, `None` for masters
    pub settings: Option<Vec<u8>>,
}

impl StateSync {
    /// Read state of every node, grouped by node group
    ///
    /// # Errors
    /// Returns `SyncError::MissingIdentity` for a node record without node
    /// name or group label, `SyncError::SettingsMismatch` in strict mode, or
    /// the retry loop's error.
    #[instrument(skip_all)]
    pub async fn nodes_state(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, NodeGroupState>, SyncError> {
        let (store, namespace, strict) = (
            self.store.as_ref(),
            self.layout.state_namespace.as_str(),
            self.reader.strict_group_settings,
        );

        Loop::new(
            "Get Nodes Terraform state from Kubernetes cluster",
            self.retry.read,
            cancel,
        )
        .run(move || async move {
            let records = store
                .list(RecordKind::Secret, namespace, &node_state_selector())
                .await?;
            group_node_records(records, strict)
        })
        .await
    }

    /// Read the cluster-wide state
    ///
    /// An absent record means no infrastructure has been provisioned yet and
    /// reads as empty state.
    ///
    /// # Errors
    /// Returns the retry loop's error.
    #[instrument(skip_all)]
    pub async fn cluster_state(&self, cancel: &CancellationToken) -> Result<Vec<u8>, SyncError> {
        let key = self.layout.cluster_state_key();
        let (key, store) = (&key, self.store.as_ref());

        Loop::new(
            "Get Cluster Terraform state from Kubernetes cluster",
            self.retry.read,
            cancel,
        )
        .run(move || async move {
            match store.get(key).await {
                Ok(record) => Ok(record
                    .data(keys::CLUSTER_STATE)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default()),
                Err(e) if e.is_not_found() => {
                    info!(record = %key, "no cluster state stored yet");
                    Ok(Vec::new())
                }
                Err(e) => Err(SyncError::Store(e)),
            }
        })
        .await
    }

    /// Read the cluster identity
    ///
    /// # Errors
    /// Returns `SyncError::InvalidRecord` if the identity record carries no
    /// UTF-8 UUID, otherwise the retry loop's error.
    #[instrument(skip_all)]
    pub async fn cluster_uuid(&self, cancel: &CancellationToken) -> Result<String, SyncError> {
        let key = self.layout.cluster_uuid_key();
        let (key, store) = (&key, self.store.as_ref());

        Loop::new(
            "Get Cluster UUID from the Kubernetes cluster",
            self.retry.read,
            cancel,
        )
        .run(move || async move {
            let record = store.get(key).await?;
            let invalid = |reason: &str| SyncError::InvalidRecord {
                record: record.name().to_string(),
                reason: reason.to_string(),
            };

            let raw = record
                .data(keys::CLUSTER_UUID)
                .ok_or_else(|| invalid("no cluster-uuid key"))?;
            String::from_utf8(raw.to_vec()).map_err(|_| invalid("cluster-uuid is not UTF-8"))
        })
        .await
    }
}

/// Group listed node records by node group
///
/// Records are processed in record-name order; the settings of the last
/// record of a group win.
///
/// # Errors
/// Returns `SyncError::MissingIdentity` for a record without node name or
/// group label, and `SyncError::SettingsMismatch` in strict mode when nodes
/// of one group carry different settings.
pub fn group_node_records(
    mut records: Vec<Record>,
    strict: bool,
) -> Result<BTreeMap<String, NodeGroupState>, SyncError> {
    records.sort_by(|a, b| a.name().cmp(b.name()));

    let mut groups: BTreeMap<String, NodeGroupState> = BTreeMap::new();
    // group -> node whose settings are currently kept
    let mut settings_owner: BTreeMap<String, String> = BTreeMap::new();

    for record in records {
        let Some(node_name) = record.label(labels::NODE_NAME) else {
            return Err(SyncError::MissingIdentity {
                record: record.name().to_string(),
                label: "node name",
            });
        };
        let Some(node_group) = record.label(labels::NODE_GROUP) else {
            return Err(SyncError::MissingIdentity {
                record: record.name().to_string(),
                label: "node group",
            });
        };

        let state = record.data(keys::NODE_STATE).unwrap_or_default();
        let settings = record.data(keys::NODE_GROUP_SETTINGS);
        info!(group = node_group, node = node_name, bytes = state.len(), "node state found");

        let group = groups.entry(node_group.to_string()).or_default();
        if let Some(owner) = settings_owner.get(node_group)
            && group.settings.as_deref() != settings
        {
            if strict {
                return Err(SyncError::SettingsMismatch {
                    group: node_group.to_string(),
                    first: owner.clone(),
                    second: node_name.to_string(),
                });
            }
            warn!(
                group = node_group,
                node = node_name,
                previous = %owner,
                "node group settings differ between nodes, using the latest"
            );
        }

        group.state.insert(node_name.to_string(), state.to_vec());
        group.settings = settings.map(<[u8]>::to_vec);
        settings_owner.insert(node_group.to_string(), node_name.to_string());
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use tfstate_store::RecordKey;

    use super::*;
    use crate::manifest::{MASTER_NODE_GROUP, Manifest, StateLayout};

    fn node(name: &str, group: &str, state: &[u8], settings: Option<&[u8]>) -> Record {
        Manifest::node_state(name, group, state.to_vec(), settings.map(<[u8]>::to_vec))
            .unwrap()
            .to_record(&StateLayout::default())
    }

    #[test]
    fn test_groups_nodes() {
        let records = vec![
            node("b", "worker", b"B", Some(b"S")),
            node("master-0", MASTER_NODE_GROUP, b"M", None),
            node("a", "worker", b"A", Some(b"S")),
        ];

        let groups = group_node_records(records, true).unwrap();

        assert_eq!(groups.len(), 2);
        let worker = &groups["worker"];
        assert_eq!(worker.state["a"], b"A");
        assert_eq!(worker.state["b"], b"B");
        assert_eq!(worker.settings.as_deref(), Some(&b"S"[..]));
        assert_eq!(groups["master"].settings, None);
    }

    #[test]
    fn test_last_record_name_wins_on_mismatch() {
        let records = vec![
            node("b", "worker", b"B", Some(b"new")),
            node("a", "worker", b"A", Some(b"old")),
        ];

        let groups = group_node_records(records, false).unwrap();

        assert_eq!(groups["worker"].settings.as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_strict_mismatch_fails() {
        let records = vec![
            node("a", "worker", b"A", Some(b"old")),
            node("b", "worker", b"B", Some(b"new")),
        ];

        let err = group_node_records(records, true).unwrap_err();

        assert!(matches!(
            err,
            SyncError::SettingsMismatch { ref group, ref first, ref second }
                if group == "worker" && first == "a" && second == "b"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_labels() {
        let mut record = node("a", "worker", b"A", None);
        record.labels.remove(labels::NODE_NAME);
        let err = group_node_records(vec![record], false).unwrap_err();
        assert!(matches!(err, SyncError::MissingIdentity { label: "node name", .. }));

        let mut record = node("a", "worker", b"A", None);
        record.labels.insert(labels::NODE_GROUP.to_string(), String::new());
        let err = group_node_records(vec![record], false).unwrap_err();
        assert!(matches!(err, SyncError::MissingIdentity { label: "node group", .. }));
        assert_eq!(
            err.to_string(),
            "can't determine node group for \"d8-node-terraform-state-a\" secret"
        );
    }

    #[test]
    fn test_record_without_state_key_reads_empty() {
        let record = Record::new(RecordKey::new(RecordKind::Secret, "d8-system", "x"))
            .with_label(labels::NODE_NAME, "x")
            .with_label(labels::NODE_GROUP, "worker");

        let groups = group_node_records(vec![record], false).unwrap();

        assert!(groups["worker"].state["x"].is_empty());
    }
}
