//! Record shapes persisted by the engine
//!
//! Names, labels and data keys are a persisted contract shared with other
//! readers of the control plane and must stay stable across versions.

use serde::{Deserialize, Serialize};

use tfstate_store::{LabelSelector, Record, RecordKey, RecordKind, RecordPatch};

use crate::error::SyncError;

/// Prefix of per-node state secrets
pub const NODE_STATE_PREFIX: &str = "d8-node-terraform-state-";
/// Cluster-wide state secret
pub const CLUSTER_STATE_NAME: &str = "d8-cluster-terraform-state";
/// Secret mapping master node names to their data device path
pub const MASTERS_DEVICE_PATH_NAME: &str = "d8-masters-kubernetes-data-device-path";
/// Config map holding the cluster identity
pub const CLUSTER_UUID_NAME: &str = "d8-cluster-uuid";
/// Node group every master node belongs to
pub const MASTER_NODE_GROUP: &str = "master";

/// Label names
pub mod labels {
    /// Node name of a node-state record
    pub const NODE_NAME: &str = "node.deckhouse.io/node-name";
    /// Node group of a node-state record
    pub const NODE_GROUP: &str = "node.deckhouse.io/node-group";
    /// Marks node-state records, value is empty
    pub const TERRAFORM_STATE: &str = "node.deckhouse.io/terraform-state";
    /// Owner marker
    pub const HERITAGE: &str = "heritage";
    /// Value of the owner marker
    pub const HERITAGE_VALUE: &str = "deckhouse";
}

/// Data keys
pub mod keys {
    /// Node terraform state
    pub const NODE_STATE: &str = "node-tf-state.json";
    /// Node group settings, absent for masters
    pub const NODE_GROUP_SETTINGS: &str = "node-group-settings.json";
    /// Cluster terraform state
    pub const CLUSTER_STATE: &str = "cluster-tf-state.json";
    /// Cloud provider discovery data
    pub const CLOUD_DISCOVERY: &str = "cloud-provider-discovery-data.json";
    /// Cluster identity
    pub const CLUSTER_UUID: &str = "cluster-uuid";
}

/// Namespaces records are written to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLayout {
    /// Namespace of state secrets
    #[serde(default = "default_state_namespace")]
    pub state_namespace: String,
    /// Namespace of the cluster identity record
    #[serde(default = "default_system_namespace")]
    pub system_namespace: String,
}

fn default_state_namespace() -> String {
    "d8-system".to_string()
}

fn default_system_namespace() -> String {
    "kube-system".to_string()
}

impl Default for StateLayout {
    fn default() -> Self {
        Self {
            state_namespace: default_state_namespace(),
            system_namespace: default_system_namespace(),
        }
    }
}

impl StateLayout {
    /// Key of the cluster-wide state record
    #[must_use]
    pub fn cluster_state_key(&self) -> RecordKey {
        RecordKey::new(RecordKind::Secret, &self.state_namespace, CLUSTER_STATE_NAME)
    }

    /// Key of the cluster identity record
    #[must_use]
    pub fn cluster_uuid_key(&self) -> RecordKey {
        RecordKey::new(RecordKind::ConfigMap, &self.system_namespace, CLUSTER_UUID_NAME)
    }

    /// Key of a state secret by record name
    #[must_use]
    pub fn state_key(&self, name: impl Into<String>) -> RecordKey {
        RecordKey::new(RecordKind::Secret, &self.state_namespace, name)
    }
}

/// Every record shape the engine writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Per-node state
    NodeState {
        /// Node name
        node_name: String,
        /// Node group name
        node_group: String,
        /// Terraform state
        state: Vec<u8>,
        /// Group settings, `None` for master nodes
        settings: Option<Vec<u8>>,
    },
    /// Cluster-wide state
    ClusterState {
        /// Terraform state
        state: Vec<u8>,
        /// Cloud provider discovery data
        cloud_discovery: Vec<u8>,
    },
    /// Data device path of one master node
    MasterDevicePath {
        /// Master node name
        node_name: String,
        /// Device path
        device_path: Vec<u8>,
    },
    /// Cluster identity
    ClusterUuid {
        /// Cluster UUID
        uuid: String,
    },
}

impl Manifest {
    /// Per-node state with validated node name and group
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` if the node name cannot be used
    /// in a record name, or either value cannot be used as a label value.
    pub fn node_state(
        node_name: &str,
        node_group: &str,
        state: Vec<u8>,
        settings: Option<Vec<u8>>,
    ) -> Result<Self, SyncError> {
        node_state_record_name(node_name)?;
        validate_label_value("node name", node_name)?;
        validate_label_value("node group", node_group)?;
        Ok(Manifest::NodeState {
            node_name: node_name.to_string(),
            node_group: node_group.to_string(),
            state,
            settings,
        })
    }

    /// Address of the record
    #[must_use]
    pub fn key(&self, layout: &StateLayout) -> RecordKey {
        match self {
            Manifest::NodeState { node_name, .. } => {
                layout.state_key(format!("{NODE_STATE_PREFIX}{node_name}"))
            }
            Manifest::ClusterState { .. } => layout.cluster_state_key(),
            Manifest::MasterDevicePath { .. } => layout.state_key(MASTERS_DEVICE_PATH_NAME),
            Manifest::ClusterUuid { .. } => layout.cluster_uuid_key(),
        }
    }

    /// Full record, used for create and whole-object update
    #[must_use]
    pub fn to_record(&self, layout: &StateLayout) -> Record {
        let record = Record::new(self.key(layout))
            .with_label(labels::HERITAGE, labels::HERITAGE_VALUE);

        match self {
            Manifest::NodeState {
                node_name,
                node_group,
                state,
                settings,
            } => {
                let record = record
                    .with_label(labels::NODE_NAME, node_name)
                    .with_label(labels::NODE_GROUP, node_group)
                    .with_label(labels::TERRAFORM_STATE, "")
                    .with_data(keys::NODE_STATE, state.clone());
                match settings {
                    Some(settings) => record.with_data(keys::NODE_GROUP_SETTINGS, settings.clone()),
                    None => record,
                }
            }
            Manifest::ClusterState {
                state,
                cloud_discovery,
            } => {
                let record = record.with_data(keys::CLUSTER_STATE, state.clone());
                if cloud_discovery.is_empty() {
                    record
                } else {
                    record.with_data(keys::CLOUD_DISCOVERY, cloud_discovery.clone())
                }
            }
            Manifest::MasterDevicePath {
                node_name,
                device_path,
            } => record.with_data(node_name, device_path.clone()),
            Manifest::ClusterUuid { uuid } => record.with_data(keys::CLUSTER_UUID, uuid.clone()),
        }
    }
}

/// Record name of a node's state secret
///
/// # Errors
/// Returns `SyncError::InvalidManifest` unless the node name is a valid
/// RFC 1123 subdomain and the resulting name fits 253 characters.
pub fn node_state_record_name(node_name: &str) -> Result<String, SyncError> {
    let invalid = |reason: &str| {
        Err(SyncError::InvalidManifest(format!(
            "node name {node_name:?} {reason}"
        )))
    };

    if node_name.is_empty() {
        return invalid("is empty");
    }
    let name = format!("{NODE_STATE_PREFIX}{node_name}");
    if name.len() > 253 {
        return invalid("is too long");
    }
    if !node_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return invalid("must consist of lower case alphanumerics, '-' or '.'");
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(node_name.chars().next()) || !edge_ok(node_name.chars().last()) {
        return invalid("must start and end with an alphanumeric character");
    }
    Ok(name)
}

/// Longest label value the API server accepts
pub const LABEL_VALUE_MAX_LEN: usize = 63;

/// Check a non-empty label value against the API server's rules
///
/// # Errors
/// Returns `SyncError::InvalidManifest` unless `value` is at most 63
/// characters of `[A-Za-z0-9._-]` starting and ending alphanumeric.
pub fn validate_label_value(what: &str, value: &str) -> Result<(), SyncError> {
    let invalid = |reason: &str| {
        Err(SyncError::InvalidManifest(format!("{what} {value:?} {reason}")))
    };

    if value.is_empty() {
        return invalid("is empty");
    }
    if value.len() > LABEL_VALUE_MAX_LEN {
        return invalid("is longer than 63 characters");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("must consist of alphanumerics, '-', '_' or '.'");
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(value.chars().next()) || !edge_ok(value.chars().last()) {
        return invalid("must start and end with an alphanumeric character");
    }
    Ok(())
}

/// Selector matching every node-state record
#[must_use]
pub fn node_state_selector() -> LabelSelector {
    LabelSelector::everything().exists(labels::TERRAFORM_STATE)
}

/// Patch replacing only a node's terraform state
#[must_use]
pub fn node_state_patch(state: &[u8]) -> RecordPatch {
    RecordPatch::new().set_data(keys::NODE_STATE, state.to_vec())
}

/// Patch replacing only the cluster terraform state
#[must_use]
pub fn cluster_state_patch(state: &[u8]) -> RecordPatch {
    RecordPatch::new().set_data(keys::CLUSTER_STATE, state.to_vec())
}

/// Patch replacing only one master's device path
#[must_use]
pub fn device_path_patch(node_name: &str, device_path: &[u8]) -> RecordPatch {
    RecordPatch::new().set_data(node_name, device_path.to_vec())
}
