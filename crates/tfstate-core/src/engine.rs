//! `StateSync`: entry point binding a store handle to the engine
//!
//! Final saves live in `persist`, reads in `reader`.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tfstate_store::ObjectStore;

use crate::config::{ReaderConfig, RetryPolicies};
use crate::error::SyncError;
use crate::manifest::{MASTER_NODE_GROUP, StateLayout};
use crate::saver::{ClusterStateSaver, NodeStateSaver};

/// State synchronization engine
///
/// Holds an explicit store handle; there is no process-wide store. Cloning
/// is cheap and clones share the handle.
#[derive(Clone)]
pub struct StateSync {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) layout: StateLayout,
    pub(crate) retry: RetryPolicies,
    pub(crate) reader: ReaderConfig,
}

impl fmt::Debug for StateSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSync")
            .field("store", &self.store.store_type())
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .field("reader", &self.reader)
            .finish()
    }
}

impl StateSync {
    /// Create an engine with default layout and retry budgets
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            layout: StateLayout::default(),
            retry: RetryPolicies::default(),
            reader: ReaderConfig::default(),
        }
    }

    /// Set the namespaces records live in
    #[must_use]
    pub fn with_layout(mut self, layout: StateLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set retry budgets
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Set fleet reader behaviour
    #[must_use]
    pub fn with_reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = reader;
        self
    }

    /// Store handle
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Namespaces in use
    #[must_use]
    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Retry budgets in use
    #[must_use]
    pub fn retry(&self) -> &RetryPolicies {
        &self.retry
    }

    /// Sink checkpointing the cluster-wide state
    #[must_use]
    pub fn cluster_saver(&self, cancel: &CancellationToken) -> ClusterStateSaver {
        ClusterStateSaver::new(
            Arc::clone(&self.store),
            self.layout.clone(),
            self.retry.checkpoint,
            cancel.clone(),
        )
    }

    /// Sink checkpointing a worker node's state
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` for unusable node or group names.
    pub fn node_saver(
        &self,
        node_name: &str,
        node_group: &str,
        settings: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<NodeStateSaver, SyncError> {
        NodeStateSaver::new(
            Arc::clone(&self.store),
            self.layout.clone(),
            self.retry.checkpoint,
            cancel.clone(),
            node_name,
            node_group,
            Some(settings),
        )
    }

    /// Sink checkpointing a master node's state
    ///
    /// # Errors
    /// Returns `SyncError::InvalidManifest` for an unusable node name.
    pub fn master_node_saver(
        &self,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeStateSaver, SyncError> {
        NodeStateSaver::new(
            Arc::clone(&self.store),
            self.layout.clone(),
            self.retry.checkpoint,
            cancel.clone(),
            node_name,
            MASTER_NODE_GROUP,
            None,
        )
    }
}
