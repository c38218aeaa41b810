//! Idempotent upsert of one record
//!
//! Both protocols are safe to replay from scratch: a create hitting an
//! existing record takes the update branch, a patch hitting a missing record
//! takes the create branch.

use tracing::debug;

use tfstate_store::{ObjectStore, RecordPatch, StoreError};

use crate::error::SyncError;
use crate::manifest::{Manifest, StateLayout};

/// How an upsert reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Create, then update on "already exists"
    CreateOrUpdate,
    /// Merge-patch, then create on "not found"
    PatchOrCreate,
}

#[derive(Debug, Clone)]
enum Strategy {
    CreateOrUpdate { update_patch: Option<RecordPatch> },
    PatchOrCreate { patch: RecordPatch },
}

/// One logical write of a record
///
/// Built fresh for each write since it carries the data to persist.
#[derive(Debug, Clone)]
pub struct UpsertTask {
    name: String,
    manifest: Manifest,
    strategy: Strategy,
}

impl UpsertTask {
    /// Create the record, replacing the whole object if it already exists
    pub fn create_or_update(name: impl Into<String>, manifest: Manifest) -> Self {
        Self {
            name: name.into(),
            manifest,
            strategy: Strategy::CreateOrUpdate { update_patch: None },
        }
    }

    /// Merge-patch the record, creating the full object if it is missing
    pub fn patch_or_create(
        name: impl Into<String>,
        manifest: Manifest,
        patch: RecordPatch,
    ) -> Self {
        Self {
            name: name.into(),
            manifest,
            strategy: Strategy::PatchOrCreate { patch },
        }
    }

    /// For create-or-update: apply `patch` instead of a whole-object update
    ///
    /// Used for records shared between writers that own disjoint keys.
    #[must_use]
    pub fn update_with_patch(mut self, patch: RecordPatch) -> Self {
        if let Strategy::CreateOrUpdate { update_patch } = &mut self.strategy {
            *update_patch = Some(patch);
        }
        self
    }

    /// Human-readable task name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol in use
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        match self.strategy {
            Strategy::CreateOrUpdate { .. } => Protocol::CreateOrUpdate,
            Strategy::PatchOrCreate { .. } => Protocol::PatchOrCreate,
        }
    }

    fn fail(&self, source: StoreError) -> SyncError {
        SyncError::Task {
            task: self.name.clone(),
            source,
        }
    }

    /// Execute one attempt of the write
    ///
    /// # Errors
    /// Returns `SyncError::Task` naming this task with the store failure
    /// that was not absorbed by the protocol's fallback branch.
    pub async fn run(
        &self,
        store: &dyn ObjectStore,
        layout: &StateLayout,
    ) -> Result<(), SyncError> {
        debug!(
            task = %self.name,
            protocol = ?self.protocol(),
            record = %self.manifest.key(layout),
            "upserting"
        );
        match &self.strategy {
            Strategy::CreateOrUpdate { update_patch } => {
                let record = self.manifest.to_record(layout);
                match store.create(&record).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_already_exists() => {
                        debug!(task = %self.name, "record exists, updating");
                        let updated = match update_patch {
                            Some(patch) => store.merge_patch(&record.key, patch).await,
                            None => store.update(&record).await,
                        };
                        updated.map(|_| ()).map_err(|e| self.fail(e))
                    }
                    Err(e) => Err(self.fail(e)),
                }
            }
            Strategy::PatchOrCreate { patch } => {
                let key = self.manifest.key(layout);
                match store.merge_patch(&key, patch).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_not_found() => {
                        debug!(task = %self.name, "record missing, creating");
                        store
                            .create(&self.manifest.to_record(layout))
                            .await
                            .map(|_| ())
                            .map_err(|e| self.fail(e))
                    }
                    Err(e) => Err(self.fail(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tfstate_store::{
        LabelSelector, MemoryStore, Record, RecordKey, RecordKind, Result as StoreResult,
    };

    use super::*;
    use crate::manifest::{keys, node_state_patch};

    /// Counts calls per operation in front of a `MemoryStore`
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        creates: AtomicU32,
        updates: AtomicU32,
        patches: AtomicU32,
    }

    impl CountingStore {
        fn counts(&self) -> (u32, u32, u32) {
            (
                self.creates.load(Ordering::SeqCst),
                self.updates.load(Ordering::SeqCst),
                self.patches.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn get(&self, key: &RecordKey) -> StoreResult<Record> {
            self.inner.get(key).await
        }

        async fn list(
            &self,
            kind: RecordKind,
            namespace: &str,
            selector: &LabelSelector,
        ) -> StoreResult<Vec<Record>> {
            self.inner.list(kind, namespace, selector).await
        }

        async fn create(&self, record: &Record) -> StoreResult<Record> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(record).await
        }

        async fn update(&self, record: &Record) -> StoreResult<Record> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(record).await
        }

        async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> StoreResult<Record> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            self.inner.merge_patch(key, patch).await
        }

        async fn delete(&self, key: &RecordKey) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        fn store_type(&self) -> &'static str {
            "counting"
        }
    }

    fn node(state: &[u8]) -> Manifest {
        Manifest::node_state("worker-0", "worker", state.to_vec(), Some(b"{}".to_vec())).unwrap()
    }

    #[tokio::test]
    async fn test_create_or_update_absent_target() {
        let store = CountingStore::default();
        let layout = StateLayout::default();

        UpsertTask::create_or_update("node", node(b"1"))
            .run(&store, &layout)
            .await
            .unwrap();

        assert_eq!(store.counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_create_or_update_present_target() {
        let store = CountingStore::default();
        let layout = StateLayout::default();
        store.inner.insert(node(b"1").to_record(&layout)).await;

        UpsertTask::create_or_update("node", node(b"2"))
            .run(&store, &layout)
            .await
            .unwrap();

        assert_eq!(store.counts(), (1, 1, 0));
        let stored = store.inner.peek(&node(b"2").key(&layout)).await.unwrap();
        assert_eq!(stored.data(keys::NODE_STATE), Some(&b"2"[..]));
    }

    #[tokio::test]
    async fn test_create_or_update_with_patch_update() {
        let store = CountingStore::default();
        let layout = StateLayout::default();
        store.inner.insert(node(b"1").to_record(&layout)).await;

        UpsertTask::create_or_update("node", node(b"2"))
            .update_with_patch(node_state_patch(b"3"))
            .run(&store, &layout)
            .await
            .unwrap();

        assert_eq!(store.counts(), (1, 0, 1));
        let stored = store.inner.peek(&node(b"2").key(&layout)).await.unwrap();
        assert_eq!(stored.data(keys::NODE_STATE), Some(&b"3"[..]));
    }

    #[tokio::test]
    async fn test_patch_or_create_present_target() {
        let store = CountingStore::default();
        let layout = StateLayout::default();
        store.inner.insert(node(b"1").to_record(&layout)).await;

        UpsertTask::patch_or_create("node", node(b"2"), node_state_patch(b"2"))
            .run(&store, &layout)
            .await
            .unwrap();

        assert_eq!(store.counts(), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_patch_or_create_absent_target() {
        let store = CountingStore::default();
        let layout = StateLayout::default();

        let task = UpsertTask::patch_or_create("node", node(b"2"), node_state_patch(b"2"));
        assert_eq!(task.protocol(), Protocol::PatchOrCreate);
        task.run(&store, &layout).await.unwrap();

        assert_eq!(store.counts(), (1, 0, 1));
        let stored = store.inner.peek(&node(b"2").key(&layout)).await.unwrap();
        assert_eq!(stored.data(keys::NODE_GROUP_SETTINGS), Some(&b"{}"[..]));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let store = CountingStore::default();
        let layout = StateLayout::default();
        let task = UpsertTask::create_or_update("node", node(b"1"));

        task.run(&store, &layout).await.unwrap();
        task.run(&store, &layout).await.unwrap();

        assert_eq!(store.inner.len().await, 1);
        assert_eq!(store.counts(), (2, 1, 0));
    }

    #[tokio::test]
    async fn test_failure_names_task() {
        struct Down;

        #[async_trait]
        impl ObjectStore for Down {
            async fn get(&self, key: &RecordKey) -> StoreResult<Record> {
                Err(StoreError::NotFound(key.clone()))
            }
            async fn list(
                &self,
                _kind: RecordKind,
                _namespace: &str,
                _selector: &LabelSelector,
            ) -> StoreResult<Vec<Record>> {
                Ok(Vec::new())
            }
            async fn create(&self, _record: &Record) -> StoreResult<Record> {
                Err(StoreError::Transport("connection refused".to_string()))
            }
            async fn update(&self, _record: &Record) -> StoreResult<Record> {
                Err(StoreError::Transport("connection refused".to_string()))
            }
            async fn merge_patch(
                &self,
                _key: &RecordKey,
                _patch: &RecordPatch,
            ) -> StoreResult<Record> {
                Err(StoreError::Transport("connection refused".to_string()))
            }
            async fn delete(&self, _key: &RecordKey) -> StoreResult<()> {
                Ok(())
            }
            fn store_type(&self) -> &'static str {
                "down"
            }
        }

        let name = r#"Secret "d8-node-terraform-state-worker-0""#;
        let err = UpsertTask::create_or_update(name, node(b"1"))
            .run(&Down, &StateLayout::default())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(err.to_string().starts_with(&format!("{name}: ")));
    }
}
