//! In-process object store

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::record::{LabelSelector, Record, RecordKey, RecordKind, RecordPatch};
use crate::traits::ObjectStore;

/// Object store kept in process memory
///
/// Follows the same not-found / already-exists rules as the remote API,
/// so it can stand in for it in tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordKey, Record>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record in place without create/update checks
    pub async fn insert(&self, record: Record) {
        self.records.write().await.insert(record.key.clone(), record);
    }

    /// Look up a record without going through the trait
    pub async fn peek(&self, key: &RecordKey) -> Option<Record> {
        self.records.read().await.get(key).cloned()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &RecordKey) -> Result<Record> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(
        &self,
        kind: RecordKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Record>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.key.kind == kind && r.key.namespace == namespace)
            .filter(|r| selector.matches(&r.labels))
            .cloned()
            .collect())
    }

    #[instrument(skip_all, fields(record = %record.key), level = "debug")]
    async fn create(&self, record: &Record) -> Result<Record> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key.clone()));
        }
        records.insert(record.key.clone(), record.clone());
        debug!("record created");
        Ok(record.clone())
    }

    #[instrument(skip_all, fields(record = %record.key), level = "debug")]
    async fn update(&self, record: &Record) -> Result<Record> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.key) {
            Some(existing) => {
                *existing = record.clone();
                debug!("record replaced");
                Ok(record.clone())
            }
            None => Err(StoreError::NotFound(record.key.clone())),
        }
    }

    #[instrument(skip_all, fields(record = %key), level = "debug")]
    async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> Result<Record> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        patch.apply_to(existing);
        debug!("record patched");
        Ok(existing.clone())
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.records
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
