//! Shared test stores

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tfstate_core::{RetryPolicies, RetryPolicy, StateSync};
use tfstate_store::{
    LabelSelector, MemoryStore, ObjectStore, Record, RecordKey, RecordKind, RecordPatch,
    Result, StoreError,
};

/// Retry budget that keeps tests fast
pub fn fast_retry() -> RetryPolicies {
    RetryPolicies::uniform(RetryPolicy::new(2, Duration::from_millis(1)))
}

/// Engine over a fresh memory store
pub fn engine() -> (StateSync, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let sync = StateSync::new(store.clone()).with_retry(fast_retry());
    (sync, store)
}

/// Memory store that counts write calls
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
    pub patches: AtomicU32,
    pub deletes: AtomicU32,
}

impl CountingStore {
    pub fn writes(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.patches.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn get(&self, key: &RecordKey) -> Result<Record> {
        self.inner.get(key).await
    }

    async fn list(
        &self,
        kind: RecordKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Record>> {
        self.inner.list(kind, namespace, selector).await
    }

    async fn create(&self, record: &Record) -> Result<Record> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(record).await
    }

    async fn update(&self, record: &Record) -> Result<Record> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(record).await
    }

    async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> Result<Record> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        self.inner.merge_patch(key, patch).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    fn store_type(&self) -> &'static str {
        "counting"
    }
}

/// Memory store whose writes to one record name always fail
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub broken: String,
    /// API status to fail with, transport failure when unset
    pub status: Option<u16>,
    pub failures: AtomicU32,
}

impl FaultyStore {
    pub fn new(broken: impl Into<String>) -> Self {
        Self {
            inner: MemoryStore::new(),
            broken: broken.into(),
            status: None,
            failures: AtomicU32::new(0),
        }
    }

    /// Fail writes to `broken` with an API error of `status`
    pub fn rejecting(broken: impl Into<String>, status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::new(broken)
        }
    }

    fn check(&self, key: &RecordKey) -> Result<()> {
        if key.name != self.broken {
            return Ok(());
        }
        self.failures.fetch_add(1, Ordering::SeqCst);
        Err(match self.status {
            Some(status) => StoreError::Api {
                status,
                message: format!("{key} is invalid"),
            },
            None => StoreError::Transport(format!("{key}: connection reset")),
        })
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn get(&self, key: &RecordKey) -> Result<Record> {
        self.inner.get(key).await
    }

    async fn list(
        &self,
        kind: RecordKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Record>> {
        self.inner.list(kind, namespace, selector).await
    }

    async fn create(&self, record: &Record) -> Result<Record> {
        self.check(&record.key)?;
        self.inner.create(record).await
    }

    async fn update(&self, record: &Record) -> Result<Record> {
        self.check(&record.key)?;
        self.inner.update(record).await
    }

    async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> Result<Record> {
        self.check(key)?;
        self.inner.merge_patch(key, patch).await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.check(key)?;
        self.inner.delete(key).await
    }

    fn store_type(&self) -> &'static str {
        "faulty"
    }
}
