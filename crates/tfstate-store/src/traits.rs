//! Object store trait

use async_trait::async_trait;

use crate::error::Result;
use crate::record::{LabelSelector, Record, RecordKey, RecordKind, RecordPatch};

/// Client of a namespaced, eventually-consistent object store
///
/// Implementations must report absent targets as `StoreError::NotFound`
/// and duplicate creates as `StoreError::AlreadyExists`; the upsert
/// protocols branch on exactly those two conditions.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a record by address
    async fn get(&self, key: &RecordKey) -> Result<Record>;

    /// List records of a kind in a namespace matching the selector
    async fn list(
        &self,
        kind: RecordKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Record>>;

    /// Create a record, failing if it already exists
    async fn create(&self, record: &Record) -> Result<Record>;

    /// Replace a whole record, failing if it does not exist
    async fn update(&self, record: &Record) -> Result<Record>;

    /// Merge-patch a record, failing if it does not exist
    async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> Result<Record>;

    /// Delete a record
    async fn delete(&self, key: &RecordKey) -> Result<()>;

    /// Short backend name for logs
    fn store_type(&self) -> &'static str;
}
