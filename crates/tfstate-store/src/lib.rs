//! tfstate-store: Remote object store abstraction
//!
//! Provides the record model, the `ObjectStore` trait and two
//! implementations: an in-memory store and a Kubernetes-compatible HTTP store.

pub mod error;
pub mod kube;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{Result, StoreError};
pub use kube::KubeStore;
pub use memory::MemoryStore;
pub use record::{LabelSelector, Record, RecordKey, RecordKind, RecordPatch};
pub use traits::ObjectStore;
