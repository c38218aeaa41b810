//! Record types stored in the remote object store

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of record held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Opaque binary data
    Secret,
    /// UTF-8 data
    ConfigMap,
}

impl RecordKind {
    /// Collection name used in API paths
    #[must_use]
    pub fn plural(self) -> &'static str {
        match self {
            RecordKind::Secret => "secrets",
            RecordKind::ConfigMap => "configmaps",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Secret => f.write_str("Secret"),
            RecordKind::ConfigMap => f.write_str("ConfigMap"),
        }
    }
}

/// Address of a single record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record kind
    pub kind: RecordKind,
    /// Namespace the record lives in
    pub namespace: String,
    /// Record name, unique within kind and namespace
    pub name: String,
}

impl RecordKey {
    /// Create a new record key
    pub fn new(kind: RecordKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A named, labeled key-value object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record address
    pub key: RecordKey,
    /// Label set
    pub labels: BTreeMap<String, String>,
    /// Data section
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Record {
    /// Create an empty record at the given address
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// Set a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set a data entry
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Record name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Label value, treating an empty value as absent
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Data entry
    #[must_use]
    pub fn data(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Exists(String),
    Equals(String, String),
}

/// Conjunction of label requirements used to list records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector matching every record
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require the label to be present, whatever its value
    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    /// Require the label to have exactly this value
    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    /// Evaluate the selector against a label set
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
        })
    }

    /// Whether the selector has no requirements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match r {
                Requirement::Exists(k) => f.write_str(k)?,
                Requirement::Equals(k, v) => write!(f, "{k}={v}")?,
            }
        }
        Ok(())
    }
}

/// Merge-patch payload: only listed fields are touched
///
/// `Some` replaces the value, `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    /// Label changes
    pub labels: BTreeMap<String, Option<String>>,
    /// Data changes
    pub data: BTreeMap<String, Option<Vec<u8>>>,
}

impl RecordPatch {
    /// Create an empty patch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a data entry
    #[must_use]
    pub fn set_data(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove a data entry
    #[must_use]
    pub fn remove_data(mut self, key: impl Into<String>) -> Self {
        self.data.insert(key.into(), None);
        self
    }

    /// Whether applying the patch would change nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.data.is_empty()
    }

    /// Apply merge semantics to a record in place
    pub fn apply_to(&self, record: &mut Record) {
        for (k, v) in &self.labels {
            match v {
                Some(v) => {
                    record.labels.insert(k.clone(), v.clone());
                }
                None => {
                    record.labels.remove(k);
                }
            }
        }
        for (k, v) in &self.data {
            match v {
                Some(v) => {
                    record.data.insert(k.clone(), v.clone());
                }
                None => {
                    record.data.remove(k);
                }
            }
        }
    }
}
