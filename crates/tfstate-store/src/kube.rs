//! Object store backed by a Kubernetes-compatible HTTP API
//!
//! Records map onto core/v1 `Secret` and `ConfigMap` objects.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::error::{Result, StoreError};
use crate::record::{LabelSelector, Record, RecordKey, RecordKind, RecordPatch};
use crate::traits::ObjectStore;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// HTTP client for a Kubernetes-compatible API server
#[derive(Debug, Clone)]
pub struct KubeStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl KubeStore {
    /// Create a store talking to `server`
    ///
    /// # Errors
    /// Returns `StoreError::ConfigError` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(server: impl AsRef<str>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::ConfigError(e.to_string()))?;
        Self::with_client(server, client, token)
    }

    /// Create a store with a custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns `StoreError::ConfigError` if the URL is invalid.
    pub fn with_client(
        server: impl AsRef<str>,
        client: Client,
        token: Option<String>,
    ) -> Result<Self> {
        let base_url = Url::parse(server.as_ref())
            .map_err(|e| StoreError::ConfigError(format!("invalid server URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::ConfigError(format!(
                "{base_url} cannot be used as a base URL"
            )));
        }
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, kind: RecordKind, namespace: &str, name: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "v1", "namespaces", namespace, kind.plural()]);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        url
    }

    fn object_url(&self, key: &RecordKey) -> Url {
        self.url(key.kind, &key.namespace, Some(&key.name))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Turn a non-success response into the matching error
    async fn check(response: Response, key: Option<&RecordKey>) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(key, status, &body))
    }

    async fn send_object(&self, method: Method, url: Url, record: &Record) -> Result<Record> {
        let body = to_wire(record)?;
        let response = self.request(method, url).json(&body).send().await?;
        let response = Self::check(response, Some(&record.key)).await?;
        let object: WireObject = response.json().await?;
        from_wire(record.key.kind, &record.key.namespace, object)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    #[instrument(skip(self), fields(record = %key), level = "debug")]
    async fn get(&self, key: &RecordKey) -> Result<Record> {
        let response = self
            .request(Method::GET, self.object_url(key))
            .send()
            .await?;
        let response = Self::check(response, Some(key)).await?;
        let object: WireObject = response.json().await?;
        from_wire(key.kind, &key.namespace, object)
    }

    #[instrument(skip(self), fields(selector = %selector), level = "debug")]
    async fn list(
        &self,
        kind: RecordKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Record>> {
        let mut url = self.url(kind, namespace, None);
        if !selector.is_empty() {
            url.query_pairs_mut()
                .append_pair("labelSelector", &selector.to_string());
        }
        let response = self.request(Method::GET, url).send().await?;
        let response = Self::check(response, None).await?;
        let list: WireList = response.json().await?;
        debug!(count = list.items.len(), "listed records");
        list.items
            .into_iter()
            .map(|object| from_wire(kind, namespace, object))
            .collect()
    }

    #[instrument(skip_all, fields(record = %record.key), level = "debug")]
    async fn create(&self, record: &Record) -> Result<Record> {
        let url = self.url(record.key.kind, &record.key.namespace, None);
        self.send_object(Method::POST, url, record).await
    }

    #[instrument(skip_all, fields(record = %record.key), level = "debug")]
    async fn update(&self, record: &Record) -> Result<Record> {
        let url = self.object_url(&record.key);
        self.send_object(Method::PUT, url, record).await
    }

    #[instrument(skip_all, fields(record = %key), level = "debug")]
    async fn merge_patch(&self, key: &RecordKey, patch: &RecordPatch) -> Result<Record> {
        let body = patch_body(key.kind, patch)?;
        let response = self
            .request(Method::PATCH, self.object_url(key))
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let response = Self::check(response, Some(key)).await?;
        let object: WireObject = response.json().await?;
        from_wire(key.kind, &key.namespace, object)
    }

    #[instrument(skip(self), fields(record = %key), level = "debug")]
    async fn delete(&self, key: &RecordKey) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.object_url(key))
            .send()
            .await?;
        Self::check(response, Some(key)).await?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "kubernetes"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    metadata: WireMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMeta {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct WireList {
    #[serde(default)]
    items: Vec<WireObject>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStatus {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn encode_value(kind: RecordKind, value: &[u8]) -> Result<String> {
    match kind {
        RecordKind::Secret => Ok(STANDARD.encode(value)),
        RecordKind::ConfigMap => String::from_utf8(value.to_vec())
            .map_err(|_| StoreError::InvalidRecord("config map value is not UTF-8".to_string())),
    }
}

fn decode_value(kind: RecordKind, value: String) -> Result<Vec<u8>> {
    match kind {
        RecordKind::Secret => STANDARD
            .decode(value.as_bytes())
            .map_err(|e| StoreError::InvalidRecord(format!("bad base64 in secret data: {e}"))),
        RecordKind::ConfigMap => Ok(value.into_bytes()),
    }
}

fn to_wire(record: &Record) -> Result<WireObject> {
    let data = record
        .data
        .iter()
        .map(|(k, v)| Ok((k.clone(), encode_value(record.key.kind, v)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(WireObject {
        api_version: Some("v1".to_string()),
        kind: Some(record.key.kind.to_string()),
        metadata: WireMeta {
            name: record.key.name.clone(),
            namespace: Some(record.key.namespace.clone()),
            labels: Some(record.labels.clone()),
        },
        data: Some(data),
    })
}

fn from_wire(kind: RecordKind, namespace: &str, object: WireObject) -> Result<Record> {
    if object.metadata.name.is_empty() {
        return Err(StoreError::InvalidRecord("object without a name".to_string()));
    }
    let namespace = object
        .metadata
        .namespace
        .unwrap_or_else(|| namespace.to_string());
    let data = object
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| Ok((k, decode_value(kind, v)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(Record {
        key: RecordKey::new(kind, namespace, object.metadata.name),
        labels: object.metadata.labels.unwrap_or_default(),
        data,
    })
}

fn patch_body(kind: RecordKind, patch: &RecordPatch) -> Result<Value> {
    let mut body = Map::new();

    if !patch.labels.is_empty() {
        let labels: Map<String, Value> = patch
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().map_or(Value::Null, Value::String)))
            .collect();
        body.insert("metadata".to_string(), json!({ "labels": labels }));
    }

    if !patch.data.is_empty() {
        let mut data = Map::new();
        for (k, v) in &patch.data {
            let value = match v {
                Some(v) => Value::String(encode_value(kind, v)?),
                None => Value::Null,
            };
            data.insert(k.clone(), value);
        }
        body.insert("data".to_string(), Value::Object(data));
    }

    Ok(Value::Object(body))
}

fn status_error(key: Option<&RecordKey>, status: StatusCode, body: &str) -> StoreError {
    let parsed: WireStatus = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());

    match (status, key) {
        (StatusCode::NOT_FOUND, Some(key)) => StoreError::NotFound(key.clone()),
        (StatusCode::CONFLICT, Some(key)) => {
            if parsed.reason.as_deref() == Some("AlreadyExists") {
                StoreError::AlreadyExists(key.clone())
            } else {
                StoreError::Conflict {
                    key: key.clone(),
                    message,
                }
            }
        }
        _ => StoreError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RecordKey {
        RecordKey::new(RecordKind::Secret, "d8-system", "d8-cluster-terraform-state")
    }

    #[test]
    fn test_url_layout() {
        let store = KubeStore::new("https://10.0.0.1:6443/", None, Duration::from_secs(5)).unwrap();

        assert_eq!(
            store.object_url(&key()).as_str(),
            "https://10.0.0.1:6443/api/v1/namespaces/d8-system/secrets/d8-cluster-terraform-state"
        );
        assert_eq!(
            store
                .url(RecordKind::ConfigMap, "kube-system", None)
                .as_str(),
            "https://10.0.0.1:6443/api/v1/namespaces/kube-system/configmaps"
        );
    }

    #[test]
    fn test_secret_data_is_base64_on_the_wire() {
        let record = Record::new(key())
            .with_label("heritage", "deckhouse")
            .with_data("cluster-tf-state.json", b"{}".to_vec());

        let wire = to_wire(&record).unwrap();
        assert_eq!(
            wire.data.as_ref().unwrap().get("cluster-tf-state.json"),
            Some(&"e30=".to_string())
        );

        let back = from_wire(RecordKind::Secret, "d8-system", wire).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_null_data_and_labels_decode_as_empty() {
        let object: WireObject = serde_json::from_value(json!({
            "metadata": { "name": "d8-cluster-uuid", "labels": null },
            "data": null
        }))
        .unwrap();

        let record = from_wire(RecordKind::ConfigMap, "kube-system", object).unwrap();
        assert!(record.data.is_empty());
        assert!(record.labels.is_empty());
        assert_eq!(record.key.namespace, "kube-system");
    }

    #[test]
    fn test_patch_body_only_lists_touched_fields() {
        let patch = RecordPatch::new()
            .set_data("node-tf-state.json", b"{}".to_vec())
            .remove_data("stale");

        let body = patch_body(RecordKind::Secret, &patch).unwrap();
        assert_eq!(
            body,
            json!({ "data": { "node-tf-state.json": "e30=", "stale": null } })
        );
    }

    #[test]
    fn test_config_map_patch_rejects_binary_values() {
        let patch = RecordPatch::new().set_data("cluster-uuid", vec![0xff, 0xfe]);

        let err = patch_body(RecordKind::ConfigMap, &patch).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(err.is_rejected());

        let patch = RecordPatch::new().set_data("cluster-uuid", b"6b1f".to_vec());
        let body = patch_body(RecordKind::ConfigMap, &patch).unwrap();
        assert_eq!(body, json!({ "data": { "cluster-uuid": "6b1f" } }));
    }

    #[test]
    fn test_status_mapping() {
        let k = key();

        assert!(status_error(Some(&k), StatusCode::NOT_FOUND, "").is_not_found());
        assert!(
            status_error(
                Some(&k),
                StatusCode::CONFLICT,
                r#"{"kind":"Status","reason":"AlreadyExists","message":"exists"}"#
            )
            .is_already_exists()
        );
        assert!(matches!(
            status_error(Some(&k), StatusCode::CONFLICT, r#"{"reason":"Conflict"}"#),
            StoreError::Conflict { .. }
        ));
        assert!(matches!(
            status_error(None, StatusCode::NOT_FOUND, "gone"),
            StoreError::Api { status: 404, .. }
        ));
    }
}
