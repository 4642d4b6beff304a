//! Records kept on the Node object itself
//!
//! The record lives and dies with the node, so a replaced node starts with
//! a clean history and no separate state volume is needed.

use super::RecordStore;
use crate::error::{HealerError, Result};
use crate::models::RemediationRecord;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Error as KubeError};
use serde_json::json;

pub const RECORD_ANNOTATION: &str = "node-healer.io/remediation-record";

#[derive(Clone)]
pub struct NodeAnnotationStore {
    client: Client,
}

impl NodeAnnotationStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    async fn patch_annotation(&self, node: &str, value: serde_json::Value) -> Result<()> {
        let patch = json!({
            "metadata": { "annotations": { RECORD_ANNOTATION: value } }
        });
        match self
            .nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(KubeError::Api(resp)) if resp.code == 404 && value.is_null() => Ok(()),
            Err(e) => Err(HealerError::Store(format!(
                "failed to patch record annotation on node {node}: {e}"
            ))),
        }
    }
}

/// Parse the record annotation from a node's annotations
pub(crate) fn decode_record(node: &Node) -> Result<Option<RemediationRecord>> {
    let Some(raw) = node
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(RECORD_ANNOTATION))
    else {
        return Ok(None);
    };

    serde_json::from_str(raw).map(Some).map_err(|e| {
        HealerError::Store(format!(
            "invalid {RECORD_ANNOTATION} annotation on node {}: {e}",
            node.metadata.name.as_deref().unwrap_or_default()
        ))
    })
}

#[async_trait]
impl RecordStore for NodeAnnotationStore {
    async fn load(&self, node: &str) -> Result<Option<RemediationRecord>> {
        let found = self
            .nodes()
            .get_opt(node)
            .await
            .map_err(|e| HealerError::Store(format!("failed to read node {node}: {e}")))?;

        match found {
            Some(n) => decode_record(&n),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &RemediationRecord) -> Result<()> {
        let encoded = serde_json::to_string(record)
            .map_err(|e| HealerError::Store(format!("failed to encode record: {e}")))?;
        self.patch_annotation(&record.node, json!(encoded)).await
    }

    async fn remove(&self, node: &str) -> Result<()> {
        // a null value deletes the key under merge-patch semantics
        self.patch_annotation(node, serde_json::Value::Null).await
    }
}
