//! Kubernetes-backed cluster API

use super::ClusterApi;
use crate::error::{HealerError, Result};
use crate::models::{NodeInfo, Workload};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams, Patch, PatchParams};
use kube::{Client, Error as KubeError};
use serde_json::json;
use tracing::debug;

/// HTTP status the API server returns when a disruption budget blocks an eviction
const TOO_MANY_REQUESTS: u16 = 429;
const NOT_FOUND: u16 = 404;

#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>> {
        let node = self.nodes().get_opt(name).await?;
        Ok(node.map(node_info))
    }

    async fn cordon(&self, name: &str) -> Result<()> {
        let patch = json!({ "spec": { "unschedulable": true } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| HealerError::ClusterApi(format!("failed to cordon node {name}: {e}")))?;
        debug!(node = %name, "Node cordoned");
        Ok(())
    }

    async fn list_workloads(&self, node: &str) -> Result<Vec<Workload>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = pods.list(&params).await.map_err(|e| {
            HealerError::ClusterApi(format!("failed to list pods on node {node}: {e}"))
        })?;
        Ok(list.items.into_iter().map(workload).collect())
    }

    async fn evict(&self, workload: &Workload) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        match pods.evict(&workload.name, &EvictParams::default()).await {
            Ok(_) => Ok(()),
            // already gone
            Err(KubeError::Api(resp)) if resp.code == NOT_FOUND => Ok(()),
            Err(KubeError::Api(resp)) if resp.code == TOO_MANY_REQUESTS => {
                Err(HealerError::EvictionRejected {
                    workload: workload.key(),
                    message: resp.message,
                })
            }
            Err(e) => Err(HealerError::ClusterApi(format!(
                "failed to evict pod {}: {e}",
                workload.key()
            ))),
        }
    }
}

fn node_info(node: Node) -> NodeInfo {
    NodeInfo {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        unschedulable: node
            .spec
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false),
    }
}

fn workload(pod: Pod) -> Workload {
    let terminal = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map(|phase| phase == "Succeeded" || phase == "Failed")
        .unwrap_or(false);

    Workload {
        namespace: pod.metadata.namespace.unwrap_or_default(),
        name: pod.metadata.name.unwrap_or_default(),
        owner_kinds: pod
            .metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|owner| owner.kind)
            .collect(),
        annotations: pod.metadata.annotations.unwrap_or_default(),
        terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    #[test]
    fn test_node_conversion() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                labels: Some(BTreeMap::from([(
                    "pool".to_string(),
                    "general".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = node_info(node);
        assert_eq!(info.name, "worker-1");
        assert_eq!(info.labels["pool"], "general");
        assert!(info.unschedulable);
    }

    #[test]
    fn test_pod_conversion() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("fluent-bit-x".to_string()),
                namespace: Some("kube-system".to_string()),
                owner_references: Some(vec![OwnerReference {
                    kind: "DaemonSet".to_string(),
                    name: "fluent-bit".to_string(),
                    uid: "uid-1".to_string(),
                    api_version: "apps/v1".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let w = workload(pod);
        assert_eq!(w.key(), "kube-system/fluent-bit-x");
        assert!(w.is_daemon_managed());
        assert!(!w.terminal);
    }

    #[test]
    fn test_completed_pod_is_terminal() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("job-abc".to_string()),
                namespace: Some("batch".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(workload(pod).terminal);
    }
}
