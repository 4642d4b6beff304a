//! Cluster API capability
//!
//! The evaluation loop and the remediation executor only see this trait.
//! [`KubeClusterApi`] backs it with the Kubernetes API server.

mod kubernetes;

pub use kubernetes::KubeClusterApi;

use crate::error::Result;
use crate::models::{NodeInfo, Workload};
use async_trait::async_trait;

/// Read and mutate cluster objects needed for remediation
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a node; `None` when it no longer exists
    async fn get_node(&self, name: &str) -> Result<Option<NodeInfo>>;

    /// Mark the node unschedulable. Cordoning a cordoned node succeeds.
    async fn cordon(&self, name: &str) -> Result<()>;

    /// List workloads currently assigned to the node
    async fn list_workloads(&self, node: &str) -> Result<Vec<Workload>>;

    /// Request eviction of a workload
    ///
    /// A disruption-budget refusal is reported as
    /// [`HealerError::EvictionRejected`](crate::error::HealerError::EvictionRejected),
    /// never as a transport error.
    async fn evict(&self, workload: &Workload) -> Result<()>;
}
