//! Node drain

use crate::cluster::ClusterApi;
use crate::error::{HealerError, Result};
use crate::models::Workload;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    pub evicted: usize,
    pub skipped: usize,
}

/// Evict every evictable workload from the node and wait until they are gone
///
/// Workloads are evicted one at a time; the first refusal aborts the drain.
/// The whole operation, including the wait, is bounded by `timeout`. On
/// expiry no further evictions are issued.
pub async fn drain_node(
    cluster: &dyn ClusterApi,
    node: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<DrainSummary> {
    let remaining = AtomicUsize::new(0);

    match tokio::time::timeout(timeout, evict_all(cluster, node, poll_interval, &remaining)).await
    {
        Ok(result) => result,
        Err(_) => Err(HealerError::DrainTimeout {
            node: node.to_string(),
            timeout,
            remaining: remaining.load(Ordering::Relaxed),
        }),
    }
}

async fn evict_all(
    cluster: &dyn ClusterApi,
    node: &str,
    poll_interval: Duration,
    remaining: &AtomicUsize,
) -> Result<DrainSummary> {
    let workloads = cluster.list_workloads(node).await?;

    let mut summary = DrainSummary::default();
    let mut to_evict = Vec::with_capacity(workloads.len());
    for workload in workloads {
        match workload.skip_reason() {
            Some(reason) => {
                debug!(node = %node, workload = %workload.key(), reason = ?reason, "Skipping workload");
                summary.skipped += 1;
            }
            None => to_evict.push(workload),
        }
    }
    remaining.store(to_evict.len(), Ordering::Relaxed);

    for workload in &to_evict {
        cluster.evict(workload).await?;
        summary.evicted += 1;
        remaining.fetch_sub(1, Ordering::Relaxed);
        debug!(node = %node, workload = %workload.key(), "Eviction accepted");
    }

    // evictions are accepted asynchronously; wait for the pods to go away
    loop {
        let current = cluster.list_workloads(node).await?;
        let left = evictable(&current).count();
        remaining.store(left, Ordering::Relaxed);
        if left == 0 {
            break;
        }
        debug!(node = %node, remaining = left, "Waiting for evicted workloads to terminate");
        tokio::time::sleep(poll_interval).await;
    }

    info!(node = %node, evicted = summary.evicted, skipped = summary.skipped, "Node drained");
    Ok(summary)
}

/// Workloads a drain would evict, in eviction order
pub fn evictable(workloads: &[Workload]) -> impl Iterator<Item = &Workload> {
    workloads.iter().filter(|w| w.skip_reason().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STATIC_WORKLOAD_ANNOTATION;
    use crate::remediation::tests::{pod, FakeCluster};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_drain_skips_daemon_and_static_workloads() {
        let cluster = FakeCluster::default();
        let mut daemon = pod("logging", "fluent-bit-abc");
        daemon.owner_kinds = vec!["DaemonSet".to_string()];
        let mut mirror = pod("kube-system", "kube-proxy-node-1");
        mirror.annotations =
            BTreeMap::from([(STATIC_WORKLOAD_ANNOTATION.to_string(), "hash".to_string())]);
        let mut done = pod("batch", "report-xyz");
        done.terminal = true;
        cluster.place(
            "node-1",
            vec![pod("default", "web-1"), daemon, mirror, done, pod("default", "web-2")],
        );

        let summary = drain_node(
            &cluster,
            "node-1",
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(summary, DrainSummary { evicted: 2, skipped: 3 });
        assert_eq!(
            cluster.evicted(),
            vec!["default/web-1".to_string(), "default/web-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_eviction_aborts_drain() {
        let cluster = FakeCluster::default();
        cluster.place(
            "node-1",
            vec![pod("default", "db-0"), pod("default", "web-1")],
        );
        cluster.reject("default/db-0");

        let err = drain_node(
            &cluster,
            "node-1",
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();

        match err {
            HealerError::EvictionRejected { workload, .. } => assert_eq!(workload, "default/db-0"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(cluster.evicted().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_reports_remaining_workloads() {
        let cluster = FakeCluster::default();
        cluster.place(
            "node-1",
            vec![pod("default", "web-1"), pod("default", "web-2")],
        );
        // evictions accepted but the pods never leave
        cluster.keep_evicted_pods();

        let err = drain_node(
            &cluster,
            "node-1",
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();

        match err {
            HealerError::DrainTimeout { node, remaining, .. } => {
                assert_eq!(node, "node-1");
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_node_drains_immediately() {
        let cluster = FakeCluster::default();
        let summary = drain_node(
            &cluster,
            "node-1",
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(summary, DrainSummary::default());
    }

    #[test]
    fn test_evictable_filter() {
        let mut daemon = pod("logging", "agent");
        daemon.owner_kinds = vec!["DaemonSet".to_string()];
        let workloads = vec![daemon, pod("default", "web-1")];
        let names: Vec<_> = evictable(&workloads).map(|w| w.key()).collect();
        assert_eq!(names, vec!["default/web-1"]);
    }
}
