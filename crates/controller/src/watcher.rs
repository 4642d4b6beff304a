//! Node discovery
//!
//! Watches Node objects and feeds the scheduler. Only membership changes
//! trigger an evaluation; each scheduled node requeues itself afterwards.

use futures::StreamExt;
use healer_lib::evaluator::SchedulerHandle;
use healer_lib::health::{components, HealthRegistry};
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Tracks which nodes are scheduled and reports the ones to (re)trigger
#[derive(Debug, Default)]
pub struct NodeTracker {
    known: HashSet<String>,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A node was added or updated; true when it was not yet scheduled
    pub fn applied(&mut self, name: &str) -> bool {
        self.known.insert(name.to_string())
    }

    /// A node was deleted; true when it was scheduled
    pub fn deleted(&mut self, name: &str) -> bool {
        self.known.remove(name)
    }

    /// Replace the known set after a relist
    ///
    /// Returns new nodes and nodes that vanished while the watch was down.
    /// The evaluator drops state for a vanished node on its next cycle.
    pub fn restarted(&mut self, names: impl IntoIterator<Item = String>) -> Vec<String> {
        let current: HashSet<String> = names.into_iter().collect();
        let mut triggers: Vec<String> = current.difference(&self.known).cloned().collect();
        triggers.extend(self.known.difference(&current).cloned());
        triggers.sort();
        self.known = current;
        triggers
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

pub struct NodeWatcher {
    client: Client,
    label_selector: Option<String>,
    scheduler: SchedulerHandle,
    health: HealthRegistry,
}

impl NodeWatcher {
    pub fn new(
        client: Client,
        label_selector: Option<String>,
        scheduler: SchedulerHandle,
        health: HealthRegistry,
    ) -> Self {
        Self {
            client,
            label_selector,
            scheduler,
            health,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let mut config = watcher::Config::default();
        if let Some(selector) = &self.label_selector {
            config = config.labels(selector);
        }
        info!(selector = ?self.label_selector, "Starting node watcher");

        let mut stream = watcher(nodes, config).default_backoff().boxed();
        let mut tracker = NodeTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down node watcher");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        self.health.set_healthy(components::CLUSTER_API).await;
                        for node in Self::triggers(&mut tracker, event) {
                            if !self.scheduler.trigger(node).await {
                                warn!("Scheduler stopped, node watcher exiting");
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Node watch failed, retrying with backoff");
                        self.health
                            .set_degraded(components::CLUSTER_API, e.to_string())
                            .await;
                    }
                    None => {
                        warn!("Node watch stream ended");
                        break;
                    }
                }
            }
        }
    }

    fn triggers(tracker: &mut NodeTracker, event: watcher::Event<Node>) -> Vec<String> {
        match event {
            watcher::Event::Applied(node) => {
                let name = node.name_any();
                if tracker.applied(&name) {
                    debug!(node = %name, "Node discovered");
                    vec![name]
                } else {
                    Vec::new()
                }
            }
            watcher::Event::Deleted(node) => {
                let name = node.name_any();
                if tracker.deleted(&name) {
                    debug!(node = %name, "Node removed");
                    vec![name]
                } else {
                    Vec::new()
                }
            }
            watcher::Event::Restarted(nodes) => {
                let triggers = tracker.restarted(nodes.iter().map(|node| node.name_any()));
                info!(
                    nodes = tracker.len(),
                    triggered = triggers.len(),
                    "Node list resynchronized"
                );
                triggers
            }
        }
    }
}
