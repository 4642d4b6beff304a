//! End-to-end evaluation cycles against in-memory collaborators

use async_trait::async_trait;
use chrono::Utc;
use healer_lib::cloud::NoopCloudProvider;
use healer_lib::cluster::ClusterApi;
use healer_lib::collector::SignalCollector;
use healer_lib::evaluator::{
    EvaluationScheduler, EvaluatorConfig, NodeEvaluator, Requeue, SchedulerConfig, INTERRUPTED,
};
use healer_lib::remediation::ExecutorConfig;
use healer_lib::store::{MemoryRecordStore, RecordStore};
use healer_lib::{
    Action, HealerError, MetricName, NodeInfo, OutcomeSummary, Policy, RemediationRecord,
    RemediationState, SignalSet, StaticPolicyResolver, StatusBoard, Workload,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct FakeCluster {
    nodes: Mutex<HashMap<String, NodeInfo>>,
    pods: Mutex<HashMap<String, Vec<Workload>>>,
    cordoned: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    reject_evictions: AtomicBool,
}

impl FakeCluster {
    fn add_node(&self, name: &str, workloads: Vec<Workload>) {
        self.nodes.lock().unwrap().insert(
            name.to_string(),
            NodeInfo {
                name: name.to_string(),
                ..Default::default()
            },
        );
        self.pods.lock().unwrap().insert(name.to_string(), workloads);
    }

    fn remove_node(&self, name: &str) {
        self.nodes.lock().unwrap().remove(name);
    }

    fn cordoned(&self) -> Vec<String> {
        self.cordoned.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_node(&self, name: &str) -> healer_lib::Result<Option<NodeInfo>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HealerError::ClusterApi("connection refused".to_string()));
        }
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }

    async fn cordon(&self, name: &str) -> healer_lib::Result<()> {
        self.cordoned.lock().unwrap().push(name.to_string());
        if let Some(node) = self.nodes.lock().unwrap().get_mut(name) {
            node.unschedulable = true;
        }
        Ok(())
    }

    async fn list_workloads(&self, node: &str) -> healer_lib::Result<Vec<Workload>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn evict(&self, workload: &Workload) -> healer_lib::Result<()> {
        if self.reject_evictions.load(Ordering::SeqCst) {
            return Err(HealerError::EvictionRejected {
                workload: workload.key(),
                message: "would violate disruption budget".to_string(),
            });
        }
        for pods in self.pods.lock().unwrap().values_mut() {
            pods.retain(|p| p.key() != workload.key());
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeCollector {
    signals: Mutex<HashMap<String, SignalSet>>,
    failing: AtomicBool,
    /// When set, collection waits for one notification
    hold: Mutex<Option<Arc<Notify>>>,
    collecting: AtomicBool,
}

impl FakeCollector {
    fn set_all(&self, node: &str, value: f64) {
        let signals = healer_lib::scorer::default_weights()
            .into_keys()
            .map(|metric| (metric, value))
            .collect();
        self.signals
            .lock()
            .unwrap()
            .insert(node.to_string(), signals);
    }
}

#[async_trait]
impl SignalCollector for FakeCollector {
    async fn collect(&self, node: &str) -> healer_lib::Result<SignalSet> {
        self.collecting.store(true, Ordering::SeqCst);
        let hold = self.hold.lock().unwrap().clone();
        if let Some(release) = hold {
            release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HealerError::collection(node, "prometheus unreachable"));
        }
        Ok(self
            .signals
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }
}

fn policy() -> Policy {
    Policy {
        name: "general".to_string(),
        node_selector: BTreeMap::new(),
        unhealthy_score: 0.8,
        evaluation_window: Duration::from_secs(300),
        drain_timeout: Duration::from_secs(5),
        cooldown: Duration::from_secs(30 * 60),
        max_concurrent_drains: 1,
        max_remediation_attempts: 3,
    }
}

fn web_pod(name: &str) -> Workload {
    Workload {
        namespace: "default".to_string(),
        name: name.to_string(),
        owner_kinds: vec!["ReplicaSet".to_string()],
        ..Default::default()
    }
}

struct Fixture {
    cluster: Arc<FakeCluster>,
    collector: Arc<FakeCollector>,
    store: Arc<MemoryRecordStore>,
    board: Arc<StatusBoard>,
    evaluator: Arc<NodeEvaluator>,
}

fn fixture_with(policies: Vec<Policy>) -> Fixture {
    let cluster = Arc::new(FakeCluster::default());
    let collector = Arc::new(FakeCollector::default());
    let store = Arc::new(MemoryRecordStore::new());
    let board = Arc::new(StatusBoard::new());

    let evaluator = NodeEvaluator::builder()
        .cluster(cluster.clone())
        .collector(collector.clone())
        .resolver(Arc::new(StaticPolicyResolver::new(policies).unwrap()))
        .store(store.clone())
        .cloud(Arc::new(NoopCloudProvider))
        .sink(board.clone())
        .config(EvaluatorConfig {
            default_requeue: Duration::from_secs(600),
            collection_retry: Duration::from_secs(2),
            collect_timeout: Duration::from_secs(1),
        })
        .executor_config(ExecutorConfig {
            drain_poll_interval: Duration::from_millis(10),
            pool_label: None,
        })
        .build()
        .unwrap();

    Fixture {
        cluster,
        collector,
        store,
        board,
        evaluator: Arc::new(evaluator),
    }
}

fn fixture() -> Fixture {
    fixture_with(vec![policy()])
}

#[tokio::test]
async fn test_healthy_node_is_left_alone() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![web_pod("web-1")]);
    f.collector.set_all("worker-1", 0.1);

    let outcome = f.evaluator.evaluate("worker-1").await;

    assert_eq!(outcome.requeue, Requeue::After(Duration::from_secs(300)));
    let report = outcome.report.unwrap();
    assert_eq!(report.decision.unwrap().action, Action::None);
    assert_eq!(report.policy.as_deref(), Some("general"));
    assert!(f.cluster.cordoned().is_empty());
}

#[tokio::test]
async fn test_remediation_then_cooldown_across_cycles() {
    let f = fixture();
    f.cluster
        .add_node("worker-1", vec![web_pod("web-1"), web_pod("web-2")]);
    f.collector.set_all("worker-1", 0.95);

    let first = f.evaluator.evaluate("worker-1").await.report.unwrap();
    assert_eq!(first.decision.unwrap().action, Action::Remediate);
    assert!(matches!(
        first.outcome,
        Some(OutcomeSummary::Completed { evicted: 2, .. })
    ));
    assert_eq!(first.state, RemediationState::Cooldown);
    assert_eq!(f.cluster.cordoned(), vec!["worker-1".to_string()]);

    let stored = f.store.load("worker-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RemediationState::Cooldown);
    assert!(stored.last_remediation_time.is_some());

    // still unhealthy, but the persisted start time keeps it in cooldown
    let second = f.evaluator.evaluate("worker-1").await.report.unwrap();
    let decision = second.decision.unwrap();
    assert_eq!(decision.action, Action::Monitor);
    assert_eq!(decision.reason, "unhealthy but within cooldown");
    assert!(second.outcome.is_none());
    assert_eq!(f.cluster.cordoned().len(), 1);

    assert_eq!(f.board.get("worker-1").unwrap().state, RemediationState::Cooldown);
}

#[tokio::test]
async fn test_cooldown_settles_to_healthy() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.collector.set_all("worker-1", 0.1);
    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::Cooldown;
    record.last_remediation_time = Some(Utc::now() - chrono::Duration::hours(1));
    f.store.save(&record).await.unwrap();

    let report = f.evaluator.evaluate("worker-1").await.report.unwrap();

    assert_eq!(report.state, RemediationState::Healthy);
    let stored = f.store.load("worker-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RemediationState::Healthy);
    assert_eq!(stored.last_remediation_time, record.last_remediation_time);
}

#[tokio::test]
async fn test_collection_failure_retries_soon() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.collector.failing.store(true, Ordering::SeqCst);

    let outcome = f.evaluator.evaluate("worker-1").await;

    assert_eq!(outcome.requeue, Requeue::After(Duration::from_secs(2)));
    let report = outcome.report.unwrap();
    assert_eq!(report.error.unwrap().kind, "collection");
    assert!(report.decision.is_none());
}

#[tokio::test]
async fn test_cluster_api_failure_backs_off() {
    let f = fixture();
    f.cluster.unavailable.store(true, Ordering::SeqCst);

    let outcome = f.evaluator.evaluate("worker-1").await;

    assert_eq!(outcome.requeue, Requeue::Backoff);
    assert_eq!(outcome.report.unwrap().error.unwrap().kind, "cluster_api");
}

#[tokio::test]
async fn test_deleted_node_is_forgotten() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.collector.set_all("worker-1", 0.1);
    f.evaluator.evaluate("worker-1").await;
    f.store
        .save(&RemediationRecord::new("worker-1"))
        .await
        .unwrap();
    assert!(f.board.get("worker-1").is_some());

    f.cluster.remove_node("worker-1");
    let outcome = f.evaluator.evaluate("worker-1").await;

    assert_eq!(outcome.requeue, Requeue::Forget);
    assert!(outcome.report.is_none());
    assert!(f.store.load("worker-1").await.unwrap().is_none());
    assert!(f.board.get("worker-1").is_none());
}

#[tokio::test]
async fn test_node_without_policy() {
    let mut gpu = policy();
    gpu.node_selector
        .insert("pool".to_string(), "gpu".to_string());
    let f = fixture_with(vec![gpu]);
    f.cluster.add_node("worker-1", vec![]);
    f.collector.set_all("worker-1", 1.0);

    let outcome = f.evaluator.evaluate("worker-1").await;

    assert_eq!(outcome.requeue, Requeue::After(Duration::from_secs(600)));
    let report = outcome.report.unwrap();
    assert!(report.policy.is_none());
    assert!(report.decision.is_none());
    assert!(f.cluster.cordoned().is_empty());
}

#[tokio::test]
async fn test_interrupted_drain_becomes_failed_attempt() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.collector.set_all("worker-1", 0.1);
    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::Draining;
    record.last_remediation_time = Some(Utc::now() - chrono::Duration::minutes(5));
    f.store.save(&record).await.unwrap();

    let report = f.evaluator.evaluate("worker-1").await.report.unwrap();

    assert_eq!(report.state, RemediationState::DrainFailed);
    assert_eq!(report.failed_attempts, 1);
    let stored = f.store.load("worker-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RemediationState::DrainFailed);
    assert_eq!(stored.last_error.as_deref(), Some(INTERRUPTED));
}

#[tokio::test]
async fn test_interrupted_replacement_moves_to_cooldown() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.collector.set_all("worker-1", 0.1);
    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::Replacing;
    record.last_remediation_time = Some(Utc::now() - chrono::Duration::minutes(5));
    f.store.save(&record).await.unwrap();

    let report = f.evaluator.evaluate("worker-1").await.report.unwrap();

    assert_eq!(report.state, RemediationState::Cooldown);
    assert_eq!(report.failed_attempts, 0);
}

#[tokio::test]
async fn test_halted_node_is_only_monitored() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![web_pod("web-1")]);
    f.collector.set_all("worker-1", 0.95);
    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::DrainFailed;
    record.failed_attempts = 3;
    record.last_remediation_time = Some(Utc::now() - chrono::Duration::hours(2));
    f.store.save(&record).await.unwrap();

    let report = f.evaluator.evaluate("worker-1").await.report.unwrap();

    let decision = report.decision.unwrap();
    assert_eq!(decision.action, Action::Monitor);
    assert!(decision.reason.contains("halted"));
    assert!(f.cluster.cordoned().is_empty());

    // operator reset makes the node eligible again
    let reset = f.evaluator.reset("worker-1").await.unwrap().unwrap();
    assert_eq!(reset.state, RemediationState::Healthy);
    assert_eq!(reset.failed_attempts, 0);

    let report = f.evaluator.evaluate("worker-1").await.report.unwrap();
    assert_eq!(report.decision.unwrap().action, Action::Remediate);
    assert_eq!(f.cluster.cordoned(), vec!["worker-1".to_string()]);
}

#[tokio::test]
async fn test_reset_unknown_and_in_progress_nodes() {
    let f = fixture();
    assert!(f.evaluator.reset("worker-9").await.unwrap().is_none());

    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::Draining;
    f.store.save(&record).await.unwrap();
    assert!(matches!(
        f.evaluator.reset("worker-1").await,
        Err(HealerError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_failed_attempt_is_monitored_within_cooldown() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![web_pod("web-1")]);
    f.cluster.reject_evictions.store(true, Ordering::SeqCst);
    f.collector.set_all("worker-1", 0.95);

    let first = f.evaluator.evaluate("worker-1").await;
    assert_eq!(first.requeue, Requeue::After(Duration::from_secs(300)));
    let report = first.report.unwrap();
    assert_eq!(report.decision.unwrap().action, Action::Remediate);
    assert!(matches!(report.outcome, Some(OutcomeSummary::Failed { .. })));
    assert_eq!(report.state, RemediationState::DrainFailed);
    assert_eq!(report.failed_attempts, 1);

    let second = f.evaluator.evaluate("worker-1").await.report.unwrap();
    let decision = second.decision.unwrap();
    assert_eq!(decision.action, Action::Monitor);
    assert_eq!(decision.reason, "unhealthy but within cooldown");
    assert!(second.outcome.is_none());
    assert_eq!(second.state, RemediationState::DrainFailed);
    assert_eq!(f.cluster.cordoned().len(), 1);
}

#[tokio::test]
async fn test_reset_waits_for_in_flight_cycle() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![web_pod("web-1")]);
    f.cluster.reject_evictions.store(true, Ordering::SeqCst);
    f.collector.set_all("worker-1", 0.95);
    let release = Arc::new(Notify::new());
    *f.collector.hold.lock().unwrap() = Some(release.clone());

    let mut record = RemediationRecord::new("worker-1");
    record.state = RemediationState::DrainFailed;
    record.failed_attempts = 2;
    record.last_remediation_time = Some(Utc::now() - chrono::Duration::hours(2));
    f.store.save(&record).await.unwrap();

    let evaluator = f.evaluator.clone();
    let cycle = tokio::spawn(async move { evaluator.evaluate("worker-1").await });
    while !f.collector.collecting.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let evaluator = f.evaluator.clone();
    let reset = tokio::spawn(async move { evaluator.reset("worker-1").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reset.is_finished(), "reset must wait for the running cycle");

    release.notify_one();
    let report = cycle.await.unwrap().report.unwrap();
    assert_eq!(report.state, RemediationState::DrainFailed);
    assert_eq!(report.failed_attempts, 3);

    let reset = reset.await.unwrap().unwrap().unwrap();
    assert_eq!(reset.state, RemediationState::Healthy);
    assert_eq!(reset.failed_attempts, 0);

    // the cycle's write did not overwrite the reset
    let stored = f.store.load("worker-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RemediationState::Healthy);
    assert_eq!(stored.failed_attempts, 0);
    assert!(!stored.is_halted(3));
}

#[tokio::test]
async fn test_scheduler_evaluates_triggered_nodes() {
    let f = fixture();
    f.cluster.add_node("worker-1", vec![]);
    f.cluster.add_node("worker-2", vec![]);
    f.collector.set_all("worker-1", 0.2);
    f.collector.set_all("worker-2", 0.3);

    let (scheduler, handle) =
        EvaluationScheduler::new(f.evaluator.clone(), SchedulerConfig::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let task = tokio::spawn(scheduler.run(shutdown_rx));

    assert!(handle.trigger("worker-1").await);
    assert!(handle.trigger("worker-2").await);
    assert!(handle.trigger("worker-1").await);

    tokio::time::timeout(Duration::from_secs(5), async {
        while f.board.len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let score = f.board.get("worker-2").unwrap().score.unwrap();
    assert!((score - 0.3).abs() < 1e-9);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert!(!handle.trigger("worker-1").await);
}

#[tokio::test]
async fn test_second_node_waits_for_drain_capacity() {
    let f = fixture();
    f.cluster.add_node("worker-2", vec![web_pod("web-1")]);
    f.collector.set_all("worker-2", 0.95);

    // another node is mid-drain
    let held = f.evaluator.drain_gate().try_acquire(1).unwrap();

    let outcome = f.evaluator.evaluate("worker-2").await;
    assert_eq!(outcome.requeue, Requeue::After(Duration::from_secs(300)));
    let report = outcome.report.unwrap();
    let decision = report.decision.unwrap();
    assert_eq!(decision.action, Action::Monitor);
    assert_eq!(decision.reason, "drain capacity reached");
    assert!(matches!(
        report.outcome,
        Some(OutcomeSummary::Deferred { in_flight: 1, limit: 1 })
    ));
    assert!(f.cluster.cordoned().is_empty());
    assert!(f.store.load("worker-2").await.unwrap().is_none());

    drop(held);
    let report = f.evaluator.evaluate("worker-2").await.report.unwrap();
    assert_eq!(report.decision.unwrap().action, Action::Remediate);
    assert_eq!(f.cluster.cordoned(), vec!["worker-2".to_string()]);
    assert_eq!(f.evaluator.drain_gate().in_flight(), 0);
}

#[test]
fn test_default_weights_cover_known_signals() {
    let weights = healer_lib::scorer::default_weights();
    for name in [
        MetricName::DISK_IO_WAIT,
        MetricName::NETWORK_DROPS,
        MetricName::KUBELET_ERRORS,
        MetricName::MEMORY_PRESSURE,
        MetricName::CONDITION_FLAPS,
    ] {
        assert!(weights.contains_key(&MetricName::from(name)));
    }
}
