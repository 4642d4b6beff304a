//! One evaluation cycle for one node

use crate::cloud::CloudProvider;
use crate::cluster::ClusterApi;
use crate::collector::SignalCollector;
use crate::decision::DecisionEngine;
use crate::error::{HealerError, Result, RetryClass};
use crate::health::{components, HealthRegistry};
use crate::models::{
    Action, CycleError, Decision, EvaluationReport, NodeInfo, RemediationRecord,
    RemediationState,
};
use crate::observability::StructuredLogger;
use crate::policy::{Policy, PolicyResolver};
use crate::remediation::{DrainGate, ExecutorConfig, RemediationExecutor};
use crate::scorer::Scorer;
use crate::status::StatusSink;
use crate::store::RecordStore;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Error recorded on a record found mid-remediation at cycle start
pub const INTERRUPTED: &str = "remediation interrupted";

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Next evaluation for nodes no policy applies to
    pub default_requeue: Duration,
    /// Retry delay after a signal collection failure
    pub collection_retry: Duration,
    /// Upper bound on one signal collection
    pub collect_timeout: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            default_requeue: Duration::from_secs(300),
            collection_retry: Duration::from_secs(5),
            collect_timeout: Duration::from_secs(30),
        }
    }
}

/// When the node should be evaluated next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    /// Per-node exponential backoff, owned by the scheduler
    Backoff,
    /// The node is gone; drop all state for it
    Forget,
}

#[derive(Debug)]
pub struct CycleOutcome {
    pub report: Option<EvaluationReport>,
    pub requeue: Requeue,
}

/// Runs the fetch, score, decide, remediate pipeline for a single node
pub struct NodeEvaluator {
    cluster: Arc<dyn ClusterApi>,
    collector: Arc<dyn SignalCollector>,
    resolver: Arc<dyn PolicyResolver>,
    store: Arc<dyn RecordStore>,
    executor: RemediationExecutor,
    scorer: Scorer,
    engine: DecisionEngine,
    sinks: Vec<Arc<dyn StatusSink>>,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: EvaluatorConfig,
    /// Serializes record read-modify-write between cycles and resets
    node_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NodeEvaluator {
    pub fn builder() -> NodeEvaluatorBuilder {
        NodeEvaluatorBuilder::new()
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn drain_gate(&self) -> &Arc<DrainGate> {
        self.executor.gate()
    }

    fn node_lock(&self, node: &str) -> Arc<Mutex<()>> {
        self.node_locks.entry(node.to_string()).or_default().clone()
    }

    pub async fn evaluate(&self, name: &str) -> CycleOutcome {
        let lock = self.node_lock(name);
        let _guard = lock.lock().await;
        let started = Instant::now();
        let mut report = EvaluationReport::new(name);

        let node = match self.cluster.get_node(name).await {
            Ok(Some(node)) => {
                self.health.set_healthy(components::CLUSTER_API).await;
                node
            }
            Ok(None) => return self.forget(name).await,
            Err(e) => return self.abort(report, None, e, started).await,
        };

        let Some(policy) = self.resolver.resolve(&node) else {
            debug!(node = %name, "No policy applies");
            return self
                .finish(report, Requeue::After(self.config.default_requeue), started)
                .await;
        };
        report.policy = Some(policy.name.clone());

        let mut record = match self.prepare_record(name, &policy).await {
            Ok(record) => record,
            Err(e) => return self.abort(report, Some(&policy), e, started).await,
        };
        report = report.with_record(&record);

        let score = match self.score(name).await {
            Ok(score) => score,
            Err(e) => return self.abort(report, Some(&policy), e, started).await,
        };
        report.score = Some(score);

        let (decision, requeue) = self.act(&node, &policy, score, &mut record, &mut report).await;
        report.decision = Some(decision);
        report = report.with_record(&record);

        self.finish(report, requeue, started).await
    }

    /// Load the record, then resolve leftovers from earlier cycles
    async fn prepare_record(&self, name: &str, policy: &Policy) -> Result<RemediationRecord> {
        let loaded = self.store.load(name).await?;
        self.health.set_healthy(components::RECORD_STORE).await;

        let mut record = loaded.unwrap_or_else(|| RemediationRecord::new(name));
        let recovered = self.recover_interrupted(&mut record)?;
        let settled = settle_cooldown(&mut record, policy)?;
        if recovered || settled {
            self.store.save(&record).await?;
        }
        Ok(record)
    }

    /// A record still mid-remediation means the previous run never finished
    fn recover_interrupted(&self, record: &mut RemediationRecord) -> Result<bool> {
        let from = record.state;
        match from {
            RemediationState::Cordoning | RemediationState::Draining => {
                record.transition_to(RemediationState::DrainFailed)?;
                record.failed_attempts += 1;
                record.last_error = Some(INTERRUPTED.to_string());
            }
            // drain already finished; only the replacement call is in doubt
            RemediationState::Replacing => record.transition_to(RemediationState::Cooldown)?,
            _ => return Ok(false),
        }
        self.logger.log_recovery(&record.node, from, record.state);
        Ok(true)
    }

    async fn score(&self, name: &str) -> Result<f64> {
        let signals =
            match tokio::time::timeout(self.config.collect_timeout, self.collector.collect(name))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(HealerError::collection(
                        name,
                        format!("timed out after {:?}", self.config.collect_timeout),
                    ))
                }
            };
        self.health.set_healthy(components::COLLECTOR).await;
        Ok(self.scorer.calculate_score(&signals))
    }

    async fn act(
        &self,
        node: &NodeInfo,
        policy: &Policy,
        score: f64,
        record: &mut RemediationRecord,
        report: &mut EvaluationReport,
    ) -> (Decision, Requeue) {
        let mut decision = self
            .engine
            .evaluate(score, policy, record.last_remediation_time);
        let window = Requeue::After(policy.evaluation_window);

        if decision.action == Action::Remediate && record.is_halted(policy.max_remediation_attempts)
        {
            self.logger.log_halted(&node.name, record.failed_attempts);
            decision = Decision::monitor(format!(
                "remediation halted after {} failed attempts",
                record.failed_attempts
            ));
        }
        self.logger
            .log_decision(&node.name, &policy.name, score, &decision);

        if decision.action != Action::Remediate {
            return (decision, window);
        }

        // the cooldown may have run out while signals were being collected
        if let Err(e) = settle_cooldown(record, policy) {
            warn!(node = %node.name, error = %e, "Failed to leave cooldown");
        }

        let outcome = self.executor.remediate(node, policy, record).await;
        let summary = outcome.summary();
        self.logger.log_remediation_finished(&node.name, &summary);
        report.outcome = Some(summary);

        if outcome.is_deferred() {
            return (Decision::monitor("drain capacity reached"), window);
        }

        let requeue = match outcome.error() {
            Some(e) => {
                self.health.record_error(e).await;
                self.requeue_for(e, Some(policy))
            }
            None => window,
        };
        (decision, requeue)
    }

    fn requeue_for(&self, error: &HealerError, policy: Option<&Policy>) -> Requeue {
        match error.retry_class() {
            RetryClass::Immediate => Requeue::After(self.config.collection_retry),
            RetryClass::Backoff => Requeue::Backoff,
            RetryClass::NextWindow => Requeue::After(
                policy
                    .map(|p| p.evaluation_window)
                    .unwrap_or(self.config.default_requeue),
            ),
        }
    }

    async fn abort(
        &self,
        mut report: EvaluationReport,
        policy: Option<&Policy>,
        error: HealerError,
        started: Instant,
    ) -> CycleOutcome {
        warn!(node = %report.node, kind = error.kind(), error = %error, "Evaluation cycle failed");
        self.health.record_error(&error).await;
        report.error = Some(CycleError::from(&error));
        let requeue = self.requeue_for(&error, policy);
        self.finish(report, requeue, started).await
    }

    async fn forget(&self, name: &str) -> CycleOutcome {
        debug!(node = %name, "Node no longer exists, forgetting it");
        if let Err(e) = self.store.remove(name).await {
            warn!(node = %name, error = %e, "Failed to remove record of deleted node");
        }
        for sink in &self.sinks {
            sink.forget(name);
        }
        self.node_locks.remove(name);
        CycleOutcome {
            report: None,
            requeue: Requeue::Forget,
        }
    }

    async fn finish(
        &self,
        mut report: EvaluationReport,
        requeue: Requeue,
        started: Instant,
    ) -> CycleOutcome {
        report.duration_seconds = started.elapsed().as_secs_f64();
        report.evaluated_at = Utc::now();
        for sink in &self.sinks {
            sink.publish(&report);
        }
        CycleOutcome {
            report: Some(report),
            requeue,
        }
    }

    /// Operator reset: clear failures and return the node to `Healthy`
    ///
    /// The last remediation time is kept, so the cooldown still applies.
    /// Waits for an in-flight cycle of the same node to finish first.
    /// Returns `None` when the node has no record.
    pub async fn reset(&self, node: &str) -> Result<Option<RemediationRecord>> {
        let lock = self.node_lock(node);
        let _guard = lock.lock().await;
        let Some(mut record) = self.store.load(node).await? else {
            return Ok(None);
        };

        let previous = record.state;
        if previous != RemediationState::Healthy {
            record.transition_to(RemediationState::Healthy)?;
        }
        let failed_attempts = record.failed_attempts;
        record.failed_attempts = 0;
        record.last_error = None;
        record.updated_at = Utc::now();

        self.store.save(&record).await?;
        self.logger.log_reset(node, previous, failed_attempts);
        Ok(Some(record))
    }
}

/// `Cooldown -> Healthy` once the cooldown has fully elapsed
fn settle_cooldown(record: &mut RemediationRecord, policy: &Policy) -> Result<bool> {
    if record.state != RemediationState::Cooldown {
        return Ok(false);
    }
    let elapsed = record
        .last_remediation_time
        .map(|last| (Utc::now() - last).to_std().unwrap_or(Duration::ZERO));
    match elapsed {
        Some(elapsed) if elapsed < policy.cooldown => Ok(false),
        _ => {
            record.transition_to(RemediationState::Healthy)?;
            Ok(true)
        }
    }
}

pub struct NodeEvaluatorBuilder {
    cluster: Option<Arc<dyn ClusterApi>>,
    collector: Option<Arc<dyn SignalCollector>>,
    resolver: Option<Arc<dyn PolicyResolver>>,
    store: Option<Arc<dyn RecordStore>>,
    cloud: Option<Arc<dyn CloudProvider>>,
    gate: Option<Arc<DrainGate>>,
    scorer: Scorer,
    sinks: Vec<Arc<dyn StatusSink>>,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: EvaluatorConfig,
    executor_config: ExecutorConfig,
}

impl NodeEvaluatorBuilder {
    pub fn new() -> Self {
        Self {
            cluster: None,
            collector: None,
            resolver: None,
            store: None,
            cloud: None,
            gate: None,
            scorer: Scorer::with_default_weights(),
            sinks: Vec::new(),
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("node-healer"),
            config: EvaluatorConfig::default(),
            executor_config: ExecutorConfig::default(),
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn SignalCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PolicyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cloud(mut self, cloud: Arc<dyn CloudProvider>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Share a drain gate with other evaluators; a fresh one is created otherwise
    pub fn drain_gate(mut self, gate: Arc<DrainGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<NodeEvaluator> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster API is required"))?;
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Signal collector is required"))?;
        let resolver = self
            .resolver
            .ok_or_else(|| anyhow::anyhow!("Policy resolver is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Record store is required"))?;
        let cloud = self
            .cloud
            .ok_or_else(|| anyhow::anyhow!("Cloud provider is required"))?;

        let executor = RemediationExecutor::new(
            cluster.clone(),
            cloud,
            store.clone(),
            self.gate.unwrap_or_else(DrainGate::new),
            self.logger.clone(),
            self.executor_config,
        );

        Ok(NodeEvaluator {
            cluster,
            collector,
            resolver,
            store,
            executor,
            scorer: self.scorer,
            engine: DecisionEngine::new(),
            sinks: self.sinks,
            health: self.health,
            logger: self.logger,
            config: self.config,
            node_locks: DashMap::new(),
        })
    }
}

impl Default for NodeEvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
