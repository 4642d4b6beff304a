//! Remediation state machine driver

use super::drain::{drain_node, DrainSummary};
use super::gate::{DrainGate, DrainPermit};
use crate::cloud::CloudProvider;
use crate::cluster::ClusterApi;
use crate::error::{HealerError, Result};
use crate::models::{NodeInfo, OutcomeSummary, RemediationRecord, RemediationState};
use crate::observability::StructuredLogger;
use crate::policy::Policy;
use crate::store::RecordStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How often to re-list the node while waiting for evicted workloads
    pub drain_poll_interval: Duration,
    /// Node label naming the pool the node belongs to
    pub pool_label: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            drain_poll_interval: Duration::from_secs(5),
            pool_label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRemediation {
    pub attempt_id: String,
    pub drain: DrainSummary,
    pub replacement_error: Option<String>,
    pub pool_size: Option<u32>,
}

#[derive(Debug)]
pub enum RemediationOutcome {
    Completed(CompletedRemediation),
    /// Drain capacity reached; nothing was mutated
    Deferred { in_flight: usize, limit: usize },
    Failed {
        attempt_id: Option<String>,
        error: HealerError,
    },
}

impl RemediationOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, RemediationOutcome::Deferred { .. })
    }

    pub fn error(&self) -> Option<&HealerError> {
        match self {
            RemediationOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn summary(&self) -> OutcomeSummary {
        match self {
            RemediationOutcome::Completed(done) => OutcomeSummary::Completed {
                attempt_id: done.attempt_id.clone(),
                evicted: done.drain.evicted,
                skipped: done.drain.skipped,
                replacement_requested: done.replacement_error.is_none(),
                replacement_error: done.replacement_error.clone(),
                pool_size: done.pool_size,
            },
            RemediationOutcome::Deferred { in_flight, limit } => OutcomeSummary::Deferred {
                in_flight: *in_flight,
                limit: *limit,
            },
            RemediationOutcome::Failed { attempt_id, error } => OutcomeSummary::Failed {
                attempt_id: attempt_id.clone(),
                kind: error.kind().to_string(),
                error: error.to_string(),
            },
        }
    }
}

/// Executes cordon, drain and replacement for one node at a time
///
/// Every state change is written to the record store before the next
/// cluster mutation, so a crash leaves a record the next cycle can recover.
pub struct RemediationExecutor {
    cluster: Arc<dyn ClusterApi>,
    cloud: Arc<dyn CloudProvider>,
    store: Arc<dyn RecordStore>,
    gate: Arc<DrainGate>,
    logger: StructuredLogger,
    config: ExecutorConfig,
}

impl RemediationExecutor {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        cloud: Arc<dyn CloudProvider>,
        store: Arc<dyn RecordStore>,
        gate: Arc<DrainGate>,
        logger: StructuredLogger,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            cluster,
            cloud,
            store,
            gate,
            logger,
            config,
        }
    }

    pub fn gate(&self) -> &Arc<DrainGate> {
        &self.gate
    }

    pub async fn cordon(&self, node: &str) -> Result<()> {
        self.cluster.cordon(node).await
    }

    pub async fn drain(&self, node: &str, timeout: Duration) -> Result<DrainSummary> {
        drain_node(
            self.cluster.as_ref(),
            node,
            timeout,
            self.config.drain_poll_interval,
        )
        .await
    }

    /// Run one remediation attempt, updating `record` as it goes
    ///
    /// Never panics on collaborator failures: they come back as
    /// [`RemediationOutcome::Failed`] with the record already moved to the
    /// matching state.
    pub async fn remediate(
        &self,
        node: &NodeInfo,
        policy: &Policy,
        record: &mut RemediationRecord,
    ) -> RemediationOutcome {
        let limit = policy.max_concurrent_drains;
        let Some(permit) = self.gate.try_acquire(limit) else {
            return RemediationOutcome::Deferred {
                in_flight: self.gate.in_flight(),
                limit,
            };
        };

        let attempt_id = match self.begin(record).await {
            Ok(id) => id,
            Err(error) => {
                return RemediationOutcome::Failed {
                    attempt_id: None,
                    error,
                }
            }
        };
        self.logger
            .log_remediation_started(&node.name, &attempt_id, &policy.name);

        match self.run(node, policy, record, permit, &attempt_id).await {
            Ok(done) => RemediationOutcome::Completed(done),
            Err(error) => RemediationOutcome::Failed {
                attempt_id: Some(attempt_id),
                error,
            },
        }
    }

    /// Persist the attempt start; the node is not touched if this fails
    async fn begin(&self, record: &mut RemediationRecord) -> Result<String> {
        let mut next = record.clone();
        next.transition_to(RemediationState::Cordoning)?;

        let attempt_id = Uuid::new_v4().to_string();
        next.attempt_id = Some(attempt_id.clone());
        next.last_remediation_time = Some(Utc::now());
        next.last_error = None;

        self.store.save(&next).await?;
        *record = next;
        Ok(attempt_id)
    }

    async fn run(
        &self,
        node: &NodeInfo,
        policy: &Policy,
        record: &mut RemediationRecord,
        permit: DrainPermit,
        attempt_id: &str,
    ) -> Result<CompletedRemediation> {
        if let Err(e) = self.cordon(&node.name).await {
            self.fail(record, RemediationState::Healthy, &e).await;
            return Err(e);
        }

        self.advance(record, RemediationState::Draining).await?;
        let drained = self.drain(&node.name, policy.drain_timeout).await;
        drop(permit);
        let drain = match drained {
            Ok(summary) => summary,
            Err(e) => {
                record.failed_attempts += 1;
                self.fail(record, RemediationState::DrainFailed, &e).await;
                return Err(e);
            }
        };

        // the drain succeeded; a lost write here must not cost the replacement
        record.transition_to(RemediationState::Replacing)?;
        if let Err(e) = self.store.save(record).await {
            warn!(node = %node.name, error = %e, "Failed to persist replacement start, continuing");
        }
        let pool_size = self.pool_size(node).await;
        let replacement_error = match self.cloud.replace_node(&node.name).await {
            Ok(()) => None,
            Err(e) => {
                warn!(node = %node.name, error = %e, "Node replacement request failed");
                Some(e.to_string())
            }
        };

        record.failed_attempts = 0;
        record.last_error = replacement_error.clone();
        self.advance(record, RemediationState::Cooldown).await?;

        Ok(CompletedRemediation {
            attempt_id: attempt_id.to_string(),
            drain,
            replacement_error,
            pool_size,
        })
    }

    async fn pool_size(&self, node: &NodeInfo) -> Option<u32> {
        let label = self.config.pool_label.as_ref()?;
        let pool = node.labels.get(label)?;
        match self.cloud.node_pool_size(pool).await {
            Ok(size) => Some(size),
            Err(e) => {
                debug!(node = %node.name, pool = %pool, error = %e, "Pool size unavailable");
                None
            }
        }
    }

    /// Move to `next` and persist it; on a store error `record` is left as it was
    async fn advance(&self, record: &mut RemediationRecord, next: RemediationState) -> Result<()> {
        let previous = record.clone();
        record.transition_to(next)?;
        if let Err(e) = self.store.save(record).await {
            *record = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Record a failure; a store error here is logged, the original error wins
    async fn fail(&self, record: &mut RemediationRecord, next: RemediationState, error: &HealerError) {
        record.last_error = Some(error.to_string());
        if let Err(e) = record.transition_to(next) {
            warn!(node = %record.node, error = %e, "Failed remediation left record in place");
        }
        if let Err(e) = self.store.save(record).await {
            warn!(node = %record.node, error = %e, "Failed to persist remediation failure");
        }
    }
}
