//! Observability infrastructure for the node healer
//!
//! Provides:
//! - Prometheus metrics (scores, decisions, remediation outcomes, drains in progress)
//! - Structured JSON logging with tracing

use crate::models::{Decision, EvaluationReport, OutcomeSummary, RemediationState};
use crate::status::StatusSink;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    GaugeVec, Histogram, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Evaluation cycles include network round trips, so buckets start at 5ms
const EVALUATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
];

static GLOBAL_METRICS: OnceLock<HealerMetricsInner> = OnceLock::new();

struct HealerMetricsInner {
    node_score: GaugeVec,
    decisions: IntCounterVec,
    remediations: IntCounterVec,
    errors: IntCounterVec,
    drains_in_progress: IntGauge,
    evaluation_duration_seconds: Histogram,
}

impl HealerMetricsInner {
    fn new() -> Self {
        Self {
            node_score: register_gauge_vec!(
                "node_healer_node_score",
                "Most recent health score per node (higher is less healthy)",
                &["node"]
            )
            .expect("Failed to register node_score"),

            decisions: register_int_counter_vec!(
                "node_healer_decisions_total",
                "Decisions taken by the decision engine",
                &["action"]
            )
            .expect("Failed to register decisions"),

            remediations: register_int_counter_vec!(
                "node_healer_remediations_total",
                "Remediation attempts by result",
                &["result"]
            )
            .expect("Failed to register remediations"),

            errors: register_int_counter_vec!(
                "node_healer_errors_total",
                "Evaluation and remediation errors by kind",
                &["kind"]
            )
            .expect("Failed to register errors"),

            drains_in_progress: register_int_gauge!(
                "node_healer_drains_in_progress",
                "Nodes currently holding a drain permit"
            )
            .expect("Failed to register drains_in_progress"),

            evaluation_duration_seconds: register_histogram!(
                "node_healer_evaluation_duration_seconds",
                "Wall-clock time of one evaluation cycle",
                EVALUATION_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_duration_seconds"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct HealerMetrics {
    _private: (),
}

impl Default for HealerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HealerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HealerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HealerMetricsInner {
        GLOBAL_METRICS.get_or_init(HealerMetricsInner::new)
    }

    pub fn set_drains_in_progress(&self, count: usize) {
        self.inner()
            .drains_in_progress
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn inc_error(&self, kind: &str) {
        self.inner().errors.with_label_values(&[kind]).inc();
    }
}

impl StatusSink for HealerMetrics {
    fn publish(&self, report: &EvaluationReport) {
        let inner = self.inner();

        if let Some(score) = report.score {
            inner
                .node_score
                .with_label_values(&[report.node.as_str()])
                .set(score);
        }
        if let Some(decision) = &report.decision {
            inner
                .decisions
                .with_label_values(&[decision.action.to_string().to_lowercase().as_str()])
                .inc();
        }
        match &report.outcome {
            Some(OutcomeSummary::Completed { .. }) => {
                inner.remediations.with_label_values(&["completed"]).inc()
            }
            Some(OutcomeSummary::Deferred { .. }) => {
                inner.remediations.with_label_values(&["deferred"]).inc()
            }
            Some(OutcomeSummary::Failed { kind, .. }) => {
                inner.remediations.with_label_values(&["failed"]).inc();
                self.inc_error(kind);
            }
            None => {}
        }
        if let Some(error) = &report.error {
            self.inc_error(&error.kind);
        }
        inner
            .evaluation_duration_seconds
            .observe(report.duration_seconds);
    }

    fn forget(&self, node: &str) {
        // absent when the node was never scored
        let _ = self.inner().node_score.remove_label_values(&[node]);
    }
}

/// Structured logger for controller events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    controller: String,
}

impl StructuredLogger {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn log_startup(&self, version: &str, policies: usize) {
        info!(
            event = "controller_started",
            controller = %self.controller,
            version = %version,
            policies = policies,
            "Node healer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller,
            reason = %reason,
            "Node healer shutting down"
        );
    }

    pub fn log_decision(&self, node: &str, policy: &str, score: f64, decision: &Decision) {
        info!(
            event = "decision",
            controller = %self.controller,
            node = %node,
            policy = %policy,
            score = score,
            action = %decision.action,
            reason = %decision.reason,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "Node evaluated"
        );
    }

    pub fn log_remediation_started(&self, node: &str, attempt_id: &str, policy: &str) {
        info!(
            event = "remediation_started",
            controller = %self.controller,
            node = %node,
            attempt_id = %attempt_id,
            policy = %policy,
            "Remediation started"
        );
    }

    pub fn log_remediation_finished(&self, node: &str, outcome: &OutcomeSummary) {
        match outcome {
            OutcomeSummary::Completed {
                attempt_id,
                evicted,
                skipped,
                replacement_requested,
                ..
            } => info!(
                event = "remediation_finished",
                controller = %self.controller,
                node = %node,
                attempt_id = %attempt_id,
                evicted = evicted,
                skipped = skipped,
                replacement_requested = replacement_requested,
                "Remediation completed"
            ),
            OutcomeSummary::Deferred { in_flight, limit } => info!(
                event = "remediation_deferred",
                controller = %self.controller,
                node = %node,
                in_flight = in_flight,
                limit = limit,
                "Drain capacity reached, remediation deferred"
            ),
            OutcomeSummary::Failed {
                attempt_id,
                kind,
                error,
            } => warn!(
                event = "remediation_failed",
                controller = %self.controller,
                node = %node,
                attempt_id = ?attempt_id,
                kind = %kind,
                error = %error,
                "Remediation failed"
            ),
        }
    }

    pub fn log_recovery(&self, node: &str, from: RemediationState, to: RemediationState) {
        warn!(
            event = "remediation_recovered",
            controller = %self.controller,
            node = %node,
            from = %from,
            to = %to,
            "Found interrupted remediation"
        );
    }

    pub fn log_halted(&self, node: &str, failed_attempts: u32) {
        warn!(
            event = "remediation_halted",
            controller = %self.controller,
            node = %node,
            failed_attempts = failed_attempts,
            "Remediation halted, operator reset required"
        );
    }

    pub fn log_reset(&self, node: &str, previous: RemediationState, failed_attempts: u32) {
        info!(
            event = "operator_reset",
            controller = %self.controller,
            node = %node,
            previous_state = %previous,
            failed_attempts = failed_attempts,
            "Remediation record reset"
        );
    }
}
