//! Core data models for the node healer

use crate::error::{HealerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Name of a health signal
///
/// The well-known names are provided as constants; any other name is
/// accepted so new signals can be added through configuration alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricName(String);

impl MetricName {
    pub const DISK_IO_WAIT: &'static str = "disk_io_wait";
    pub const NETWORK_DROPS: &'static str = "network_drops";
    pub const KUBELET_ERRORS: &'static str = "kubelet_errors";
    pub const MEMORY_PRESSURE: &'static str = "memory_pressure";
    pub const CONDITION_FLAPS: &'static str = "condition_flaps";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw per-node signal values keyed by metric name
pub type SignalSet = HashMap<MetricName, f64>;

/// Node as seen by the evaluation loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub unschedulable: bool,
}

/// Workload scheduled on a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Kinds of the owning controllers (e.g. "ReplicaSet", "DaemonSet")
    pub owner_kinds: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    /// Succeeded or Failed; nothing left to evict
    pub terminal: bool,
}

/// Annotation the kubelet puts on mirror pods of static manifests
pub const STATIC_WORKLOAD_ANNOTATION: &str = "kubernetes.io/config.mirror";

impl Workload {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_daemon_managed(&self) -> bool {
        self.owner_kinds.iter().any(|kind| kind == "DaemonSet")
    }

    pub fn is_static(&self) -> bool {
        self.annotations.contains_key(STATIC_WORKLOAD_ANNOTATION)
    }

    /// Returns why the workload must be left in place, if it must
    pub fn skip_reason(&self) -> Option<SkipReason> {
        if self.is_daemon_managed() {
            Some(SkipReason::DaemonManaged)
        } else if self.is_static() {
            Some(SkipReason::StaticWorkload)
        } else if self.terminal {
            Some(SkipReason::Terminal)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DaemonManaged,
    StaticWorkload,
    Terminal,
}

/// Remediation state machine
///
/// `Healthy -> Cordoning -> Draining -> Replacing -> Cooldown -> Healthy`,
/// with `Draining -> DrainFailed` on timeout or eviction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    #[default]
    Healthy,
    Cordoning,
    Draining,
    Replacing,
    Cooldown,
    DrainFailed,
}

impl RemediationState {
    pub fn can_transition_to(self, next: RemediationState) -> bool {
        use RemediationState::*;
        matches!(
            (self, next),
            (Healthy, Cordoning)
                | (Cordoning, Draining)
                // cordon patch failed, node untouched
                | (Cordoning, Healthy)
                | (Draining, Replacing)
                | (Draining, DrainFailed)
                | (Replacing, Cooldown)
                | (Cooldown, Healthy)
                | (DrainFailed, Cordoning)
                | (DrainFailed, Healthy)
                // interrupted before the drain finished
                | (Cordoning, DrainFailed)
        )
    }

    /// A remediation was running when this state was written
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            RemediationState::Cordoning | RemediationState::Draining | RemediationState::Replacing
        )
    }
}

impl fmt::Display for RemediationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemediationState::Healthy => "Healthy",
            RemediationState::Cordoning => "Cordoning",
            RemediationState::Draining => "Draining",
            RemediationState::Replacing => "Replacing",
            RemediationState::Cooldown => "Cooldown",
            RemediationState::DrainFailed => "DrainFailed",
        };
        f.write_str(s)
    }
}

/// Per-node remediation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub node: String,
    /// Start time of the most recent remediation attempt
    pub last_remediation_time: Option<DateTime<Utc>>,
    pub state: RemediationState,
    pub attempt_id: Option<String>,
    /// Consecutive failed attempts, reset on success or operator reset
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RemediationRecord {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            last_remediation_time: None,
            state: RemediationState::Healthy,
            attempt_id: None,
            failed_attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// No further automatic attempts until an operator resets the node
    pub fn is_halted(&self, max_attempts: u32) -> bool {
        self.state == RemediationState::DrainFailed && self.failed_attempts >= max_attempts
    }

    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn transition_to(&mut self, next: RemediationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HealerError::InvalidTransition {
                node: self.node.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Action chosen by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    None,
    Monitor,
    Remediate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::None => "None",
            Action::Monitor => "Monitor",
            Action::Remediate => "Remediate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
}

impl Decision {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            action: Action::None,
            reason: reason.into(),
        }
    }

    pub fn monitor(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Monitor,
            reason: reason.into(),
        }
    }

    pub fn remediate(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Remediate,
            reason: reason.into(),
        }
    }
}

/// Outcome of one remediation attempt, as reported to status sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Completed {
        attempt_id: String,
        evicted: usize,
        skipped: usize,
        replacement_requested: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        replacement_error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pool_size: Option<u32>,
    },
    Deferred {
        in_flight: usize,
        limit: usize,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt_id: Option<String>,
        kind: String,
        error: String,
    },
}

/// Error that ended an evaluation cycle early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    pub kind: String,
    pub message: String,
}

impl From<&HealerError> for CycleError {
    fn from(err: &HealerError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What a single evaluation cycle produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeSummary>,
    pub state: RemediationState,
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_remediation_time: Option<DateTime<Utc>>,
    /// Set when the cycle aborted before a decision was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CycleError>,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: f64,
}

impl EvaluationReport {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            policy: None,
            score: None,
            decision: None,
            outcome: None,
            state: RemediationState::Healthy,
            failed_attempts: 0,
            last_remediation_time: None,
            error: None,
            evaluated_at: Utc::now(),
            duration_seconds: 0.0,
        }
    }

    pub fn with_record(mut self, record: &RemediationRecord) -> Self {
        self.state = record.state;
        self.failed_attempts = record.failed_attempts;
        self.last_remediation_time = record.last_remediation_time;
        self
    }
}
